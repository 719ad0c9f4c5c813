use crate::error::ConfigError;

/// Connection parameters for a shared store. All three are mandatory.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct StoreCredentials {
    /// `host:port` of the store.
    pub address: String,
    pub username: String,
    pub password: String,
}

impl StoreCredentials {
    pub fn new(
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self { address: address.into(), username: username.into(), password: password.into() }
    }

    /// Reject blank fields. Callers treat an error as fatal: the engine is never
    /// started half-configured.
    ///
    /// # Errors
    /// [`ConfigError::MissingCredential`] naming the first blank field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in
            [("address", &self.address), ("username", &self.username), ("password", &self.password)]
        {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingCredential { field });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_credentials_validate() {
        let creds = StoreCredentials::new("127.0.0.1:6379", "limiter", "s3cret");
        assert!(creds.validate().is_ok());
    }

    #[test]
    fn each_blank_field_is_reported() {
        let cases = [
            (StoreCredentials::new("", "u", "p"), "address"),
            (StoreCredentials::new("h:1", "  ", "p"), "username"),
            (StoreCredentials::new("h:1", "u", ""), "password"),
        ];
        for (creds, field) in cases {
            assert_eq!(creds.validate(), Err(ConfigError::MissingCredential { field }));
        }
    }

    #[test]
    fn debug_redacts_password() {
        let creds = StoreCredentials::new("h:1", "u", "hunter2");
        let text = format!("{:?}", creds);
        assert!(!text.contains("hunter2"));
        assert!(text.contains("<redacted>"));
    }
}
