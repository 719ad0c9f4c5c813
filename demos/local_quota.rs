//! Per-user quota in front of a tower service.
//!
//! Requests carry the caller in a `user=` query parameter. Each user gets a
//! burst of 3 and then one request every five seconds.

use std::convert::Infallible;
use std::time::Duration;

use tollgate::prelude::*;
use tower::{service_fn, Layer, ServiceExt};

fn user_param(query: &String) -> Option<String> {
    query.split('&').find_map(|pair| pair.strip_prefix("user=")).map(str::to_string)
}

/// Map a middleware outcome to an HTTP-ish status line.
fn status(result: &Result<String, AdmissionError<Infallible>>) -> &'static str {
    match result {
        Ok(_) => "200 OK",
        Err(e) if e.is_missing_identity() => "400 Bad Request",
        Err(e) if e.is_rate_limited() => "429 Too Many Requests",
        Err(_) => "500 Internal Server Error",
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("tollgate=debug").init();

    println!("=== tollgate: in-process quota ===\n");

    let limits = BucketConfig::new(3.0, 0.2)?;
    let layer = AdmissionLayer::new(LocalBucketStore::new(limits), user_param);
    let svc = layer.layer(service_fn(|query: String| async move {
        Ok::<_, Infallible>(format!("hello ({})", query))
    }));

    for query in ["user=alice", "user=alice", "user=alice", "user=alice", "user=bob", "page=1"] {
        let result = svc.clone().oneshot(query.to_string()).await;
        println!("  GET /?{:<12} -> {}", query, status(&result));
    }

    println!("\n  waiting 5s for one token to refill...\n");
    tokio::time::sleep(Duration::from_secs(5)).await;

    for query in ["user=alice", "user=alice"] {
        let result = svc.clone().oneshot(query.to_string()).await;
        println!("  GET /?{:<12} -> {}", query, status(&result));
    }

    Ok(())
}
