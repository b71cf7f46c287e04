//! Deadline helpers for `tokio::select!` loops

use std::future;

use tokio::time::{self, Instant};

/// Sleeps until `deadline`, or forever when there is none
///
/// Lets a select loop keep an optional timer branch without an `if` guard.
pub async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}
