//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap broker calls with a deadline
//! - Turn an elapsed deadline into a `BrokerError::Timeout`
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - The wrapped future is dropped on timeout, cancelling the call

use std::future::Future;
use std::time::Duration;

use tokio::time;

use crate::broker::BrokerError;

/// Run a broker call, failing with `BrokerError::Timeout` past `limit`.
pub async fn with_deadline<T, F>(
    operation: &'static str,
    limit: Duration,
    call: F,
) -> Result<T, BrokerError>
where
    F: Future<Output = Result<T, BrokerError>>,
{
    match time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BrokerError::Timeout {
            operation,
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}
