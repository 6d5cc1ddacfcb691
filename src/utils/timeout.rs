//! Timeout helpers for link I/O.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Upper bound on a single frame write
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long accept loops wait for links to wind down on shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `future`, mapping an elapsed deadline to [`ProtocolError::Timeout`]
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let result = with_timeout_error(async { Ok(5) }, Duration::from_millis(100)).await;
        assert!(matches!(result, Ok(5)));
    }

    #[tokio::test]
    async fn test_elapsed_deadline_is_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        };
        let result = with_timeout_error(slow, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }
}
