//! Async timeout wrappers.
//!
//! The base protocol has no handshake timeout of its own; every awaited
//! handshake step in this crate runs under an explicit deadline instead
//! of hanging indefinitely on a stalled peer.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// Default deadline for a single awaited protocol step.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay between gift-burst frames, matching the modeled client pacing.
pub const GIFT_PACING: Duration = Duration::from_millis(400);

/// Runs a future under a deadline, mapping expiry to
/// [`ProtocolError::Timeout`].
pub async fn with_timeout_error<F, T>(future: F, deadline: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expiry_maps_to_timeout_error() {
        let result = with_timeout_error(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            Duration::from_millis(10),
        )
        .await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }

    #[tokio::test]
    async fn completion_passes_through() {
        let result = with_timeout_error(async { Ok(42) }, Duration::from_secs(1)).await;
        assert_eq!(result.unwrap(), 42);
    }
}
