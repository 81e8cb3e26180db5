//! Cancellable suspension used between poll attempts.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Returned when a delay is interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Sleeps on the Tokio clock until the duration elapses or the token fires.
///
/// Clones share the token, so one `cancel()` interrupts every pending and
/// future delay.
#[derive(Debug, Clone, Default)]
pub struct Delay {
    token: CancellationToken,
}

impl Delay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Delay { token }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
