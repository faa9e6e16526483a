//! Injectable time source for the provisioning state machine

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Time source used by polling loops.
///
/// Tests either drive [`TokioClock`] under tokio's paused time or supply
/// their own implementation.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
