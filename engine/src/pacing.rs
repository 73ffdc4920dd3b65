use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

/// Spacing between consecutive requests to the market data API. Has no bearing on which
/// portfolio gets chosen.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self, delay: Duration);
}

pub struct SleepPacer;

#[async_trait]
impl Pacer for SleepPacer {
    async fn pause(&self, delay: Duration) {
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}
