mod candidates;
mod holdings;

pub use candidates::CsvCandidateStore;
pub use holdings::JsonHoldingStore;

use async_trait::async_trait;
use entity::portfolio::{CandidateUniverse, HoldingSet};

/// Durable home of the current holding set.
#[async_trait]
pub trait HoldingStore: Send + Sync {
    async fn load(&self) -> anyhow::Result<HoldingSet>;

    /// Replaces the stored set as a whole; readers never observe a partial write.
    async fn save(&self, holdings: &HoldingSet) -> anyhow::Result<()>;
}

#[async_trait]
pub trait CandidateStore: Send + Sync {
    async fn load(&self) -> anyhow::Result<CandidateUniverse>;
}
