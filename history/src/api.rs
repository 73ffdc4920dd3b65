use async_trait::async_trait;
use log::trace;

use entity::{data::Bar, portfolio::InstrumentId};
use rest::RestApi;

/// Daily close history for a single instrument.
#[async_trait]
pub trait PriceSource: Send + Sync + 'static {
    /// At most `count` bars, oldest first, with at most one bar per calendar date. An empty
    /// vector means the source has no data for the instrument.
    async fn price_series(&self, id: &InstrumentId, count: usize) -> anyhow::Result<Vec<Bar>>;
}

pub struct RestPriceSource {
    rest: RestApi,
}

impl RestPriceSource {
    pub fn new(rest: RestApi) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl PriceSource for RestPriceSource {
    async fn price_series(&self, id: &InstrumentId, count: usize) -> anyhow::Result<Vec<Bar>> {
        let bars = self.rest.daily_bars(id, count).await?;
        let received = bars.len();
        let series = normalize_series(bars, count);
        trace!("{id}: received {received} bars, kept {}", series.len());
        Ok(series)
    }
}

/// Sorts bars oldest to newest, keeps the last bar seen for each calendar date, and retains only
/// the newest `count`.
pub fn normalize_series(mut bars: Vec<Bar>, count: usize) -> Vec<Bar> {
    // Stable, so among bars with equal timestamps the later one in the payload stays later
    bars.sort_by_key(|bar| bar.time);

    let mut series: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match series.last_mut() {
            Some(last) if last.time.date() == bar.time.date() => *last = bar,
            _ => series.push(bar),
        }
    }

    let excess = series.len().saturating_sub(count);
    series.drain(..excess);
    series
}
