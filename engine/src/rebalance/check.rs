use common::util::percent;
use entity::{portfolio::HoldingSet, signal::PerformanceReport};
use log::{debug, info, warn};

use super::RebalanceEngine;

impl RebalanceEngine {
    /// Buy-and-hold look back over `lookback_window` observations. `None` means no instrument in
    /// the proposal had usable history, which makes the attempt inconclusive.
    pub async fn check(
        &self,
        proposed: &HoldingSet,
        lookback_window: usize,
    ) -> Option<PerformanceReport> {
        info!("Running retrospective check on {} instruments", proposed.len());

        let mut returns = Vec::with_capacity(proposed.len());
        for id in proposed {
            match self.scoring.window_return(id, lookback_window).await {
                Ok(ret) => {
                    debug!("{id}: window return {}", percent(ret));
                    returns.push(ret);
                }
                Err(reason) => debug!("{id}: skipped in check ({reason})"),
            }
        }

        let report = summarize(&returns);
        if report.is_none() {
            warn!("Retrospective check has no usable data");
        }
        report
    }
}

/// Mean, population standard deviation, and their ratio across per-instrument returns.
pub fn summarize(returns: &[f64]) -> Option<PerformanceReport> {
    if returns.is_empty() {
        return None;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / n;
    let volatility = variance.sqrt();
    let ratio = if volatility > 0.0 {
        mean / volatility
    } else {
        0.0
    };

    Some(PerformanceReport {
        mean_return: mean,
        volatility,
        ratio,
        sample_count: returns.len(),
    })
}
