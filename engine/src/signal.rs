use common::{config::SignalConfig, util::percent};
use entity::{
    portfolio::HoldingSet,
    signal::{MomentumSignal, TradeSignal},
};
use log::{info, warn};

use crate::scoring::ScoringService;

/// Momentum signal for each instrument in `holdings`, in holding order. Instruments without
/// enough history are left out.
pub async fn momentum_signals(
    scoring: &ScoringService,
    holdings: &HoldingSet,
    config: &SignalConfig,
) -> Vec<MomentumSignal> {
    let mut signals = Vec::with_capacity(holdings.len());

    for id in holdings {
        match scoring.momentum(id, config.momentum_lookback).await {
            Ok(score) => {
                let signal = TradeSignal::from_momentum(score, config.buy_threshold);
                info!("{id}: momentum {}, signal {signal:?}", percent(score));
                signals.push(MomentumSignal {
                    id: id.clone(),
                    score,
                    signal,
                });
            }
            Err(reason) => warn!("{id}: no momentum signal ({reason})"),
        }
    }

    signals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{holdings, MockPrices, RecordingPacer};
    use std::{sync::Arc, time::Duration};

    #[tokio::test]
    async fn signals_follow_holding_order() {
        let prices = MockPrices::default()
            .with("UP", &[100.0, 100.0, 100.0, 105.0])
            .with("FLAT", &[100.0, 100.0, 100.0, 101.0])
            .with("DOWN", &[100.0, 100.0, 100.0, 95.0])
            .with("SHORT", &[100.0, 101.0]);
        let scoring = ScoringService::new(
            Arc::new(prices),
            Arc::new(RecordingPacer::default()),
            Duration::ZERO,
        );
        let config = SignalConfig {
            momentum_lookback: 3,
            ..SignalConfig::default()
        };

        let signals =
            momentum_signals(&scoring, &holdings(&["DOWN", "SHORT", "UP", "FLAT"]), &config).await;
        let summary = signals
            .iter()
            .map(|s| (s.id.as_str(), s.signal))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            [
                ("DOWN", TradeSignal::Sell),
                ("UP", TradeSignal::Buy),
                ("FLAT", TradeSignal::Hold)
            ]
        );
    }
}
