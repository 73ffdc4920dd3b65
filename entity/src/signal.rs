use std::fmt::{self, Display, Formatter};

use common::util::percent;
use serde::Serialize;

use crate::portfolio::InstrumentId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Classification {
    Keep,
    Underperformer,
    Candidate,
}

/// A short-horizon return computed during the current cycle. Never persisted.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoredInstrument {
    pub id: InstrumentId,
    pub ret: f64,
    pub classification: Classification,
}

/// Trading signal derived from a momentum score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TradeSignal {
    Buy,
    Sell,
    Hold,
}

impl TradeSignal {
    /// Buy at or above `buy_threshold`, sell on any loss, hold otherwise.
    pub fn from_momentum(score: f64, buy_threshold: f64) -> Self {
        if score >= buy_threshold {
            Self::Buy
        } else if score < 0.0 {
            Self::Sell
        } else {
            Self::Hold
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MomentumSignal {
    pub id: InstrumentId,
    pub score: f64,
    pub signal: TradeSignal,
}

/// Outcome of the retrospective check on one proposal.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub mean_return: f64,
    pub volatility: f64,
    // mean / volatility, or 0.0 when volatility is zero
    pub ratio: f64,
    // Instruments that contributed a return
    pub sample_count: usize,
}

impl Display for PerformanceReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "return={}, volatility={}, ratio={:.2} over {} instruments",
            percent(self.mean_return),
            percent(self.volatility),
            self.ratio,
            self.sample_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn momentum_maps_to_signal() {
        assert_eq!(TradeSignal::from_momentum(0.05, 0.02), TradeSignal::Buy);
        assert_eq!(TradeSignal::from_momentum(0.02, 0.02), TradeSignal::Buy);
        assert_eq!(TradeSignal::from_momentum(0.01, 0.02), TradeSignal::Hold);
        assert_eq!(TradeSignal::from_momentum(0.0, 0.02), TradeSignal::Hold);
        assert_eq!(TradeSignal::from_momentum(-0.001, 0.02), TradeSignal::Sell);
    }
}
