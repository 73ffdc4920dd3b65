use std::fmt::{self, Display, Formatter};

use common::{config::SignalConfig, util::percent};
use entity::{
    portfolio::{HoldingSet, InstrumentId},
    signal::MomentumSignal,
};
use log::{debug, info, warn};
use serde::Serialize;

use crate::{scoring::ScoringService, signal::momentum_signals};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Equal-weight portfolio risk over a window of daily closes.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RiskMetrics {
    // Deepest fall from a running peak, as a non-positive fraction
    pub max_drawdown: f64,
    pub annualized_volatility: f64,
    // Risk-free rate taken as zero; 0.0 when volatility is zero
    pub sharpe: f64,
}

impl Display for RiskMetrics {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "max drawdown={}, volatility={}, sharpe={:.2}",
            percent(self.max_drawdown),
            percent(self.annualized_volatility),
            self.sharpe
        )
    }
}

/// Momentum signals, risk-filter survivors and risk metrics for a committed holding set.
#[derive(Clone, Debug, Serialize)]
pub struct HoldingsReview {
    pub signals: Vec<MomentumSignal>,
    pub cleared: Vec<InstrumentId>,
    pub metrics: Option<RiskMetrics>,
}

pub async fn review_holdings(
    scoring: &ScoringService,
    holdings: &HoldingSet,
    config: &SignalConfig,
) -> HoldingsReview {
    let signals = momentum_signals(scoring, holdings, config).await;
    let cleared = apply_risk_filter(&signals, config);
    let metrics = portfolio_risk(scoring, holdings, config.risk_lookback).await;

    HoldingsReview {
        signals,
        cleared,
        metrics,
    }
}

/// Fetches `lookback` closes for every holding and computes [`RiskMetrics`] over those that have
/// usable data.
pub async fn portfolio_risk(
    scoring: &ScoringService,
    holdings: &HoldingSet,
    lookback: usize,
) -> Option<RiskMetrics> {
    let mut series = Vec::with_capacity(holdings.len());
    for id in holdings {
        match scoring.closes(id, lookback).await {
            Ok(closes) => series.push(closes),
            Err(reason) => debug!("{id}: skipped in risk metrics ({reason})"),
        }
    }

    let metrics = calculate_metrics(&series);
    match &metrics {
        Some(metrics) => info!("Portfolio risk: {metrics}"),
        None => warn!("Not enough price data to compute portfolio risk"),
    }
    metrics
}

/// Risk metrics over per-instrument close series. Series are aligned on their most recent
/// observations and cut to the shortest one; at least three common closes are needed.
pub fn calculate_metrics(series: &[Vec<f64>]) -> Option<RiskMetrics> {
    let len = series.iter().map(Vec::len).min()?;
    if len < 3 {
        return None;
    }

    let returns = series
        .iter()
        .map(|closes| {
            closes[closes.len() - len..]
                .windows(2)
                .map(|pair| pair[1] / pair[0] - 1.0)
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let instruments = returns.len() as f64;
    let days = len - 1;

    let mut cumulative = 1.0;
    let mut peak = f64::NEG_INFINITY;
    let mut max_drawdown = 0.0f64;
    for day in 0..days {
        let mean = returns.iter().map(|r| r[day]).sum::<f64>() / instruments;
        cumulative *= 1.0 + mean;
        peak = peak.max(cumulative);
        max_drawdown = max_drawdown.min((cumulative - peak) / peak);
    }

    let mean_std = returns.iter().map(|r| sample_std(r)).sum::<f64>() / instruments;
    let mean_return = returns.iter().map(|r| mean(r)).sum::<f64>() / instruments;
    let annualization = TRADING_DAYS_PER_YEAR.sqrt();

    let sharpe = if mean_std > 0.0 {
        mean_return / mean_std * annualization
    } else {
        0.0
    };

    Some(RiskMetrics {
        max_drawdown,
        annualized_volatility: mean_std * annualization,
        sharpe,
    })
}

/// Drops instruments whose momentum has hit the stop-loss or the take-profit limit.
pub fn apply_risk_filter(signals: &[MomentumSignal], config: &SignalConfig) -> Vec<InstrumentId> {
    let cleared = signals
        .iter()
        .filter(|signal| {
            if signal.score <= config.stop_loss {
                warn!("{}: stop-loss reached ({})", signal.id, percent(signal.score));
                false
            } else if signal.score >= config.take_profit {
                info!("{}: take-profit reached ({})", signal.id, percent(signal.score));
                false
            } else {
                true
            }
        })
        .map(|signal| signal.id.clone())
        .collect::<Vec<_>>();

    info!(
        "{} of {} instruments cleared the risk filter",
        cleared.len(),
        signals.len()
    );
    cleared
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

// Sample standard deviation (n - 1 denominator)
fn sample_std(values: &[f64]) -> f64 {
    let mean = mean(values);
    let variance =
        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}
