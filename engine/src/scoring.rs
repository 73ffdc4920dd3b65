use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
    time::Duration,
};

use entity::{data::Bar, portfolio::InstrumentId};
use history::PriceSource;
use log::trace;

use crate::pacing::Pacer;

/// Fewest observations any return is computed from. The short-horizon return also reaches back
/// exactly this many observations.
pub const MIN_OBSERVATIONS: usize = 5;

/// Why no return could be computed for an instrument. Only ever excludes that instrument.
#[derive(Clone, Debug, PartialEq)]
pub enum DataUnavailable {
    Empty,
    TooShort { observations: usize, required: usize },
    InvalidPrice { close: f64 },
    Source(String),
}

impl Display for DataUnavailable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "no price data"),
            Self::TooShort {
                observations,
                required,
            } => write!(
                f,
                "only {observations} observations, need at least {required}"
            ),
            Self::InvalidPrice { close } => write!(f, "unusable close price {close}"),
            Self::Source(error) => write!(f, "price source error: {error}"),
        }
    }
}

impl std::error::Error for DataUnavailable {}

/// Turns price history into return figures. Every lookup is followed by the configured pause.
pub struct ScoringService {
    prices: Arc<dyn PriceSource>,
    pacer: Arc<dyn Pacer>,
    lookup_delay: Duration,
}

impl ScoringService {
    pub fn new(prices: Arc<dyn PriceSource>, pacer: Arc<dyn Pacer>, lookup_delay: Duration) -> Self {
        Self {
            prices,
            pacer,
            lookup_delay,
        }
    }

    /// Return over the last [`MIN_OBSERVATIONS`] observations. `lookback` only controls how much
    /// history is requested and is raised to the minimum if smaller.
    pub async fn score(&self, id: &InstrumentId, lookback: usize) -> Result<f64, DataUnavailable> {
        let series = self.fetch(id, lookback.max(MIN_OBSERVATIONS)).await?;
        short_horizon_return(&series)
    }

    /// Return from the first to the last observation of a `lookback`-long window.
    pub async fn window_return(
        &self,
        id: &InstrumentId,
        lookback: usize,
    ) -> Result<f64, DataUnavailable> {
        let series = self.fetch(id, lookback.max(MIN_OBSERVATIONS)).await?;
        total_return(&series)
    }

    /// Return from the close `lookback` observations back to the latest one. A few extra
    /// observations are requested so short gaps in the feed don't disqualify the instrument.
    pub async fn momentum(&self, id: &InstrumentId, lookback: usize) -> Result<f64, DataUnavailable> {
        let series = self.fetch(id, lookback.saturating_add(MIN_OBSERVATIONS)).await?;
        momentum_return(&series, lookback)
    }

    /// Closes of the last `count` observations, oldest first.
    pub async fn closes(&self, id: &InstrumentId, count: usize) -> Result<Vec<f64>, DataUnavailable> {
        let series = self.fetch(id, count.max(MIN_OBSERVATIONS)).await?;
        check_length(&series, MIN_OBSERVATIONS)?;

        series
            .iter()
            .map(|bar| {
                if bar.close.is_finite() && bar.close > 0.0 {
                    Ok(bar.close)
                } else {
                    Err(DataUnavailable::InvalidPrice { close: bar.close })
                }
            })
            .collect()
    }

    async fn fetch(&self, id: &InstrumentId, count: usize) -> Result<Vec<Bar>, DataUnavailable> {
        let result = self.prices.price_series(id, count).await;
        self.pacer.pause(self.lookup_delay).await;

        match result {
            Ok(series) => {
                trace!("{id}: {} observations", series.len());
                Ok(series)
            }
            Err(error) => Err(DataUnavailable::Source(format!("{error:#}"))),
        }
    }
}

pub fn short_horizon_return(series: &[Bar]) -> Result<f64, DataUnavailable> {
    check_length(series, MIN_OBSERVATIONS)?;
    let start = series[series.len() - MIN_OBSERVATIONS].close;
    let end = series[series.len() - 1].close;
    fractional_change(start, end)
}

pub fn total_return(series: &[Bar]) -> Result<f64, DataUnavailable> {
    check_length(series, MIN_OBSERVATIONS)?;
    fractional_change(series[0].close, series[series.len() - 1].close)
}

/// Change from the close `lookback` observations back (counting the latest as the first) to the
/// latest close.
pub fn momentum_return(series: &[Bar], lookback: usize) -> Result<f64, DataUnavailable> {
    let lookback = lookback.max(2);
    check_length(series, lookback)?;
    fractional_change(
        series[series.len() - lookback].close,
        series[series.len() - 1].close,
    )
}

fn check_length(series: &[Bar], required: usize) -> Result<(), DataUnavailable> {
    match series.len() {
        0 => Err(DataUnavailable::Empty),
        observations if observations < required => Err(DataUnavailable::TooShort {
            observations,
            required,
        }),
        _ => Ok(()),
    }
}

fn fractional_change(start: f64, end: f64) -> Result<f64, DataUnavailable> {
    if !start.is_finite() || start <= 0.0 {
        return Err(DataUnavailable::InvalidPrice { close: start });
    }

    if !end.is_finite() {
        return Err(DataUnavailable::InvalidPrice { close: end });
    }

    Ok((end - start) / start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{bars, MockPrices, RecordingPacer};

    fn service(prices: MockPrices, pacer: Arc<RecordingPacer>) -> ScoringService {
        ScoringService::new(Arc::new(prices), pacer, Duration::from_millis(300))
    }

    #[test]
    fn short_horizon_uses_fifth_from_last() {
        let series = bars(&[50.0, 80.0, 100.0, 90.0, 95.0, 99.0, 110.0]);
        let ret = short_horizon_return(&series).unwrap();
        assert!((ret - 0.10).abs() < 1e-12);
    }

    #[test]
    fn total_return_spans_window() {
        let series = bars(&[100.0, 80.0, 120.0, 90.0, 95.0, 130.0]);
        let ret = total_return(&series).unwrap();
        assert!((ret - 0.30).abs() < 1e-12);
    }

    #[test]
    fn short_or_empty_series_is_unavailable() {
        assert_eq!(short_horizon_return(&[]), Err(DataUnavailable::Empty));
        assert_eq!(
            short_horizon_return(&bars(&[1.0, 2.0, 3.0, 4.0])),
            Err(DataUnavailable::TooShort {
                observations: 4,
                required: MIN_OBSERVATIONS
            })
        );
        assert_eq!(
            total_return(&bars(&[0.0, 2.0, 3.0, 4.0, 5.0])),
            Err(DataUnavailable::InvalidPrice { close: 0.0 })
        );
        assert!(short_horizon_return(&bars(&[1.0, 2.0, 3.0, 4.0, 5.0])).is_ok());
    }

    #[test]
    fn momentum_reaches_back_lookback_observations() {
        let series = bars(&[40.0, 50.0, 60.0, 70.0, 75.0]);
        let ret = momentum_return(&series, 4).unwrap();
        assert!((ret - 0.5).abs() < 1e-12);

        assert_eq!(
            momentum_return(&series, 6),
            Err(DataUnavailable::TooShort {
                observations: 5,
                required: 6
            })
        );
    }

    #[tokio::test]
    async fn momentum_requests_extra_history() {
        let prices = MockPrices::default().with("OK", &[10.0, 10.0, 10.0, 11.0]);
        let calls = prices.calls();
        let scoring = service(prices, Arc::new(RecordingPacer::default()));

        let ret = scoring.momentum(&"OK".into(), 3).await.unwrap();
        assert!((ret - 0.1).abs() < 1e-12);
        assert_eq!(calls.lock().unwrap().as_slice(), [("OK".to_owned(), 8)]);
    }

    #[tokio::test]
    async fn closes_reject_unusable_prices() {
        let prices = MockPrices::default()
            .with("OK", &[10.0, 11.0, 12.0, 13.0, 14.0, 15.0])
            .with("BAD", &[10.0, 11.0, 0.0, 13.0, 14.0]);
        let scoring = service(prices, Arc::new(RecordingPacer::default()));

        assert_eq!(
            scoring.closes(&"OK".into(), 5).await.unwrap(),
            [11.0, 12.0, 13.0, 14.0, 15.0]
        );
        assert_eq!(
            scoring.closes(&"BAD".into(), 5).await,
            Err(DataUnavailable::InvalidPrice { close: 0.0 })
        );
    }

    #[tokio::test]
    async fn source_errors_are_absorbed_and_paced() {
        let pacer = Arc::new(RecordingPacer::default());
        let prices = MockPrices::default()
            .with("OK", &[10.0, 10.0, 10.0, 10.0, 10.0, 12.0])
            .failing("BROKEN");
        let scoring = service(prices, pacer.clone());

        let ok = scoring.score(&"OK".into(), 10).await.unwrap();
        assert!((ok - 0.2).abs() < 1e-12);

        let broken = scoring.score(&"BROKEN".into(), 10).await;
        assert!(matches!(broken, Err(DataUnavailable::Source(_))));

        let missing = scoring.score(&"MISSING".into(), 10).await;
        assert_eq!(missing, Err(DataUnavailable::Empty));

        assert_eq!(pacer.pauses(), vec![Duration::from_millis(300); 3]);
    }

    #[tokio::test]
    async fn lookback_is_raised_to_minimum() {
        let prices = MockPrices::default().with("OK", &[10.0, 11.0, 12.0, 13.0, 14.0, 15.0]);
        let calls = prices.calls();
        let scoring = service(prices, Arc::new(RecordingPacer::default()));

        scoring.score(&"OK".into(), 2).await.unwrap();
        assert_eq!(calls.lock().unwrap().as_slice(), [("OK".to_owned(), 5)]);
    }
}
