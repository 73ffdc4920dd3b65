//! In-memory collaborators for unit tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use entity::{
    data::Bar,
    portfolio::{CandidateUniverse, HoldingSet, InstrumentId, InstrumentMeta},
};
use history::PriceSource;
use store::{CandidateStore, HoldingStore};
use time::{macros::datetime, Duration as TimeDuration};

use crate::{notify::Notifier, pacing::Pacer};

pub fn bars(closes: &[f64]) -> Vec<Bar> {
    let origin = datetime!(2024-01-01 05:00 UTC);
    closes
        .iter()
        .enumerate()
        .map(|(day, &close)| Bar::new(origin + TimeDuration::days(day as i64), close))
        .collect()
}

/// Sixty closes whose last five give `score` as the short-horizon return and whose full span gives
/// `window` as the total return.
pub fn closes(score: f64, window: f64) -> Vec<f64> {
    let last = 100.0 * (1.0 + window);
    let start = last / (1.0 + score);
    let mut closes = vec![100.0; 55];
    closes.extend([start; 4]);
    closes.push(last);
    closes
}

pub fn holdings(ids: &[&str]) -> HoldingSet {
    ids.iter().copied().map(InstrumentId::from).collect()
}

pub fn universe(ids: &[&str]) -> CandidateUniverse {
    ids.iter()
        .copied()
        .map(|id| (InstrumentId::from(id), InstrumentMeta::default()))
        .collect()
}

pub fn ids(set: &HoldingSet) -> Vec<&str> {
    set.iter().map(InstrumentId::as_str).collect()
}

#[derive(Default)]
pub struct MockPrices {
    series: HashMap<String, Vec<f64>>,
    failing: HashSet<String>,
    failing_counts: HashSet<usize>,
    failing_pairs: HashSet<(String, usize)>,
    calls: Arc<Mutex<Vec<(String, usize)>>>,
}

impl MockPrices {
    pub fn with(mut self, id: &str, closes: &[f64]) -> Self {
        self.series.insert(id.to_owned(), closes.to_vec());
        self
    }

    pub fn scored(self, id: &str, score: f64, window: f64) -> Self {
        self.with(id, &closes(score, window))
    }

    pub fn failing(mut self, id: &str) -> Self {
        self.failing.insert(id.to_owned());
        self
    }

    /// Every request for exactly `count` observations fails.
    pub fn fail_when_count(mut self, count: usize) -> Self {
        self.failing_counts.insert(count);
        self
    }

    /// Requests for `id` fail only when exactly `count` observations are asked for.
    pub fn failing_at(mut self, id: &str, count: usize) -> Self {
        self.failing_pairs.insert((id.to_owned(), count));
        self
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<(String, usize)>>> {
        self.calls.clone()
    }
}

#[async_trait]
impl PriceSource for MockPrices {
    async fn price_series(&self, id: &InstrumentId, count: usize) -> anyhow::Result<Vec<Bar>> {
        self.calls
            .lock()
            .unwrap()
            .push((id.as_str().to_owned(), count));

        if self.failing.contains(id.as_str())
            || self.failing_counts.contains(&count)
            || self.failing_pairs.contains(&(id.as_str().to_owned(), count))
        {
            return Err(anyhow!("connection reset"));
        }

        let closes = self
            .series
            .get(id.as_str())
            .map(Vec::as_slice)
            .unwrap_or_default();
        let skip = closes.len().saturating_sub(count);
        Ok(bars(&closes[skip..]))
    }
}

#[derive(Default)]
pub struct RecordingPacer {
    pauses: Mutex<Vec<Duration>>,
}

impl RecordingPacer {
    pub fn pauses(&self) -> Vec<Duration> {
        self.pauses.lock().unwrap().clone()
    }
}

#[async_trait]
impl Pacer for RecordingPacer {
    async fn pause(&self, delay: Duration) {
        self.pauses.lock().unwrap().push(delay);
    }
}

#[derive(Default)]
pub struct MemoryHoldingStore {
    holdings: Mutex<HoldingSet>,
    saves: Mutex<Vec<HoldingSet>>,
    fail_load: bool,
    fail_save: bool,
}

impl MemoryHoldingStore {
    pub fn new(holdings: HoldingSet) -> Self {
        Self {
            holdings: Mutex::new(holdings),
            ..Self::default()
        }
    }

    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    pub fn failing_save(mut self) -> Self {
        self.fail_save = true;
        self
    }

    pub fn saves(&self) -> Vec<HoldingSet> {
        self.saves.lock().unwrap().clone()
    }
}

#[async_trait]
impl HoldingStore for MemoryHoldingStore {
    async fn load(&self) -> anyhow::Result<HoldingSet> {
        if self.fail_load {
            return Err(anyhow!("disk unavailable"));
        }
        Ok(self.holdings.lock().unwrap().clone())
    }

    async fn save(&self, holdings: &HoldingSet) -> anyhow::Result<()> {
        if self.fail_save {
            return Err(anyhow!("disk full"));
        }
        self.saves.lock().unwrap().push(holdings.clone());
        *self.holdings.lock().unwrap() = holdings.clone();
        Ok(())
    }
}

/// `None` behaves like an unreadable candidates file.
pub struct MemoryCandidateStore(pub Option<CandidateUniverse>);

#[async_trait]
impl CandidateStore for MemoryCandidateStore {
    async fn load(&self) -> anyhow::Result<CandidateUniverse> {
        self.0
            .clone()
            .ok_or_else(|| anyhow!("candidates file missing"))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_owned());
    }
}
