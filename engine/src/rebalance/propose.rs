use std::{cmp::Reverse, ops::Range};

use common::util::{percent, TotalF64};
use entity::{
    portfolio::{CandidateUniverse, HoldingSet, InstrumentId},
    signal::{Classification, ScoredInstrument},
};
use log::{debug, info, warn};
use serde::Serialize;

use super::RebalanceEngine;

/// One candidate portfolio together with how it was derived.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Proposal {
    pub holdings: HoldingSet,
    // Number of underperformers found, even when none could be replaced
    pub count_replaced: usize,
    pub losers: Vec<ScoredInstrument>,
    pub selected: Vec<InstrumentId>,
}

impl Proposal {
    fn unchanged(holdings: &HoldingSet, losers: Vec<ScoredInstrument>) -> Self {
        Self {
            holdings: holdings.clone(),
            count_replaced: losers.len(),
            losers,
            selected: Vec::new(),
        }
    }
}

impl RebalanceEngine {
    /// Scores each holding, skipping those without usable data, and classifies the rest against
    /// `threshold`.
    pub async fn evaluate_holdings(
        &self,
        holdings: &HoldingSet,
        threshold: f64,
    ) -> Vec<ScoredInstrument> {
        let mut scored = Vec::with_capacity(holdings.len());

        for id in holdings {
            match self.scoring.score(id, self.config.score_lookback).await {
                Ok(ret) => {
                    let classification = if ret <= threshold {
                        Classification::Underperformer
                    } else {
                        Classification::Keep
                    };
                    debug!("{id}: short-horizon return {} ({classification:?})", percent(ret));
                    scored.push(ScoredInstrument {
                        id: id.clone(),
                        ret,
                        classification,
                    });
                }
                Err(reason) => warn!("{id}: excluded from evaluation ({reason})"),
            }
        }

        scored
    }

    /// Builds the proposal for one attempt. For a fixed price history the result depends only on
    /// the arguments, so successive offsets walk down the same ranked candidate list.
    pub async fn propose(
        &self,
        holdings: &HoldingSet,
        universe: &CandidateUniverse,
        threshold: f64,
        attempt_offset: usize,
    ) -> Proposal {
        let losers = self
            .evaluate_holdings(holdings, threshold)
            .await
            .into_iter()
            .filter(|scored| scored.classification == Classification::Underperformer)
            .collect::<Vec<_>>();

        let count_replaced = losers.len();
        info!("Underperforming holdings: {count_replaced}");

        if count_replaced == 0 {
            info!("No replacement needed, keeping every holding");
            return Proposal::unchanged(holdings, losers);
        }

        let pool = universe.eligible(holdings, self.config.max_candidates_scored);
        info!(
            "Scoring {} candidates ({} in universe, holdings excluded)",
            pool.len(),
            universe.len()
        );

        let mut ranked = self.score_candidates(pool).await;
        if ranked.is_empty() {
            warn!("No candidate produced a usable return, skipping replacement");
            return Proposal::unchanged(holdings, losers);
        }
        rank_candidates(&mut ranked);

        let window = select_window(ranked.len(), count_replaced, attempt_offset);
        let keepers = holdings
            .iter()
            .filter(|id| !losers.iter().any(|loser| &loser.id == *id))
            .cloned();
        let (new_holdings, selected) =
            assemble(keepers, &ranked, window, self.config.portfolio_size);

        info!(
            "Attempt {}: replacing {:?} with {:?}",
            attempt_offset + 1,
            losers.iter().map(|loser| loser.id.as_str()).collect::<Vec<_>>(),
            selected.iter().map(InstrumentId::as_str).collect::<Vec<_>>()
        );
        info!(
            "Attempt {}: proposed holdings ({}): {new_holdings}",
            attempt_offset + 1,
            new_holdings.len()
        );

        Proposal {
            holdings: new_holdings,
            count_replaced,
            losers,
            selected,
        }
    }

    async fn score_candidates(&self, pool: Vec<InstrumentId>) -> Vec<ScoredInstrument> {
        let mut scored = Vec::with_capacity(pool.len());

        for id in pool {
            match self.scoring.score(&id, self.config.score_lookback).await {
                Ok(ret) => scored.push(ScoredInstrument {
                    id,
                    ret,
                    classification: Classification::Candidate,
                }),
                Err(reason) => debug!("{id}: candidate skipped ({reason})"),
            }
        }

        scored
    }
}

/// Best return first; equal returns fall back to ascending id.
pub fn rank_candidates(scored: &mut [ScoredInstrument]) {
    scored.sort_by(|a, b| {
        Reverse(TotalF64(a.ret))
            .cmp(&Reverse(TotalF64(b.ret)))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// The `count` ranked positions drawn on by attempt `offset`, clamped to the list length.
pub fn select_window(len: usize, count: usize, offset: usize) -> Range<usize> {
    let start = offset.saturating_mul(count).min(len);
    let end = start.saturating_add(count).min(len);
    start..end
}

/// Keepers in their original order, then the window, cut to `size`. A short set is topped up
/// with the ranked candidates after the window and then those before it.
pub fn assemble(
    keepers: impl IntoIterator<Item = InstrumentId>,
    ranked: &[ScoredInstrument],
    window: Range<usize>,
    size: usize,
) -> (HoldingSet, Vec<InstrumentId>) {
    let mut holdings = keepers.into_iter().collect::<HoldingSet>();
    let mut selected = Vec::new();

    for candidate in &ranked[window.clone()] {
        if holdings.insert(candidate.id.clone()) {
            selected.push(candidate.id.clone());
        }
    }
    holdings.truncate(size);

    let padding = ranked[window.end..].iter().chain(&ranked[..window.start]);
    for candidate in padding {
        if holdings.len() >= size {
            break;
        }

        if holdings.insert(candidate.id.clone()) {
            selected.push(candidate.id.clone());
        }
    }

    selected.retain(|id| holdings.contains(id));
    (holdings, selected)
}
