mod check;
mod propose;

pub use check::summarize;
pub use propose::{assemble, rank_candidates, select_window, Proposal};

use std::sync::Arc;

use anyhow::Context;
use common::{config::RebalanceConfig, util::percent};
use entity::{
    portfolio::{CandidateUniverse, HoldingSet},
    signal::PerformanceReport,
};
use history::PriceSource;
use log::{info, warn};
use serde::Serialize;
use store::{CandidateStore, HoldingStore};

use crate::{notify::Notifier, pacing::Pacer, scoring::ScoringService};

/// External services the engine talks to during a cycle.
pub struct Collaborators {
    pub prices: Arc<dyn PriceSource>,
    pub holdings: Arc<dyn HoldingStore>,
    pub candidates: Arc<dyn CandidateStore>,
    pub notifier: Arc<dyn Notifier>,
    pub pacer: Arc<dyn Pacer>,
}

pub struct RebalanceEngine {
    scoring: ScoringService,
    holdings: Arc<dyn HoldingStore>,
    candidates: Arc<dyn CandidateStore>,
    notifier: Arc<dyn Notifier>,
    pacer: Arc<dyn Pacer>,
    config: RebalanceConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Resolution {
    Accepted { attempt: usize },
    Exhausted,
}

/// What a cycle committed.
#[derive(Clone, Debug, Serialize)]
pub struct RebalanceOutcome {
    pub holdings: HoldingSet,
    // Report of the committed attempt; `None` if every attempt was inconclusive
    pub report: Option<PerformanceReport>,
    pub count_replaced: usize,
    pub attempts: usize,
    pub resolution: Resolution,
}

enum CycleState {
    Proposing {
        attempt: usize,
    },
    Checking {
        attempt: usize,
        proposal: Proposal,
    },
    Retry {
        attempt: usize,
    },
    Accepted {
        attempt: usize,
        holdings: HoldingSet,
        report: PerformanceReport,
    },
    Exhausted,
}

struct BestObserved {
    holdings: HoldingSet,
    report: Option<PerformanceReport>,
}

impl BestObserved {
    fn offer(&mut self, holdings: &HoldingSet, report: PerformanceReport) {
        let improves = match &self.report {
            Some(best) => report.ratio > best.ratio,
            None => true,
        };

        if improves {
            self.holdings = holdings.clone();
            self.report = Some(report);
        }
    }
}

impl RebalanceEngine {
    pub fn new(config: RebalanceConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            prices,
            holdings,
            candidates,
            notifier,
            pacer,
        } = collaborators;

        Self {
            scoring: ScoringService::new(prices, pacer.clone(), config.pacing.lookup_delay()),
            holdings,
            candidates,
            notifier,
            pacer,
            config,
        }
    }

    /// Runs one full rebalance cycle and persists its result exactly once.
    ///
    /// Only failures to load or save the holding set are returned as errors. Missing price data
    /// and an unreadable candidate universe degrade the cycle instead of aborting it.
    pub async fn run(&self) -> anyhow::Result<RebalanceOutcome> {
        info!("Starting rebalance cycle");

        let current = self
            .holdings
            .load()
            .await
            .context("Failed to load current holdings")?;
        let universe = self.load_universe().await;
        info!("Current holdings ({}): {current}", current.len());

        let threshold = self.config.replace_threshold;
        let initial = self.propose(&current, &universe, threshold, 0).await;
        let count_replaced = initial.count_replaced;

        // With nothing to replace every offset yields the same proposal
        let max_attempts = if count_replaced == 0 {
            1
        } else {
            self.config.retry_policy.max_attempts(count_replaced)
        };
        info!("{count_replaced} holdings to replace, up to {max_attempts} validation attempts");

        let mut best = BestObserved {
            holdings: initial.holdings.clone(),
            report: None,
        };
        let mut initial = Some(initial);
        let mut attempts = 0;
        let mut state = CycleState::Proposing { attempt: 0 };

        let (committed, report, resolution) = loop {
            state = match state {
                CycleState::Proposing { attempt } => {
                    let proposal = match initial.take() {
                        Some(proposal) => proposal,
                        None => self.propose(&current, &universe, threshold, attempt).await,
                    };
                    CycleState::Checking { attempt, proposal }
                }
                CycleState::Checking { attempt, proposal } => {
                    attempts += 1;
                    match self.check(&proposal.holdings, self.config.check_lookback).await {
                        None => {
                            warn!("Attempt {}: check inconclusive", attempt + 1);
                            CycleState::Retry { attempt }
                        }
                        Some(report) => {
                            best.offer(&proposal.holdings, report);

                            if self
                                .config
                                .acceptance
                                .accepts(report.mean_return, report.ratio)
                            {
                                info!("Attempt {}: check passed ({report})", attempt + 1);
                                CycleState::Accepted {
                                    attempt,
                                    holdings: proposal.holdings,
                                    report,
                                }
                            } else {
                                warn!("Attempt {}: check below bar ({report})", attempt + 1);
                                CycleState::Retry { attempt }
                            }
                        }
                    }
                }
                CycleState::Retry { attempt } => {
                    let next = attempt + 1;
                    if next >= max_attempts {
                        CycleState::Exhausted
                    } else {
                        self.pacer.pause(self.config.pacing.attempt_delay()).await;
                        CycleState::Proposing { attempt: next }
                    }
                }
                CycleState::Accepted {
                    attempt,
                    holdings,
                    report,
                } => break (holdings, Some(report), Resolution::Accepted { attempt }),
                CycleState::Exhausted => {
                    warn!("No attempt cleared the acceptance bar, committing the best observed");
                    break (best.holdings, best.report, Resolution::Exhausted);
                }
            };
        };

        self.holdings
            .save(&committed)
            .await
            .context("Failed to save holdings")?;

        let outcome = RebalanceOutcome {
            holdings: committed,
            report,
            count_replaced,
            attempts,
            resolution,
        };
        self.notifier.notify(&summary(&outcome)).await;

        Ok(outcome)
    }

    pub fn scoring(&self) -> &ScoringService {
        &self.scoring
    }

    async fn load_universe(&self) -> CandidateUniverse {
        match self.candidates.load().await {
            Ok(universe) => universe,
            Err(error) => {
                warn!("Failed to load candidate universe, replacements will be skipped: {error:#}");
                CandidateUniverse::new()
            }
        }
    }
}

pub fn summary(outcome: &RebalanceOutcome) -> String {
    let verdict = match outcome.resolution {
        Resolution::Accepted { attempt } => format!("accepted on attempt {}", attempt + 1),
        Resolution::Exhausted => format!("best of {} attempts", outcome.attempts),
    };

    let report = match &outcome.report {
        Some(report) => format!(
            "return {}, volatility {}, ratio {:.2}",
            percent(report.mean_return),
            percent(report.volatility),
            report.ratio
        ),
        None => "no check data".to_owned(),
    };

    format!(
        "Portfolio updated ({verdict}, {} replaced): {} | {report}",
        outcome.count_replaced, outcome.holdings
    )
}
