use std::{
    panic::{self, AssertUnwindSafe},
    path::Path,
    sync::Arc,
};

use anyhow::Context;
use common::config::{Config, CONFIG_PATH};
use engine::{
    logging,
    notify::make_notifier,
    pacing::SleepPacer,
    rebalance::{Collaborators, RebalanceEngine},
    risk::review_holdings,
};
use log::{debug, error};
use rest::RestApi;
use store::{CsvCandidateStore, JsonHoldingStore};
use tokio::runtime::Builder;

fn main() {
    if let Err(error) = setup_and_launch() {
        println!("{error:?}");
    }
}

fn setup_and_launch() -> Result<(), anyhow::Error> {
    let config = Config::load(Path::new(CONFIG_PATH)).context("Failed to initialize config")?;

    logging::init_logger(config.log_level_filter).context("Failed to initialize logger")?;

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()
            .context("Failed to launch runtime")
            .and_then(|rt| rt.block_on(launch(config)))
    }));

    match result {
        Ok(Ok(())) => (),
        Ok(Err(error)) => error!("Caught error: {error:?}"),
        Err(panic) => {
            let message = panic
                .downcast_ref::<String>()
                .map(|string| &**string)
                .or_else(|| panic.downcast_ref::<&'static str>().copied());

            match message {
                Some(message) => error!("Caught panic: {message}"),
                None => error!("Caught panic; unable to extract associated message"),
            }
        }
    }

    logging::cleanup();
    Ok(())
}

async fn launch(config: Config) -> anyhow::Result<()> {
    let rest_api = RestApi::new(&config).context("Failed to setup REST API")?;
    let notifier = make_notifier(&rest_api, config.slack_webhook.clone());

    let engine = RebalanceEngine::new(
        config.rebalance.clone(),
        Collaborators {
            prices: Arc::new(history::init_price_source(rest_api)),
            holdings: Arc::new(JsonHoldingStore::new(&config.paths.holdings)),
            candidates: Arc::new(CsvCandidateStore::new(&config.paths.candidates)),
            notifier: notifier.clone(),
            pacer: Arc::new(SleepPacer),
        },
    );

    notifier.notify("Starting portfolio rebalance").await;

    match engine.run().await {
        Ok(outcome) => {
            debug!(
                "Rebalance outcome: {}",
                serde_json::to_string(&outcome).unwrap_or_else(|error| error.to_string())
            );

            let review =
                review_holdings(engine.scoring(), &outcome.holdings, &config.signals).await;
            debug!(
                "Holdings review: {}",
                serde_json::to_string(&review).unwrap_or_else(|error| error.to_string())
            );
            if let Some(metrics) = review.metrics {
                notifier
                    .notify(&format!(
                        "Portfolio risk: {metrics} ({} of {} holdings within risk limits)",
                        review.cleared.len(),
                        outcome.holdings.len()
                    ))
                    .await;
            }
            Ok(())
        }
        Err(error) => {
            notifier
                .notify(&format!("Portfolio rebalance failed: {error:#}"))
                .await;
            Err(error)
        }
    }
}
