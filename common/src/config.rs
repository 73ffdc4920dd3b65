use crate::util::SerdeLevelFilter;
use anyhow::{anyhow, Context};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{
    env::{self, VarError},
    fs::{self, File, OpenOptions},
    io::{Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

const ALPACA_KEY_ID_ENV_VAR: &str = "ALPACA_KEY_ID";
const ALPACA_SECRET_KEY_ENV_VAR: &str = "ALPACA_SECRET_KEY";
const SLACK_WEBHOOK_ENV_VAR: &str = "SLACK_WEBHOOK_URL";
pub const CONFIG_PATH: &str = "./config.json";

/// Everything the rebalancer needs to run one cycle. Built once in `main` and handed to each
/// collaborator; nothing below reads the environment on its own.
pub struct Config {
    pub keys: ApiKeys,
    pub slack_webhook: Option<String>,
    pub urls: Urls,
    pub paths: Paths,
    pub rebalance: RebalanceConfig,
    pub signals: SignalConfig,
    pub log_level_filter: LevelFilter,
}

impl Config {
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let keys = ApiKeys::from_env()?;
        let slack_webhook = read_opt_env_var(SLACK_WEBHOOK_ENV_VAR)?;
        let on_disk_config = OnDiskConfig::load_or_init(config_path)?;

        on_disk_config
            .rebalance
            .validate()
            .context("Invalid rebalance config")?;
        on_disk_config
            .signals
            .validate()
            .context("Invalid signal config")?;

        Ok(Self {
            keys,
            slack_webhook,
            urls: on_disk_config.urls,
            paths: on_disk_config.paths,
            rebalance: on_disk_config.rebalance,
            signals: on_disk_config.signals,
            log_level_filter: on_disk_config.log_level_filter,
        })
    }
}

pub struct ApiKeys {
    pub alpaca_key_id: String,
    pub alpaca_secret_key: String,
}

impl ApiKeys {
    fn from_env() -> anyhow::Result<Self> {
        let alpaca_key_id = read_env_var(ALPACA_KEY_ID_ENV_VAR)?;
        let alpaca_secret_key = read_env_var(ALPACA_SECRET_KEY_ENV_VAR)?;

        Ok(Self {
            alpaca_key_id,
            alpaca_secret_key,
        })
    }
}

#[derive(Serialize, Deserialize)]
pub struct Urls {
    pub alpaca_data_api: String,
}

impl Default for Urls {
    fn default() -> Self {
        Self {
            alpaca_data_api: "https://data.alpaca.markets/v2".to_owned(),
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct Paths {
    pub holdings: PathBuf,
    pub candidates: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            holdings: PathBuf::from("./stocks/current_stocks.json"),
            candidates: PathBuf::from("./stocks/candidates.csv"),
        }
    }
}

fn read_env_var(env_var: &str) -> anyhow::Result<String> {
    read_opt_env_var(env_var)?.ok_or_else(|| anyhow!("Missing required env var {env_var}"))
}

fn read_opt_env_var(env_var: &str) -> anyhow::Result<Option<String>> {
    match env::var(env_var) {
        Ok(var) => Ok(Some(var)),
        Err(VarError::NotPresent) => Ok(None),
        Err(error @ VarError::NotUnicode(_)) => {
            Err(anyhow!("Failed to parse env var {env_var}: {error}"))
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RebalanceConfig {
    // Fixed number of instruments held after a rebalance
    pub portfolio_size: usize,
    // Holdings whose short-horizon return is at or below this are replaced
    pub replace_threshold: f64,
    // Trailing observations requested when scoring an instrument
    pub score_lookback: usize,
    // Trailing observations requested for the retrospective check
    pub check_lookback: usize,
    // Candidates scored per attempt, after static pre-ranking. `None` scores the whole pool.
    pub max_candidates_scored: Option<usize>,
    pub retry_policy: RetryPolicy,
    pub acceptance: AcceptanceBar,
    pub pacing: PacingConfig,
}

impl RebalanceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.portfolio_size == 0 {
            return Err(anyhow!("Portfolio size must be positive"));
        }

        if !self.replace_threshold.is_finite() {
            return Err(anyhow!(
                "Replace threshold must be finite, got {}",
                self.replace_threshold
            ));
        }

        if self.max_candidates_scored == Some(0) {
            return Err(anyhow!(
                "Candidate cap must be positive; use null to score every candidate"
            ));
        }

        self.retry_policy.validate()
    }
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            portfolio_size: 10,
            replace_threshold: -0.02,
            score_lookback: 10,
            check_lookback: 12 * 5,
            max_candidates_scored: Some(100),
            retry_policy: RetryPolicy::default(),
            acceptance: AcceptanceBar::default(),
            pacing: PacingConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryTier {
    pub max_replaced: usize,
    pub attempts: usize,
}

/// Step function from the number of replaced holdings to the number of validation attempts.
///
/// Tiers are checked in order and the first one whose `max_replaced` covers the replacement
/// count wins; anything past the last tier gets `fallback_attempts`. A valid policy never grants
/// more attempts to a larger replacement count.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub tiers: Vec<RetryTier>,
    pub fallback_attempts: usize,
}

impl RetryPolicy {
    pub fn max_attempts(&self, count_replaced: usize) -> usize {
        self.tiers
            .iter()
            .find(|tier| count_replaced <= tier.max_replaced)
            .map(|tier| tier.attempts)
            .unwrap_or(self.fallback_attempts)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.fallback_attempts == 0 {
            return Err(anyhow!("Fallback attempt count must be positive"));
        }

        for pair in self.tiers.windows(2) {
            let (lower, upper) = (pair[0], pair[1]);
            if upper.max_replaced <= lower.max_replaced {
                return Err(anyhow!(
                    "Retry tiers must be sorted by strictly increasing max_replaced ({} then {})",
                    lower.max_replaced,
                    upper.max_replaced
                ));
            }

            if upper.attempts > lower.attempts {
                return Err(anyhow!(
                    "Retry tier for up to {} replacements allows more attempts than the tier for up to {}",
                    upper.max_replaced,
                    lower.max_replaced
                ));
            }
        }

        if let Some(tier) = self
            .tiers
            .iter()
            .find(|tier| tier.attempts < self.fallback_attempts)
        {
            return Err(anyhow!(
                "Retry tier for up to {} replacements allows fewer attempts than the fallback",
                tier.max_replaced
            ));
        }

        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                RetryTier {
                    max_replaced: 3,
                    attempts: 3,
                },
                RetryTier {
                    max_replaced: 5,
                    attempts: 2,
                },
            ],
            fallback_attempts: 1,
        }
    }
}

/// Both bounds are exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceBar {
    pub min_ratio: f64,
    pub min_mean_return: f64,
}

impl AcceptanceBar {
    pub fn accepts(&self, mean_return: f64, ratio: f64) -> bool {
        ratio > self.min_ratio && mean_return > self.min_mean_return
    }
}

impl Default for AcceptanceBar {
    fn default() -> Self {
        Self {
            min_ratio: 1.0,
            min_mean_return: 0.01,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PacingConfig {
    pub lookup_delay_ms: u64,
    pub attempt_delay_ms: u64,
}

impl PacingConfig {
    pub fn lookup_delay(&self) -> Duration {
        Duration::from_millis(self.lookup_delay_ms)
    }

    pub fn attempt_delay(&self) -> Duration {
        Duration::from_millis(self.attempt_delay_ms)
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            lookup_delay_ms: 500,
            attempt_delay_ms: 3000,
        }
    }
}

/// Momentum signal and risk filter settings for the post-cycle report.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    // Observations between the reference close and the latest close
    pub momentum_lookback: usize,
    // Momentum at or above this is a buy
    pub buy_threshold: f64,
    // Momentum at or below this is excluded as a stop-loss
    pub stop_loss: f64,
    // Momentum at or above this is excluded as a take-profit
    pub take_profit: f64,
    // Trailing observations used for drawdown, volatility and Sharpe
    pub risk_lookback: usize,
}

impl SignalConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.momentum_lookback < 2 {
            return Err(anyhow!("Momentum lookback must span at least 2 observations"));
        }

        if self.risk_lookback < 3 {
            return Err(anyhow!("Risk lookback must span at least 3 observations"));
        }

        if !(self.stop_loss.is_finite() && self.take_profit.is_finite()) {
            return Err(anyhow!("Stop-loss and take-profit must be finite"));
        }

        if self.stop_loss >= self.take_profit {
            return Err(anyhow!(
                "Stop-loss {} must be below take-profit {}",
                self.stop_loss,
                self.take_profit
            ));
        }

        Ok(())
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            momentum_lookback: 20,
            buy_threshold: 0.02,
            stop_loss: -0.1,
            take_profit: 0.1,
            risk_lookback: 12 * 5,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct OnDiskConfig {
    #[serde(default)]
    urls: Urls,
    #[serde(default)]
    paths: Paths,
    rebalance: RebalanceConfig,
    #[serde(default)]
    signals: SignalConfig,
    #[serde(with = "SerdeLevelFilter")]
    log_level_filter: LevelFilter,
}

impl OnDiskConfig {
    fn load_or_init(config_path: &Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            let mut config_file =
                File::create(config_path).context("Failed to create config file")?;
            let (default, buf) = Self::default_serialized();
            config_file
                .write_all(buf.as_bytes())
                .context("Failed to write default config")?;
            return Ok(default);
        }

        let mut config_file = OpenOptions::new()
            .read(true)
            .write(false)
            .open(config_path)
            .context("Failed to open config file")?;

        let mut buf = String::with_capacity(usize::try_from(config_file.metadata()?.len())?);
        config_file
            .read_to_string(&mut buf)
            .context("Failed to read config file")?;

        match serde_json::from_str::<Self>(&buf) {
            Ok(config) => Ok(config),
            Err(error) => {
                println!("Failed to read on-disk config ({error}), writing default config.");
                let (default, buf) = Self::default_serialized();
                drop(config_file);
                fs::write(config_path, buf.as_bytes()).context("Failed to write default config")?;
                Ok(default)
            }
        }
    }

    fn default_serialized() -> (Self, String) {
        let default = Self::default();
        let serialized =
            serde_json::to_string_pretty(&default).expect("Failed to serialize on-disk config");

        (default, serialized)
    }
}

impl Default for OnDiskConfig {
    fn default() -> Self {
        Self {
            urls: Urls::default(),
            paths: Paths::default(),
            rebalance: RebalanceConfig::default(),
            signals: SignalConfig::default(),
            log_level_filter: LevelFilter::Debug,
        }
    }
}
