use std::time::{Duration as StdDuration, Instant};

use anyhow::{anyhow, Context};
use common::config::Config;
use entity::{data::Bar, portfolio::InstrumentId};
use reqwest::{header::CONTENT_TYPE, Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tokio::time::sleep;

const KEY_ID_HEADER: &str = "APCA-API-KEY-ID";
const SECRET_KEY_HEADER: &str = "APCA-API-SECRET-KEY";
const REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(10);
const PAGE_INTERVAL: StdDuration = StdDuration::from_millis(400);

#[derive(Clone)]
pub struct RestApi {
    client: Client,
    data_api: String,
    key_id: String,
    secret_key: String,
}

impl RestApi {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            data_api: config.urls.alpaca_data_api.clone(),
            key_id: config.keys.alpaca_key_id.clone(),
            secret_key: config.keys.alpaca_secret_key.clone(),
        })
    }

    fn data_endpoint(&self, url: Url) -> RequestBuilder {
        self.client
            .get(url)
            .header(KEY_ID_HEADER, &self.key_id)
            .header(SECRET_KEY_HEADER, &self.secret_key)
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> anyhow::Result<T> {
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(anyhow!("Request failed with status {status}: {text}"));
        }

        let res = serde_json::from_str(&text)
            .context("Failed to parse response")
            .map_err(Into::into);
        if res.is_err() {
            log::debug!("{text}");
        }
        res
    }

    /// Daily bars for `id` covering at least the last `count` trading days, in the order the
    /// API returns them. Callers normalize ordering and duplicates.
    pub async fn daily_bars(&self, id: &InstrumentId, count: usize) -> anyhow::Result<Vec<Bar>> {
        let start = (OffsetDateTime::now_utc() - calendar_span(count)).format(&Rfc3339)?;
        let url = bars_url(&self.data_api, id)?;

        let mut bars = Vec::new();
        let mut next_page_token = None;

        loop {
            let request = self.data_endpoint(url.clone()).query(&[
                ("timeframe", "1Day"),
                ("limit", "10000"),
                ("start", &*start),
            ]);

            let request = if let Some(page_token) = &next_page_token {
                request.query(&[("page_token", page_token)])
            } else {
                request
            };

            let request_sent_at = Instant::now();
            let response: BarsResponse = Self::send(request)
                .await
                .with_context(|| format!("Failed to fetch daily bars for {id}"))?;

            bars.extend(response.bars);

            next_page_token = response.next_page_token;
            if next_page_token.is_none() {
                break;
            } else {
                let elapsed = request_sent_at.elapsed();
                sleep(PAGE_INTERVAL.saturating_sub(elapsed)).await;
            }
        }

        Ok(bars)
    }

    /// Posts a plain-text message to a Slack incoming webhook.
    pub async fn post_webhook(&self, url: &str, text: &str) -> anyhow::Result<()> {
        let body = serde_json::to_string(&WebhookMessage { text })?;
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.into_bytes())
            .send()
            .await
            .context("Failed to send webhook")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Webhook rejected with status {status}: {text}"));
        }

        Ok(())
    }
}

// Identifiers are percent-encoded as a single path segment
fn bars_url(data_api: &str, id: &InstrumentId) -> anyhow::Result<Url> {
    let mut url =
        Url::parse(data_api).with_context(|| format!("Invalid data API url {data_api}"))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("Data API url {data_api} cannot take a path"))?
        .pop_if_empty()
        .extend(["stocks", id.as_str(), "bars"]);
    Ok(url)
}

// Weekends and market holidays mean `count` trading days span noticeably more calendar days
fn calendar_span(count: usize) -> Duration {
    let trading_days = i64::try_from(count).unwrap_or(i64::MAX / 2);
    Duration::days(trading_days.saturating_mul(7) / 5 + 14)
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct BarsResponse {
    #[serde(deserialize_with = "deserialize_bars", default = "Vec::new")]
    bars: Vec<Bar>,
    #[serde(default)]
    next_page_token: Option<String>,
}

fn deserialize_bars<'de, D>(deserializer: D) -> Result<Vec<Bar>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt_bars: Option<Vec<Bar>> = Deserialize::deserialize(deserializer)?;
    Ok(opt_bars.unwrap_or_default())
}
