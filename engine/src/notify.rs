use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use rest::RestApi;

/// Fire-and-forget message sink. Delivery failures are logged and otherwise ignored.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

pub struct SlackNotifier {
    rest: RestApi,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(rest: RestApi, webhook_url: String) -> Self {
        Self { rest, webhook_url }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, message: &str) {
        info!("{message}");
        if let Err(error) = self.rest.post_webhook(&self.webhook_url, message).await {
            warn!("Failed to deliver Slack notification: {error:#}");
        }
    }
}

/// Used when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) {
        info!("{message}");
    }
}

pub fn make_notifier(rest: &RestApi, webhook_url: Option<String>) -> Arc<dyn Notifier> {
    match webhook_url {
        Some(url) if !url.is_empty() => Arc::new(SlackNotifier::new(rest.clone(), url)),
        _ => Arc::new(LogNotifier),
    }
}
