//! Periodically replays dead-lettered provider notifications.
//!
//! A notification lands in the dead letter when it arrives before the order it refers to
//! is linked to a provider transaction, or while the order is contended. Replaying it
//! later usually succeeds.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::WorkerConfig;
use crate::services::webhook_processor::WebhookProcessor;

#[derive(Debug, Clone)]
pub struct WebhookRetryConfig {
    pub interval: Duration,
    /// Replays per event before it is left for an operator
    pub max_attempts: i32,
    pub batch_size: i64,
}

impl Default for WebhookRetryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_attempts: 5,
            batch_size: 50,
        }
    }
}

impl From<&WorkerConfig> for WebhookRetryConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.webhook_retry_interval_secs.max(1)),
            max_attempts: config.webhook_retry_max_attempts,
            ..Self::default()
        }
    }
}

pub struct WebhookRetryWorker {
    processor: Arc<WebhookProcessor>,
    config: WebhookRetryConfig,
}

impl WebhookRetryWorker {
    pub fn new(processor: Arc<WebhookProcessor>, config: WebhookRetryConfig) -> Self {
        Self { processor, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            max_attempts = self.config.max_attempts,
            batch_size = self.config.batch_size,
            "webhook retry worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("webhook retry worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    self.run_cycle().await;
                }
            }
        }

        info!("webhook retry worker stopped");
    }

    /// One replay pass; returns how many events were applied
    pub async fn run_cycle(&self) -> usize {
        match self
            .processor
            .retry_unreconciled(self.config.max_attempts, self.config.batch_size)
            .await
        {
            Ok(count) => {
                if count > 0 {
                    info!(reconciled = count, "replayed dead-lettered webhooks");
                }
                count
            }
            Err(e) => {
                error!(error = %e, "failed to replay dead-lettered webhooks");
                0
            }
        }
    }
}
