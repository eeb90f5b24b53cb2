//! Callback delivery
//!
//! Delivers replayed responses to the process engine's callback URL.
//! Supports an optional retry with exponential backoff for network and
//! server errors.

use crate::payload::{build_parts, CallbackPart};
use async_trait::async_trait;
use replay_core::config::DeliverySettings;
use replay_core::events::ResponseEntry;
use replay_core::replay::{DeliveryError, ResponseSink};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

/// Header marking a non-final delivery
pub const UPDATE_HEADER: &str = "CPEE-UPDATE";

/// Export setup errors
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to create HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Callback delivery configuration
#[derive(Debug, Clone)]
pub struct CallbackConfig {
    /// Request timeout
    pub timeout: Duration,

    /// Idle connections kept per callback host
    pub pool_max_idle_per_host: usize,

    /// Additional attempts for retryable failures
    pub max_retries: u32,

    /// Initial retry delay (doubles with each retry)
    pub initial_retry_delay: Duration,

    /// Maximum retry delay
    pub max_retry_delay: Duration,

    pub user_agent: String,
}

impl CallbackConfig {
    pub fn from_settings(settings: &DeliverySettings) -> Self {
        Self {
            timeout: settings.timeout(),
            pool_max_idle_per_host: settings.pool_max_idle_per_host,
            max_retries: settings.max_retries,
            initial_retry_delay: settings.initial_retry_delay(),
            max_retry_delay: settings.max_retry_delay(),
            ..Default::default()
        }
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            pool_max_idle_per_host: 10,
            max_retries: 0,
            initial_retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(30),
            user_agent: format!("cpee-replay/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Delivery statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub retried: u64,
    pub failed: u64,
}

/// Response sink sending multipart PUT requests
pub struct CallbackDelivery {
    config: CallbackConfig,
    client: Client,
    delivered: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
}

impl CallbackDelivery {
    pub fn new(config: CallbackConfig) -> Result<Self, ExportError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(&config.user_agent)
            .build()?;

        info!(
            "Callback delivery initialized: timeout={:?}, max_retries={}",
            config.timeout, config.max_retries
        );

        Ok(Self {
            config,
            client,
            delivered: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    /// Send one multipart request
    async fn send_request(
        &self,
        target: &Url,
        parts: &[CallbackPart],
        is_final: bool,
    ) -> Result<(), DeliveryError> {
        let mut request = self.client.put(target.clone()).multipart(form(parts));
        if !is_final {
            request = request.header(UPDATE_HEADER, "true");
        }

        let response = request
            .send()
            .await
            .map_err(|e| DeliveryError::Network(e.to_string()))?;
        let status = response.status();

        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(DeliveryError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// Send with retry logic
    async fn send_with_retry(
        &self,
        target: &Url,
        parts: &[CallbackPart],
        is_final: bool,
    ) -> Result<(), DeliveryError> {
        let mut delay = self.config.initial_retry_delay;
        let mut attempts = 0;

        loop {
            match self.send_request(target, parts, is_final).await {
                Ok(()) => {
                    if attempts > 0 {
                        self.retried.fetch_add(1, Ordering::Relaxed);
                    }
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempts < self.config.max_retries => {
                    attempts += 1;
                    warn!(
                        "Callback to {} failed (attempt {}), retrying in {:?}: {}",
                        target, attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, self.config.max_retry_delay);
                }
                Err(e) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    return Err(e);
                }
            }
        }
    }

    /// Get delivery statistics
    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl ResponseSink for CallbackDelivery {
    async fn deliver(
        &self,
        target: &str,
        response: &ResponseEntry,
        is_final: bool,
    ) -> Result<(), DeliveryError> {
        let url = Url::parse(target).map_err(|e| {
            self.failed.fetch_add(1, Ordering::Relaxed);
            DeliveryError::InvalidTarget(format!("{}: {}", target, e))
        })?;

        let parts = build_parts(&response.data);
        debug!(
            "Delivering {} part(s) to {} (final={})",
            parts.len(),
            url,
            is_final
        );

        self.send_with_retry(&url, &parts, is_final).await
    }
}

fn form(parts: &[CallbackPart]) -> Form {
    parts.iter().fold(Form::new(), |form, part| {
        form.part(part.name.clone(), multipart_part(part))
    })
}

fn multipart_part(part: &CallbackPart) -> Part {
    let bytes = || Part::bytes(part.content.clone()).file_name("");
    bytes().mime_str(&part.mimetype).unwrap_or_else(|_| {
        warn!(
            "Invalid mimetype {:?} for part {}, sending without",
            part.mimetype, part.name
        );
        bytes()
    })
}
