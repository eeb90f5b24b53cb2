//! Replay protocol
//!
//! Maps a live request of the process engine to one of three outcomes: an
//! instantiation signal, a replay scheduled in the background and
//! acknowledged at once, or "no match" (after reproducing the timing of an
//! endpoint-only candidate, if there is one).

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use replay_core::matcher::Matcher;
use replay_core::params::RequestParams;
use replay_core::replay::{ReplayScheduler, ReplaySummary};
use replay_core::store::{
    InteractionStore, SettingsStore, StoreError, StoreResult, ACTIVE_TABLE_KEY,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const CALLBACK_HEADER: &str = "cpee-callback";
pub const SIM_TARGET_HEADER: &str = "cpee-sim-target";
pub const SIM_ENGINE_HEADER: &str = "cpee-attr-sim-engine";
pub const SIM_TRANSLATE_HEADER: &str = "cpee-attr-sim-translate";

/// Status telling the engine to instantiate a sub-process itself
pub const INSTANTIATION_STATUS: u16 = 561;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Table '{0}' does not exist.")]
    TableNotFound(String),

    #[error("Missing original_endpoint query parameter")]
    MissingEndpoint,

    #[error("Unreadable form body: {0}")]
    InvalidBody(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl IntoResponse for ReplayError {
    fn into_response(self) -> Response {
        match &self {
            ReplayError::TableNotFound(table) => {
                error!("Specified table does not exist: {}", table);
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
            ReplayError::MissingEndpoint | ReplayError::InvalidBody(_) => {
                warn!("Rejected replay request: {}", self);
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
            ReplayError::Store(_) | ReplayError::Task(_) => {
                error!("Replay error: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": self.to_string() })),
                )
                    .into_response()
            }
        }
    }
}

/// Parsed `CPEE-SIM-TARGET` header: whitespace separated `key=value` tokens
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimTarget {
    raw: String,
    tokens: BTreeMap<String, String>,
}

impl SimTarget {
    pub fn parse(raw: &str) -> Self {
        let tokens = raw
            .split_whitespace()
            .filter_map(|token| token.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect();
        Self {
            raw: raw.to_string(),
            tokens,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tokens.get(key).map(String::as_str)
    }

    /// Explicitly requested table
    pub fn table(&self) -> Option<&str> {
        self.get("table").filter(|t| !t.is_empty())
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// A live replay request
#[derive(Debug, Clone, Default)]
pub struct ReplayRequest {
    /// Endpoint the engine originally called
    pub endpoint: String,

    /// Where replayed responses are sent
    pub callback: Option<String>,

    pub sim_target: Option<String>,
    pub sim_engine: Option<String>,
    pub sim_translate: Option<String>,

    /// Typed form parameters
    pub params: RequestParams,
}

/// Headers of an instantiation answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstantiationSignal {
    pub engine: Option<String>,
    pub translate: Option<String>,

    /// Model to instantiate (request parameter `url`)
    pub model: String,

    /// Raw sim target header
    pub target: String,
}

impl InstantiationSignal {
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("cpee-sim-tasktype"),
            HeaderValue::from_static("i"),
        );

        let values = [
            ("cpee-sim-engine", self.engine.as_deref()),
            ("cpee-sim-translate", self.translate.as_deref()),
            ("cpee-sim-model", Some(self.model.as_str())),
            ("cpee-sim-target", Some(self.target.as_str())),
        ];
        for (name, value) in values {
            let Some(value) = value else {
                continue;
            };
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.insert(HeaderName::from_static(name), value);
                }
                Err(_) => warn!("Dropping header {} with invalid value {:?}", name, value),
            }
        }
        headers
    }
}

/// Result of handling a replay request
#[derive(Debug)]
pub enum ReplayOutcome {
    /// The recorded call spawned a sub-process
    Instantiation(InstantiationSignal),

    /// A recorded call matched; its responses are replayed in the
    /// background (`None` when the request carried no callback)
    Scheduled {
        replay: Option<JoinHandle<ReplaySummary>>,
    },

    /// Nothing matched the parameters; `timing` is set when an endpoint-only
    /// candidate's delays were reproduced
    Unmatched { timing: Option<ReplaySummary> },
}

impl ReplayOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            ReplayOutcome::Instantiation(_) => StatusCode::from_u16(INSTANTIATION_STATUS)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            ReplayOutcome::Scheduled { .. } | ReplayOutcome::Unmatched { .. } => StatusCode::OK,
        }
    }
}

impl IntoResponse for ReplayOutcome {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ReplayOutcome::Instantiation(signal) => (status, signal.headers()).into_response(),
            // dropping the handle detaches the replay task
            ReplayOutcome::Scheduled { .. } => {
                (status, [(CALLBACK_HEADER, "true")]).into_response()
            }
            ReplayOutcome::Unmatched { .. } => {
                (status, [(CALLBACK_HEADER, "false")]).into_response()
            }
        }
    }
}

/// Run a store operation off the async executor
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, ReplayError>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ReplayError::Task(e.to_string()))?
        .map_err(ReplayError::from)
}

/// Replay protocol handler
#[derive(Clone)]
pub struct ReplayService {
    matcher: Arc<Matcher>,
    settings: Arc<dyn SettingsStore>,
    scheduler: ReplayScheduler,
    default_table: String,
}

impl ReplayService {
    pub fn new(
        matcher: Arc<Matcher>,
        settings: Arc<dyn SettingsStore>,
        scheduler: ReplayScheduler,
        default_table: impl Into<String>,
    ) -> Self {
        Self {
            matcher,
            settings,
            scheduler,
            default_table: default_table.into(),
        }
    }

    pub fn store(&self) -> Arc<dyn InteractionStore> {
        self.matcher.store().clone()
    }

    pub fn settings(&self) -> Arc<dyn SettingsStore> {
        self.settings.clone()
    }

    /// Table used when a request names none
    pub async fn active_table(&self) -> Result<String, ReplayError> {
        let settings = self.settings.clone();
        let fallback = self.default_table.clone();
        blocking(move || {
            Ok(settings
                .get_setting(ACTIVE_TABLE_KEY)?
                .filter(|table| !table.trim().is_empty())
                .unwrap_or(fallback))
        })
        .await
    }

    async fn resolve_table(&self, target: &SimTarget) -> Result<String, ReplayError> {
        let store = self.store();

        if let Some(explicit) = target.table() {
            let table = explicit.to_string();
            let settings = self.settings.clone();
            let name = table.clone();
            let exists = blocking(move || {
                match store.table_exists(&name) {
                    Ok(true) => {}
                    Ok(false) | Err(StoreError::InvalidName(_)) => return Ok(false),
                    Err(e) => return Err(e),
                }
                settings.set_setting(ACTIVE_TABLE_KEY, &name)?;
                Ok(true)
            })
            .await?;

            if !exists {
                return Err(ReplayError::TableNotFound(table));
            }
            return Ok(table);
        }

        let table = self.active_table().await?;
        let name = table.clone();
        blocking(move || {
            if !store.table_exists(&name)? {
                info!("Creating missing table '{}'", name);
                store.create_table(&name)?;
            }
            Ok(())
        })
        .await?;
        Ok(table)
    }

    /// Handle one replay request
    pub async fn handle(&self, request: ReplayRequest) -> Result<ReplayOutcome, ReplayError> {
        if request.endpoint.is_empty() {
            return Err(ReplayError::MissingEndpoint);
        }

        let target = SimTarget::parse(request.sim_target.as_deref().unwrap_or_default());
        let table = self.resolve_table(&target).await?;
        debug!(
            "Replay request: endpoint={} table={} params={:?}",
            request.endpoint, table, request.params
        );

        let matched = {
            let matcher = self.matcher.clone();
            let (table, endpoint, params) = (
                table.clone(),
                request.endpoint.clone(),
                request.params.clone(),
            );
            blocking(move || matcher.find_match(&table, &endpoint, &params)).await?
        };

        let Some(interaction) = matched else {
            return self.fallback(&table, &request.endpoint).await;
        };

        if interaction.is_instantiation() {
            let signal = InstantiationSignal {
                engine: request.sim_engine,
                translate: request.sim_translate,
                model: request
                    .params
                    .get("url")
                    .map(|url| url.to_string())
                    .unwrap_or_default(),
                target: request.sim_target.unwrap_or_default(),
            };
            debug!("Returning instantiation signal: {:?}", signal);
            return Ok(ReplayOutcome::Instantiation(signal));
        }

        let callback = request.callback.filter(|c| !c.trim().is_empty());
        let replay = match callback {
            Some(callback) => {
                debug!(
                    "Replaying {} response(s) of instance {} to {}",
                    interaction.responses.len(),
                    interaction.instance_id,
                    callback
                );
                Some(self.scheduler.schedule(
                    callback,
                    interaction.responses,
                    interaction.issued_at,
                ))
            }
            None => {
                warn!("No callback URL provided for {}", request.endpoint);
                None
            }
        };

        Ok(ReplayOutcome::Scheduled { replay })
    }

    /// Endpoint-only fallback: reproduce the delays, deliver nothing
    async fn fallback(&self, table: &str, endpoint: &str) -> Result<ReplayOutcome, ReplayError> {
        debug!("No matching call for {}; trying endpoint-only replay", endpoint);

        let candidate = {
            let matcher = self.matcher.clone();
            let (table, endpoint) = (table.to_string(), endpoint.to_string());
            blocking(move || matcher.find_any(&table, &endpoint)).await?
        };

        let timing = match candidate {
            Some(interaction) => Some(
                ReplayScheduler::delays_only(&interaction.responses, interaction.issued_at).await,
            ),
            None => {
                debug!("No recorded calls available for {}", endpoint);
                None
            }
        };

        Ok(ReplayOutcome::Unmatched { timing })
    }
}
