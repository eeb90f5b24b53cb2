//! CPEE Replay Core - Domain types and shared abstractions
//!
//! This crate provides:
//! - Trace event and recorded interaction types
//! - Request parameter typing and normalization
//! - Storage traits for interactions and settings
//! - The matcher that picks a recorded interaction for a live request
//! - The timed replay scheduler
//! - Configuration loading

pub mod config;
pub mod events;
pub mod matcher;
pub mod params;
pub mod replay;
pub mod store;

pub use config::{ConfigError, ConfigLoader, ReplayConfig};
pub use events::{
    CallKey, InteractionKind, Lifecycle, ParamMap, RecordedInteraction, ResponseEntry, TraceEvent,
};
pub use matcher::Matcher;
pub use params::{ParamValue, RequestParams};
pub use replay::{DeliveryError, ReplayScheduler, ReplaySummary, ResponseSink};
pub use store::{InteractionStore, SettingsStore, StoreError, StoreResult};

/// CPEE Replay version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
