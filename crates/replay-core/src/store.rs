//! Storage traits for recorded interactions and runtime settings

use crate::events::{ParamMap, RecordedInteraction};
use serde::Serialize;
use thiserror::Error;

/// Setting key holding the table used for live matching
pub const ACTIVE_TABLE_KEY: &str = "active_table";

/// Setting key holding the directory of the last ingestion run
pub const LAST_LOADED_DIRECTORY_KEY: &str = "last_loaded_directory";

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Table '{0}' does not exist")]
    TableNotFound(String),

    #[error("Invalid table name: {0:?}")]
    InvalidName(String),

    #[error("Corrupt row in table '{table}': {reason}")]
    Corrupt { table: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Table listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub row_count: u64,
}

/// Column metadata of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

/// Table metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDescription {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub row_count: u64,
}

/// Durable collection of recorded interactions, grouped into named tables
///
/// Appends come from a single ingestion writer; lookups may run
/// concurrently with appends.
pub trait InteractionStore: Send + Sync {
    /// Create a table if it does not exist yet
    fn create_table(&self, table: &str) -> StoreResult<()>;

    fn table_exists(&self, table: &str) -> StoreResult<bool>;

    /// Drop a table if it exists
    fn drop_table(&self, table: &str) -> StoreResult<()>;

    /// Insert a batch; entries violating the uniqueness key are skipped.
    /// Returns the number of rows actually inserted.
    fn append(&self, table: &str, batch: &[RecordedInteraction]) -> StoreResult<usize>;

    /// All interactions for `endpoint` whose parameters satisfy `predicate`
    fn find(
        &self,
        table: &str,
        endpoint: &str,
        predicate: &dyn Fn(&ParamMap) -> bool,
    ) -> StoreResult<Vec<RecordedInteraction>>;

    /// All interactions recorded for `endpoint`
    fn find_any(&self, table: &str, endpoint: &str) -> StoreResult<Vec<RecordedInteraction>> {
        self.find(table, endpoint, &|_: &ParamMap| true)
    }

    fn list_tables(&self) -> StoreResult<Vec<TableInfo>>;

    fn describe(&self, table: &str) -> StoreResult<TableDescription>;

    /// Most recently inserted rows first
    fn recent_rows(&self, table: &str, limit: usize) -> StoreResult<Vec<RecordedInteraction>>;

    /// Delete all rows of one process instance, returning the count
    fn delete_instance(&self, table: &str, instance_id: &str) -> StoreResult<usize>;
}

/// Process-wide key/value settings
pub trait SettingsStore: Send + Sync {
    fn get_setting(&self, key: &str) -> StoreResult<Option<String>>;

    /// Insert or replace a setting (last writer wins)
    fn set_setting(&self, key: &str, value: &str) -> StoreResult<()>;

    /// All settings, ordered by key
    fn list_settings(&self) -> StoreResult<Vec<(String, String)>>;

    fn clear_settings(&self) -> StoreResult<()>;
}
