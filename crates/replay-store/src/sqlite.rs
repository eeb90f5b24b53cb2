//! SQLite-backed interaction store
//!
//! One writer connection guarded by a mutex; each method holds the lock for
//! a single statement or transaction. Row lookups on file databases open
//! their own connection, and rows are decoded and filtered after the
//! connection is released.

use chrono::DateTime;
use parking_lot::Mutex;
use replay_core::events::{InteractionKind, ParamMap, RecordedInteraction, ResponseEntry};
use replay_core::store::{
    ColumnInfo, InteractionStore, SettingsStore, StoreError, StoreResult, TableDescription,
    TableInfo,
};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Name of the key/value settings table
pub const SETTINGS_TABLE: &str = "_settings";

const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

const SELECT_COLUMNS: &str = "instance_uuid, activity_uuid, endpoint_name, call_timestamp, \
                              input_params_json, responses_json, event_type";

/// Map rusqlite results into store results
trait SqlResultExt<T> {
    fn db(self) -> StoreResult<T>;
}

impl<T> SqlResultExt<T> for rusqlite::Result<T> {
    fn db(self) -> StoreResult<T> {
        self.map_err(|e| StoreError::Database(e.to_string()))
    }
}

/// Quote an SQL identifier (embedded `"` are doubled)
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn validate_name(table: &str) -> StoreResult<()> {
    if table.trim().is_empty() || table == SETTINGS_TABLE || table.starts_with("sqlite_") {
        return Err(StoreError::InvalidName(table.to_string()));
    }
    Ok(())
}

/// Raw column values of one interaction row
struct StoredRow {
    instance_uuid: String,
    activity_uuid: String,
    endpoint_name: String,
    call_timestamp: String,
    input_params_json: String,
    responses_json: String,
    event_type: String,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            instance_uuid: row.get(0)?,
            activity_uuid: row.get(1)?,
            endpoint_name: row.get(2)?,
            call_timestamp: row.get(3)?,
            input_params_json: row.get(4)?,
            responses_json: row.get(5)?,
            event_type: row.get(6)?,
        })
    }

    fn decode(self, table: &str) -> StoreResult<RecordedInteraction> {
        let corrupt = |reason: String| StoreError::Corrupt {
            table: table.to_string(),
            reason,
        };

        let issued_at = DateTime::parse_from_rfc3339(&self.call_timestamp)
            .map_err(|e| corrupt(format!("call_timestamp {:?}: {}", self.call_timestamp, e)))?;

        let params: serde_json::Value = serde_json::from_str(&self.input_params_json)?;
        let input_params = match params {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(corrupt(format!(
                    "input_params_json is not an object: {}",
                    other
                )))
            }
        };

        let responses: Vec<ResponseEntry> = serde_json::from_str(&self.responses_json)?;

        let kind = InteractionKind::parse(&self.event_type)
            .ok_or_else(|| corrupt(format!("unknown event_type {:?}", self.event_type)))?;

        Ok(RecordedInteraction {
            instance_id: self.instance_uuid,
            activity_id: self.activity_uuid,
            endpoint_id: self.endpoint_name,
            issued_at,
            input_params,
            responses,
            kind,
        })
    }
}

/// Interaction and settings store on a single SQLite database
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).db()?;
        conn.busy_timeout(BUSY_TIMEOUT).db()?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .db()?;
        debug!("SQLite journal mode: {}", mode);

        Self::init(&conn)?;
        info!("Interaction store opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().db()?;
        Self::init(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    fn init(conn: &Connection) -> StoreResult<()> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY, value TEXT)",
                SETTINGS_TABLE
            ),
            [],
        )
        .db()?;
        Ok(())
    }

    /// Database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn exists(conn: &Connection, table: &str) -> StoreResult<bool> {
        let found = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |_| Ok(()),
            )
            .optional()
            .db()?;
        Ok(found.is_some())
    }

    fn ensure_exists(conn: &Connection, table: &str) -> StoreResult<()> {
        validate_name(table)?;
        if Self::exists(conn, table)? {
            Ok(())
        } else {
            Err(StoreError::TableNotFound(table.to_string()))
        }
    }

    fn count_rows(conn: &Connection, table: &str) -> StoreResult<u64> {
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
                [],
                |row| row.get(0),
            )
            .db()?;
        Ok(count.max(0) as u64)
    }

    /// Run a read-only operation
    ///
    /// File databases get a fresh connection per call; in-memory databases
    /// share the writer connection.
    fn read<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        match &self.path {
            Some(path) => {
                let conn = Connection::open_with_flags(
                    path,
                    OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )
                .db()?;
                conn.busy_timeout(BUSY_TIMEOUT).db()?;
                conn.pragma_update(None, "query_only", true).db()?;
                f(&conn)
            }
            None => f(&self.conn.lock()),
        }
    }

    fn fetch_rows(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<Vec<StoredRow>> {
        let mut stmt = conn.prepare(sql).db()?;
        let rows = stmt.query_map(params, StoredRow::from_row).db()?;
        rows.collect::<rusqlite::Result<Vec<_>>>().db()
    }

    /// Decode fetched rows, skipping corrupt ones
    fn decode_rows(table: &str, rows: Vec<StoredRow>) -> Vec<RecordedInteraction> {
        rows.into_iter()
            .filter_map(|row| match row.decode(table) {
                Ok(interaction) => Some(interaction),
                Err(e) => {
                    warn!("Skipping undecodable row: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Number of rows in a table
    pub fn row_count(&self, table: &str) -> StoreResult<u64> {
        let conn = self.conn.lock();
        Self::ensure_exists(&conn, table)?;
        Self::count_rows(&conn, table)
    }
}

impl InteractionStore for SqliteStore {
    fn create_table(&self, table: &str) -> StoreResult<()> {
        validate_name(table)?;
        let name = quote_ident(table);
        let index = quote_ident(&format!("{}_endpoint_idx", table));

        let conn = self.conn.lock();
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {name} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                instance_uuid TEXT NOT NULL,
                activity_uuid TEXT NOT NULL,
                endpoint_name TEXT NOT NULL,
                call_timestamp TEXT NOT NULL,
                input_params_json TEXT NOT NULL,
                responses_json TEXT NOT NULL,
                event_type TEXT NOT NULL,
                UNIQUE(instance_uuid, activity_uuid, endpoint_name, input_params_json)
            );
            CREATE INDEX IF NOT EXISTS {index} ON {name}(endpoint_name);"
        ))
        .db()?;

        debug!("Ensured table '{}'", table);
        Ok(())
    }

    fn table_exists(&self, table: &str) -> StoreResult<bool> {
        validate_name(table)?;
        let conn = self.conn.lock();
        Self::exists(&conn, table)
    }

    fn drop_table(&self, table: &str) -> StoreResult<()> {
        validate_name(table)?;
        let conn = self.conn.lock();
        conn.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)), [])
            .db()?;
        info!("Dropped table '{}'", table);
        Ok(())
    }

    fn append(&self, table: &str, batch: &[RecordedInteraction]) -> StoreResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        Self::ensure_exists(&conn, table)?;

        let tx = conn.transaction().db()?;
        let mut inserted = 0;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT OR IGNORE INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    quote_ident(table),
                    SELECT_COLUMNS
                ))
                .db()?;

            for interaction in batch {
                inserted += stmt
                    .execute(params![
                        interaction.instance_id,
                        interaction.activity_id,
                        interaction.endpoint_id,
                        interaction.issued_at.to_rfc3339(),
                        interaction.params_json(),
                        interaction.responses_json()?,
                        interaction.kind.as_str(),
                    ])
                    .db()?;
            }
        }
        tx.commit().db()?;

        debug!(
            "Inserted {}/{} interaction(s) into '{}'",
            inserted,
            batch.len(),
            table
        );
        Ok(inserted)
    }

    fn find(
        &self,
        table: &str,
        endpoint: &str,
        predicate: &dyn Fn(&ParamMap) -> bool,
    ) -> StoreResult<Vec<RecordedInteraction>> {
        validate_name(table)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE endpoint_name = ?1 ORDER BY id",
            SELECT_COLUMNS,
            quote_ident(table)
        );
        let rows = self.read(|conn| {
            Self::ensure_exists(conn, table)?;
            Self::fetch_rows(conn, &sql, params![endpoint])
        })?;

        let mut candidates = Self::decode_rows(table, rows);
        candidates.retain(|interaction| predicate(&interaction.input_params));
        Ok(candidates)
    }

    fn list_tables(&self) -> StoreResult<Vec<TableInfo>> {
        let conn = self.conn.lock();
        let names: Vec<String> = {
            let mut stmt = conn
                .prepare(
                    "SELECT name FROM sqlite_master
                     WHERE type = 'table' AND name != ?1 AND name NOT LIKE 'sqlite_%'
                     ORDER BY name",
                )
                .db()?;
            let rows = stmt
                .query_map(params![SETTINGS_TABLE], |row| row.get::<_, String>(0))
                .db()?;
            rows.collect::<rusqlite::Result<Vec<String>>>().db()?
        };

        names
            .into_iter()
            .map(|name| {
                let row_count = Self::count_rows(&conn, &name)?;
                Ok(TableInfo { name, row_count })
            })
            .collect()
    }

    fn describe(&self, table: &str) -> StoreResult<TableDescription> {
        let conn = self.conn.lock();
        Self::ensure_exists(&conn, table)?;

        let columns = {
            let mut stmt = conn
                .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))
                .db()?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ColumnInfo {
                        name: row.get(1)?,
                        data_type: row.get(2)?,
                        not_null: row.get::<_, i64>(3)? != 0,
                        primary_key: row.get::<_, i64>(5)? != 0,
                    })
                })
                .db()?;
            rows.collect::<rusqlite::Result<Vec<_>>>().db()?
        };

        Ok(TableDescription {
            name: table.to_string(),
            columns,
            row_count: Self::count_rows(&conn, table)?,
        })
    }

    fn recent_rows(&self, table: &str, limit: usize) -> StoreResult<Vec<RecordedInteraction>> {
        validate_name(table)?;
        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid DESC LIMIT ?1",
            SELECT_COLUMNS,
            quote_ident(table)
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self.read(|conn| {
            Self::ensure_exists(conn, table)?;
            Self::fetch_rows(conn, &sql, params![limit])
        })?;
        Ok(Self::decode_rows(table, rows))
    }

    fn delete_instance(&self, table: &str, instance_id: &str) -> StoreResult<usize> {
        let conn = self.conn.lock();
        Self::ensure_exists(&conn, table)?;

        let deleted = conn
            .execute(
                &format!("DELETE FROM {} WHERE instance_uuid = ?1", quote_ident(table)),
                params![instance_id],
            )
            .db()?;
        info!(
            "Deleted {} row(s) of instance {} from '{}'",
            deleted, instance_id, table
        );
        Ok(deleted)
    }
}

impl SettingsStore for SqliteStore {
    fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.conn.lock();
        let value: Option<Option<String>> = conn
            .query_row(
                &format!("SELECT value FROM {} WHERE key = ?1", SETTINGS_TABLE),
                params![key],
                |row| row.get(0),
            )
            .optional()
            .db()?;
        Ok(value.flatten())
    }

    fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (key, value) VALUES (?1, ?2)",
                SETTINGS_TABLE
            ),
            params![key, value],
        )
        .db()?;
        debug!("Setting {} = {}", key, value);
        Ok(())
    }

    fn list_settings(&self) -> StoreResult<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT key, value FROM {} ORDER BY key",
                SETTINGS_TABLE
            ))
            .db()?;
        let rows = stmt
            .query_map([], |row| {
                let key: String = row.get(0)?;
                let value: Option<String> = row.get(1)?;
                Ok((key, value.unwrap_or_default()))
            })
            .db()?;
        rows.collect::<rusqlite::Result<Vec<_>>>().db()
    }

    fn clear_settings(&self) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(&format!("DELETE FROM {}", SETTINGS_TABLE), [])
            .db()?;
        info!("Cleared all settings");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replay_core::events::Lifecycle;
    use replay_core::store::ACTIVE_TABLE_KEY;
    use serde_json::json;

    fn interaction(instance: &str, endpoint: &str, city: &str) -> RecordedInteraction {
        let mut input_params = ParamMap::new();
        input_params.insert("city".to_string(), json!(city));
        RecordedInteraction {
            instance_id: instance.to_string(),
            activity_id: "a1".to_string(),
            endpoint_id: endpoint.to_string(),
            issued_at: DateTime::parse_from_rfc3339("2024-01-01T12:00:00+02:00").unwrap(),
            input_params,
            responses: vec![ResponseEntry {
                timestamp: DateTime::parse_from_rfc3339("2024-01-01T12:00:02+02:00").unwrap(),
                lifecycle: Lifecycle::Receiving,
                data: vec![json!({"name": "temp", "data": "21"})],
            }],
            kind: InteractionKind::Call,
        }
    }

    fn store_with_table(table: &str) -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store.create_table(table).unwrap();
        store
    }

    #[test]
    fn test_create_and_drop_table() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(!store.table_exists("calls").unwrap());

        store.create_table("calls").unwrap();
        store.create_table("calls").unwrap();
        assert!(store.table_exists("calls").unwrap());

        store.drop_table("calls").unwrap();
        assert!(!store.table_exists("calls").unwrap());
        store.drop_table("calls").unwrap();
    }

    #[test]
    fn test_invalid_names() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(matches!(
            store.create_table(""),
            Err(StoreError::InvalidName(_))
        ));
        assert!(matches!(
            store.create_table(SETTINGS_TABLE),
            Err(StoreError::InvalidName(_))
        ));
    }

    #[test]
    fn test_quoted_table_names() {
        assert_eq!(quote_ident("calls"), "\"calls\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");

        let store = store_with_table("my \"odd\" table");
        let inserted = store
            .append("my \"odd\" table", &[interaction("1", "ep", "Vienna")])
            .unwrap();
        assert_eq!(inserted, 1);
    }

    #[test]
    fn test_append_round_trip() {
        let store = store_with_table("calls");
        let original = interaction("1", "http://weather", "Vienna");
        store.append("calls", &[original.clone()]).unwrap();

        let rows = store.find_any("calls", "http://weather").unwrap();
        assert_eq!(rows, vec![original]);
    }

    #[test]
    fn test_duplicates_are_ignored() {
        let store = store_with_table("calls");
        let row = interaction("1", "ep", "Vienna");

        assert_eq!(store.append("calls", &[row.clone(), row.clone()]).unwrap(), 1);
        assert_eq!(store.append("calls", &[row]).unwrap(), 0);
        assert_eq!(
            store
                .append("calls", &[interaction("1", "ep", "Graz")])
                .unwrap(),
            1
        );
        assert_eq!(store.row_count("calls").unwrap(), 2);
    }

    #[test]
    fn test_append_to_missing_table() {
        let store = SqliteStore::in_memory().unwrap();
        let result = store.append("missing", &[interaction("1", "ep", "x")]);
        assert!(matches!(result, Err(StoreError::TableNotFound(_))));
    }

    #[test]
    fn test_find_filters_by_endpoint_and_predicate() {
        let store = store_with_table("calls");
        store
            .append(
                "calls",
                &[
                    interaction("1", "ep", "Vienna"),
                    interaction("2", "ep", "Graz"),
                    interaction("3", "other", "Vienna"),
                ],
            )
            .unwrap();

        let vienna = store
            .find("calls", "ep", &|params: &ParamMap| params["city"] == json!("Vienna"))
            .unwrap();
        assert_eq!(vienna.len(), 1);
        assert_eq!(vienna[0].instance_id, "1");

        assert_eq!(store.find_any("calls", "ep").unwrap().len(), 2);
        assert!(store.find_any("calls", "nothing").unwrap().is_empty());
        assert!(matches!(
            store.find_any("missing", "ep"),
            Err(StoreError::TableNotFound(_))
        ));
    }

    #[test]
    fn test_list_tables_hides_settings() {
        let store = store_with_table("b_table");
        store.create_table("a_table").unwrap();
        store
            .append("b_table", &[interaction("1", "ep", "x")])
            .unwrap();
        store.set_setting(ACTIVE_TABLE_KEY, "b_table").unwrap();

        let tables = store.list_tables().unwrap();
        assert_eq!(
            tables,
            vec![
                TableInfo {
                    name: "a_table".to_string(),
                    row_count: 0
                },
                TableInfo {
                    name: "b_table".to_string(),
                    row_count: 1
                },
            ]
        );
    }

    #[test]
    fn test_describe() {
        let store = store_with_table("calls");
        let description = store.describe("calls").unwrap();

        let names: Vec<_> = description.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "id",
                "instance_uuid",
                "activity_uuid",
                "endpoint_name",
                "call_timestamp",
                "input_params_json",
                "responses_json",
                "event_type"
            ]
        );
        assert!(description.columns[0].primary_key);
        assert!(description.columns[1].not_null);
        assert_eq!(description.row_count, 0);
    }

    #[test]
    fn test_recent_rows_newest_first() {
        let store = store_with_table("calls");
        let rows: Vec<_> = (0..5)
            .map(|i| interaction(&i.to_string(), "ep", "x"))
            .collect();
        store.append("calls", &rows).unwrap();

        let recent = store.recent_rows("calls", 2).unwrap();
        let ids: Vec<_> = recent.iter().map(|r| r.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["4", "3"]);
    }

    #[test]
    fn test_delete_instance() {
        let store = store_with_table("calls");
        store
            .append(
                "calls",
                &[
                    interaction("1", "ep", "a"),
                    interaction("1", "ep", "b"),
                    interaction("2", "ep", "a"),
                ],
            )
            .unwrap();

        assert_eq!(store.delete_instance("calls", "1").unwrap(), 2);
        assert_eq!(store.delete_instance("calls", "1").unwrap(), 0);
        assert_eq!(store.row_count("calls").unwrap(), 1);
    }

    #[test]
    fn test_corrupt_rows_are_skipped() {
        let store = store_with_table("calls");
        store.append("calls", &[interaction("1", "ep", "x")]).unwrap();
        store
            .conn
            .lock()
            .execute(
                &format!(
                    "INSERT INTO calls ({}) VALUES ('2', 'a1', 'ep', 'not a time', '{{}}', '[]', 'call')",
                    SELECT_COLUMNS
                ),
                [],
            )
            .unwrap();

        let rows = store.find_any("calls", "ep").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].instance_id, "1");
    }

    #[test]
    fn test_settings() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.get_setting(ACTIVE_TABLE_KEY).unwrap(), None);

        store.set_setting(ACTIVE_TABLE_KEY, "calls").unwrap();
        store.set_setting(ACTIVE_TABLE_KEY, "coopis").unwrap();
        store.set_setting("last_loaded_directory", "/logs").unwrap();
        assert_eq!(
            store.get_setting(ACTIVE_TABLE_KEY).unwrap().as_deref(),
            Some("coopis")
        );
        assert_eq!(
            store.list_settings().unwrap(),
            vec![
                ("active_table".to_string(), "coopis".to_string()),
                ("last_loaded_directory".to_string(), "/logs".to_string()),
            ]
        );

        store.clear_settings().unwrap();
        assert!(store.list_settings().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.create_table("calls").unwrap();
            store.append("calls", &[interaction("1", "ep", "x")]).unwrap();
            store.set_setting(ACTIVE_TABLE_KEY, "calls").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        assert_eq!(store.row_count("calls").unwrap(), 1);
        assert_eq!(
            store.get_setting(ACTIVE_TABLE_KEY).unwrap().as_deref(),
            Some("calls")
        );
    }

    /// A slow lookup must not hold up a second lookup started meanwhile
    fn assert_concurrent_reads(store: &SqliteStore) {
        store.create_table("calls").unwrap();
        store
            .append("calls", &[interaction("1", "http://weather", "Vienna")])
            .unwrap();

        let waited = std::thread::scope(|scope| {
            scope.spawn(|| {
                let slow = |_: &ParamMap| {
                    std::thread::sleep(Duration::from_millis(800));
                    true
                };
                assert_eq!(store.find("calls", "http://weather", &slow).unwrap().len(), 1);
            });

            std::thread::sleep(Duration::from_millis(100));
            let started = std::time::Instant::now();
            let rows = store.find_any("calls", "http://weather").unwrap();
            assert_eq!(rows.len(), 1);
            started.elapsed()
        });

        assert!(
            waited < Duration::from_millis(400),
            "second lookup waited {:?}",
            waited
        );
    }

    #[test]
    fn test_concurrent_reads_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("events.db")).unwrap();
        assert_concurrent_reads(&store);
    }

    #[test]
    fn test_concurrent_reads_memory_store() {
        assert_concurrent_reads(&SqliteStore::in_memory().unwrap());
    }

    #[test]
    fn test_reads_see_committed_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("events.db")).unwrap();
        store.create_table("calls").unwrap();
        assert!(store.find_any("calls", "ep").unwrap().is_empty());

        store.append("calls", &[interaction("1", "ep", "x")]).unwrap();
        assert_eq!(store.find_any("calls", "ep").unwrap().len(), 1);
        assert_eq!(store.recent_rows("calls", 5).unwrap().len(), 1);
        assert!(matches!(
            store.find_any("missing", "ep"),
            Err(StoreError::TableNotFound(_))
        ));
    }
}
