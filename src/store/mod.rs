//! SQLite-backed local store
//!
//! A single database file holds every mirrored table: catalog entities, the
//! query result cache, the invalidation signal row, the refresh request log,
//! upstream fetch failures and the sweep leases. The store is a mirror of upstream data, so a schema
//! mismatch is handled by rebuilding from scratch.

pub mod entity;
pub mod hooks;
pub mod lease;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::StoreError;

pub use entity::{
    CacheState, CatalogEntity, CatalogPayload, EntityKind, EntityStats, EntityStore, OwnerKind,
};
pub use hooks::{LatestEpisodeHook, Mutation, MutationHook, MutationOp};
pub use lease::LeaseGuard;

/// Schema version - increment to trigger nuke-and-rebuild
const SCHEMA_VERSION: i32 = 2;

/// How long a writer waits on a locked database file before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type Result<T> = std::result::Result<T, StoreError>;

/// Shared handle to the authoritative store.
///
/// Cloning is cheap; every clone talks to the same connection. Guards returned
/// by [`Database::lock`] must be dropped before any `.await`.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open or create the store at the default XDG cache location
    pub fn open() -> Result<Self> {
        let dir = Self::default_dir()?;
        Self::open_at(&dir)
    }

    /// Get the default data directory path (~/.cache/podmirror on Linux)
    pub fn default_dir() -> Result<PathBuf> {
        let cache_base = dirs::cache_dir().ok_or(StoreError::NoHome)?;
        Ok(cache_base.join("podmirror"))
    }

    /// Open the store inside a specific directory
    pub fn open_at(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| StoreError::Io(format!("Failed to create data dir: {}", e)))?;

        let db_path = dir.join("mirror.db");
        let conn = Connection::open(&db_path)?;

        // Check schema version - nuke if mismatched
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .unwrap_or(0);

        if version != 0 && version != SCHEMA_VERSION {
            log::info!(
                "Store schema version mismatch ({} != {}), rebuilding",
                version,
                SCHEMA_VERSION
            );
            drop(conn);
            Self::nuke(&db_path)?;
            return Self::open_at(dir);
        }

        conn.busy_timeout(BUSY_TIMEOUT)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get(0))?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(db_path),
        })
    }

    /// Open a private in-memory store (tests and dry runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Path of the database file, if file-backed
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Lock the shared connection
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS catalog_entities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                external_id TEXT UNIQUE,
                kind TEXT NOT NULL,
                show_id INTEGER,
                title TEXT NOT NULL,
                payload TEXT NOT NULL,
                payload_hash TEXT NOT NULL,
                published_at INTEGER,
                latest_episode_id INTEGER,
                owner_kind TEXT NOT NULL DEFAULT 'none',
                cache_state TEXT NOT NULL,
                cached_at INTEGER,
                expires_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entities_show ON catalog_entities(show_id);
            CREATE INDEX IF NOT EXISTS idx_entities_expires ON catalog_entities(expires_at);

            CREATE TABLE IF NOT EXISTS query_cache (
                cache_key TEXT PRIMARY KEY NOT NULL,
                scope TEXT NOT NULL,
                result TEXT NOT NULL,
                cached_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_query_expires ON query_cache(expires_at);

            CREATE TABLE IF NOT EXISTS invalidation_signal (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version_token INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS refresh_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_external_id TEXT NOT NULL,
                requested_at INTEGER NOT NULL,
                processed_at INTEGER,
                follow_up_sent INTEGER NOT NULL DEFAULT 0,
                resolved_contact TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_refresh_pending
                ON refresh_log(processed_at, entity_external_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_refresh_follow_up_once
                ON refresh_log(entity_external_id) WHERE follow_up_sent = 1;

            CREATE TABLE IF NOT EXISTS fetch_failures (
                external_id TEXT PRIMARY KEY NOT NULL,
                failures INTEGER NOT NULL,
                kind TEXT NOT NULL,
                retry_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS leases (
                name TEXT PRIMARY KEY NOT NULL,
                holder TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );
            "#,
        )?;

        conn.execute(
            "INSERT OR IGNORE INTO invalidation_signal (id, version_token, updated_at)
             VALUES (1, 0, ?1)",
            [now_millis()],
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// Nuke the store (delete DB and its WAL files)
    fn nuke(db_path: &Path) -> Result<()> {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = db_path.as_os_str().to_owned();
            file.push(suffix);
            let file = PathBuf::from(file);
            if file.exists() {
                std::fs::remove_file(&file)
                    .map_err(|e| StoreError::Io(format!("Failed to remove {}: {}", file.display(), e)))?;
            }
        }
        Ok(())
    }
}

/// Current wall-clock time as unix milliseconds
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert stored unix milliseconds back into a timestamp
pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Saturating conversion of a TTL into milliseconds
pub(crate) fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
