//! SQLite-backed session state.
//!
//! This module provides the `SessionStore` struct which persists what the
//! browser remembers between runs:
//! - Settings such as the base directory
//! - Target slots (0-9) bound to move destinations
//! - Most recently used move targets

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

/// Highest target slot number.
pub const MAX_SLOT: u8 = 9;

/// Number of recent targets kept.
const RECENT_TARGETS_LIMIT: usize = 20;

const BASE_DIR_KEY: &str = "base_dir";

/// Persistent session state.
///
/// The database is stored at `XDG_DATA_HOME/mediasort/session.sqlite`.
pub struct SessionStore {
    conn: Connection,
}

impl SessionStore {
    /// Returns the default database path based on XDG directories.
    pub fn default_db_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "", "mediasort")
            .context("Failed to determine project directories")?;
        Ok(proj_dirs.data_dir().join("session.sqlite"))
    }

    /// Opens or creates the database at the specified path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )
        .context("Failed to configure SQLite pragmas")?;

        let store = Self { conn };
        store.create_tables()?;

        info!("Opened session store at {:?}", path);
        Ok(store)
    }

    /// Opens a throwaway in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let store = Self { conn };
        store.create_tables()?;
        Ok(store)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS targets (
                slot INTEGER PRIMARY KEY NOT NULL CHECK (slot BETWEEN 0 AND 9),
                dir TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS recent_targets (
                dir TEXT PRIMARY KEY NOT NULL,
                used_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_recent_targets_used_at ON recent_targets(used_at);
            ",
            )
            .context("Failed to create database tables")?;

        debug!("Database tables created/verified");
        Ok(())
    }

    // =========================================================================
    // Settings
    // =========================================================================

    pub fn setting(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to read setting {:?}", key))
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .with_context(|| format!("Failed to store setting {:?}", key))?;
        Ok(())
    }

    pub fn base_dir(&self) -> Result<Option<PathBuf>> {
        Ok(self.setting(BASE_DIR_KEY)?.map(PathBuf::from))
    }

    pub fn set_base_dir(&self, dir: &Path) -> Result<()> {
        self.set_setting(BASE_DIR_KEY, &dir.to_string_lossy())
    }

    // =========================================================================
    // Target slots
    // =========================================================================

    pub fn target(&self, slot: u8) -> Result<Option<PathBuf>> {
        check_slot(slot)?;
        let dir: Option<String> = self
            .conn
            .query_row(
                "SELECT dir FROM targets WHERE slot = ?1",
                params![slot],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query target slot")?;
        Ok(dir.map(PathBuf::from))
    }

    pub fn set_target(&self, slot: u8, dir: &Path) -> Result<()> {
        check_slot(slot)?;
        let dir_str = dir.to_string_lossy();
        self.conn.execute(
            "INSERT OR REPLACE INTO targets (slot, dir) VALUES (?1, ?2)",
            params![slot, dir_str.as_ref()],
        )?;
        debug!(slot, ?dir, "Bound target slot");
        Ok(())
    }

    /// All bound slots in slot order.
    pub fn targets(&self) -> Result<Vec<(u8, PathBuf)>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT slot, dir FROM targets ORDER BY slot")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, u8>(0)?, PathBuf::from(row.get::<_, String>(1)?)))
        })?;

        let mut targets = Vec::new();
        for row in rows {
            targets.push(row?);
        }
        Ok(targets)
    }

    // =========================================================================
    // Recent targets
    // =========================================================================

    /// Mark `dir` as the most recently used target.
    pub fn record_target(&self, dir: &Path) -> Result<()> {
        let dir_str = dir.to_string_lossy();
        self.conn.execute(
            "INSERT OR REPLACE INTO recent_targets (dir, used_at) VALUES (?1, ?2)",
            params![dir_str.as_ref(), Self::now_millis()],
        )?;

        let pruned = self.conn.execute(
            "DELETE FROM recent_targets WHERE dir NOT IN (
                SELECT dir FROM recent_targets ORDER BY used_at DESC, rowid DESC LIMIT ?1
            )",
            params![RECENT_TARGETS_LIMIT as i64],
        )?;
        if pruned > 0 {
            debug!(pruned, "Pruned recent targets");
        }
        Ok(())
    }

    /// Most recent first.
    pub fn recent_targets(&self) -> Result<Vec<PathBuf>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT dir FROM recent_targets ORDER BY used_at DESC, rowid DESC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut dirs = Vec::new();
        for row in rows {
            dirs.push(PathBuf::from(row?));
        }
        Ok(dirs)
    }

    fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    /// Backs up an unreadable database and starts a fresh one.
    pub fn handle_corruption(path: &Path) -> Result<Self> {
        warn!("Handling potential database corruption at {:?}", path);

        let backup_path = path.with_extension("sqlite.corrupted");
        if path.exists() {
            std::fs::rename(path, &backup_path).with_context(|| {
                format!("Failed to backup corrupted database to {:?}", backup_path)
            })?;
            warn!("Backed up corrupted database to {:?}", backup_path);
        }

        Self::open(path)
    }
}

fn check_slot(slot: u8) -> Result<()> {
    if slot > MAX_SLOT {
        bail!("Target slot must be between 0 and {}, got {}", MAX_SLOT, slot);
    }
    Ok(())
}
