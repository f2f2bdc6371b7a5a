//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. Seat accounting relies on
//! SQLite's single-writer lock: every mutation runs in a `BEGIN IMMEDIATE`
//! transaction, so handles opened on the same file serialize their writes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::changes::ChangeFeed;
use crate::error::{Result, StoreError};
use crate::migrations;

/// How long a writer waits for a competing handle's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
    changes: ChangeFeed,
}

impl Database {
    /// Open (or create) the default local database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/ginmai/ginmai.db`
    /// - macOS:   `~/Library/Application Support/app.ginmai.ginmai/ginmai.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\ginmai\ginmai\data\ginmai.db`
    pub fn open_default() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("app", "ginmai", "ginmai").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("ginmai.db");

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Open a private in-memory database (single handle only).
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn,
            changes: ChangeFeed::new(),
        })
    }

    /// Publish this handle's changes on a shared feed instead of its own.
    pub fn with_change_feed(mut self, changes: ChangeFeed) -> Self {
        self.changes = changes;
        self
    }

    pub fn changes(&self) -> &ChangeFeed {
        &self.changes
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Start a write transaction that takes the database write lock up front.
    pub(crate) fn write_tx(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}
