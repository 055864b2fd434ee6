use log::{debug, info};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};

use crate::error::UpkeepError;

/// WAL checkpoint modes used by the compaction pass.
#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum CheckpointMode {
    Full,
    Truncate,
}

/// Result row of `PRAGMA wal_checkpoint`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CheckpointResult {
    pub busy: bool,
    pub log_frames: i64,
    pub checkpointed_frames: i64,
}

/// Handle on the shared monitoring database.
///
/// Other processes keep the same file open, so the connection is opened in WAL mode
/// with a busy timeout and every statement relies on SQLite's own locking.
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Self, UpkeepError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!(
                        "Database folder '{}' does not exist or is not a directory",
                        parent.display()
                    ),
                )
                .into());
            }
        }

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(busy_timeout)?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        info!(
            "Database opened at: {} (journal mode: {})",
            db_path.display(),
            journal_mode
        );

        Ok(Self {
            conn,
            path: Some(db_path.to_path_buf()),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, UpkeepError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            path: None,
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Size of the database file plus its `-wal` sidecar. In-memory databases report 0.
    pub fn size_bytes(&self) -> u64 {
        match &self.path {
            Some(path) => Self::file_set_size(path),
            None => 0,
        }
    }

    pub fn file_set_size(db_path: &Path) -> u64 {
        let mut wal_path = db_path.as_os_str().to_owned();
        wal_path.push("-wal");

        [db_path.to_path_buf(), PathBuf::from(wal_path)]
            .iter()
            .filter_map(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }

    pub fn bytes_to_mb(bytes: u64) -> f64 {
        (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
    }

    pub fn table_exists(conn: &Connection, table: &str) -> Result<bool, UpkeepError> {
        let count: i64 = conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn checkpoint(&self, mode: CheckpointMode) -> Result<CheckpointResult, UpkeepError> {
        let sql = format!("PRAGMA wal_checkpoint({})", mode);
        let result = self.conn.query_row(&sql, [], |row| {
            Ok(CheckpointResult {
                busy: row.get::<_, i64>(0)? != 0,
                log_frames: row.get(1)?,
                checkpointed_frames: row.get(2)?,
            })
        })?;
        debug!("WAL checkpoint ({}): {:?}", mode, result);
        Ok(result)
    }

    /// Rebuild the database file, reclaiming pages freed by deletes.
    ///
    /// VACUUM is atomic from SQLite's perspective - it either completes fully
    /// or rolls back. It cannot run inside an open transaction.
    pub fn compact(&self) -> Result<(), UpkeepError> {
        self.conn.execute_batch("VACUUM;")?;
        Ok(())
    }
}
