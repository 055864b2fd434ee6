use rusqlite::Error as RusqliteError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpkeepError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error), // Converts io::Error into UpkeepError automatically

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError), // Converts rusqlite::Error automatically

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Column '{column}' is not in the expected schema of table '{table}'")]
    SchemaDrift { table: String, column: String },

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors
}
