mod base;
mod columns;
mod objects;

use log::info;
use rusqlite::Connection;

use crate::error::UpkeepError;
use crate::notifications::Notifier;

use base::{CREATE_BASE_TABLES_SQL, RECREATE_TRANSIENT_TABLES_SQL};
pub use columns::ColumnVerifier;
#[cfg(test)]
pub use columns::DEVICES_COLUMNS;
pub use objects::{ObjectKind, StructuralObjects};

pub struct Schema;

impl Schema {
    /// Create every maintained table that does not exist yet.
    pub fn provision_base_tables(conn: &Connection) -> Result<(), UpkeepError> {
        conn.execute_batch(CREATE_BASE_TABLES_SQL)?;
        Ok(())
    }

    /// Drop and recreate the tables that hold no durable data.
    pub fn recreate_transient_tables(conn: &Connection) -> Result<(), UpkeepError> {
        conn.execute_batch(RECREATE_TRANSIENT_TABLES_SQL)?;
        Ok(())
    }

    /// Bring the Devices table up to its full expected column set. The first column
    /// outside the allow-list aborts with `SchemaDrift`.
    pub fn ensure_device_columns(
        conn: &Connection,
        notifier: &dyn Notifier,
    ) -> Result<usize, UpkeepError> {
        let added = ColumnVerifier::ensure_table_columns(conn, notifier, "Devices")?;
        if added > 0 {
            info!("[db_upgrade] Added {} missing columns to Devices", added);
        }
        Ok(added)
    }
}
