use log::{error, info, warn};
use phf_macros::phf_ordered_map;
use rusqlite::Connection;

use crate::error::UpkeepError;
use crate::notifications::Notifier;
use crate::utils::Utils;

/// Column name -> SQL type used when the column has to be added to an existing table.
pub type ColumnMap = phf::OrderedMap<&'static str, &'static str>;

/// Every column a `Devices` table may legitimately have. A column outside this list is
/// never added: its presence in a request means the database (or the caller) belongs to
/// a different schema lineage.
pub const DEVICES_COLUMNS: ColumnMap = phf_ordered_map! {
    "devMac" => "STRING(50)",
    "devName" => "STRING(50)",
    "devOwner" => "STRING(30)",
    "devType" => "STRING(30)",
    "devVendor" => "STRING(250)",
    "devFavorite" => "BOOLEAN",
    "devGroup" => "STRING(10)",
    "devComments" => "TEXT",
    "devFirstConnection" => "DATE",
    "devLastConnection" => "DATE",
    "devLastIP" => "STRING(50)",
    "devFQDN" => "TEXT",
    "devPrimaryIPv4" => "TEXT",
    "devPrimaryIPv6" => "TEXT",
    "devVlan" => "TEXT",
    "devForceStatus" => "TEXT",
    "devStaticIP" => "BOOLEAN",
    "devScan" => "INTEGER",
    "devLogEvents" => "BOOLEAN",
    "devAlertEvents" => "BOOLEAN",
    "devAlertDown" => "BOOLEAN",
    "devSkipRepeated" => "INTEGER",
    "devLastNotification" => "DATE",
    "devPresentLastScan" => "BOOLEAN",
    "devIsNew" => "BOOLEAN",
    "devLocation" => "STRING(250)",
    "devIsArchived" => "BOOLEAN",
    "devParentMAC" => "TEXT",
    "devParentPort" => "INTEGER",
    "devParentRelType" => "TEXT",
    "devReqNicsOnline" => "INTEGER",
    "devIcon" => "TEXT",
    "devGUID" => "TEXT",
    "devSite" => "TEXT",
    "devSSID" => "TEXT",
    "devSyncHubNode" => "TEXT",
    "devSourcePlugin" => "TEXT",
    "devMacSource" => "TEXT",
    "devNameSource" => "TEXT",
    "devFQDNSource" => "TEXT",
    "devLastIPSource" => "TEXT",
    "devVendorSource" => "TEXT",
    "devSSIDSource" => "TEXT",
    "devParentMACSource" => "TEXT",
    "devParentPortSource" => "TEXT",
    "devParentRelTypeSource" => "TEXT",
    "devVlanSource" => "TEXT",
    "devCustomProps" => "TEXT",
};

pub const PLUGINS_OBJECTS_COLUMNS: ColumnMap = phf_ordered_map! {
    "Index" => "INTEGER",
    "Plugin" => "TEXT",
    "Object_PrimaryID" => "TEXT",
    "Object_SecondaryID" => "TEXT",
    "DateTimeCreated" => "TEXT",
    "DateTimeChanged" => "TEXT",
    "Watched_Value1" => "TEXT",
    "Watched_Value2" => "TEXT",
    "Watched_Value3" => "TEXT",
    "Watched_Value4" => "TEXT",
    "Status" => "TEXT",
    "Extra" => "TEXT",
    "UserData" => "TEXT",
    "ForeignKey" => "TEXT",
    "SyncHubNodeName" => "TEXT",
    "HelpVal1" => "TEXT",
    "HelpVal2" => "TEXT",
    "HelpVal3" => "TEXT",
    "HelpVal4" => "TEXT",
    "ObjectGUID" => "TEXT",
};

pub const SETTINGS_COLUMNS: ColumnMap = phf_ordered_map! {
    "setKey" => "TEXT",
    "setName" => "TEXT",
    "setDescription" => "TEXT",
    "setType" => "TEXT",
    "setOptions" => "TEXT",
    "setGroup" => "TEXT",
    "setValue" => "TEXT",
    "setEvents" => "TEXT",
    "setOverriddenByEnv" => "INTEGER",
};

const UPDATES_DOC_URL: &str = "https://docs.netwatch.dev/updates";

/// Allow-listed column set for a table, or `None` when the table accepts no additions.
pub fn expected_columns(table: &str) -> Option<&'static ColumnMap> {
    match table {
        "Devices" => Some(&DEVICES_COLUMNS),
        "Plugins_Objects" => Some(&PLUGINS_OBJECTS_COLUMNS),
        "Settings" => Some(&SETTINGS_COLUMNS),
        _ => None,
    }
}

pub struct ColumnVerifier;

impl ColumnVerifier {
    pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, UpkeepError> {
        let sql = format!("PRAGMA table_info({})", Utils::quote_ident(table));
        let mut stmt = conn.prepare(&sql)?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    /// Make sure `column_name` exists on `table`.
    ///
    /// An existing column is a no-op. A missing column is appended with `column_type`
    /// only when it is in the table's allow-list; otherwise the operator is alerted
    /// (log + notification) and `SchemaDrift` is returned without touching the schema.
    pub fn ensure_column(
        conn: &Connection,
        notifier: &dyn Notifier,
        table: &str,
        column_name: &str,
        column_type: &str,
    ) -> Result<(), UpkeepError> {
        let actual = Self::table_columns(conn, table)?;
        if actual.iter().any(|c| c == column_name) {
            return Ok(());
        }

        let allowed = expected_columns(table).is_some_and(|cols| cols.contains_key(column_name));
        if !allowed {
            let msg = format!(
                "[db_upgrade] ERROR: Column '{}' is not in expected schema of table '{}' - \
                 aborting to prevent corruption. Check {}",
                column_name, table, UPDATES_DOC_URL
            );
            error!("{}", msg);
            if let Err(e) = notifier.notify(&msg) {
                error!("[db_upgrade] Failed to write schema drift notification: {}", e);
            }
            return Err(UpkeepError::SchemaDrift {
                table: table.to_owned(),
                column: column_name.to_owned(),
            });
        }

        info!(
            "[db_upgrade] Adding '{}' ({}) to {} table",
            column_name, column_type, table
        );
        conn.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} {};",
            Utils::quote_ident(table),
            Utils::quote_ident(column_name),
            column_type
        ))?;

        Ok(())
    }

    /// Bring `table` up to its full allow-listed column set. Stops at the first failure.
    /// Returns the number of columns added.
    pub fn ensure_table_columns(
        conn: &Connection,
        notifier: &dyn Notifier,
        table: &str,
    ) -> Result<usize, UpkeepError> {
        let Some(expected) = expected_columns(table) else {
            return Ok(0);
        };

        let before = Self::table_columns(conn, table)?;
        for (column, column_type) in expected.entries() {
            Self::ensure_column(conn, notifier, table, column, column_type)?;
        }

        let unexpected = Self::unexpected_columns(&before, expected);
        if !unexpected.is_empty() {
            warn!(
                "[db_upgrade] Table '{}' has columns outside the expected schema: {}",
                table,
                unexpected.join(", ")
            );
        }

        let added = expected
            .keys()
            .filter(|c| !before.iter().any(|b| b.as_str() == **c))
            .count();
        Ok(added)
    }

    fn unexpected_columns(actual: &[String], expected: &ColumnMap) -> Vec<String> {
        actual
            .iter()
            .filter(|c| !expected.contains_key(c.as_str()))
            .cloned()
            .collect()
    }
}
