use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use log::{error, info, warn, Level};
use logging_timer::timer;
use rusqlite::Connection;

use crate::config::{Config, GeneralConfig};
use crate::database::Database;
use crate::error::UpkeepError;
use crate::migration::{MigrationOutcome, TimestampMigration, UTC_MIGRATED_FLAG};
use crate::notifications::{NotificationStore, Notifier};
use crate::retention::{CleanupReport, RetentionEngine, RetentionPolicy};
use crate::schema::{ObjectKind, Schema, StructuralObjects};
use crate::settings_store::{SettingsStore, VERSION_KEY};

pub const TIMEZONE_KEY: &str = "TIMEZONE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReport {
    pub columns_added: usize,
    pub timestamps: MigrationOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpkeepStatus {
    pub version: Option<String>,
    pub timestamps_migrated: bool,
    pub size_bytes: u64,
    /// Live view, index and trigger counts.
    pub objects: Vec<(ObjectKind, usize)>,
}

/// Sequences the schema and retention engines and owns every transaction they run in.
pub struct Upkeep;

impl Upkeep {
    /// Startup sequence: tables, columns, transient tables, views, indexes and triggers in
    /// one transaction, then the one-time timestamp migration in its own.
    ///
    /// Schema drift rolls the first transaction back and aborts before any migration runs.
    pub fn run_startup(
        db: &mut Database,
        notifier: &dyn Notifier,
        general: &GeneralConfig,
        now: DateTime<Utc>,
    ) -> Result<StartupReport, UpkeepError> {
        let _tmr = timer!(Level::Debug; "run_startup");

        let tx = db.conn_mut().transaction()?;
        Schema::provision_base_tables(&tx)?;
        let columns_added = match Schema::ensure_device_columns(&tx, notifier) {
            Ok(added) => added,
            Err(e) => {
                error!("[db_upgrade] Startup aborted: {}", e);
                return Err(e);
            }
        };
        Schema::recreate_transient_tables(&tx)?;
        StructuralObjects::ensure_all(&tx)?;
        tx.commit()?;
        info!("[db_upgrade] Schema is up to date");

        let tz = Self::resolve_timezone(db.conn(), general);
        let tx = db.conn_mut().transaction()?;
        let timestamps = match TimestampMigration::migrate_timestamps_to_utc(&tx, tz, now) {
            Ok(outcome) => outcome,
            Err(e) => {
                let msg = format!("[db_upgrade] ERROR during timestamp migration: {}", e);
                error!("{}", msg);
                if let Err(notify_err) = notifier.notify(&msg) {
                    error!("[db_upgrade] Failed to write migration notification: {}", notify_err);
                }
                return Err(e);
            }
        };
        tx.commit()?;

        if let MigrationOutcome::Migrated {
            offset_minutes,
            rows_updated,
            failed_columns,
        } = timestamps
        {
            if failed_columns > 0 {
                let msg = format!(
                    "[db_upgrade] UTC timestamp migration (offset {} minutes) left {} columns unconverted after updating {} values. Check the log for details.",
                    offset_minutes, failed_columns, rows_updated
                );
                warn!("{}", msg);
                if let Err(notify_err) = notifier.notify(&msg) {
                    error!("[db_upgrade] Failed to write migration notification: {}", notify_err);
                }
            }
        }

        Ok(StartupReport {
            columns_added,
            timestamps,
        })
    }

    /// One retention pass using the configured thresholds and any `Settings` overrides.
    pub fn run_cleanup(
        db: &Database,
        config: &Config,
        store: &NotificationStore,
        now: DateTime<Utc>,
    ) -> CleanupReport {
        let policy = RetentionPolicy::resolve(&config.retention, db.conn());
        let keep = usize::try_from(config.notifications.keep).unwrap_or(usize::MAX);
        RetentionEngine::new(db, policy, now.naive_utc()).run_cleanup(store, keep)
    }

    /// The process timezone: a valid `TIMEZONE` setting wins over the configured one.
    pub fn resolve_timezone(conn: &Connection, general: &GeneralConfig) -> Tz {
        match SettingsStore::get_parsed::<Tz>(conn, TIMEZONE_KEY) {
            Ok(Some(tz)) => tz,
            Ok(None) => general.tz(),
            Err(e) => {
                warn!("Could not read setting {}: {} - using {}", TIMEZONE_KEY, e, general.timezone);
                general.tz()
            }
        }
    }

    pub fn status(db: &Database) -> UpkeepStatus {
        let conn = db.conn();
        let version = SettingsStore::get_value(conn, VERSION_KEY).unwrap_or_else(|e| {
            warn!("Could not read {}: {}", VERSION_KEY, e);
            None
        });
        let timestamps_migrated = SettingsStore::get_value(conn, UTC_MIGRATED_FLAG)
            .ok()
            .flatten()
            .is_some_and(|v| SettingsStore::is_truthy(&v));

        let objects = ObjectKind::ALL
            .into_iter()
            .map(|kind| {
                let count = StructuralObjects::catalog(conn, kind)
                    .map(|objects| objects.len())
                    .unwrap_or_else(|e| {
                        warn!("Could not read {} catalog: {}", kind, e);
                        0
                    });
                (kind, count)
            })
            .collect();

        UpkeepStatus {
            version,
            timestamps_migrated,
            size_bytes: db.size_bytes(),
            objects,
        }
    }
}
