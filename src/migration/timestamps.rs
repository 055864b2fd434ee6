use chrono::{DateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use log::{debug, info, warn, Level};
use logging_timer::timer;
use rusqlite::Connection;

use crate::database::Database;
use crate::error::UpkeepError;
use crate::settings_store::{SettingsStore, VERSION_KEY};
use crate::utils::Utils;

use super::version::{GateDecision, VersionGate};

pub const UTC_MIGRATED_FLAG: &str = "DB_TIMESTAMPS_UTC_MIGRATED";

const SAMPLE_LIMIT: usize = 10;

/// Datetime-valued columns that hold naive local time in older installs.
pub const TIMESTAMP_COLUMNS: &[(&str, &[&str])] = &[
    (
        "Devices",
        &["devFirstConnection", "devLastConnection", "devLastNotification"],
    ),
    ("Events", &["eve_DateTime"]),
    (
        "Sessions",
        &["ses_DateTimeConnection", "ses_DateTimeDisconnection"],
    ),
    ("Notifications", &["DateTimeCreated", "DateTimePushed"]),
    ("Online_History", &["Scan_Date"]),
    ("Plugins_Objects", &["DateTimeCreated", "DateTimeChanged"]),
    ("Plugins_Events", &["DateTimeCreated", "DateTimeChanged"]),
    ("Plugins_History", &["DateTimeCreated", "DateTimeChanged"]),
    ("AppEvents", &["DateTimeCreated"]),
];

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UtcStatus {
    AlreadyUtc,
    NeedsMigration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    Skipped(GateDecision),
    AlreadyUtc,
    Migrated {
        offset_minutes: i32,
        rows_updated: usize,
        failed_columns: usize,
    },
}

pub struct TimestampMigration;

impl TimestampMigration {
    /// Sample device timestamps and decide whether they are still naive local time.
    /// An empty table, or any sample carrying an offset marker, counts as UTC.
    pub fn detect(conn: &Connection) -> Result<UtcStatus, UpkeepError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT devFirstConnection, devLastConnection, devLastNotification
             FROM Devices
             WHERE devFirstConnection IS NOT NULL
             LIMIT {}",
            SAMPLE_LIMIT
        ))?;

        let mut samples = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            for i in 0..3 {
                let value: Option<String> = row.get(i)?;
                if let Some(ts) = value.filter(|v| !v.trim().is_empty()) {
                    samples.push(ts);
                }
            }
        }

        if samples.is_empty() {
            info!("[db_upgrade] No timestamp samples found in Devices - assuming UTC");
            return Ok(UtcStatus::AlreadyUtc);
        }

        if samples.iter().any(|ts| has_offset_marker(ts)) {
            info!("[db_upgrade] Timestamps have timezone markers - already migrated to UTC");
            return Ok(UtcStatus::AlreadyUtc);
        }

        debug!(
            "[db_upgrade] Sampled {} timestamps without offset markers",
            samples.len()
        );
        info!("[db_upgrade] Timestamps appear to be in local time - migration needed");
        Ok(UtcStatus::NeedsMigration)
    }

    /// Offset of `tz` from UTC at `now`, in whole minutes (east positive).
    pub fn offset_minutes(tz: Tz, now: DateTime<Utc>) -> i32 {
        tz.offset_from_utc_datetime(&now.naive_utc())
            .fix()
            .local_minus_utc()
            / 60
    }

    /// Convert every non-empty timestamp in the fixed column set from `tz` local time to
    /// UTC, then record completion. Runs only when the version gate and the detector
    /// both say the data still needs it.
    ///
    /// Missing tables are skipped and a failing column is logged without stopping the
    /// rest. The completion flag is written last so an interrupted pass is retried.
    pub fn migrate_timestamps_to_utc(
        conn: &Connection,
        tz: Tz,
        now: DateTime<Utc>,
    ) -> Result<MigrationOutcome, UpkeepError> {
        let version = SettingsStore::get_value(conn, VERSION_KEY)?.unwrap_or_default();
        info!("[db_upgrade] Version '{}' detected", version);

        let decision = VersionGate::should_run_once_migration(conn, UTC_MIGRATED_FLAG, &version)?;
        if !decision.should_run() {
            return Ok(MigrationOutcome::Skipped(decision));
        }

        let status = Self::detect(conn).unwrap_or_else(|e| {
            warn!("[db_upgrade] Error checking UTC status: {} - assuming UTC", e);
            UtcStatus::AlreadyUtc
        });
        if status == UtcStatus::AlreadyUtc {
            info!("[db_upgrade] Timestamps appear already UTC - skipping migration");
            return Ok(MigrationOutcome::AlreadyUtc);
        }

        let _tmr = timer!(Level::Debug; "migrate_timestamps_to_utc");
        let offset_minutes = Self::offset_minutes(tz, now);
        info!(
            "[db_upgrade] Starting UTC timestamp migration ({} offset: {} minutes)",
            tz, offset_minutes
        );

        let mut rows_updated = 0;
        let mut failed_columns = 0;
        if offset_minutes != 0 {
            for (table, columns) in TIMESTAMP_COLUMNS {
                match Database::table_exists(conn, table) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!("[db_upgrade] Table '{}' does not exist - skipping", table);
                        continue;
                    }
                    Err(e) => {
                        warn!("[db_upgrade] Error processing table {}: {}", table, e);
                        failed_columns += columns.len();
                        continue;
                    }
                }

                for column in *columns {
                    match Self::shift_column(conn, table, column, offset_minutes) {
                        Ok(count) => {
                            if count > 0 {
                                info!(
                                    "[db_upgrade] Migrated {} timestamps in {}.{}",
                                    count, table, column
                                );
                            }
                            rows_updated += count;
                        }
                        Err(e) => {
                            warn!("[db_upgrade] Error updating {}.{}: {}", table, column, e);
                            failed_columns += 1;
                        }
                    }
                }
            }
        }

        SettingsStore::set_value(conn, UTC_MIGRATED_FLAG, "1")?;
        info!(
            "[db_upgrade] UTC timestamp migration completed ({} values updated, {} columns failed)",
            rows_updated, failed_columns
        );

        Ok(MigrationOutcome::Migrated {
            offset_minutes,
            rows_updated,
            failed_columns,
        })
    }

    // Local -> UTC is a shift by the negated offset. Values SQLite cannot read as a
    // datetime are left alone rather than nulled. Fractional seconds and a `T` separator
    // are kept so distinct Events rows stay distinct under idx_events_unique.
    fn shift_column(
        conn: &Connection,
        table: &str,
        column: &str,
        offset_minutes: i32,
    ) -> Result<usize, UpkeepError> {
        let column = Utils::quote_ident(column);
        let shifted = format!(
            "CASE WHEN INSTR({column}, '.') > 0 \
             THEN STRFTIME('%Y-%m-%d %H:%M:%f', {column}, ?1) \
             ELSE DATETIME({column}, ?1) END",
        );
        let sql = format!(
            "UPDATE {table}
             SET {column} = CASE WHEN SUBSTR({column}, 11, 1) = 'T'
                                 THEN REPLACE({shifted}, ' ', 'T')
                                 ELSE {shifted} END
             WHERE {column} IS NOT NULL
               AND {column} != ''
               AND DATETIME({column}) IS NOT NULL",
            table = Utils::quote_ident(table),
        );
        let modifier = format!("{:+} minutes", -offset_minutes);
        Ok(conn.execute(&sql, [modifier])?)
    }
}

/// `+hh:mm`, a trailing `Z`, or a `-hh:mm` after the date part.
fn has_offset_marker(ts: &str) -> bool {
    let ts = ts.trim();
    ts.contains('+') || ts.ends_with('Z') || ts.get(10..).is_some_and(|time| time.contains('-'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Schema, StructuralObjects};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn fresh_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        Schema::provision_base_tables(&conn).unwrap();
        conn
    }

    fn winter_noon() -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2026, 1, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc()
    }

    fn insert_device(conn: &Connection, mac: &str, first: &str) {
        conn.execute(
            "INSERT INTO Devices (devMac, devFirstConnection, devLastConnection) VALUES (?1, ?2, ?2)",
            [mac, first],
        )
        .unwrap();
    }

    fn first_connection(conn: &Connection, mac: &str) -> Option<String> {
        conn.query_row(
            "SELECT devFirstConnection FROM Devices WHERE devMac = ?",
            [mac],
            |r| r.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_detect_empty_table_is_utc() {
        let conn = fresh_db();
        assert_eq!(TimestampMigration::detect(&conn).unwrap(), UtcStatus::AlreadyUtc);
    }

    #[test]
    fn test_detect_naive_timestamp_needs_migration() {
        let conn = fresh_db();
        insert_device(&conn, "aa", "2026-01-10 08:30:00");
        assert_eq!(
            TimestampMigration::detect(&conn).unwrap(),
            UtcStatus::NeedsMigration
        );
    }

    #[test]
    fn test_detect_offset_marker_is_utc() {
        let conn = fresh_db();
        insert_device(&conn, "aa", "2026-01-10 08:30:00");
        insert_device(&conn, "bb", "2026-01-10 08:30:00+00:00");
        assert_eq!(TimestampMigration::detect(&conn).unwrap(), UtcStatus::AlreadyUtc);
    }

    #[test]
    fn test_offset_marker_forms() {
        assert!(has_offset_marker("2026-01-10 08:30:00+00:00"));
        assert!(has_offset_marker("2026-01-10T08:30:00Z"));
        assert!(has_offset_marker("2026-01-10 08:30:00-05:00"));
        assert!(!has_offset_marker("2026-01-10 08:30:00"));
    }

    #[test]
    fn test_offset_minutes_follow_zone_and_dst() {
        let tz: Tz = "Asia/Kolkata".parse().unwrap();
        assert_eq!(TimestampMigration::offset_minutes(tz, winter_noon()), 330);

        let tz: Tz = "America/New_York".parse().unwrap();
        assert_eq!(TimestampMigration::offset_minutes(tz, winter_noon()), -300);
        let summer = NaiveDate::from_ymd_opt(2026, 7, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc();
        assert_eq!(TimestampMigration::offset_minutes(tz, summer), -240);

        assert_eq!(TimestampMigration::offset_minutes(Tz::UTC, winter_noon()), 0);
    }

    #[test]
    fn test_fresh_database_returns_without_changes() {
        let conn = fresh_db();
        let tz: Tz = "Europe/Berlin".parse().unwrap();

        let outcome = TimestampMigration::migrate_timestamps_to_utc(&conn, tz, winter_noon()).unwrap();
        assert_eq!(outcome, MigrationOutcome::AlreadyUtc);

        let settings: i64 = conn
            .query_row("SELECT count(*) FROM Settings", [], |r| r.get(0))
            .unwrap();
        assert_eq!(settings, 0);
    }

    #[test]
    fn test_cut_over_version_with_empty_devices_changes_nothing() {
        for version in ["26.2.6", "v26.2.6", "unknown", "invalid.version"] {
            let conn = fresh_db();
            SettingsStore::set_value(&conn, VERSION_KEY, version).unwrap();
            let outcome =
                TimestampMigration::migrate_timestamps_to_utc(&conn, Tz::Europe__Berlin, winter_noon())
                    .unwrap();
            assert_eq!(outcome, MigrationOutcome::AlreadyUtc, "{version}");
        }
    }

    #[test]
    fn test_newer_version_skips_even_with_naive_data() {
        let conn = fresh_db();
        SettingsStore::set_value(&conn, VERSION_KEY, "26.3.0").unwrap();
        insert_device(&conn, "aa", "2026-01-10 08:30:00");

        let outcome =
            TimestampMigration::migrate_timestamps_to_utc(&conn, Tz::Europe__Berlin, winter_noon()).unwrap();
        assert_eq!(
            outcome,
            MigrationOutcome::Skipped(GateDecision::SkipNewerVersion)
        );
        assert_eq!(first_connection(&conn, "aa").as_deref(), Some("2026-01-10 08:30:00"));
    }

    #[test]
    fn test_old_version_migrates_east_of_utc() {
        let conn = fresh_db();
        SettingsStore::set_value(&conn, VERSION_KEY, "25.1.0").unwrap();
        insert_device(&conn, "aa", "2026-01-10 08:30:00");
        conn.execute(
            "INSERT INTO Events (eve_MAC, eve_IP, eve_DateTime, eve_EventType)
             VALUES ('aa', '10.0.0.1', '2026-01-10 00:15:00', 'Connected')",
            [],
        )
        .unwrap();

        let tz: Tz = "Asia/Kolkata".parse().unwrap();
        let outcome = TimestampMigration::migrate_timestamps_to_utc(&conn, tz, winter_noon()).unwrap();
        assert_eq!(
            outcome,
            MigrationOutcome::Migrated {
                offset_minutes: 330,
                rows_updated: 3,
                failed_columns: 0,
            }
        );

        assert_eq!(first_connection(&conn, "aa").as_deref(), Some("2026-01-10 03:00:00"));
        let event: String = conn
            .query_row("SELECT eve_DateTime FROM Events", [], |r| r.get(0))
            .unwrap();
        assert_eq!(event, "2026-01-09 18:45:00");

        // NULL columns stay NULL
        let notified: Option<String> = conn
            .query_row("SELECT devLastNotification FROM Devices", [], |r| r.get(0))
            .unwrap();
        assert_eq!(notified, None);

        assert_eq!(
            SettingsStore::get_value(&conn, UTC_MIGRATED_FLAG).unwrap().as_deref(),
            Some("1")
        );
    }

    #[test]
    fn test_migration_west_of_utc_adds_offset() {
        let conn = fresh_db();
        insert_device(&conn, "aa", "2026-01-10 22:00:00");

        let tz: Tz = "America/New_York".parse().unwrap();
        TimestampMigration::migrate_timestamps_to_utc(&conn, tz, winter_noon()).unwrap();
        assert_eq!(first_connection(&conn, "aa").as_deref(), Some("2026-01-11 03:00:00"));
    }

    #[test]
    fn test_migration_runs_once() {
        let conn = fresh_db();
        insert_device(&conn, "aa", "2026-01-10 08:30:00");
        let tz: Tz = "Asia/Tokyo".parse().unwrap();

        TimestampMigration::migrate_timestamps_to_utc(&conn, tz, winter_noon()).unwrap();
        let after_first = first_connection(&conn, "aa");

        let outcome = TimestampMigration::migrate_timestamps_to_utc(&conn, tz, winter_noon()).unwrap();
        assert_eq!(outcome, MigrationOutcome::Skipped(GateDecision::SkipCompleted));
        assert_eq!(first_connection(&conn, "aa"), after_first);
        assert_eq!(after_first.as_deref(), Some("2026-01-09 23:30:00"));
    }

    #[test]
    fn test_missing_tables_and_odd_values_are_tolerated() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE Settings (setKey TEXT, setValue TEXT);
             CREATE TABLE Devices (devMac TEXT, devFirstConnection TEXT,
                                   devLastConnection TEXT, devLastNotification TEXT);
             INSERT INTO Devices VALUES ('aa', '2026-01-10 08:30:00', '', 'not a date');",
        )
        .unwrap();

        let tz: Tz = "Asia/Tokyo".parse().unwrap();
        let outcome = TimestampMigration::migrate_timestamps_to_utc(&conn, tz, winter_noon()).unwrap();
        assert_eq!(
            outcome,
            MigrationOutcome::Migrated {
                offset_minutes: 540,
                rows_updated: 1,
                failed_columns: 0,
            }
        );

        let (first, last, notified): (String, String, String) = conn
            .query_row(
                "SELECT devFirstConnection, devLastConnection, devLastNotification FROM Devices",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(first, "2026-01-09 23:30:00");
        assert_eq!(last, "");
        assert_eq!(notified, "not a date");
    }

    #[test]
    fn test_failing_column_does_not_stop_others() {
        let conn = Connection::open_in_memory().unwrap();
        // Events lacks its timestamp column, Sessions is complete
        conn.execute_batch(
            "CREATE TABLE Settings (setKey TEXT, setValue TEXT);
             CREATE TABLE Devices (devMac TEXT, devFirstConnection TEXT,
                                   devLastConnection TEXT, devLastNotification TEXT);
             CREATE TABLE Events (eve_MAC TEXT);
             CREATE TABLE Sessions (ses_DateTimeConnection TEXT, ses_DateTimeDisconnection TEXT);
             INSERT INTO Devices VALUES ('aa', '2026-01-10 08:30:00', NULL, NULL);
             INSERT INTO Sessions VALUES ('2026-01-10 10:00:00', NULL);",
        )
        .unwrap();

        let tz: Tz = "Asia/Tokyo".parse().unwrap();
        let outcome = TimestampMigration::migrate_timestamps_to_utc(&conn, tz, winter_noon()).unwrap();
        assert_eq!(
            outcome,
            MigrationOutcome::Migrated {
                offset_minutes: 540,
                rows_updated: 2,
                failed_columns: 1,
            }
        );
        let session: String = conn
            .query_row("SELECT ses_DateTimeConnection FROM Sessions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(session, "2026-01-10 01:00:00");
        assert_eq!(
            SettingsStore::get_value(&conn, UTC_MIGRATED_FLAG).unwrap().as_deref(),
            Some("1")
        );
    }

    #[test]
    fn test_shift_keeps_fractional_seconds_and_separator() {
        let conn = fresh_db();
        StructuralObjects::ensure_indexes(&conn).unwrap();
        insert_device(&conn, "aa", "2026-01-10 08:30:00");
        conn.execute_batch(
            "INSERT INTO Events (eve_MAC, eve_IP, eve_EventType, eve_DateTime) VALUES
                ('aa', '10.0.0.1', 'Connected', '2026-01-10 08:30:00.250'),
                ('aa', '10.0.0.1', 'Connected', '2026-01-10 08:30:00.750'),
                ('aa', '10.0.0.1', 'Connected', '2026-01-10T09:00:00');",
        )
        .unwrap();

        let tz: Tz = "Asia/Tokyo".parse().unwrap();
        let outcome = TimestampMigration::migrate_timestamps_to_utc(&conn, tz, winter_noon()).unwrap();
        assert_eq!(
            outcome,
            MigrationOutcome::Migrated {
                offset_minutes: 540,
                rows_updated: 5,
                failed_columns: 0,
            }
        );

        let mut stmt = conn
            .prepare("SELECT eve_DateTime FROM Events ORDER BY rowid")
            .unwrap();
        let events: Vec<String> = stmt
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            events,
            vec![
                "2026-01-09 23:30:00.250",
                "2026-01-09 23:30:00.750",
                "2026-01-10T00:00:00",
            ]
        );
    }
}
