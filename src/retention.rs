use std::fmt;
use std::time::{Duration, Instant};

use chrono::{NaiveDateTime, TimeDelta};
use log::{debug, error, info, warn, Level};
use logging_timer::timer;
use rusqlite::{named_params, Connection};

use crate::config::RetentionConfig;
use crate::database::{CheckpointMode, Database};
use crate::error::UpkeepError;
use crate::notifications::NotificationStore;
use crate::settings_store::SettingsStore;
use crate::utils::Utils;

/// Keep the `keep` most recent rows of a history table, optionally per partition.
#[derive(Debug)]
pub struct HistoryCap {
    pub table: &'static str,
    pub partition: Option<&'static str>,
    pub order_column: &'static str,
}

pub const ONLINE_HISTORY_CAP: HistoryCap = HistoryCap {
    table: "Online_History",
    partition: None,
    order_column: "Scan_Date",
};

pub const PLUGINS_HISTORY_CAP: HistoryCap = HistoryCap {
    table: "Plugins_History",
    partition: Some("Plugin"),
    order_column: "DateTimeChanged",
};

pub const NOTIFICATIONS_CAP: HistoryCap = HistoryCap {
    table: "Notifications",
    partition: None,
    order_column: "DateTimeCreated",
};

pub const APP_EVENTS_CAP: HistoryCap = HistoryCap {
    table: "AppEvents",
    partition: None,
    order_column: "DateTimeCreated",
};

impl HistoryCap {
    // Only rows at or before the snapshot are ranked, so rows written while the pass
    // runs are never candidates. Ties on the timestamp keep the higher "Index".
    fn delete_sql(&self) -> String {
        let order = Utils::quote_ident(self.order_column);
        let partition = self
            .partition
            .map(|p| format!("PARTITION BY {} ", Utils::quote_ident(p)))
            .unwrap_or_default();

        format!(
            r#"DELETE FROM {table}
               WHERE "Index" IN (
                   SELECT "Index" FROM (
                       SELECT "Index",
                              ROW_NUMBER() OVER ({partition}ORDER BY {order} DESC, "Index" DESC) AS row_num
                       FROM {table}
                       WHERE {order} IS NULL OR {order} <= :now
                   )
                   WHERE row_num > :keep
               )"#,
            table = Utils::quote_ident(self.table),
            partition = partition,
            order = order,
        )
    }
}

/// Settings-table keys that override the configured thresholds at run time.
pub const DAYS_TO_KEEP_EVENTS_KEY: &str = "DAYS_TO_KEEP_EVENTS";
pub const HRS_TO_KEEP_NEWDEV_KEY: &str = "HRS_TO_KEEP_NEWDEV";
pub const HRS_TO_KEEP_OFFDEV_KEY: &str = "HRS_TO_KEEP_OFFDEV";
pub const CLEAR_NEW_FLAG_KEY: &str = "CLEAR_NEW_FLAG";
pub const PLUGINS_KEEP_HIST_KEY: &str = "PLUGINS_KEEP_HIST";
pub const NOTIFICATIONS_KEEP_HIST_KEY: &str = "DBCLNP_NOTIFI_HIST";
pub const APP_EVENTS_KEEP_HIST_KEY: &str = "WORKFLOWS_AppEvents_hist";

pub struct RetentionPolicy;

impl RetentionPolicy {
    /// The configured thresholds with any `Settings` table overrides applied.
    pub fn resolve(config: &RetentionConfig, conn: &Connection) -> RetentionConfig {
        let mut policy = config.clone();

        for (key, slot) in [
            (DAYS_TO_KEEP_EVENTS_KEY, &mut policy.days_to_keep_events),
            (HRS_TO_KEEP_NEWDEV_KEY, &mut policy.hrs_to_keep_newdev),
            (HRS_TO_KEEP_OFFDEV_KEY, &mut policy.hrs_to_keep_offdev),
            (CLEAR_NEW_FLAG_KEY, &mut policy.clear_new_flag_hrs),
            (PLUGINS_KEEP_HIST_KEY, &mut policy.plugins_keep_hist),
            (NOTIFICATIONS_KEEP_HIST_KEY, &mut policy.notifications_keep_hist),
            (APP_EVENTS_KEEP_HIST_KEY, &mut policy.app_events_keep_hist),
        ] {
            match SettingsStore::get_parsed::<u32>(conn, key) {
                Ok(Some(value)) => {
                    debug!("Setting {} overrides configured value {} with {}", key, slot, value);
                    *slot = value;
                }
                Ok(None) => {}
                Err(e) => warn!("Could not read setting {}: {} - using configured value", key, e),
            }
        }

        if policy.days_to_keep_events == 0 {
            warn!(
                "{} of 0 would empty the Events table - using configured value {}",
                DAYS_TO_KEEP_EVENTS_KEY, config.days_to_keep_events
            );
            policy.days_to_keep_events = config.days_to_keep_events;
        }

        policy
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Rows(usize),
    Done,
    Skipped,
    Failed(String),
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Rows(n) => write!(f, "{} rows", n),
            StepOutcome::Done => write!(f, "done"),
            StepOutcome::Skipped => write!(f, "skipped"),
            StepOutcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub name: &'static str,
    pub outcome: StepOutcome,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub steps: Vec<StepReport>,
    pub size_before: u64,
    pub size_after: u64,
}

impl CleanupReport {
    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn failed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Failed(_)))
            .count()
    }
}

/// One retention pass over the shared database.
///
/// Every step commits on its own. A failing step is logged and recorded in the report
/// and the pass moves on; later scheduled runs pick up whatever was left.
pub struct RetentionEngine<'a> {
    db: &'a Database,
    policy: RetentionConfig,
    now: NaiveDateTime,
}

impl<'a> RetentionEngine<'a> {
    /// `now` is the snapshot every cutoff and cap in this pass is measured against.
    pub fn new(db: &'a Database, policy: RetentionConfig, now: NaiveDateTime) -> Self {
        Self { db, policy, now }
    }

    pub fn run_cleanup(&self, notifications: &NotificationStore, notifications_keep: usize) -> CleanupReport {
        let _tmr = timer!(Level::Debug; "run_cleanup");
        info!(
            "[DBCLNP] Upkeep database {} (snapshot {})",
            self.db
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".to_owned()),
            Utils::format_db_timestamp(self.now)
        );

        let mut report = CleanupReport {
            size_before: self.db.size_bytes(),
            ..Default::default()
        };

        let p = &self.policy;
        self.record(&mut report, "reindex", || self.reindex().map(|_| StepOutcome::Done));
        self.record(&mut report, "online_history", || {
            self.cap_history(&ONLINE_HISTORY_CAP, p.online_history_keep).map(StepOutcome::Rows)
        });
        self.record(&mut report, "events", || self.prune_events().map(StepOutcome::Rows));
        self.record(&mut report, "plugins_history", || {
            self.cap_history(&PLUGINS_HISTORY_CAP, p.plugins_keep_hist).map(StepOutcome::Rows)
        });
        self.record(&mut report, "notifications", || {
            self.cap_history(&NOTIFICATIONS_CAP, p.notifications_keep_hist).map(StepOutcome::Rows)
        });
        self.record(&mut report, "app_events", || {
            self.cap_history(&APP_EVENTS_CAP, p.app_events_keep_hist).map(StepOutcome::Rows)
        });
        self.record(&mut report, "new_devices", || {
            self.prune_new_devices().map(Self::optional_rows)
        });
        self.record(&mut report, "offline_devices", || {
            self.prune_offline_devices().map(Self::optional_rows)
        });
        self.record(&mut report, "clear_new_flag", || {
            self.clear_new_flag().map(Self::optional_rows)
        });
        self.record(&mut report, "plugins_objects_dedupe", || {
            self.dedupe_plugin_objects().map(StepOutcome::Rows)
        });
        self.record(&mut report, "wal_checkpoint", || {
            self.checkpoint().map(|_| StepOutcome::Done)
        });
        self.record(&mut report, "vacuum", || self.db.compact().map(|_| StepOutcome::Done));
        self.record(&mut report, "notification_file", || {
            if notifications_keep == 0 {
                return Ok(StepOutcome::Skipped);
            }
            notifications.remove_old(notifications_keep).map(StepOutcome::Rows)
        });

        report.size_after = self.db.size_bytes();
        info!(
            "[DBCLNP] Cleanup complete: {} MB -> {} MB, {} failed steps",
            Database::bytes_to_mb(report.size_before),
            Database::bytes_to_mb(report.size_after),
            report.failed_steps()
        );

        report
    }

    pub fn reindex(&self) -> Result<(), UpkeepError> {
        self.conn().execute_batch("REINDEX;")?;
        Ok(())
    }

    pub fn cap_history(&self, cap: &HistoryCap, keep: u32) -> Result<usize, UpkeepError> {
        let deleted = self.conn().execute(
            &cap.delete_sql(),
            named_params! { ":now": self.snapshot(), ":keep": keep },
        )?;
        info!(
            "[DBCLNP] {}: trimmed to {} {}, deleted rows: {}",
            cap.table,
            keep,
            if cap.partition.is_some() { "per partition" } else { "rows" },
            deleted
        );
        Ok(deleted)
    }

    pub fn prune_events(&self) -> Result<usize, UpkeepError> {
        let cutoff = self.now - TimeDelta::days(i64::from(self.policy.days_to_keep_events));
        let deleted = self.conn().execute(
            "DELETE FROM Events WHERE eve_DateTime <= ?",
            [Utils::format_db_timestamp(cutoff)],
        )?;
        info!(
            "[DBCLNP] Events: older than {} days, deleted rows: {}",
            self.policy.days_to_keep_events, deleted
        );
        Ok(deleted)
    }

    /// Delete devices still flagged new after `hrs_to_keep_newdev` hours. `None` when disabled.
    pub fn prune_new_devices(&self) -> Result<Option<usize>, UpkeepError> {
        self.device_rule(
            self.policy.hrs_to_keep_newdev,
            "DELETE FROM Devices WHERE devIsNew = 1 AND devFirstConnection < ?",
            "Devices (new) deleted rows",
        )
    }

    pub fn prune_offline_devices(&self) -> Result<Option<usize>, UpkeepError> {
        self.device_rule(
            self.policy.hrs_to_keep_offdev,
            "DELETE FROM Devices WHERE devPresentLastScan = 0 AND devLastConnection < ?",
            "Devices (offline) deleted rows",
        )
    }

    pub fn clear_new_flag(&self) -> Result<Option<usize>, UpkeepError> {
        self.device_rule(
            self.policy.clear_new_flag_hrs,
            "UPDATE Devices SET devIsNew = 0 WHERE devIsNew = 1 AND devFirstConnection < ?",
            "Devices updated rows (clear new)",
        )
    }

    /// Keep the lowest row id of every (plugin, primary id, secondary id, user data) group.
    pub fn dedupe_plugin_objects(&self) -> Result<usize, UpkeepError> {
        let deleted = self.conn().execute(
            "DELETE FROM Plugins_Objects
             WHERE rowid NOT IN (
                 SELECT MIN(rowid)
                 FROM Plugins_Objects
                 GROUP BY Plugin, Object_PrimaryID, Object_SecondaryID, UserData
             )",
            [],
        )?;
        info!("[DBCLNP] Plugins_Objects: duplicates deleted: {}", deleted);
        Ok(deleted)
    }

    pub fn checkpoint(&self) -> Result<(), UpkeepError> {
        for mode in [CheckpointMode::Truncate, CheckpointMode::Full] {
            let result = self.db.checkpoint(mode)?;
            if result.busy {
                warn!("[DBCLNP] WAL checkpoint ({}) could not complete: database busy", mode);
            } else {
                debug!(
                    "[DBCLNP] WAL checkpoint ({}): {} of {} frames checkpointed",
                    mode, result.checkpointed_frames, result.log_frames
                );
            }
        }
        info!("[DBCLNP] WAL checkpoint executed to truncate file");
        Ok(())
    }

    fn device_rule(
        &self,
        hours: u32,
        sql: &str,
        label: &str,
    ) -> Result<Option<usize>, UpkeepError> {
        if hours == 0 {
            return Ok(None);
        }
        let cutoff = self.now - TimeDelta::hours(i64::from(hours));
        let affected = self
            .conn()
            .execute(sql, [Utils::format_db_timestamp(cutoff)])?;
        info!("[DBCLNP] {} (older than {} hours): {}", label, hours, affected);
        Ok(Some(affected))
    }

    fn record<F>(&self, report: &mut CleanupReport, name: &'static str, step: F)
    where
        F: FnOnce() -> Result<StepOutcome, UpkeepError>,
    {
        let _tmr = timer!(Level::Debug; "cleanup_step", "{}", name);
        let start = Instant::now();
        let outcome = step().unwrap_or_else(|e| {
            error!("[DBCLNP] Step '{}' failed: {}", name, e);
            StepOutcome::Failed(e.to_string())
        });
        report.steps.push(StepReport {
            name,
            outcome,
            elapsed: start.elapsed(),
        });
    }

    fn optional_rows(rows: Option<usize>) -> StepOutcome {
        rows.map_or(StepOutcome::Skipped, StepOutcome::Rows)
    }

    fn snapshot(&self) -> String {
        Utils::format_db_timestamp(self.now)
    }

    fn conn(&self) -> &Connection {
        self.db.conn()
    }
}
