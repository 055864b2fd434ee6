use chrono::Utc;
use fs2::FileExt;
use log::{debug, error, info};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

use crate::config::NotificationsConfig;
use crate::error::UpkeepError;
use crate::settings_store::SettingsStore;
use crate::utils::Utils;

/// Sink for persisted, user-visible alerts raised by the maintenance engines.
pub trait Notifier {
    fn notify(&self, content: &str) -> Result<(), UpkeepError>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Alert,
}

/// One stored entry. The file is shared with other writers, so every field is optional
/// on read and `read` accepts a bool, a number or a truthy string.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Notification {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub guid: String,
    #[serde(default, deserialize_with = "read_flag")]
    pub read: u8,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub content: String,
    // Fields written by other components are carried through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Notification {
    pub fn is_unread(&self) -> bool {
        self.read == 0
    }
}

fn read_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let read = match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        serde_json::Value::String(s) => SettingsStore::is_truthy(&s),
        _ => false,
    };
    Ok(u8::from(read))
}

/// Outcome of a notification update, reported instead of raised.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct NotificationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NotificationResult {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }
}

/// Releases the advisory lock when dropped, so every exit path unlocks.
struct FileLockGuard<'a>(&'a File);

impl<'a> FileLockGuard<'a> {
    fn acquire(file: &'a File) -> Result<Self, UpkeepError> {
        FileExt::lock_exclusive(file)
            .map_err(|e| UpkeepError::LockError(format!("Failed to lock notifications file: {}", e)))?;
        Ok(Self(file))
    }
}

impl Drop for FileLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(self.0) {
            error!("[Notification] Failed to release notifications file lock: {}", e);
        }
    }
}

/// JSON file of user notifications shared with the web front end.
pub struct NotificationStore {
    path: PathBuf,
    max_attempts: u32,
    retry_delay: Duration,
}

impl NotificationStore {
    pub fn new(path: impl Into<PathBuf>, max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            path: path.into(),
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    pub fn from_config(config: &NotificationsConfig) -> Self {
        Self::new(&config.path, config.max_attempts, config.retry_delay())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a new notification and return it.
    pub fn write_notification(
        &self,
        content: &str,
        level: NotificationLevel,
    ) -> Result<Notification, UpkeepError> {
        let notification = Notification {
            timestamp: Utils::format_db_timestamp(Utc::now().naive_utc()),
            guid: Uuid::new_v4().to_string(),
            read: 0,
            level: level.to_string(),
            content: content.to_owned(),
            extra: serde_json::Map::new(),
        };

        let entry = notification.clone();
        self.with_locked(true, move |notifications| notifications.push(entry))?;

        Ok(notification)
    }

    pub fn all(&self) -> Result<Vec<Notification>, UpkeepError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        self.with_locked(false, |notifications| notifications.clone())
    }

    pub fn unread(&self) -> Result<Vec<Notification>, UpkeepError> {
        Ok(self.all()?.into_iter().filter(Notification::is_unread).collect())
    }

    /// Mark one notification (or all of them, when `guid` is `None`) as read,
    /// retrying on I/O or lock failures.
    pub fn mark_read(&self, guid: Option<&str>) -> NotificationResult {
        let result = self.with_retries(|| {
            self.with_locked(true, |notifications| {
                for notification in notifications.iter_mut() {
                    if guid.is_none_or(|g| notification.guid == g) {
                        notification.read = 1;
                    }
                }
            })
        });

        match result {
            Ok(()) => NotificationResult::ok(),
            Err(_) => NotificationResult::failed(format!(
                "Failed to read/write notification file after {} attempts.",
                self.max_attempts
            )),
        }
    }

    pub fn mark_all_read(&self) -> NotificationResult {
        let result = self.mark_read(None);
        if result.success {
            debug!("[Notification] All notifications marked as read.");
        }
        result
    }

    pub fn delete(&self, guid: &str) -> NotificationResult {
        if guid.is_empty() {
            return NotificationResult::failed("GUID is required".to_owned());
        }
        if !self.path.exists() {
            return NotificationResult::ok();
        }

        match self.with_locked(true, |notifications| notifications.retain(|n| n.guid != guid)) {
            Ok(()) => NotificationResult::ok(),
            Err(e) => {
                error!("[Notification] Failed to delete notification {}: {}", guid, e);
                NotificationResult::failed(e.to_string())
            }
        }
    }

    pub fn delete_all(&self) -> Result<(), UpkeepError> {
        self.with_locked(true, |notifications| notifications.clear())?;
        debug!("[Notification] All notifications deleted.");
        Ok(())
    }

    /// Keep only the `keep` most recent notifications. Returns the number removed.
    pub fn remove_old(&self, keep: usize) -> Result<usize, UpkeepError> {
        if !self.path.exists() {
            info!("[Notification] No notifications file to clean.");
            return Ok(0);
        }

        let removed = self.with_locked(true, |notifications| {
            // Timestamps are fixed-width UTC strings, so lexical order is chronological
            notifications.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            let before = notifications.len();
            notifications.truncate(keep);
            before - notifications.len()
        })?;

        info!(
            "[Notification] Trimmed notifications to latest {} ({} removed)",
            keep, removed
        );
        Ok(removed)
    }

    /// Run `op` until it succeeds or the configured attempts are used up, sleeping
    /// `retry_delay` between attempts. The last error is returned.
    fn with_retries<T>(
        &self,
        mut op: impl FnMut() -> Result<T, UpkeepError>,
    ) -> Result<T, UpkeepError> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    error!("[Notification] Attempt {} failed: {}", attempt, e);
                    thread::sleep(self.retry_delay);
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        "[Notification] Giving up after {} attempts: {}",
                        self.max_attempts, e
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Run `f` over the parsed notification list while holding an exclusive lock on the
    /// file. When `write_back` is set the (possibly modified) list is rewritten before
    /// the lock is released.
    fn with_locked<R>(
        &self,
        write_back: bool,
        f: impl FnOnce(&mut Vec<Notification>) -> R,
    ) -> Result<R, UpkeepError> {
        self.ensure_file()?;

        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        let _guard = FileLockGuard::acquire(&file)?;

        let mut raw = String::new();
        (&file).read_to_string(&mut raw)?;
        let mut notifications = Self::parse(&raw)?;

        let result = f(&mut notifications);

        if write_back {
            let json = serde_json::to_string_pretty(&notifications)?;
            (&file).seek(SeekFrom::Start(0))?;
            file.set_len(0)?;
            (&file).write_all(json.as_bytes())?;
            (&file).flush()?;
        }

        Ok(result)
    }

    /// Only text that is not JSON at all is discarded. Valid JSON whose entries cannot be
    /// read is an error, so the file is never rewritten over them.
    fn parse(raw: &str) -> Result<Vec<Notification>, UpkeepError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        let value: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(e) => {
                error!("[Notification] Corrupted JSON detected, resetting: {}", e);
                return Ok(Vec::new());
            }
        };
        serde_json::from_value(value).map_err(|e| {
            UpkeepError::Error(format!(
                "Unrecognized notification entries, leaving file untouched: {}",
                e
            ))
        })
    }

    fn ensure_file(&self) -> Result<(), UpkeepError> {
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, "[]")?;
        Ok(())
    }
}

impl Notifier for NotificationStore {
    fn notify(&self, content: &str) -> Result<(), UpkeepError> {
        self.with_retries(|| self.write_notification(content, NotificationLevel::Alert))?;
        Ok(())
    }
}
