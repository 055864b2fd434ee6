use log::warn;
use rusqlite::{Connection, OptionalExtension};
use std::str::FromStr;

use crate::error::UpkeepError;

/// Previously running software version, written by the application on startup.
pub const VERSION_KEY: &str = "VERSION";

/// Accessors for the application's persistent `Settings` key/value table.
///
/// `setKey` carries no uniqueness constraint in older installs, so writes update
/// in place and only insert when no row matched.
pub struct SettingsStore;

impl SettingsStore {
    pub fn get_value(conn: &Connection, key: &str) -> Result<Option<String>, UpkeepError> {
        let value: Option<Option<String>> = conn
            .query_row(
                "SELECT setValue FROM Settings WHERE setKey = ? ORDER BY rowid LIMIT 1",
                [key],
                |row| row.get(0),
            )
            .optional()?;

        Ok(value.flatten())
    }

    pub fn set_value(conn: &Connection, key: &str, value: &str) -> Result<(), UpkeepError> {
        let updated = conn.execute(
            "UPDATE Settings SET setValue = ? WHERE setKey = ?",
            [value, key],
        )?;

        if updated == 0 {
            conn.execute(
                "INSERT INTO Settings (setKey, setValue) VALUES (?, ?)",
                [key, value],
            )?;
        }

        Ok(())
    }

    /// Typed lookup. A stored value that does not parse is logged and reported as absent
    /// so callers fall back to their configured default.
    pub fn get_parsed<T: FromStr>(conn: &Connection, key: &str) -> Result<Option<T>, UpkeepError> {
        let Some(raw) = Self::get_value(conn, key)? else {
            return Ok(None);
        };

        let cleaned = Self::unquote(&raw);
        if cleaned.is_empty() {
            return Ok(None);
        }

        match cleaned.parse::<T>() {
            Ok(value) => Ok(Some(value)),
            Err(_) => {
                warn!("Setting '{}' has unparsable value '{}' - ignoring", key, raw);
                Ok(None)
            }
        }
    }

    pub fn is_truthy(value: &str) -> bool {
        matches!(
            Self::unquote(value).to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    }

    // Values written by the settings importer are sometimes stored quoted
    fn unquote(raw: &str) -> &str {
        let trimmed = raw.trim();
        trimmed
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .or_else(|| trimmed.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
            .unwrap_or(trimmed)
            .trim()
    }
}
