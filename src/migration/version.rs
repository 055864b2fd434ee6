use std::fmt;

use log::{info, warn};
use rusqlite::Connection;

use crate::error::UpkeepError;
use crate::settings_store::SettingsStore;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SemVer {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SemVer {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Releases after this one already store timestamps as UTC.
pub const UTC_TIMESTAMPS_AFTER: SemVer = SemVer::new(26, 2, 6);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedVersion {
    Comparable(SemVer),
    /// Empty or the literal `unknown`.
    Missing,
    Unparsable(String),
}

impl ParsedVersion {
    /// Parse a loose `[v]MAJOR[.MINOR[.PATCH]]` version. Missing trailing components are 0
    /// and components past the third are ignored. Any non-numeric component makes the
    /// whole string unparsable.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("unknown") {
            return ParsedVersion::Missing;
        }

        let body = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        let mut parts = [0u32; 3];
        for (i, component) in body.split('.').take(3).enumerate() {
            match component.parse::<u32>() {
                Ok(n) => parts[i] = n,
                Err(e) => {
                    return ParsedVersion::Unparsable(format!("component '{}': {}", component, e))
                }
            }
        }

        ParsedVersion::Comparable(SemVer::new(parts[0], parts[1], parts[2]))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::Display)]
pub enum GateDecision {
    #[strum(serialize = "skip (already completed)")]
    SkipCompleted,
    #[strum(serialize = "skip (newer version)")]
    SkipNewerVersion,
    #[strum(serialize = "run")]
    Run,
}

impl GateDecision {
    pub fn should_run(&self) -> bool {
        matches!(self, GateDecision::Run)
    }
}

pub struct VersionGate;

impl VersionGate {
    /// Precedence: a truthy completion flag always skips; a version newer than the
    /// cut-over skips; anything else, including missing or unparsable metadata, runs.
    pub fn decide(flag_value: Option<&str>, version: &str) -> GateDecision {
        if flag_value.is_some_and(SettingsStore::is_truthy) {
            info!("[db_upgrade] One-time migration already completed - skipping");
            return GateDecision::SkipCompleted;
        }

        match ParsedVersion::parse(version) {
            ParsedVersion::Comparable(v) if v > UTC_TIMESTAMPS_AFTER => {
                info!(
                    "[db_upgrade] Version {} is newer than {} - skipping migration",
                    version, UTC_TIMESTAMPS_AFTER
                );
                GateDecision::SkipNewerVersion
            }
            ParsedVersion::Comparable(_) => GateDecision::Run,
            ParsedVersion::Missing => {
                warn!("[db_upgrade] VERSION missing/unknown - running migration as safety measure");
                GateDecision::Run
            }
            ParsedVersion::Unparsable(reason) => {
                warn!(
                    "[db_upgrade] Could not parse version '{}': {} - running migration as safety measure",
                    version, reason
                );
                GateDecision::Run
            }
        }
    }

    /// Read the completion flag stored under `flag_key` and decide for `version_string`.
    pub fn should_run_once_migration(
        conn: &Connection,
        flag_key: &str,
        version_string: &str,
    ) -> Result<GateDecision, UpkeepError> {
        let flag = SettingsStore::get_value(conn, flag_key)?;
        Ok(Self::decide(flag.as_deref(), version_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use proptest::prelude::*;

    #[test]
    fn test_parse_variants() {
        assert_eq!(
            ParsedVersion::parse("v26.2.6"),
            ParsedVersion::Comparable(SemVer::new(26, 2, 6))
        );
        assert_eq!(
            ParsedVersion::parse("27"),
            ParsedVersion::Comparable(SemVer::new(27, 0, 0))
        );
        assert_eq!(
            ParsedVersion::parse("26.3.0.9"),
            ParsedVersion::Comparable(SemVer::new(26, 3, 0))
        );
        assert_eq!(ParsedVersion::parse(" "), ParsedVersion::Missing);
        assert_eq!(ParsedVersion::parse("Unknown"), ParsedVersion::Missing);
        assert!(matches!(
            ParsedVersion::parse("invalid.version"),
            ParsedVersion::Unparsable(_)
        ));
        assert!(matches!(
            ParsedVersion::parse("26.3.0-beta"),
            ParsedVersion::Unparsable(_)
        ));
    }

    #[test]
    fn test_newer_versions_skip() {
        for v in ["26.3.0", "27.0.0", "v26.2.7", "v27"] {
            assert_eq!(
                VersionGate::decide(None, v),
                GateDecision::SkipNewerVersion,
                "{v}"
            );
        }
    }

    #[test]
    fn test_missing_old_or_unparsable_versions_run() {
        for v in ["", "unknown", "invalid.version", "25.1.0", "26.2.5", "26.2.6", "v26.2.6"] {
            assert_eq!(VersionGate::decide(None, v), GateDecision::Run, "{v}");
        }
    }

    #[test]
    fn test_flag_takes_precedence() {
        for v in ["", "unknown", "invalid.version", "25.1.0", "27.0.0"] {
            assert_eq!(
                VersionGate::decide(Some("1"), v),
                GateDecision::SkipCompleted,
                "{v}"
            );
        }
        // A falsy flag does not count as completed
        assert_eq!(VersionGate::decide(Some("0"), "25.1.0"), GateDecision::Run);
    }

    #[test]
    fn test_should_run_reads_flag_from_settings() {
        let conn = Connection::open_in_memory().unwrap();
        Schema::provision_base_tables(&conn).unwrap();

        let decision = VersionGate::should_run_once_migration(&conn, "SOME_FLAG", "25.1.0").unwrap();
        assert!(decision.should_run());

        SettingsStore::set_value(&conn, "SOME_FLAG", "1").unwrap();
        let decision = VersionGate::should_run_once_migration(&conn, "SOME_FLAG", "25.1.0").unwrap();
        assert_eq!(decision, GateDecision::SkipCompleted);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_gate_follows_version_order(major in 0u32..40, minor in 0u32..10, patch in 0u32..12, prefix in any::<bool>()) {
            let raw = format!("{}{}.{}.{}", if prefix { "v" } else { "" }, major, minor, patch);
            let expected = if SemVer::new(major, minor, patch) > UTC_TIMESTAMPS_AFTER {
                GateDecision::SkipNewerVersion
            } else {
                GateDecision::Run
            };
            prop_assert_eq!(VersionGate::decide(None, &raw), expected);
        }
    }
}
