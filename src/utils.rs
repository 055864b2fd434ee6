use chrono::NaiveDateTime;
use std::time::Duration;

/// Storage format of every timestamp column: naive UTC, second precision.
pub const DB_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct Utils {}

impl Utils {
    pub fn format_db_timestamp(ts: NaiveDateTime) -> String {
        ts.format(DB_TIMESTAMP_FORMAT).to_string()
    }

    /// Quote an SQL identifier. Table and column names in this schema include
    /// reserved words (`"Index"`) and mixed case.
    pub fn quote_ident(ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    pub fn format_elapsed(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        if secs >= 60 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            format!("{}.{:03}s", secs, elapsed.subsec_millis())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_format_db_timestamp() {
        let ts = NaiveDate::from_ymd_opt(2026, 2, 11)
            .unwrap()
            .and_hms_opt(7, 5, 9)
            .unwrap();
        assert_eq!(Utils::format_db_timestamp(ts), "2026-02-11 07:05:09");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(Utils::quote_ident("Index"), "\"Index\"");
        assert_eq!(Utils::quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(Utils::format_elapsed(Duration::from_millis(1_250)), "1.250s");
        assert_eq!(Utils::format_elapsed(Duration::from_secs(125)), "2m 5s");
    }
}
