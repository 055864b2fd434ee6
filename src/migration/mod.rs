mod timestamps;
mod version;

pub use timestamps::{MigrationOutcome, TimestampMigration, UTC_MIGRATED_FLAG};
#[cfg(test)]
pub use version::GateDecision;
