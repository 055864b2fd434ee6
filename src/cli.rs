use std::fs;

use chrono::Utc;
use clap::{Parser, Subcommand};
use log::info;

use crate::config::Config;
use crate::database::Database;
use crate::error::UpkeepError;
use crate::notifications::{NotificationResult, NotificationStore};
use crate::upkeep::Upkeep;
use crate::utils::Utils;

#[derive(Parser)]
#[command(
    name = "netwatch-upkeep",
    version,
    about = "Schema migration and retention maintenance for the NetWatch database"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Bring the schema up to date and run pending one-time migrations
    Migrate,
    /// Prune history tables and compact the database (default if no command specified)
    Cleanup,
    /// Migrate, then clean up
    Upkeep,
    /// Show stored version, migration state and database size
    Status,
    /// List or update the user notification store
    Notifications {
        #[command(subcommand)]
        action: Option<NotificationAction>,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum NotificationAction {
    /// List notifications (default if no action specified)
    List {
        /// Only show notifications that have not been read
        #[arg(long)]
        unread: bool,
    },
    /// Mark one notification as read, or all of them when no GUID is given
    MarkRead { guid: Option<String> },
    /// Delete one notification
    Delete { guid: String },
    /// Delete every notification
    Clear,
}

impl Cli {
    pub fn handle_command_line(config: &Config) -> Result<(), UpkeepError> {
        let args = Cli::parse();
        Self::run(args.command.unwrap_or(Command::Cleanup), config)
    }

    fn run(command: Command, config: &Config) -> Result<(), UpkeepError> {
        let store = NotificationStore::from_config(&config.notifications);

        match command {
            Command::Migrate => Self::migrate(&mut Self::open_database(config)?, &store, config),
            Command::Cleanup => {
                Self::cleanup(&Self::open_database(config)?, &store, config);
                Ok(())
            }
            Command::Upkeep => {
                let mut db = Self::open_database(config)?;
                Self::migrate(&mut db, &store, config)?;
                Self::cleanup(&db, &store, config);
                Ok(())
            }
            Command::Status => {
                Self::status(&Self::open_database(config)?);
                Ok(())
            }
            Command::Notifications { action } => Self::notifications(
                &store,
                action.unwrap_or(NotificationAction::List { unread: false }),
            ),
        }
    }

    fn open_database(config: &Config) -> Result<Database, UpkeepError> {
        if let Some(parent) = config.database.path.parent() {
            fs::create_dir_all(parent)?;
        }
        Database::open(&config.database.path, config.database.busy_timeout())
    }

    fn migrate(db: &mut Database, store: &NotificationStore, config: &Config) -> Result<(), UpkeepError> {
        let report = Upkeep::run_startup(db, store, &config.general, Utc::now())?;
        info!(
            "Startup complete: {} columns added, timestamps: {:?}",
            report.columns_added, report.timestamps
        );
        Ok(())
    }

    fn cleanup(db: &Database, store: &NotificationStore, config: &Config) {
        let report = Upkeep::run_cleanup(db, config, store, Utc::now());
        for step in &report.steps {
            info!(
                "  {:<24} {} ({})",
                step.name,
                step.outcome,
                Utils::format_elapsed(step.elapsed)
            );
        }
    }

    fn notifications(store: &NotificationStore, action: NotificationAction) -> Result<(), UpkeepError> {
        match action {
            NotificationAction::List { unread } => {
                let notifications = if unread { store.unread()? } else { store.all()? };
                for n in &notifications {
                    println!(
                        "{}  {:<36}  {:<7}  {}  {}",
                        n.timestamp,
                        n.guid,
                        n.level,
                        if n.is_unread() { "*" } else { " " },
                        n.content
                    );
                }
                println!("{} notification(s)", notifications.len());
                Ok(())
            }
            NotificationAction::MarkRead { guid } => {
                let result = match guid.as_deref() {
                    Some(guid) => store.mark_read(Some(guid)),
                    None => store.mark_all_read(),
                };
                Self::check_result(result)
            }
            NotificationAction::Delete { guid } => Self::check_result(store.delete(&guid)),
            NotificationAction::Clear => store.delete_all(),
        }
    }

    fn check_result(result: NotificationResult) -> Result<(), UpkeepError> {
        if result.success {
            return Ok(());
        }
        Err(UpkeepError::Error(
            result.error.unwrap_or_else(|| "Notification update failed".to_owned()),
        ))
    }

    fn status(db: &Database) {
        let status = Upkeep::status(db);
        println!("Version:             {}", status.version.as_deref().unwrap_or("(unset)"));
        println!(
            "UTC timestamps:      {}",
            if status.timestamps_migrated { "migrated" } else { "not migrated" }
        );
        println!(
            "Database size:       {} MB",
            Database::bytes_to_mb(status.size_bytes)
        );
        for (kind, count) in &status.objects {
            println!("{:<21}{}", format!("{} objects:", kind), count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing_no_command_defaults_to_cleanup() {
        let result = Cli::try_parse_from(["netwatch-upkeep"]);
        assert!(result.is_ok(), "Should accept no command");

        let cli = result.unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.command.unwrap_or(Command::Cleanup), Command::Cleanup);
    }

    #[test]
    fn test_cli_parsing_explicit_commands() {
        for (arg, expected) in [
            ("migrate", Command::Migrate),
            ("cleanup", Command::Cleanup),
            ("upkeep", Command::Upkeep),
            ("status", Command::Status),
        ] {
            let cli = Cli::try_parse_from(["netwatch-upkeep", arg]).unwrap();
            assert_eq!(cli.command, Some(expected));
        }
    }

    #[test]
    fn test_cli_parsing_notification_actions() {
        let cli = Cli::try_parse_from(["netwatch-upkeep", "notifications"]).unwrap();
        assert_eq!(cli.command, Some(Command::Notifications { action: None }));

        let cli = Cli::try_parse_from(["netwatch-upkeep", "notifications", "list", "--unread"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Notifications {
                action: Some(NotificationAction::List { unread: true })
            })
        );

        let cli = Cli::try_parse_from(["netwatch-upkeep", "notifications", "mark-read"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Notifications {
                action: Some(NotificationAction::MarkRead { guid: None })
            })
        );

        let result = Cli::try_parse_from(["netwatch-upkeep", "notifications", "delete"]);
        assert!(result.is_err(), "delete needs a GUID");
    }

    #[test]
    fn test_notification_actions_update_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = NotificationStore::new(
            dir.path().join("notifications.json"),
            2,
            std::time::Duration::from_millis(1),
        );
        let a = store
            .write_notification("a", crate::notifications::NotificationLevel::Alert)
            .unwrap();
        store
            .write_notification("b", crate::notifications::NotificationLevel::Alert)
            .unwrap();

        Cli::notifications(&store, NotificationAction::MarkRead { guid: Some(a.guid.clone()) }).unwrap();
        assert_eq!(store.unread().unwrap().len(), 1);

        Cli::notifications(&store, NotificationAction::Delete { guid: a.guid }).unwrap();
        assert_eq!(store.all().unwrap().len(), 1);

        let result = Cli::notifications(&store, NotificationAction::Delete { guid: String::new() });
        assert!(matches!(result, Err(UpkeepError::Error(msg)) if msg == "GUID is required"));

        Cli::notifications(&store, NotificationAction::Clear).unwrap();
        assert!(store.all().unwrap().is_empty());
    }

    #[test]
    fn test_cli_parsing_invalid_arguments() {
        let result = Cli::try_parse_from(["netwatch-upkeep", "nonexistent-command"]);
        assert!(result.is_err(), "Should reject unknown commands");

        let result = Cli::try_parse_from(["netwatch-upkeep", "cleanup", "--invalid-flag"]);
        assert!(result.is_err(), "Should reject unknown flags on cleanup");
    }
}
