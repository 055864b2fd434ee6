use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Environment variable naming an explicit config file, overriding the data directory default.
pub const CONFIG_PATH_ENV: &str = "NETWATCH_CONFIG";
const ENV_PREFIX: &str = "NETWATCH_";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: PathBuf,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const DEFAULT_LEVEL: &str = "info";

    fn default(data_dir: &Path) -> Self {
        LoggingConfig {
            level: Self::DEFAULT_LEVEL.to_string(),
            directory: data_dir.join("logs"),
        }
    }

    fn ensure_valid(&mut self) {
        let str_original = self.level.clone();
        self.level = self.level.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.level.as_str()) {
            eprintln!(
                "Config error: log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::DEFAULT_LEVEL
            );
            self.level = Self::DEFAULT_LEVEL.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    busy_timeout_ms: u64,
}

impl DatabaseConfig {
    const BUSY_TIMEOUT_MS: u64 = 5_000;

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    fn default(data_dir: &Path) -> Self {
        DatabaseConfig {
            path: data_dir.join("db").join("app.db"),
            busy_timeout_ms: Self::BUSY_TIMEOUT_MS,
        }
    }

    fn ensure_valid(&mut self) {
        if self.busy_timeout_ms == 0 {
            eprintln!(
                "Config error: database busy timeout of 0ms is invalid - using default of {}ms",
                Self::BUSY_TIMEOUT_MS
            );
            self.busy_timeout_ms = Self::BUSY_TIMEOUT_MS;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GeneralConfig {
    pub timezone: String,
}

impl GeneralConfig {
    const DEFAULT_TIMEZONE: &str = "UTC";

    fn default() -> Self {
        GeneralConfig {
            timezone: Self::DEFAULT_TIMEZONE.to_owned(),
        }
    }

    /// The configured process timezone. `ensure_valid` guarantees it parses.
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(Tz::UTC)
    }

    fn ensure_valid(&mut self) {
        let str_original = self.timezone.clone();
        self.timezone = self.timezone.trim().to_owned();
        if self.timezone.parse::<Tz>().is_err() {
            eprintln!(
                "Config error: timezone of '{}' is invalid - using default of '{}'",
                str_original,
                Self::DEFAULT_TIMEZONE
            );
            self.timezone = Self::DEFAULT_TIMEZONE.to_owned();
        }
    }
}

/// Retention thresholds. Hour-based device rules treat 0 as "disabled".
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RetentionConfig {
    pub online_history_keep: u32,
    pub days_to_keep_events: u32,
    pub hrs_to_keep_newdev: u32,
    pub hrs_to_keep_offdev: u32,
    pub clear_new_flag_hrs: u32,
    pub plugins_keep_hist: u32,
    pub notifications_keep_hist: u32,
    pub app_events_keep_hist: u32,
}

impl RetentionConfig {
    const ONLINE_HISTORY_KEEP: u32 = 150;
    const DAYS_TO_KEEP_EVENTS: u32 = 90;
    const PLUGINS_KEEP_HIST: u32 = 250;
    const NOTIFICATIONS_KEEP_HIST: u32 = 100;
    const APP_EVENTS_KEEP_HIST: u32 = 5000;

    pub fn default() -> Self {
        RetentionConfig {
            online_history_keep: Self::ONLINE_HISTORY_KEEP,
            days_to_keep_events: Self::DAYS_TO_KEEP_EVENTS,
            hrs_to_keep_newdev: 0,
            hrs_to_keep_offdev: 0,
            clear_new_flag_hrs: 0,
            plugins_keep_hist: Self::PLUGINS_KEEP_HIST,
            notifications_keep_hist: Self::NOTIFICATIONS_KEEP_HIST,
            app_events_keep_hist: Self::APP_EVENTS_KEEP_HIST,
        }
    }

    fn ensure_valid(&mut self) {
        // A zero-day event window would empty the Events table on every pass
        if self.days_to_keep_events == 0 {
            eprintln!(
                "Config error: days_to_keep_events of 0 is invalid - using default of {}",
                Self::DAYS_TO_KEEP_EVENTS
            );
            self.days_to_keep_events = Self::DAYS_TO_KEEP_EVENTS;
        }
        if self.online_history_keep == 0 {
            eprintln!(
                "Config error: online_history_keep of 0 is invalid - using default of {}",
                Self::ONLINE_HISTORY_KEEP
            );
            self.online_history_keep = Self::ONLINE_HISTORY_KEEP;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NotificationsConfig {
    pub path: PathBuf,
    pub max_attempts: u32,
    retry_delay_ms: u64,
    pub keep: u32,
}

impl NotificationsConfig {
    const MAX_ATTEMPTS: u32 = 3;
    const RETRY_DELAY_MS: u64 = 500;
    const KEEP: u32 = 100;

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    fn default(data_dir: &Path) -> Self {
        NotificationsConfig {
            path: data_dir.join("api").join("user_notifications.json"),
            max_attempts: Self::MAX_ATTEMPTS,
            retry_delay_ms: Self::RETRY_DELAY_MS,
            keep: Self::KEEP,
        }
    }

    fn ensure_valid(&mut self) {
        if self.max_attempts == 0 {
            eprintln!(
                "Config error: notification max_attempts of 0 is invalid - using default of {}",
                Self::MAX_ATTEMPTS
            );
            self.max_attempts = Self::MAX_ATTEMPTS;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub general: GeneralConfig,
    pub retention: RetentionConfig,
    pub notifications: NotificationsConfig,
}

impl Config {
    pub fn default(data_dir: &Path) -> Self {
        Config {
            logging: LoggingConfig::default(data_dir),
            database: DatabaseConfig::default(data_dir),
            general: GeneralConfig::default(),
            retention: RetentionConfig::default(),
            notifications: NotificationsConfig::default(data_dir),
        }
    }

    /// Loads the configuration from `config.toml` in the app's data directory (or the file
    /// named by `NETWATCH_CONFIG`), layered under `NETWATCH_*` environment variables.
    /// If the file is missing or fails to parse, defaults are used.
    /// Additionally, writes the default config to disk if no file exists.
    pub fn load_config(project_dirs: &ProjectDirs) -> Self {
        let data_dir = project_dirs.data_local_dir();
        let config_path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let default_config = Config::default(data_dir);

        // If the config file doesn't exist, write the default configuration to disk.
        if !config_path.exists() {
            Self::write_default(&config_path, &default_config);
        }

        Self::from_figment(Self::figment(&config_path, &default_config), default_config)
    }

    fn figment(config_path: &Path, default_config: &Config) -> Figment {
        Figment::from(Serialized::defaults(default_config.clone()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]).split("__"))
    }

    fn from_figment(figment: Figment, default_config: Config) -> Self {
        // Attempt to extract the configuration; on error, print a message and fall back to defaults.
        let mut config = figment.extract().unwrap_or_else(|err| {
            eprintln!("Could not load configuration: {}. Using default configuration.", err);
            default_config
        });

        config.ensure_valid();

        config
    }

    fn write_default(config_path: &Path, default_config: &Config) {
        if let Some(parent) = config_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!(
                    "Failed to create configuration directory {}: {}",
                    parent.display(),
                    e
                );
            }
        }
        match toml::to_string_pretty(default_config) {
            Ok(toml_string) => {
                if let Err(e) = fs::write(config_path, toml_string) {
                    eprintln!(
                        "Failed to write default config to {}: {}",
                        config_path.display(),
                        e
                    );
                }
            }
            Err(_) => eprintln!("Failed to serialize default config."),
        }
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.database.ensure_valid();
        self.general.ensure_valid();
        self.retention.ensure_valid();
        self.notifications.ensure_valid();
    }
}
