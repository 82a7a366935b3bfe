use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{
    cli::GlobalArgs,
    dates,
    postings::SeatEditPolicy,
    retry::RetryPolicy,
    service::ServiceSettings,
};

/// Runtime configuration resolved from defaults, file, environment and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    pub db_path: PathBuf,
    /// `EnvFilter` directive for the subscriber.
    pub log_level: String,
    pub retry: RetryPolicy,
    pub settings: ServiceSettings,
    pub sweep_interval: std::time::Duration,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    store: FileStore,
    #[serde(default)]
    logging: FileLogging,
    #[serde(default)]
    retry: FileRetry,
    #[serde(default)]
    feed: FileFeed,
    #[serde(default)]
    postings: FilePostings,
    #[serde(default)]
    sweep: FileSweep,
}

#[derive(Deserialize, Default)]
struct FileStore {
    path: Option<PathBuf>,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_log_level")]
    level: String,
}

#[derive(Deserialize)]
#[serde(default)]
struct FileRetry {
    max_retries: usize,
    initial_delay_ms: u64,
    max_delay_ms: u64,
}

#[derive(Deserialize)]
#[serde(default)]
struct FileFeed {
    expiry_hours: i64,
    display_offset: String,
}

#[derive(Deserialize, Default)]
struct FilePostings {
    #[serde(default)]
    seat_edit_policy: SeatEditPolicy,
}

#[derive(Deserialize)]
#[serde(default)]
struct FileSweep {
    interval_secs: u64,
    grace_secs: i64,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for FileRetry {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

impl Default for FileFeed {
    fn default() -> Self {
        Self {
            expiry_hours: 24,
            display_offset: "UTC".into(),
        }
    }
}

impl Default for FileSweep {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            grace_secs: 600,
        }
    }
}

impl Config {
    pub fn load(args: &GlobalArgs) -> Result<Self> {
        // config file path precedence: CLI -> ENV -> default
        let config_path = args
            .config
            .clone()
            .or_else(|| std::env::var("RIDECORE_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/ridecore.toml"));

        let file_cfg = match fs::read_to_string(&config_path) {
            Ok(contents) => toml::from_str::<FileConfig>(&contents)
                .with_context(|| format!("invalid config file {}", config_path.display()))?,
            Err(_) => FileConfig::default(),
        };

        let mut db_path = file_cfg
            .store
            .path
            .unwrap_or_else(|| default_data_dir().join("ridecore.db"));
        let mut log_level = file_cfg.logging.level;
        let mut display_offset = file_cfg.feed.display_offset;

        // environment overrides
        if let Ok(dir) = std::env::var("RIDECORE_DATA_DIR") {
            db_path = PathBuf::from(dir).join("ridecore.db");
        }
        if let Ok(level) = std::env::var("RIDECORE_LOG") {
            log_level = level;
        }
        if let Ok(offset) = std::env::var("RIDECORE_DISPLAY_OFFSET") {
            display_offset = offset;
        }

        // CLI overrides
        if let Some(db) = &args.db {
            db_path = db.clone();
        }
        if let Some(level) = &args.log {
            log_level = level.clone();
        }
        if let Some(offset) = &args.display_offset {
            display_offset = offset.clone();
        }

        let display_offset =
            dates::parse_offset(&display_offset).context("invalid display offset")?;
        if file_cfg.feed.expiry_hours <= 0 {
            anyhow::bail!("feed.expiry_hours must be positive");
        }
        if file_cfg.sweep.interval_secs == 0 {
            anyhow::bail!("sweep.interval_secs must be positive");
        }
        if file_cfg.sweep.grace_secs < 0 {
            anyhow::bail!("sweep.grace_secs must not be negative");
        }

        let retry = RetryPolicy::builder()
            .max_retries(file_cfg.retry.max_retries)
            .initial_delay(std::time::Duration::from_millis(
                file_cfg.retry.initial_delay_ms,
            ))
            .max_delay(std::time::Duration::from_millis(file_cfg.retry.max_delay_ms))
            .build();

        Ok(Self {
            db_path,
            log_level,
            retry,
            settings: ServiceSettings {
                seat_edit: file_cfg.postings.seat_edit_policy,
                display_offset,
                feed_expiry: time::Duration::hours(file_cfg.feed.expiry_hours),
                sweep_grace: time::Duration::seconds(file_cfg.sweep.grace_secs),
            },
            sweep_interval: std::time::Duration::from_secs(file_cfg.sweep.interval_secs),
        })
    }
}

/// Per-user data directory, or `./ridecore_data` when none can be determined.
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("edu", "ridecore", "ridecore")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./ridecore_data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use time::UtcOffset;

    fn clear_env() {
        for var in [
            "RIDECORE_CONFIG",
            "RIDECORE_DATA_DIR",
            "RIDECORE_LOG",
            "RIDECORE_DISPLAY_OFFSET",
        ] {
            std::env::remove_var(var);
        }
    }

    fn args_for(contents: &str) -> (tempfile::TempDir, GlobalArgs) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ridecore.toml");
        fs::write(&path, contents).unwrap();
        let args = GlobalArgs {
            config: Some(path),
            ..Default::default()
        };
        (dir, args)
    }

    #[test]
    #[serial]
    fn empty_file_gives_defaults() {
        clear_env();
        let (_dir, args) = args_for("");
        let cfg = Config::load(&args).unwrap();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.settings.feed_expiry, time::Duration::hours(24));
        assert_eq!(cfg.settings.seat_edit, SeatEditPolicy::RejectWhileBooked);
        assert_eq!(cfg.settings.display_offset, UtcOffset::UTC);
        assert_eq!(cfg.retry.max_retries, 3);
        assert!(cfg.db_path.ends_with("ridecore.db"));
    }

    #[test]
    #[serial]
    fn file_values_are_used() {
        clear_env();
        let (_dir, args) = args_for(
            "[store]\npath = \"/tmp/rides.db\"\n\
             [feed]\nexpiry_hours = 48\ndisplay_offset = \"-05:00\"\n\
             [postings]\nseat_edit_policy = \"overwrite\"\n\
             [retry]\nmax_retries = 1\n\
             [sweep]\ninterval_secs = 5\ngrace_secs = 30\n",
        );
        let cfg = Config::load(&args).unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/rides.db"));
        assert_eq!(cfg.settings.feed_expiry, time::Duration::hours(48));
        assert_eq!(cfg.settings.seat_edit, SeatEditPolicy::Overwrite);
        assert_eq!(cfg.settings.sweep_grace, time::Duration::seconds(30));
        assert_eq!(cfg.sweep_interval, std::time::Duration::from_secs(5));
        assert_eq!(cfg.retry.max_retries, 1);
        assert_eq!(
            cfg.settings.display_offset,
            UtcOffset::from_hms(-5, 0, 0).unwrap()
        );
    }

    #[test]
    #[serial]
    fn precedence_cli_env_file() {
        clear_env();
        let (_dir, mut args) = args_for("[logging]\nlevel = \"warn\"\n");
        std::env::set_var("RIDECORE_LOG", "debug");
        std::env::set_var("RIDECORE_DATA_DIR", "/var/lib/rides");
        assert_eq!(Config::load(&args).unwrap().log_level, "debug");

        args.log = Some("trace".into());
        args.db = Some(PathBuf::from("/tmp/cli.db"));
        let cfg = Config::load(&args).unwrap();
        assert_eq!(cfg.log_level, "trace");
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/cli.db"));
        clear_env();
    }

    #[test]
    #[serial]
    fn env_data_dir_overrides_file_path() {
        clear_env();
        let (_dir, args) = args_for("[store]\npath = \"/tmp/rides.db\"\n");
        std::env::set_var("RIDECORE_DATA_DIR", "/var/lib/rides");
        let cfg = Config::load(&args).unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/var/lib/rides/ridecore.db"));
        clear_env();
    }

    #[test]
    #[serial]
    fn invalid_values_fail() {
        clear_env();
        let (_dir, args) = args_for("[feed]\nexpiry_hours = 0\n");
        assert!(Config::load(&args).is_err());
        let (_dir, args) = args_for("[feed]\ndisplay_offset = \"noon\"\n");
        assert!(Config::load(&args).is_err());
        let (_dir, args) = args_for("[postings]\nseat_edit_policy = \"maybe\"\n");
        assert!(Config::load(&args).is_err());
        let (_dir, args) = args_for("[feed\n");
        assert!(Config::load(&args).is_err());
    }
}
