//! Process configuration
//!
//! Connection settings, the conversion service credentials and job queue
//! tuning, read once from the environment (and `.env`). The media library
//! configuration itself is a [`LibraryConfig`] loaded from `MEDIALIB_CONFIG`.

use std::env;
use std::path::PathBuf;

use crate::constants::DEFAULT_QUEUE;
use crate::LibraryConfig;

const DB_MAX_CONNECTIONS: u32 = 20;
const DB_TIMEOUT_SECONDS: u64 = 30;
const CLOUDCONVERT_BASE_URL: &str = "https://api.cloudconvert.com";
const CLOUDCONVERT_TIMEOUT_SECONDS: u64 = 600;
const JOB_QUEUE_MAX_WORKERS: usize = 4;
const JOB_QUEUE_POLL_INTERVAL_MS: u64 = 1000;
const JOB_QUEUE_DEFAULT_TIMEOUT_SECS: i32 = 3600;
const JOB_QUEUE_MAX_RETRIES: i32 = 3;
const JOB_QUEUE_STALE_REAP_INTERVAL_SECS: u64 = 60;
const JOB_QUEUE_STALE_GRACE_PERIOD_SECS: i64 = 300;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    /// JSON media library configuration; stock tables when unset.
    pub library_config_path: Option<PathBuf>,
    /// Overrides `LibraryConfig::disk`.
    pub default_disk: Option<String>,
    pub cloudconvert_api_key: Option<String>,
    pub cloudconvert_base_url: String,
    pub cloudconvert_timeout_seconds: u64,
    pub job_queue_max_workers: usize,
    pub job_queue_poll_interval_ms: u64,
    pub job_queue_default_timeout_seconds: i32,
    pub job_queue_max_retries: i32,
    /// Queues this process consumes.
    pub job_queue_names: Vec<String>,
    /// 0 disables the stale job reaper.
    pub job_queue_stale_reap_interval_secs: u64,
    pub job_queue_stale_grace_period_secs: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let job_queue_names: Vec<String> = env::var("JOB_QUEUE_NAMES")
            .unwrap_or_else(|_| DEFAULT_QUEUE.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let config = Config {
            database_url,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| DB_MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(DB_MAX_CONNECTIONS),
            db_timeout_seconds: env::var("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| DB_TIMEOUT_SECONDS.to_string())
                .parse()
                .unwrap_or(DB_TIMEOUT_SECONDS),
            library_config_path: env::var("MEDIALIB_CONFIG").ok().map(PathBuf::from),
            default_disk: env::var("MEDIALIB_DISK").ok().filter(|s| !s.is_empty()),
            cloudconvert_api_key: env::var("CLOUDCONVERT_API_KEY").ok(),
            cloudconvert_base_url: env::var("CLOUDCONVERT_BASE_URL")
                .unwrap_or_else(|_| CLOUDCONVERT_BASE_URL.to_string()),
            cloudconvert_timeout_seconds: env::var("CLOUDCONVERT_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| CLOUDCONVERT_TIMEOUT_SECONDS.to_string())
                .parse()
                .unwrap_or(CLOUDCONVERT_TIMEOUT_SECONDS),
            job_queue_max_workers: env::var("JOB_QUEUE_MAX_WORKERS")
                .unwrap_or_else(|_| JOB_QUEUE_MAX_WORKERS.to_string())
                .parse()
                .unwrap_or(JOB_QUEUE_MAX_WORKERS),
            job_queue_poll_interval_ms: env::var("JOB_QUEUE_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| JOB_QUEUE_POLL_INTERVAL_MS.to_string())
                .parse()
                .unwrap_or(JOB_QUEUE_POLL_INTERVAL_MS),
            job_queue_default_timeout_seconds: env::var("JOB_QUEUE_DEFAULT_TIMEOUT_SECS")
                .unwrap_or_else(|_| JOB_QUEUE_DEFAULT_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(JOB_QUEUE_DEFAULT_TIMEOUT_SECS),
            job_queue_max_retries: env::var("JOB_QUEUE_MAX_RETRIES")
                .unwrap_or_else(|_| JOB_QUEUE_MAX_RETRIES.to_string())
                .parse()
                .unwrap_or(JOB_QUEUE_MAX_RETRIES),
            job_queue_names,
            job_queue_stale_reap_interval_secs: env::var("JOB_QUEUE_STALE_REAP_INTERVAL_SECS")
                .unwrap_or_else(|_| JOB_QUEUE_STALE_REAP_INTERVAL_SECS.to_string())
                .parse()
                .unwrap_or(JOB_QUEUE_STALE_REAP_INTERVAL_SECS),
            job_queue_stale_grace_period_secs: env::var("JOB_QUEUE_STALE_GRACE_PERIOD_SECS")
                .unwrap_or_else(|_| JOB_QUEUE_STALE_GRACE_PERIOD_SECS.to_string())
                .parse()
                .unwrap_or(JOB_QUEUE_STALE_GRACE_PERIOD_SECS),
        };

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.database_url.starts_with("postgres://")
            && !self.database_url.starts_with("postgresql://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        if self.job_queue_max_workers == 0 {
            return Err(anyhow::anyhow!("JOB_QUEUE_MAX_WORKERS must be at least 1"));
        }

        if self.job_queue_names.is_empty() {
            return Err(anyhow::anyhow!("JOB_QUEUE_NAMES must name at least one queue"));
        }

        Ok(())
    }

    /// Library configuration from `MEDIALIB_CONFIG`, or the stock tables.
    pub fn load_library(&self) -> Result<LibraryConfig, anyhow::Error> {
        let mut library = match &self.library_config_path {
            Some(path) => LibraryConfig::from_file(path)?,
            None => LibraryConfig::default(),
        };
        if let Some(disk) = &self.default_disk {
            library.disk = disk.clone();
            library.validate()?;
        }
        Ok(library)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            database_url: "postgresql://localhost/medialib".to_string(),
            db_max_connections: DB_MAX_CONNECTIONS,
            db_timeout_seconds: DB_TIMEOUT_SECONDS,
            library_config_path: None,
            default_disk: None,
            cloudconvert_api_key: None,
            cloudconvert_base_url: CLOUDCONVERT_BASE_URL.to_string(),
            cloudconvert_timeout_seconds: CLOUDCONVERT_TIMEOUT_SECONDS,
            job_queue_max_workers: 2,
            job_queue_poll_interval_ms: JOB_QUEUE_POLL_INTERVAL_MS,
            job_queue_default_timeout_seconds: JOB_QUEUE_DEFAULT_TIMEOUT_SECS,
            job_queue_max_retries: JOB_QUEUE_MAX_RETRIES,
            job_queue_names: vec![DEFAULT_QUEUE.to_string()],
            job_queue_stale_reap_interval_secs: JOB_QUEUE_STALE_REAP_INTERVAL_SECS,
            job_queue_stale_grace_period_secs: JOB_QUEUE_STALE_GRACE_PERIOD_SECS,
        }
    }

    #[test]
    fn validate_rejects_non_postgres_url() {
        let mut config = config();
        config.database_url = "mysql://localhost/medialib".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut config = config();
        config.job_queue_max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_default_disk_is_rejected() {
        let mut config = config();
        config.default_disk = Some("archive".to_string());
        assert!(config.load_library().is_err());

        config.default_disk = None;
        assert_eq!(config.load_library().unwrap().disk, "media");
    }
}
