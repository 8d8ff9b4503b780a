use crate::scheduler::models::CadenceFrequency;
use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl PostgresConfig {
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::InvalidInput("postgres.url is empty".to_string()));
        }
        if self.max_connections == 0 {
            return Err(Error::InvalidInput(
                "postgres.max_connections must be > 0".to_string(),
            ));
        }
        if self.acquire_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "postgres.acquire_timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Optional custom endpoint (e.g. MinIO).
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Optional key prefix applied before tenant scoping.
    pub prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub enum BlobConfig {
    S3(S3Config),
    Local { root_dir: PathBuf },
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Returned by `adjust_cadence` for sources that were never scheduled.
    pub default_frequency: CadenceFrequency,
    /// Interval used for `CadenceFrequency::Custom`. Zero is allowed: due sources
    /// then get priority 1.
    pub custom_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_frequency: CadenceFrequency::Daily,
            custom_interval: Duration::from_millis(86_400_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceAccessConfig {
    /// Consecutive failures after which an active source is decommissioned.
    pub max_navigation_failures: u32,
    /// Revisit interval when a source has no `frequency_hours` in its crawl config.
    pub default_navigation_interval: Duration,
}

impl Default for SourceAccessConfig {
    fn default() -> Self {
        Self {
            max_navigation_failures: 5,
            default_navigation_interval: Duration::from_secs(24 * 3600),
        }
    }
}

impl SourceAccessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_navigation_failures == 0 {
            return Err(Error::InvalidInput(
                "sources.max_navigation_failures must be > 0".to_string(),
            ));
        }
        if self.default_navigation_interval.is_zero() {
            return Err(Error::InvalidInput(
                "sources.default_navigation_interval must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Process-level configuration for the lifecycle store, blob store and scheduler.
#[derive(Debug, Clone)]
pub struct UnlockConfig {
    pub postgres: PostgresConfig,
    pub blob: BlobConfig,
    pub scheduler: SchedulerConfig,
    pub sources: SourceAccessConfig,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

impl UnlockConfig {
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        let pg_url = std::env::var("UNLOCK_DATABASE_URL")
            .map_err(|_| Error::InvalidInput("UNLOCK_DATABASE_URL is required".to_string()))?;
        let pg_max_connections = env_parse::<u32>("UNLOCK_DATABASE_MAX_CONNECTIONS").unwrap_or(10);
        let pg_acquire_timeout_ms =
            env_parse::<u64>("UNLOCK_DATABASE_ACQUIRE_TIMEOUT_MS").unwrap_or(5_000);

        let blob = match std::env::var("UNLOCK_S3_BUCKET").ok() {
            Some(bucket) => {
                let access_key_id = std::env::var("UNLOCK_S3_ACCESS_KEY_ID").map_err(|_| {
                    Error::InvalidInput("UNLOCK_S3_ACCESS_KEY_ID is required".to_string())
                })?;
                let secret_access_key =
                    std::env::var("UNLOCK_S3_SECRET_ACCESS_KEY").map_err(|_| {
                        Error::InvalidInput("UNLOCK_S3_SECRET_ACCESS_KEY is required".to_string())
                    })?;
                BlobConfig::S3(S3Config {
                    bucket,
                    region: std::env::var("UNLOCK_S3_REGION")
                        .unwrap_or_else(|_| "us-east-1".to_string()),
                    endpoint: std::env::var("UNLOCK_S3_ENDPOINT").ok(),
                    access_key_id,
                    secret_access_key,
                    prefix: std::env::var("UNLOCK_S3_PREFIX").ok(),
                })
            }
            None => BlobConfig::Local {
                root_dir: std::env::var("UNLOCK_BLOB_ROOT_DIR")
                    .ok()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./data/blobs")),
            },
        };

        let default_frequency = match std::env::var("UNLOCK_SCHEDULER_DEFAULT_FREQUENCY") {
            Ok(v) => v.parse::<CadenceFrequency>()?,
            Err(_) => CadenceFrequency::Daily,
        };
        let custom_interval_ms =
            env_parse::<u64>("UNLOCK_SCHEDULER_CUSTOM_INTERVAL_MS").unwrap_or(86_400_000);

        let max_failures = env_parse::<u32>("UNLOCK_SOURCE_MAX_FAILURES").unwrap_or(5);
        let interval_hours = env_parse::<u64>("UNLOCK_SOURCE_DEFAULT_INTERVAL_HOURS").unwrap_or(24);

        let cfg = Self {
            postgres: PostgresConfig {
                url: pg_url,
                max_connections: pg_max_connections,
                acquire_timeout: Duration::from_millis(pg_acquire_timeout_ms),
            },
            blob,
            scheduler: SchedulerConfig {
                default_frequency,
                custom_interval: Duration::from_millis(custom_interval_ms),
            },
            sources: SourceAccessConfig {
                max_navigation_failures: max_failures,
                default_navigation_interval: Duration::from_secs(interval_hours * 3600),
            },
        };

        cfg.validate()?;
        Ok(cfg)
    }

    #[tracing::instrument(level = "debug")]
    pub fn validate(&self) -> Result<()> {
        self.postgres.validate()?;

        match &self.blob {
            BlobConfig::S3(s3) => {
                if s3.bucket.trim().is_empty() {
                    return Err(Error::InvalidInput("s3.bucket is empty".to_string()));
                }
                if s3.region.trim().is_empty() {
                    return Err(Error::InvalidInput("s3.region is empty".to_string()));
                }
                if s3.access_key_id.trim().is_empty() {
                    return Err(Error::InvalidInput("s3.access_key_id is empty".to_string()));
                }
                if s3.secret_access_key.trim().is_empty() {
                    return Err(Error::InvalidInput(
                        "s3.secret_access_key is empty".to_string(),
                    ));
                }
            }
            BlobConfig::Local { root_dir } => {
                if root_dir.as_os_str().is_empty() {
                    return Err(Error::InvalidInput("blob.root_dir is empty".to_string()));
                }
            }
        }

        self.sources.validate()?;
        Ok(())
    }
}
