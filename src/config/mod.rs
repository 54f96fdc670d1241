//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{
    CacheBackendKind, DEFAULT_AUTHORS_TTL_SECS, DEFAULT_MEMORY_CAPACITY, DEFAULT_POSTS_TTL_SECS,
    DEFAULT_SIMILAR_IDS_TTL_SECS, DEFAULT_SIMILAR_TTL_SECS, DEFAULT_WRITEBACK_QUEUE,
    DEFAULT_WRITEBACK_WORKERS, DEFAULT_WRITE_TIMEOUT_MS,
};

mod cli;

pub use cli::{
    CliArgs, Command, CommonArgs, DeleteArgs, FindArgs, KeywordsArgs, Overrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "darkroom";
const ENV_PREFIX: &str = "DARKROOM";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_PAGE_SIZE: u64 = 20;
const DEFAULT_MAX_PAGE_SIZE: u64 = 200;
const DEFAULT_SIMILAR_LIMIT: u64 = 12;
const DEFAULT_MAX_SIMILAR_LIMIT: u64 = 50;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub pagination: PaginationSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackendKind,
    pub redis_url: Option<String>,
    pub memory_capacity: NonZeroUsize,
    pub posts_ttl: Duration,
    pub authors_ttl: Duration,
    pub similar_ttl: Duration,
    pub similar_ids_ttl: Duration,
    pub write_timeout: Duration,
    pub writeback_workers: NonZeroUsize,
    pub writeback_queue: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct PaginationSettings {
    pub default_page_size: NonZeroU32,
    pub max_page_size: NonZeroU32,
    pub default_similar: NonZeroU32,
    pub max_similar: NonZeroU32,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(cli.command.overrides());

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    pagination: RawPaginationSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            cache,
            pagination,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let cache = build_cache_settings(cache)?;
        let pagination = build_pagination_settings(pagination)?;

        Ok(Self {
            logging,
            database,
            cache,
            pagination,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend {
        Some(kind) => CacheBackendKind::from_str(&kind)
            .map_err(|reason| LoadError::invalid("cache.backend", reason))?,
        None => CacheBackendKind::Memory,
    };
    let redis_url = non_blank(cache.redis_url);
    if backend == CacheBackendKind::Redis && redis_url.is_none() {
        return Err(LoadError::invalid(
            "cache.redis_url",
            "required when cache.backend is redis",
        ));
    }

    let write_timeout_ms = cache.write_timeout_ms.unwrap_or(DEFAULT_WRITE_TIMEOUT_MS);
    if write_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "cache.write_timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        backend,
        redis_url,
        memory_capacity: non_zero_usize(
            cache.memory_capacity,
            DEFAULT_MEMORY_CAPACITY,
            "cache.memory_capacity",
        )?,
        posts_ttl: ttl(cache.posts_ttl_secs, DEFAULT_POSTS_TTL_SECS, "cache.posts_ttl_secs")?,
        authors_ttl: ttl(
            cache.authors_ttl_secs,
            DEFAULT_AUTHORS_TTL_SECS,
            "cache.authors_ttl_secs",
        )?,
        similar_ttl: ttl(
            cache.similar_ttl_secs,
            DEFAULT_SIMILAR_TTL_SECS,
            "cache.similar_ttl_secs",
        )?,
        similar_ids_ttl: ttl(
            cache.similar_ids_ttl_secs,
            DEFAULT_SIMILAR_IDS_TTL_SECS,
            "cache.similar_ids_ttl_secs",
        )?,
        write_timeout: Duration::from_millis(write_timeout_ms),
        writeback_workers: non_zero_usize(
            cache.writeback_workers,
            DEFAULT_WRITEBACK_WORKERS,
            "cache.writeback_workers",
        )?,
        writeback_queue: non_zero_usize(
            cache.writeback_queue,
            DEFAULT_WRITEBACK_QUEUE,
            "cache.writeback_queue",
        )?,
    })
}

fn build_pagination_settings(
    pagination: RawPaginationSettings,
) -> Result<PaginationSettings, LoadError> {
    let default_page_size = non_zero_u32(
        pagination.default_page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        "pagination.default_page_size",
    )?;
    let max_page_size = non_zero_u32(
        pagination.max_page_size.unwrap_or(DEFAULT_MAX_PAGE_SIZE),
        "pagination.max_page_size",
    )?;
    if default_page_size > max_page_size {
        return Err(LoadError::invalid(
            "pagination.default_page_size",
            "must not exceed pagination.max_page_size",
        ));
    }

    let default_similar = non_zero_u32(
        pagination.default_similar.unwrap_or(DEFAULT_SIMILAR_LIMIT),
        "pagination.default_similar",
    )?;
    let max_similar = non_zero_u32(
        pagination.max_similar.unwrap_or(DEFAULT_MAX_SIMILAR_LIMIT),
        "pagination.max_similar",
    )?;
    if default_similar > max_similar {
        return Err(LoadError::invalid(
            "pagination.default_similar",
            "must not exceed pagination.max_similar",
        ));
    }

    Ok(PaginationSettings {
        default_page_size,
        max_page_size,
        default_similar,
        max_similar,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    redis_url: Option<String>,
    memory_capacity: Option<u64>,
    posts_ttl_secs: Option<u64>,
    authors_ttl_secs: Option<u64>,
    similar_ttl_secs: Option<u64>,
    similar_ids_ttl_secs: Option<u64>,
    write_timeout_ms: Option<u64>,
    writeback_workers: Option<u64>,
    writeback_queue: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPaginationSettings {
    default_page_size: Option<u64>,
    max_page_size: Option<u64>,
    default_similar: Option<u64>,
    max_similar: Option<u64>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn ttl(value: Option<u64>, default: u64, key: &'static str) -> Result<Duration, LoadError> {
    let seconds = value.unwrap_or(default);
    if seconds == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(seconds))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(
    value: Option<u64>,
    default: usize,
    key: &'static str,
) -> Result<NonZeroUsize, LoadError> {
    let value = match value {
        Some(value) => usize::try_from(value)
            .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?,
        None => default,
    };
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
