use std::{process, sync::Arc};

use darkroom::{
    application::{
        catalog::{CatalogService, PageLimits},
        error::AppError,
        repos::{PostsRepo, PostsWriteRepo},
    },
    cache::{
        CacheBackend, CacheBackendKind, CacheConfig, CacheLayer, CachedPosts, MemoryBackend,
        WriteBackPool,
    },
    config,
    domain::filter::PostFilter,
    infra::{db::PostgresRepositories, error::InfraError, telemetry},
};
use serde::Serialize;
use sqlx::postgres::PgPool;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        eprintln!("error: {}", error.public_message());
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let pool = connect(&settings).await?;
    if let config::Command::Migrate(_) = cli_args.command {
        PostgresRepositories::run_migrations(&pool)
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
        info!(target = "darkroom::migrate", "Migrations applied");
        return Ok(());
    }

    let app = build_application_context(pool, &settings)?;
    let result = dispatch(&app.catalog, cli_args.command).await;

    // Drain queued write-backs before the runtime shuts down.
    app.cache.wait_idle().await;

    result
}

async fn dispatch(catalog: &CatalogService, command: config::Command) -> Result<(), AppError> {
    match command {
        config::Command::Migrate(_) => Ok(()),
        config::Command::Ids(_) => print_json(&catalog.all_ids().await?),
        config::Command::Find(args) => {
            let filter = PostFilter::new(args.to_params()?)?;
            print_json(&catalog.find_posts(filter).await?)
        }
        config::Command::Delete(args) => {
            catalog.delete_post(args.id).await?;
            info!(target = "darkroom::delete", id = args.id, "Post deleted");
            Ok(())
        }
        config::Command::Keywords(args) => print_json(&catalog.keyword_summary(args.limit).await?),
        config::Command::Authors(_) => print_json(&catalog.authors().await?),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to encode output: {err}")))?;
    println!("{rendered}");
    Ok(())
}

async fn connect(settings: &config::Settings) -> Result<PgPool, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))
}

struct ApplicationContext {
    catalog: CatalogService,
    cache: CacheLayer,
}

fn build_application_context(
    pool: PgPool,
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let repositories = Arc::new(PostgresRepositories::new(pool));
    let cache_config = CacheConfig::from(&settings.cache);

    let backend = build_cache_backend(&cache_config)?;
    let writeback = WriteBackPool::spawn(
        cache_config.workers(),
        cache_config.queue_depth(),
        cache_config.write_timeout(),
    );
    let cache = CacheLayer::new(backend, writeback);

    let store: Arc<dyn PostsRepo> = repositories.clone();
    let posts_repo: Arc<dyn PostsRepo> =
        Arc::new(CachedPosts::new(store, cache.clone(), &cache_config));
    let posts_write_repo: Arc<dyn PostsWriteRepo> = repositories;

    info!(
        target = "darkroom::cache",
        backend = cache_config.backend.as_str(),
        "Cache layer ready"
    );

    let catalog = CatalogService::new(
        posts_repo,
        posts_write_repo,
        PageLimits::from(&settings.pagination),
    );

    Ok(ApplicationContext { catalog, cache })
}

fn build_cache_backend(config: &CacheConfig) -> Result<Arc<dyn CacheBackend>, AppError> {
    match config.backend {
        CacheBackendKind::Memory => Ok(Arc::new(MemoryBackend::new(config.capacity_non_zero()))),
        CacheBackendKind::Redis => redis_backend(config),
    }
}

#[cfg(feature = "redis")]
fn redis_backend(config: &CacheConfig) -> Result<Arc<dyn CacheBackend>, AppError> {
    let url = config
        .redis_url
        .as_deref()
        .ok_or_else(|| InfraError::configuration("cache.redis_url is not configured"))?;
    let backend = darkroom::cache::RedisBackend::connect(url).map_err(InfraError::from)?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "redis"))]
fn redis_backend(_config: &CacheConfig) -> Result<Arc<dyn CacheBackend>, AppError> {
    Err(AppError::from(InfraError::configuration(
        "cache backend `redis` requires building with the `redis` feature",
    )))
}
