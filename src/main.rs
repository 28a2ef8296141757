use std::{process, sync::Arc, time::Duration};

use atrium::{
    application::{
        catalog::CatalogService,
        error::AppError,
        loaders::{LoaderRepos, SnapshotLoader, SnapshotTtls},
    },
    cache::{
        BroadcastConfig, Broadcaster, CacheBackend, CacheClient, CacheConfig, CacheStore,
        InvalidationRequest, Invalidator, MemoryStore,
    },
    config,
    infra::{
        cache_warmer::{self, CacheWarmer},
        db::PostgresRepositories,
        error::InfraError,
        http::{self, AppState},
        redis::RedisStore,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
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

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Warm(_) => run_warm(settings).await,
        config::Command::Invalidate(args) => run_invalidate(settings, args).await,
    }
}

/// Everything the commands share: repositories, cache and the read/write services.
struct AppContext {
    repositories: Arc<PostgresRepositories>,
    cache_config: CacheConfig,
    cache: Arc<CacheClient>,
    broadcaster: Arc<Broadcaster>,
    loader: SnapshotLoader,
}

impl AppContext {
    fn invalidator(&self) -> Invalidator {
        Invalidator::new(self.cache.clone()).with_broadcaster(self.broadcaster.clone())
    }
}

async fn build_context(settings: &config::Settings) -> Result<AppContext, AppError> {
    let repositories = init_repositories(settings).await?;

    let mut cache_config = CacheConfig::from(&settings.cache);
    let store = init_cache_store(&mut cache_config).await;
    let cache = Arc::new(CacheClient::new(store, &cache_config));

    let broadcaster = Broadcaster::new(BroadcastConfig::from(&settings.broadcast)).map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "failed to build broadcast client: {err}"
        )))
    })?;

    let repos = LoaderRepos {
        users: repositories.clone(),
        courses: repositories.clone(),
        enrollments: repositories.clone(),
        reviews: repositories.clone(),
    };
    let loader = SnapshotLoader::new(repos, cache.clone(), SnapshotTtls::from(&cache_config));

    Ok(AppContext {
        repositories,
        cache_config,
        cache,
        broadcaster: Arc::new(broadcaster),
        loader,
    })
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(
        database_url,
        settings.database.max_connections.get(),
        settings.database.acquire_timeout,
    )
    .await
    .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

/// Build the configured store. An unreachable Redis disables the cache
/// instead of failing start-up; loaders then read straight through.
async fn init_cache_store(config: &mut CacheConfig) -> Arc<dyn CacheStore> {
    if config.enabled
        && config.backend == CacheBackend::Redis
        && let Some(url) = config.redis_url.clone()
    {
        match RedisStore::connect(&url, REDIS_CONNECT_TIMEOUT).await {
            Ok(store) => return Arc::new(store),
            Err(err) => {
                warn!(
                    target: "atrium::cache",
                    error = %err,
                    "redis unavailable at start-up; serving without cache"
                );
                config.enabled = false;
            }
        }
    }

    info!(
        target: "atrium::cache",
        backend = CacheBackend::Memory.as_str(),
        enabled = config.enabled,
        capacity = config.memory_capacity,
        "Using in-process cache store"
    );
    Arc::new(MemoryStore::new(config))
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let ctx = build_context(&settings).await?;
    let invalidator = ctx.invalidator();

    if ctx.cache.is_enabled() {
        let warmer = Arc::new(CacheWarmer::new(
            ctx.loader.clone(),
            ctx.cache_config.warm_detail_limit,
        ));
        let handle = warmer.spawn(
            ctx.cache_config.warm_on_start,
            ctx.cache_config.warm_interval(),
        );
        cache_warmer::install_global(handle)
            .map_err(|err| AppError::unexpected(err.to_string()))?;
    }

    let catalog = CatalogService::new(
        ctx.repositories.clone(),
        ctx.repositories.clone(),
        ctx.repositories.clone(),
        invalidator.clone(),
    );
    let state = AppState {
        loader: Arc::new(ctx.loader.clone()),
        catalog: Arc::new(catalog),
        invalidator,
        cache: ctx.cache.clone(),
        db: ctx.repositories.clone(),
    };

    let result = serve_http(&settings, state).await;
    cache_warmer::shutdown_global().await;
    result
}

async fn serve_http(settings: &config::Settings, state: AppState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "Listening");

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });

    tokio::select! {
        joined = &mut server => return server_outcome(joined),
        _ = shutdown_signal() => {}
    }

    info!("Shutdown signal received; draining connections");
    let _ = stop_tx.send(());

    match tokio::time::timeout(settings.server.graceful_shutdown, &mut server).await {
        Ok(joined) => server_outcome(joined),
        Err(_) => {
            warn!(
                timeout_secs = settings.server.graceful_shutdown.as_secs(),
                "graceful shutdown timed out; aborting open connections"
            );
            server.abort();
            Ok(())
        }
    }
}

fn server_outcome(
    joined: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match joined {
        Ok(result) => result.map_err(|err| AppError::from(InfraError::from(err))),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn run_warm(settings: config::Settings) -> Result<(), AppError> {
    let ctx = build_context(&settings).await?;
    if !ctx.cache.is_enabled() {
        return Err(AppError::validation("cache is disabled; nothing to warm"));
    }

    let warmer = CacheWarmer::new(ctx.loader.clone(), ctx.cache_config.warm_detail_limit);
    let summary = warmer.warm_once().await;

    println!(
        "warmed {} key(s), skipped {}, failed {}",
        summary.warmed, summary.skipped, summary.failed
    );
    Ok(())
}

async fn run_invalidate(
    settings: config::Settings,
    args: config::InvalidateArgs,
) -> Result<(), AppError> {
    let ctx = build_context(&settings).await?;

    let mut request = InvalidationRequest::new(args.resource, args.id).with_scope(args.scope);
    if let Some(user) = args.user {
        request = request.with_user(user);
    }

    // Invalidate locally, then broadcast and wait so the process does not
    // exit before peers have been told.
    let report = Invalidator::new(ctx.cache.clone())
        .invalidate(request.clone())
        .await;
    if let Some(handle) = ctx.broadcaster.publish(&request)
        && let Err(err) = handle.await
    {
        warn!(error = %err, "broadcast task failed");
    }

    println!(
        "deleted {} key(s){}",
        report.deleted,
        if report.is_complete() {
            String::new()
        } else {
            format!("; failed: {}", report.failed_patterns.join(", "))
        }
    );
    Ok(())
}
