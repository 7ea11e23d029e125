use identity_service::{
    build_router,
    config::AuthConfig,
    db,
    repository::PgStore,
    services::Services,
    utils::Password,
    AppState,
};
use service_core::error::{set_expose_details, AppError};
use service_core::observability::logging::init_tracing;
use service_core::rate_limit::{RedisRateLimitStore, SlidingWindowLimiter};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(300);
const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );
    set_expose_details(config.expose_error_details);

    // Initialize metrics
    identity_service::services::metrics::init_metrics();

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting identity service"
    );

    tracing::info!("Initializing database connection");
    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(e.into()))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.into()))?;
    tracing::info!("Database initialized successfully");

    let store = Arc::new(PgStore::new(
        pool.clone(),
        Duration::from_millis(config.database.timeout_ms),
    ));
    let services = Services::new(store, &config)?;

    let limiter = match &config.redis.url {
        Some(url) => match tokio::time::timeout(
            REDIS_CONNECT_TIMEOUT,
            RedisRateLimitStore::connect(url),
        )
        .await
        {
            Ok(Ok(redis)) => {
                tracing::info!("Rate limiter using Redis with in-process fallback");
                SlidingWindowLimiter::with_primary(
                    Arc::new(redis),
                    Duration::from_millis(config.redis.timeout_ms),
                )
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Redis unavailable; rate limiting in-process only");
                SlidingWindowLimiter::in_memory()
            }
            Err(_) => {
                tracing::warn!(
                    timeout = ?REDIS_CONNECT_TIMEOUT,
                    "Redis connect timed out; rate limiting in-process only"
                );
                SlidingWindowLimiter::in_memory()
            }
        },
        None => {
            tracing::info!("REDIS_URL not set; rate limiting in-process only");
            SlidingWindowLimiter::in_memory()
        }
    };

    services.permissions.seed_defaults().await?;
    if let (Some(email), Some(password)) = (
        &config.bootstrap.superuser_email,
        &config.bootstrap.superuser_password,
    ) {
        let account = services
            .accounts
            .ensure_superuser(email, &Password::new(password.clone()))
            .await?;
        tracing::info!(account_id = %account.id, "Superuser ready");
    }

    let state = AppState::new(config.clone(), services, limiter, Some(pool));
    spawn_maintenance(state.clone());

    let app = build_router(state);

    let addr: SocketAddr = config
        .common
        .bind_address()
        .parse()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid bind address: {}", e)))?;

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

/// Expires sessions and drops idle rate-limit keys on a fixed interval.
fn spawn_maintenance(state: AppState) {
    let max_window_ms = (state.rate_rules.max_window_seconds() as i64).saturating_mul(1000);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;

            let now_ms = chrono::Utc::now().timestamp_millis();
            let purged = state.limiter.fallback().purge_idle(now_ms, max_window_ms);

            match state.services.sessions.deactivate_expired().await {
                Ok(expired) => {
                    tracing::debug!(expired, purged_keys = purged, "Maintenance pass complete")
                }
                Err(e) => tracing::warn!(error = %e, "Session expiry sweep failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
