use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use vector_auth_service::{
    build_router,
    config::AuthConfig,
    db,
    services::{
        Authenticator, Database, GoogleStrategy, NeonClient, PgSchemaBootstrapper,
        ProvisioningCoordinator, SessionStore,
    },
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    vector_auth_service::services::metrics::init_metrics();

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting vector auth service"
    );

    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;
    let database = Arc::new(Database::new(pool));
    tracing::info!("Metadata store initialized");

    let provisioner = Arc::new(NeonClient::new(config.neon.clone())?);
    let bootstrapper = Arc::new(PgSchemaBootstrapper::new(&config.bootstrap));
    let coordinator = ProvisioningCoordinator::new(
        database.clone(),
        database.clone(),
        provisioner,
        bootstrapper,
    );

    let google = GoogleStrategy::new(config.google.clone())?;
    let authenticator = Authenticator::builder(coordinator)
        .with_strategy(Arc::new(google))
        .build();
    tracing::info!(strategies = ?authenticator.strategy_names(), "Authenticator initialized");

    let state = AppState {
        config: config.clone(),
        users: database,
        authenticator: Arc::new(authenticator),
        sessions: SessionStore::new(&config.session),
    };

    let app = build_router(state).await?;

    let addr: SocketAddr = format!("{}:{}", config.common.host, config.common.port)
        .parse()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid listen address: {}", e)))?;

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
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
