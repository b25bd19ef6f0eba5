//! Sipflow Server - Main entry point

use anyhow::{Context, Result};
use sipflow_common::logging::{init_logging, LogConfig};
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use sipflow_server::{
    api::{self, AppState},
    audit::{AuditLogger, TracingAuditSink},
    auth::{ticket::SharedRng, JwtTokenVerifier, MemoryTicketStore, TicketProvider, TokenVerifier},
    config::{AuthConfig, Config, StorageConfig},
    engine::TemporalEngine,
    event::{EventService, InMemoryEventService, IngestEvent},
    ingest::{IngestComponents, IngestService, IngestSettings},
    middleware::Authenticator,
    persistence::sqlite::SqlitePersistence,
    sipsource::{BucketSource, RetentionPeriod},
    storage_client::StorageClient,
};

#[tokio::main]
async fn main() -> Result<()> {
    // LOG_* variables take precedence over these defaults.
    let log_config = LogConfig::for_service("sipflow-server")
        .with_filter("sipflow_server=debug,tower_http=debug,sqlx=info")
        .merge_env()?;

    init_logging(&log_config)?;

    info!("Starting Sipflow Server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let shutdown = CancellationToken::new();

    let pool = SqlitePersistence::connect(
        &config.database.url,
        config.database.max_connections,
        Duration::from_secs(config.database.connect_timeout_secs),
    )
    .await
    .context("connect to database")?;
    info!("Database connection pool established");

    SqlitePersistence::migrate(&pool)
        .await
        .context("run database migrations")?;
    info!("Database migrations completed");

    let rng: SharedRng = Arc::new(Mutex::new(rand::rngs::OsRng));
    let events: Arc<dyn EventService<IngestEvent>> =
        Arc::new(InMemoryEventService::<IngestEvent>::new());

    let internal_bucket = config.internal_bucket.open().await;
    let upload_bucket = config.upload.bucket.open().await;
    let sip_source = BucketSource::from_config(&config.sip_source)
        .await
        .context("open SIP source")?;
    info!(configured = sip_source.is_configured(), "SIP source initialized");

    let engine = TemporalEngine::new(
        Url::parse(&config.temporal.address).context("parse Temporal address")?,
        config.temporal.namespace.clone(),
    )?;

    check_storage(&config.storage, shutdown.child_token()).await?;

    let (authenticator, tickets) = auth_components(&config.auth, rng.clone())?;

    let audit = AuditLogger::new(Arc::new(TracingAuditSink))
        .spawn(events.as_ref(), shutdown.child_token())?;

    let ingest = IngestService::new(
        IngestComponents {
            persistence: Arc::new(SqlitePersistence::new(pool.clone())),
            events,
            engine: Arc::new(engine),
            tickets,
            internal_bucket,
            upload_bucket,
            sip_source: Arc::new(sip_source),
            sip_source_id: config.sip_source.id,
            rng,
        },
        IngestSettings {
            task_queue: config.temporal.task_queue.clone(),
            upload_max_size: config.upload.max_size,
            upload_retention: RetentionPeriod::from_secs(config.upload.retention_period_secs),
        },
    );

    let state = AppState {
        ingest,
        authenticator,
        pool,
        shutdown: shutdown.clone(),
    };
    let app = api::create_router(state, &config.cors);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(
            shutdown.clone(),
            config.server.shutdown_timeout_secs,
        ))
        .await?;

    shutdown.cancel();
    audit.await.ok();

    info!("Server shut down gracefully");

    Ok(())
}

fn auth_components(config: &AuthConfig, rng: SharedRng) -> Result<(Authenticator, TicketProvider)> {
    if !config.enabled {
        warn!("API authentication is disabled");
        return Ok((Authenticator::disabled(), TicketProvider::disabled()));
    }

    let issuer = config.issuer.as_deref();
    let audience = config.audience.as_deref();
    let verifier: Arc<dyn TokenVerifier> = match (&config.jwt_secret, &config.jwt_public_key) {
        (Some(secret), _) => Arc::new(JwtTokenVerifier::hs256(
            secret.as_bytes(),
            issuer,
            audience,
            config.abac.clone(),
        )),
        (None, Some(pem)) => Arc::new(
            JwtTokenVerifier::rs256_pem(pem.as_bytes(), issuer, audience, config.abac.clone())
                .context("parse JWT public key")?,
        ),
        (None, None) => anyhow::bail!("missing JWT secret or public key with auth. enabled"),
    };

    let store = MemoryTicketStore::new(Duration::from_secs(config.ticket_ttl_secs));
    let tickets = TicketProvider::new(Arc::new(store), config.ticket_prefix.clone(), rng);

    Ok((Authenticator::new(verifier), tickets))
}

/// Connect to the storage API and check the default permanent location.
async fn check_storage(config: &StorageConfig, cancel: CancellationToken) -> Result<()> {
    let address = config.address.as_deref().context("missing storage API address")?;
    let client = StorageClient::connect(address, &config.oidc)
        .await
        .context("create storage API client")?;

    match client.list_locations(&cancel).await {
        Ok(locations) => {
            let found = locations
                .iter()
                .any(|l| Some(l.uuid) == config.default_permanent_location_id);
            if found {
                info!(locations = locations.len(), "Storage API reachable");
            } else {
                warn!("Default permanent location not found in the storage API");
            }
        },
        Err(e) => warn!(error = %e, "Storage API not reachable"),
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(shutdown: CancellationToken, timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // Monitor streams never finish on their own.
    shutdown.cancel();

    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
