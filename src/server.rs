use anyhow::{Context, Result};
use axum::{extract::DefaultBodyLimit, routing::{get, post}, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::{net::SocketAddr, str::FromStr, sync::Arc, time::Duration};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    bus::{spawn_supervised, topic},
    config::Config,
    coverage::{ChainedSpecResolver, CoverageScorer, CoverageWorker, SpanIngestor, SpecFetcher, SqliteCoverageStore},
    handlers::{self, AppState},
    models::ApiIdentity,
    report::{spawn_reaper, OutboxRelay, ReportOrchestrator, ReportRepository, ResultConsumer, SqliteQualityGateStore},
    signals::{setup_signal_handlers, ShutdownSignal},
    telemetry::{AdmissionFilter, IdentityExtractor, MembershipCache, SqliteMembershipCache, TelemetryProcessor},
};

/// Time allowed for workers to drain after the HTTP server stopped
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Open the SQLite database and apply migrations
///
/// `":memory:"` opens a private in-memory database on a single connection.
pub async fn create_pool(database_path: &str) -> Result<SqlitePool> {
    let pool = if database_path == ":memory:" {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?
    } else {
        if let Some(parent) = std::path::Path::new(database_path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to database at {}", database_path))?
    };

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok(pool)
}

/// Build every pipeline stage, spawn its workers and return the HTTP state
///
/// Workers stop when `shutdown` fires or their input topic closes.
pub async fn build_pipeline(
    config: &Config,
    pool: SqlitePool,
    shutdown: &broadcast::Sender<ShutdownSignal>,
) -> Result<(AppState, Vec<JoinHandle<()>>)> {
    let topics = &config.topics;
    let (inbound_tx, inbound_rx) = topic(&topics.telemetry_inbound, topics.channel_capacity);
    let (outbound_tx, outbound_rx) = topic(&topics.telemetry_outbound, topics.channel_capacity);
    let (request_tx, request_rx) = topic(&topics.coverage_request, topics.channel_capacity);
    let (response_tx, response_rx) = topic(&topics.coverage_response, topics.channel_capacity);

    // Gate definitions and statically indexed APIs
    let gates = Arc::new(SqliteQualityGateStore::new(pool.clone()));
    gates.seed(&config.quality_gates).await?;

    let membership: Arc<dyn MembershipCache> = Arc::new(SqliteMembershipCache::new(pool.clone()));
    for api in &config.spec_index.apis {
        membership
            .register(&ApiIdentity::new(&api.service_name, &api.api_name, &api.api_version))
            .await?;
    }

    let extractor = IdentityExtractor::from_config(&config.telemetry);
    let store = Arc::new(SqliteCoverageStore::new(pool.clone()));
    let http_client = reqwest::Client::new();

    let mut handles = Vec::new();

    // Telemetry admission filter and store ingestion
    let processor = TelemetryProcessor::new(AdmissionFilter::new(extractor.clone(), membership), outbound_tx);
    handles.push(spawn_supervised(
        "telemetry_filter",
        processor.run(inbound_rx, shutdown.subscribe()),
    ));
    let ingestor = SpanIngestor::new(extractor, store.clone());
    handles.push(spawn_supervised(
        "span_ingestor",
        ingestor.run(outbound_rx, shutdown.subscribe()),
    ));

    // Coverage scorer
    let scorer = Arc::new(CoverageScorer::new(
        Arc::new(ChainedSpecResolver::from_config(&config.spec_index, http_client.clone())?),
        SpecFetcher::from_config(&config.spec_index, http_client),
        store,
        config.coverage.http_attributes.clone(),
    ));
    let worker = CoverageWorker::new(scorer, response_tx, config.coverage.scorer_concurrency);
    handles.push(spawn_supervised(
        "coverage_worker",
        worker.run(request_rx, shutdown.subscribe()),
    ));

    // Report orchestrator
    let repository = ReportRepository::new(pool.clone());
    let outbox_notify = Arc::new(Notify::new());
    let orchestrator = Arc::new(ReportOrchestrator::new(
        gates,
        repository.clone(),
        outbox_notify.clone(),
        config.reports.deadline,
    ));
    let relay = OutboxRelay::new(repository, request_tx, outbox_notify, config.reports.outbox_poll_interval);
    handles.push(spawn_supervised("outbox_relay", relay.run(shutdown.subscribe())));
    let consumer = ResultConsumer::new(orchestrator.clone());
    handles.push(spawn_supervised(
        "result_consumer",
        consumer.run(response_rx, shutdown.subscribe()),
    ));
    handles.push(spawn_reaper(
        orchestrator.clone(),
        config.reports.sweep_interval,
        shutdown.subscribe(),
    ));

    let state = AppState {
        orchestrator,
        telemetry_inbound: inbound_tx,
        pool,
        default_lookback_window: config.coverage.default_lookback_window,
    };

    Ok((state, handles))
}

/// Start the quality gate service
///
/// This function:
/// 1. Opens the database and installs the metrics recorder
/// 2. Sets up signal handlers for graceful shutdown
/// 3. Builds the pipeline workers and the Axum application
/// 4. Serves requests until shutdown, then drains the workers
pub async fn start_server(config: Config) -> Result<()> {
    tracing::info!("Quality gate service starting...");

    let prometheus = Arc::new(crate::metrics::init_metrics()?);

    tracing::info!(database = %config.coverage.database_path, "Opening database");
    let pool = create_pool(&config.coverage.database_path).await?;

    let (shutdown_tx, signal_handle) = setup_signal_handlers();
    let mut shutdown_rx = shutdown_tx.subscribe();

    let (state, workers) = build_pipeline(&config, pool.clone(), &shutdown_tx).await?;
    let app = create_router(state, Some(prometheus));

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    info!("Starting quality gate service on {}", addr);
    info!(
        "Configuration: {} quality gates, {} statically indexed APIs, index service {}",
        config.quality_gates.len(),
        config.spec_index.apis.len(),
        config.spec_index.base_url.as_deref().unwrap_or("disabled")
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Shutdown signal received, draining connections...");
        })
        .await?;

    signal_handle.await?;

    let drain = futures::future::join_all(workers);
    if tokio::time::timeout(WORKER_DRAIN_TIMEOUT, drain).await.is_err() {
        tracing::warn!("Workers did not stop within {:?}", WORKER_DRAIN_TIMEOUT);
    }
    pool.close().await;

    info!("Server stopped gracefully");
    Ok(())
}

/// Create the Axum router with all routes and middleware
pub fn create_router(state: AppState, prometheus: Option<Arc<PrometheusHandle>>) -> Router {
    let mut app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/quality-gates", get(handlers::quality_gates::list_quality_gates))
        .route(
            "/quality-gates/:name/calculate",
            post(handlers::quality_gates::calculate),
        )
        .route("/reports/:calculation_id", get(handlers::reports::get_report))
        .route("/v1/traces", post(handlers::telemetry::receive_traces))
        .with_state(state);

    if let Some(handle) = prometheus {
        app = app.merge(
            Router::new()
                .route("/metrics", get(handlers::metrics_handler::metrics))
                .with_state(handle),
        );
    }

    app
        // Trace batches can be large; cap them at 10MB
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    create_pool(":memory:").await.expect("in-memory database")
}

/// HTTP state over an in-memory database with a seeded `strict` gate
#[cfg(test)]
pub(crate) async fn test_state() -> (AppState, crate::bus::Subscription<crate::models::TracesData>) {
    use crate::config::QualityGateDefinition;
    use crate::models::OpenApiCriterion;

    let pool = test_pool().await;
    let gates = Arc::new(SqliteQualityGateStore::new(pool.clone()));
    gates
        .seed(&[QualityGateDefinition {
            name: "strict".to_string(),
            criteria: vec![OpenApiCriterion::PathCoverage, OpenApiCriterion::ResponseCodeCoverage],
        }])
        .await
        .expect("seed gates");

    let orchestrator = Arc::new(ReportOrchestrator::new(
        gates,
        ReportRepository::new(pool.clone()),
        Arc::new(Notify::new()),
        Duration::from_secs(600),
    ));
    let (inbound, subscription) = topic("telemetry.inbound", 16);

    let state = AppState {
        orchestrator,
        telemetry_inbound: inbound,
        pool,
        default_lookback_window: Duration::from_secs(3600),
    };
    (state, subscription)
}
