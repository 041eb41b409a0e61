use std::net::SocketAddr;
use std::sync::Arc;

use booth_core::tracker::{JobStatusTracker, JobStore, MemoryJobStore};
use booth_core::workflow::Workflow;
use booth_pipeline::{launcher, GenerationRunner, JobFacade, PipelineConfig};
use booth_storage::{ArtifactStore, StorageConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use booth_api::config::ServerConfig;
use booth_api::router::build_app_router;
use booth_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "booth_api=debug,booth_pipeline=debug,booth_comfyui=info,tower_http=debug".into()
            }),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let pipeline_config = PipelineConfig::from_env().expect("Invalid pipeline configuration");
    tracing::info!(
        api_url = %pipeline_config.comfyui_api_url,
        ws_url = %pipeline_config.comfyui_ws_url,
        "Loaded pipeline configuration",
    );

    // --- Artifact storage ---
    let store = StorageConfig::from_env()
        .expect("Invalid storage configuration")
        .build()
        .await
        .expect("Failed to initialise artifact storage");
    tracing::info!(backend = store.backend_name(), "Artifact store ready");

    // --- Job status persistence ---
    let (pool, job_store) = match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let pool = booth_db::create_pool(&database_url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Database connection pool created");

            booth_db::health_check(&pool)
                .await
                .expect("Database health check failed");

            booth_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");

            let job_store: Arc<dyn JobStore> = Arc::new(booth_db::PgJobStore::new(pool.clone()));
            (Some(pool), job_store)
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set; job status is kept in memory");
            let job_store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
            (None, job_store)
        }
    };

    // --- Workflow template ---
    let template = Workflow::load(
        &pipeline_config.workflow_path,
        &pipeline_config.bindings.sink_class,
    )
    .expect("Failed to load workflow template");
    tracing::info!(
        path = %pipeline_config.workflow_path.display(),
        nodes = template.len(),
        "Workflow template loaded",
    );

    // --- ComfyUI backend ---
    let backend_handle = pipeline_config.launch_cmd.as_deref().map(|cmd| {
        launcher::launch_backend(cmd).expect("Failed to launch ComfyUI backend")
    });

    // --- Pipeline ---
    let runner = GenerationRunner::new(
        &pipeline_config,
        Arc::new(template),
        Arc::clone(&store),
        JobStatusTracker::new(job_store),
    )
    .expect("Workflow template does not match the configured node bindings");
    let facade = JobFacade::new(Arc::new(runner), store, pipeline_config.signed_url_ttl)
        .with_retention(pipeline_config.job_retention);

    // --- App state ---
    let state = AppState {
        facade: Arc::new(facade),
        config: Arc::new(config.clone()),
        pool,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    if let Some(handle) = backend_handle {
        // Dropping the supervisor kills the backend process.
        handle.abort();
        tracing::info!("ComfyUI backend stopped");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or SIGTERM to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
