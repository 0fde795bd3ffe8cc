//! Main entry point for the PixelForge generation service

use pixelforge::{
    api,
    catalog::ModelCatalog,
    config::Settings,
    db::Db,
    orchestrator::Orchestrator,
    provider::openrouter::OpenRouterProvider,
    scheduler::JobDispatcher,
    storage::file_store::FileStore,
    users::UserService,
    AppState,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::load()?;
    settings.validate()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.logging.level.clone()));

    if settings.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }

    info!("Starting PixelForge generation service");
    info!(
        "Loaded configuration: server={}:{}",
        settings.server.host, settings.server.port
    );

    let db = Arc::new(Db::new());
    let catalog = ModelCatalog::with_overrides(settings.models.clone());
    let provider = Arc::new(OpenRouterProvider::new(&settings.provider)?);
    let store = Arc::new(FileStore::new(&settings.storage));

    // Dispatcher and orchestrator reference each other; the channel breaks
    // the cycle: sender into the orchestrator, receiver into the worker
    let (dispatcher, runs) = JobDispatcher::channel();
    let orchestrator = Arc::new(Orchestrator::new(
        db.clone(),
        catalog,
        provider,
        store,
        Arc::new(dispatcher),
        settings.retry.clone(),
    ));
    JobDispatcher::run(runs, orchestrator.clone());

    let app_state = Arc::new(AppState {
        users: UserService::new(db.clone()),
        db,
        orchestrator,
        settings: settings.clone(),
    });

    // Build the router
    let app = api::routes::create_router(app_state);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
