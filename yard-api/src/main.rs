use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::info;
use yard_api::{create_app, AppState, Config};
use yard_logging::{init_subscriber, LogSettings};
use yard_provider::{ContainerDriver, TemplateDriver};
use yard_store::db::{backup_database, create_pool, run_migrations};
use yard_store::Store;
use yard_templates::StackCatalog;

type Drivers = (Arc<dyn ContainerDriver>, Arc<dyn TemplateDriver>);

fn drivers(name: &str) -> Result<Drivers> {
    match name {
        #[cfg(feature = "mock-driver")]
        "mock" => {
            tracing::warn!("using the in-memory mock driver; no real containers will be created");
            let driver = yard_provider::mock::MockDriver::new();
            Ok((Arc::new(driver.clone()), Arc::new(driver)))
        }
        other => bail!("driver '{other}' is not available in this build"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_subscriber(&LogSettings::from_env());

    info!("Starting yard-api service...");

    let config = Config::from_env();
    info!(
        bind_addr = %config.bind_addr,
        db_path = %config.db_path.display(),
        driver = %config.driver,
        "configuration loaded"
    );

    // Backup before migrations
    let db_path = &config.db_path;
    if db_path.exists() {
        let backup_path = backup_database(db_path)?;
        info!("Database backed up to: {}", backup_path.display());
    }

    let pool = create_pool(db_path).await?;
    info!("Running database migrations...");
    run_migrations(&pool).await?;
    info!("Migrations complete");

    let catalog = match &config.stack_catalog {
        Some(path) => StackCatalog::load(path)
            .with_context(|| format!("loading stack catalog {}", path.display()))?,
        None => StackCatalog::builtin()?,
    };
    info!(stacks = catalog.list().count(), "tech stack catalog loaded");

    let (containers, templates) = drivers(&config.driver)?;
    let state = AppState::new(Store::new(pool), containers, templates, catalog, &config);

    let restored = state.coordinator.restore_state().await?;
    info!(workspaces = restored, "workspace state restored");
    let interrupted = state.pipeline.recover_interrupted().await?;
    if interrupted > 0 {
        info!(templates = interrupted, "marked interrupted provisioning jobs as failed");
    }

    let _tasks = state.spawn_background_tasks();
    info!(
        heartbeat_timeout_secs = config.heartbeat_timeout_secs,
        intent_timeout_secs = config.intent_timeout_secs,
        "background tasks started"
    );

    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
