use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use helpdesk::api::{self, AppState};
use helpdesk::clock::{Clock, SystemClock};
use helpdesk::config::ServiceConfig;
use helpdesk::db::{CreateUser, Database, Role};
use helpdesk::engine::TicketEngine;
use helpdesk::idempotency::IdempotencyCache;
use helpdesk::logging;

/// On an empty database, create an admin and write its token next to the db.
fn bootstrap_admin(db: &Database, clock: &dyn Clock, token_path: &Path) -> anyhow::Result<()> {
    if db.count_users()? > 0 {
        return Ok(());
    }

    let issued = db.create_user(
        &CreateUser {
            name: "Administrator".to_string(),
            email: "admin@localhost".to_string(),
            role: Role::Admin,
        },
        clock.now(),
    )?;

    std::fs::write(token_path, &issued.api_token)
        .with_context(|| format!("Failed to write admin token to {}", token_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(token_path)?.permissions();
        perms.set_mode(0o600);
        std::fs::set_permissions(token_path, perms)?;
    }

    tracing::info!(
        "Created bootstrap admin {}; API token written to {}",
        issued.user.id,
        token_path.display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env();
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data directory {}", config.data_dir.display()))?;

    let _log_guard = logging::init_logging(&config.logs_dir())?;

    tracing::info!("Helpdesk starting up...");
    tracing::info!("Data directory: {:?}", config.data_dir);

    let database = Arc::new(Database::open(config.db_path()).context("Failed to open database")?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    bootstrap_admin(&database, clock.as_ref(), &config.admin_token_path())?;

    let idempotency = Arc::new(IdempotencyCache::new(
        database.clone(),
        clock.clone(),
        config.idempotency_ttl(),
    ));
    tracing::info!("Idempotency records expire after {}h", idempotency.ttl().num_hours());
    let engine = Arc::new(TicketEngine::new(database.clone(), clock, idempotency));

    let cleanup = api::start_cleanup_service(engine.clone(), config.cleanup());
    let handle = api::start_server(AppState::new(engine, database), config.api()).await?;
    tracing::info!("API server started at {}", handle.addr);

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    for task in cleanup {
        task.abort();
    }
    handle.shutdown().await;

    tracing::info!("Helpdesk stopped");
    Ok(())
}
