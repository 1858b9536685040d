use std::sync::Arc;

use tracing::info;

use agora_chat::{Backend, ChatConfig, presence};
use agora_db::Database;
use agora_realtime::Hub;
use agora_server::config::ServerConfig;
use agora_server::{AppState, AppStateInner, router};
use agora_storage::ObjectStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agora=debug,agora_server=debug,agora_chat=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    let db = Database::open(&config.db_path, Hub::new())?;
    let objects = ObjectStore::new(config.storage_dir.clone(), config.public_url.clone()).await?;
    let backend = Backend::new(Arc::new(db), Arc::new(objects), ChatConfig::default());

    tokio::spawn(presence::run_typing_purge_loop(
        backend.clone(),
        config.typing_retention,
        config.cleanup_interval,
    ));

    let state: AppState = Arc::new(AppStateInner {
        backend,
        jwt_secret: config.jwt_secret.clone(),
    });
    let app = router(state, &config.storage_dir);

    let addr = config.addr()?;
    info!("Agora server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
