use std::sync::Arc;

use roomcast::{
    broadcast::{Broadcaster, BroadcasterConfig},
    config::Config,
    db,
    directory::SqliteDirectory,
    messages::SqliteMessageStore,
    presence::{memory::MemoryBackend, PresenceStore},
    AppState, Chat,
};
use sqlx::sqlite::SqlitePoolOptions;
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(config.session_inactivity));

    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(&config.database_url)
        .await?;
    db::migrate(&db_pool).await?;

    let presence = match &config.redis_url {
        Some(url) => PresenceStore::connect(url, config.presence_timeout).await,
        None => {
            info!("REDIS_URL unset, keeping presence in process");
            PresenceStore::new(Arc::new(MemoryBackend::default()), config.presence_timeout)
        }
    };
    let broadcaster = Broadcaster::new(BroadcasterConfig {
        subscriber_queue_capacity: config.subscriber_queue,
    });

    let chat = Chat::new(
        Arc::new(SqliteDirectory::new(db_pool.clone())),
        Arc::new(SqliteMessageStore::new(db_pool)),
        presence,
        broadcaster,
        config.upload_dir.clone(),
    );
    let app_state = AppState { chat };

    let app = roomcast::router(app_state)
        .layer(session_layer);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
