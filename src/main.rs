use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use teamsrelay::backend::DualEndpointClient;
use teamsrelay::bot::Bot;
use teamsrelay::channels::web;
use teamsrelay::config::Config;
use teamsrelay::state::cache::ConversationCache;
use teamsrelay::state::store::MemoryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("teamsrelay=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env().context("loading configuration")?;

    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(ConversationCache::new(config.cache.capacity));
    let backend =
        Arc::new(DualEndpointClient::new(&config.backend).context("building pipeline client")?);
    let bot = Bot::new(store, cache, backend, config.retry);

    tracing::info!(
        addr = %config.server.bind_addr,
        primary = %config.backend.primary_url,
        fallback = %config.backend.fallback_url,
        "Starting teamsrelay"
    );
    web::serve(bot, config.server.bind_addr)
        .await
        .context("HTTP ingress failed")?;
    Ok(())
}
