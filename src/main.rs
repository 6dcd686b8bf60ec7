//! Viral Feed Relay — Binary Entrypoint
//! Wires the injected clients (wall feed, channel transport, store), seeds
//! the store when a seed file is present, starts the scheduler, and serves
//! the thin admin router.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use viral_feed_relay::app::App;
use viral_feed_relay::config::{self, AppConfig};
use viral_feed_relay::feed::{FeedSource, WallApiFeed};
use viral_feed_relay::metrics::Metrics;
use viral_feed_relay::notify::{ChannelTransport, TelegramTransport};
use viral_feed_relay::store::{MemStore, Store};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("viral_feed_relay=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::from_env().context("loading configuration")?;

    // Recorder first, so every series registered later is exported.
    let metrics = Metrics::init();

    let feed: Arc<dyn FeedSource> =
        Arc::new(WallApiFeed::from_env().context("building wall feed client")?);
    let transport: Arc<dyn ChannelTransport> = Arc::new(
        TelegramTransport::from_env()
            .context("building channel transport")?
            .with_timeout(30)
            .with_retries(3),
    );
    let store: Arc<dyn Store> = Arc::new(MemStore::new());

    if let Some(path) = &cfg.seed_path {
        let seed = config::load_seed(path)?;
        config::apply_seed(&store, seed).await?;
        tracing::info!(path = %path.display(), "store seeded");
    }

    let app = App::new(store, feed, transport, cfg.stop_words.clone());

    // First reconciliation up front so jobs exist before the ticker's first
    // five-minute lap.
    let plan = app.reconcile().await?;
    tracing::info!(
        added = plan.add.len(),
        removed = plan.remove.len(),
        "initial schedule reconciliation"
    );
    app.start();

    let router = viral_feed_relay::create_router(Arc::clone(&app)).merge(metrics.router());
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    tracing::info!(addr = %cfg.bind_addr, "admin surface listening");

    axum::serve(listener, router).await?;

    app.shutdown();
    Ok(())
}
