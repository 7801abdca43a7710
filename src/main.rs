//! Application entry-point: load configuration, connect the database, wire
//! the quote pipeline, and serve HTTP until shutdown.
//!
//! 1. Initialise tracing from `RUST_LOG` with sane per-crate directives.
//! 2. Resolve environment settings and the chains file.
//! 3. Build the Postgres-backed stores and the orchestrator.
//! 4. Serve until Ctrl-C, then drain via the cancellation token.

use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use aqua_quoter::{
    blockchain::RpcChainReader,
    config::{AppSettings, ChainsRegistry},
    database,
    nonce::PostgresNonceAllocator,
    orchestrator::QuoteOrchestrator,
    pairs::PostgresPairStore,
    pricing_client::HttpPricingClient,
    quote_store::PostgresQuoteStore,
    server::{self, AppState},
    signer::SignerCache,
    strategies::PostgresStrategyCatalog,
    strategy_client::HttpStrategyClient,
    token_registry::{PostgresTokenStore, TokenRegistry},
};

const DEFAULT_CHAINS_CONFIG: &str = "config/chains.json";

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("ethers_providers=warn".parse().unwrap())
        .add_directive("ethers=warn".parse().unwrap())
        .add_directive("tokio_postgres=warn".parse().unwrap())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("aqua_quoter=info".parse().unwrap());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = AppSettings::from_env().map_err(|e| eyre::eyre!("settings: {e}"))?;
    let chains_path =
        std::env::var("CHAINS_CONFIG").unwrap_or_else(|_| DEFAULT_CHAINS_CONFIG.to_string());
    let chains = Arc::new(
        ChainsRegistry::load(&chains_path)
            .await
            .map_err(|e| eyre::eyre!("chains config: {e}"))?,
    );
    info!(chains = chains.list().len(), "configuration loaded");

    let database_url = settings
        .database_url
        .clone()
        .ok_or_else(|| eyre::eyre!("DATABASE_URL is not set"))?;
    let pool = database::create_pool(&database_url)
        .await
        .map_err(|e| eyre::eyre!("database: {e}"))?;
    database::ensure_schema(&pool)
        .await
        .map_err(|e| eyre::eyre!("schema: {e}"))?;

    let catalog = Arc::new(PostgresStrategyCatalog::new(pool.clone()));
    let pairs = Arc::new(PostgresPairStore::new(pool.clone()));
    let tokens = Arc::new(TokenRegistry::new(
        Arc::new(PostgresTokenStore::new(pool.clone())),
        Arc::new(RpcChainReader::new()),
    ));
    let pricing = Arc::new(HttpPricingClient::new(
        &settings.pricing_url,
        settings.request_timeout,
    ));
    let strategy = Arc::new(HttpStrategyClient::new(
        &settings.strategy_url,
        settings.request_timeout,
    ));
    let nonces = Arc::new(PostgresNonceAllocator::new(pool.clone()));
    let signers = Arc::new(SignerCache::new());
    let quotes = Arc::new(PostgresQuoteStore::new(pool.clone()));

    let orchestrator = Arc::new(QuoteOrchestrator::new(
        chains.clone(),
        catalog.clone(),
        pairs.clone(),
        tokens.clone(),
        pricing,
        strategy,
        nonces,
        signers,
        quotes,
        settings.quote_expiry_seconds,
    ));

    let state = AppState {
        orchestrator,
        chains,
        catalog,
        pairs,
        tokens,
        global_timeout: settings.global_timeout,
    };

    let shutdown = CancellationToken::new();
    let server_shutdown = shutdown.clone();
    let server_handle =
        tokio::spawn(async move { server::serve(state, settings.port, server_shutdown).await });

    match signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received, draining"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }
    shutdown.cancel();

    match server_handle.await {
        Ok(Ok(())) => info!("server drained cleanly"),
        Ok(Err(e)) => error!(error = %e, "server exited with error"),
        Err(e) => error!(error = %e, "server task panicked"),
    }
    Ok(())
}
