//! Database connection pool management and schema bootstrap.
//!
//! One deadpool_postgres pool per process, built from `DATABASE_URL`. The
//! schema is idempotently ensured at startup so a fresh database serves
//! quotes without external migration tooling.

use crate::errors::StoreError;
use deadpool_postgres::{Config as PgConfig, Pool, PoolConfig, Runtime, Timeouts};
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::NoTls;
use tracing::info;

const DEFAULT_POOL_SIZE: usize = 20;

/// Create the shared database pool from a `postgres://` URL.
pub async fn create_pool(database_url: &str) -> Result<Arc<Pool>, StoreError> {
    let url = url::Url::parse(database_url)
        .map_err(|e| StoreError::Pool(format!("invalid DATABASE_URL: {e}")))?;

    if url.scheme() != "postgres" && url.scheme() != "postgresql" {
        return Err(StoreError::Pool(format!(
            "invalid database scheme: expected 'postgres' or 'postgresql', got '{}'",
            url.scheme()
        )));
    }

    let mut pg_config = PgConfig::new();
    pg_config.host = Some(
        url.host_str()
            .ok_or_else(|| StoreError::Pool("missing host in DATABASE_URL".into()))?
            .to_string(),
    );
    pg_config.port = Some(url.port().unwrap_or(5432));
    pg_config.user = Some(if url.username().is_empty() {
        "postgres".to_string()
    } else {
        url.username().to_string()
    });
    pg_config.password = url.password().map(|p| p.to_string());
    pg_config.dbname = Some(url.path().trim_start_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| Some("aqua".to_string()));

    let mut pool_size = DEFAULT_POOL_SIZE;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "pool_size" => {
                if let Ok(size) = value.parse::<usize>() {
                    pool_size = size;
                }
            }
            "connect_timeout" => {
                if let Ok(secs) = value.parse::<u64>() {
                    pg_config.connect_timeout = Some(Duration::from_secs(secs));
                }
            }
            _ => {}
        }
    }
    pg_config.pool = Some(PoolConfig {
        max_size: pool_size,
        timeouts: Timeouts {
            create: Some(Duration::from_secs(30)),
            wait: Some(Duration::from_secs(30)),
            recycle: Some(Duration::from_secs(300)),
        },
        queue_mode: Default::default(),
    });

    let pool = pg_config
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| StoreError::Pool(format!("failed to create pool: {e}")))?;

    // fail fast if the database is unreachable
    let conn = pool.get().await?;
    conn.execute("SELECT 1", &[]).await?;
    info!(target: "database", max_size = pool_size, "database pool created");

    Ok(Arc::new(pool))
}

/// Idempotent schema bootstrap for all persisted state.
pub async fn ensure_schema(pool: &Pool) -> Result<(), StoreError> {
    let conn = pool.get().await?;
    conn.batch_execute(SCHEMA_SQL).await?;
    info!(target: "database", "schema ensured");
    Ok(())
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tokens (
    chain_id    BIGINT      NOT NULL,
    address     TEXT        NOT NULL,
    decimals    SMALLINT    NOT NULL,
    symbol      TEXT,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (chain_id, address)
);

CREATE TABLE IF NOT EXISTS pairs (
    chain_id    BIGINT      NOT NULL,
    token0      TEXT        NOT NULL,
    token1      TEXT        NOT NULL,
    enabled     BOOLEAN     NOT NULL,
    meta        JSONB,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (chain_id, token0, token1)
);

CREATE TABLE IF NOT EXISTS strategies (
    id          UUID        PRIMARY KEY,
    chain_id    BIGINT      NOT NULL,
    name        TEXT        NOT NULL,
    version     INTEGER     NOT NULL,
    params      JSONB       NOT NULL,
    hash        TEXT        NOT NULL,
    enabled     BOOLEAN     NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS strategies_chain_idx ON strategies (chain_id);

CREATE TABLE IF NOT EXISTS app_config (
    chain_id            BIGINT  PRIMARY KEY,
    active_strategy_id  UUID,
    paused              BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE TABLE IF NOT EXISTS nonce_state (
    chain_id    BIGINT        NOT NULL,
    maker       TEXT          NOT NULL,
    next_nonce  NUMERIC(78,0) NOT NULL,
    PRIMARY KEY (chain_id, maker)
);

CREATE TABLE IF NOT EXISTS quotes (
    quote_id            UUID        PRIMARY KEY,
    chain_id            BIGINT      NOT NULL,
    maker               TEXT        NOT NULL,
    taker               TEXT        NOT NULL,
    recipient           TEXT        NOT NULL,
    executor            TEXT        NOT NULL,
    strategy_id         UUID        NOT NULL,
    strategy_version    INTEGER     NOT NULL,
    strategy_hash       TEXT        NOT NULL,
    sell_token          TEXT        NOT NULL,
    buy_token           TEXT        NOT NULL,
    sell_amount         TEXT        NOT NULL,
    buy_amount          TEXT        NOT NULL,
    fee_bps             INTEGER     NOT NULL,
    fee_amount          TEXT        NOT NULL,
    nonce               TEXT        NOT NULL,
    expiry              BIGINT      NOT NULL,
    typed_data          JSONB       NOT NULL,
    signature           TEXT        NOT NULL,
    tx_to               TEXT        NOT NULL,
    tx_data             TEXT        NOT NULL,
    tx_value            TEXT        NOT NULL,
    status              TEXT        NOT NULL,
    reject_code         TEXT,
    pricing_as_of_ms    BIGINT,
    pricing_confidence  DOUBLE PRECISION,
    pricing_stale       BOOLEAN,
    pricing_sources     JSONB,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS quotes_chain_maker_idx ON quotes (chain_id, maker);
"#;
