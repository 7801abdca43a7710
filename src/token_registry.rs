//! Token metadata cache: moka hot cache in front of the `tokens` table in
//! front of the chain. Records are created on first demand and never mutated
//! afterwards within a run.

use crate::blockchain::ChainReader;
use crate::config::ChainContext;
use crate::errors::{QuoteError, RpcError, StoreError};
use crate::types::TokenRecord;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use ethers::types::Address;
use ethers::utils::to_checksum;
use moka::future::Cache;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

const TOKEN_CACHE_CAPACITY: u64 = 50_000;

/// Persistence for resolved token metadata.
#[async_trait]
pub trait TokenStore: Send + Sync + fmt::Debug {
    async fn get(&self, chain_id: u64, address: Address) -> Result<Option<TokenRecord>, StoreError>;
    async fn put(&self, record: &TokenRecord) -> Result<(), StoreError>;
    async fn list(&self, chain_id: u64) -> Result<Vec<TokenRecord>, StoreError>;
}

/// Postgres-backed token store.
#[derive(Debug)]
pub struct PostgresTokenStore {
    pool: Arc<Pool>,
}

impl PostgresTokenStore {
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PostgresTokenStore {
    async fn get(&self, chain_id: u64, address: Address) -> Result<Option<TokenRecord>, StoreError> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                "SELECT decimals, symbol FROM tokens WHERE chain_id = $1 AND address = $2",
                &[&(chain_id as i64), &to_checksum(&address, None)],
            )
            .await?;
        Ok(row.map(|r| TokenRecord {
            chain_id,
            address,
            decimals: r.get::<_, i16>(0) as u8,
            symbol: r.get(1),
        }))
    }

    async fn put(&self, record: &TokenRecord) -> Result<(), StoreError> {
        let conn = self.pool.get().await?;
        conn.execute(
            "INSERT INTO tokens (chain_id, address, decimals, symbol) VALUES ($1, $2, $3, $4)
             ON CONFLICT (chain_id, address) DO NOTHING",
            &[
                &(record.chain_id as i64),
                &to_checksum(&record.address, None),
                &(record.decimals as i16),
                &record.symbol,
            ],
        )
        .await?;
        Ok(())
    }

    async fn list(&self, chain_id: u64) -> Result<Vec<TokenRecord>, StoreError> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                "SELECT address, decimals, symbol FROM tokens WHERE chain_id = $1 ORDER BY address",
                &[&(chain_id as i64)],
            )
            .await?;
        rows.into_iter()
            .map(|r| {
                let raw: String = r.get(0);
                let address = Address::from_str(&raw)
                    .map_err(|_| StoreError::Corrupt(format!("token address {raw:?}")))?;
                Ok(TokenRecord {
                    chain_id,
                    address,
                    decimals: r.get::<_, i16>(1) as u8,
                    symbol: r.get(2),
                })
            })
            .collect()
    }
}

/// In-memory token store, used by the test harness and local development.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    tokens: RwLock<HashMap<(u64, Address), TokenRecord>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get(&self, chain_id: u64, address: Address) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.tokens.read().await.get(&(chain_id, address)).cloned())
    }

    async fn put(&self, record: &TokenRecord) -> Result<(), StoreError> {
        self.tokens
            .write()
            .await
            .entry((record.chain_id, record.address))
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn list(&self, chain_id: u64) -> Result<Vec<TokenRecord>, StoreError> {
        let mut out: Vec<TokenRecord> = self
            .tokens
            .read()
            .await
            .values()
            .filter(|t| t.chain_id == chain_id)
            .cloned()
            .collect();
        out.sort_by_key(|t| t.address);
        Ok(out)
    }
}

#[derive(Error, Debug)]
enum EnsureError {
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Rpc(RpcError),
}

/// The demand-driven metadata resolver. Concurrent `ensure` calls for the
/// same token coalesce into one chain read.
pub struct TokenRegistry {
    store: Arc<dyn TokenStore>,
    reader: Arc<dyn ChainReader>,
    cache: Cache<(u64, Address), TokenRecord>,
}

impl fmt::Debug for TokenRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRegistry")
            .field("cached", &self.cache.entry_count())
            .finish()
    }
}

impl TokenRegistry {
    pub fn new(store: Arc<dyn TokenStore>, reader: Arc<dyn ChainReader>) -> Self {
        Self {
            store,
            reader,
            cache: Cache::builder().max_capacity(TOKEN_CACHE_CAPACITY).build(),
        }
    }

    /// Resolve a token's metadata, reading the chain at most once per token.
    /// A `decimals()` failure is fatal to the call; `symbol()` is optional.
    #[instrument(skip(self, chain), fields(chain_id = chain.chain_id, token = %address))]
    pub async fn ensure(
        &self,
        chain: &Arc<ChainContext>,
        address: Address,
    ) -> Result<TokenRecord, QuoteError> {
        let key = (chain.chain_id, address);
        let store = self.store.clone();
        let reader = self.reader.clone();
        let chain = chain.clone();
        self.cache
            .try_get_with(key, async move {
                if let Some(record) = store
                    .get(chain.chain_id, address)
                    .await
                    .map_err(EnsureError::Store)?
                {
                    return Ok(record);
                }
                let (decimals, symbol) = reader
                    .erc20_metadata(&chain, address)
                    .await
                    .map_err(EnsureError::Rpc)?;
                let record = TokenRecord {
                    chain_id: chain.chain_id,
                    address,
                    decimals,
                    symbol,
                };
                store.put(&record).await.map_err(EnsureError::Store)?;
                debug!(
                    target: "token_registry",
                    chain_id = chain.chain_id,
                    token = %address,
                    decimals,
                    "token metadata resolved"
                );
                Ok(record)
            })
            .await
            .map_err(|e: Arc<EnsureError>| QuoteError::Internal(e.to_string()))
    }

    pub async fn list(&self, chain_id: u64) -> Result<Vec<TokenRecord>, QuoteError> {
        Ok(self.store.list(chain_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SigningKey;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_chain() -> Arc<ChainContext> {
        Arc::new(ChainContext {
            chain_id: 8453,
            name: "base".into(),
            rpc_url: "http://localhost:8545".into(),
            aqua: Address::zero(),
            executor: Address::zero(),
            maker: Address::zero(),
            executor_fee_bps: 0,
            signing_key: SigningKey::new(
                "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
            ),
        })
    }

    #[derive(Debug)]
    struct CountingReader {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChainReader for CountingReader {
        async fn erc20_metadata(
            &self,
            _chain: &ChainContext,
            _token: Address,
        ) -> Result<(u8, Option<String>), RpcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((6, Some("USDC".into())))
        }
    }

    #[tokio::test]
    async fn ensure_reads_the_chain_once_and_persists() {
        let store = Arc::new(InMemoryTokenStore::new());
        let reader = Arc::new(CountingReader { calls: AtomicUsize::new(0) });
        let registry = TokenRegistry::new(store.clone(), reader.clone());
        let chain = test_chain();
        let token = Address::repeat_byte(0x11);

        let first = registry.ensure(&chain, token).await.unwrap();
        let second = registry.ensure(&chain, token).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(reader.calls.load(Ordering::SeqCst), 1);
        assert!(store.get(8453, token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn ensure_prefers_the_persisted_record() {
        let store = Arc::new(InMemoryTokenStore::new());
        store
            .put(&TokenRecord {
                chain_id: 8453,
                address: Address::repeat_byte(0x22),
                decimals: 18,
                symbol: None,
            })
            .await
            .unwrap();
        let reader = Arc::new(CountingReader { calls: AtomicUsize::new(0) });
        let registry = TokenRegistry::new(store, reader.clone());

        let record = registry
            .ensure(&test_chain(), Address::repeat_byte(0x22))
            .await
            .unwrap();
        assert_eq!(record.decimals, 18);
        assert_eq!(reader.calls.load(Ordering::SeqCst), 0);
    }
}
