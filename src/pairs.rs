//! Pair admission store. Pairs are keyed by the canonical `(token0, token1)`
//! ordering so `WETH/USDC` and `USDC/WETH` admit the same row.

use crate::errors::{QuoteError, StoreError};
use crate::types::PairRecord;
use crate::utils::canonical_pair;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use ethers::types::Address;
use ethers::utils::to_checksum;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait PairStore: Send + Sync + fmt::Debug {
    /// Look up the canonical pair row, if any.
    async fn find(&self, chain_id: u64, a: Address, b: Address)
        -> Result<Option<PairRecord>, StoreError>;
    /// Insert or update a pair (canonicalized), returning the stored row.
    async fn upsert(
        &self,
        chain_id: u64,
        a: Address,
        b: Address,
        enabled: bool,
        meta: Option<Value>,
    ) -> Result<PairRecord, StoreError>;
    async fn list(&self, chain_id: u64) -> Result<Vec<PairRecord>, StoreError>;
}

/// Admission check shared by both hot paths: absent or disabled fails
/// `PAIR_NOT_ENABLED`.
pub async fn ensure_enabled(
    store: &dyn PairStore,
    chain_id: u64,
    sell: Address,
    buy: Address,
) -> Result<PairRecord, QuoteError> {
    match store.find(chain_id, sell, buy).await? {
        Some(pair) if pair.enabled => Ok(pair),
        _ => Err(QuoteError::PairNotEnabled(sell, buy, chain_id)),
    }
}

#[derive(Debug)]
pub struct PostgresPairStore {
    pool: Arc<Pool>,
}

impl PostgresPairStore {
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool }
    }
}

fn row_to_pair(chain_id: u64, t0: String, t1: String, enabled: bool, meta: Option<Value>)
    -> Result<PairRecord, StoreError>
{
    let token0 = Address::from_str(&t0).map_err(|_| StoreError::Corrupt(format!("token0 {t0:?}")))?;
    let token1 = Address::from_str(&t1).map_err(|_| StoreError::Corrupt(format!("token1 {t1:?}")))?;
    Ok(PairRecord { chain_id, token0, token1, enabled, meta })
}

#[async_trait]
impl PairStore for PostgresPairStore {
    async fn find(
        &self,
        chain_id: u64,
        a: Address,
        b: Address,
    ) -> Result<Option<PairRecord>, StoreError> {
        let (token0, token1, _) = canonical_pair(a, b);
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                "SELECT enabled, meta FROM pairs WHERE chain_id = $1 AND token0 = $2 AND token1 = $3",
                &[
                    &(chain_id as i64),
                    &to_checksum(&token0, None),
                    &to_checksum(&token1, None),
                ],
            )
            .await?;
        Ok(row.map(|r| PairRecord {
            chain_id,
            token0,
            token1,
            enabled: r.get(0),
            meta: r.get(1),
        }))
    }

    async fn upsert(
        &self,
        chain_id: u64,
        a: Address,
        b: Address,
        enabled: bool,
        meta: Option<Value>,
    ) -> Result<PairRecord, StoreError> {
        let (token0, token1, _) = canonical_pair(a, b);
        let conn = self.pool.get().await?;
        conn.execute(
            "INSERT INTO pairs (chain_id, token0, token1, enabled, meta, updated_at)
             VALUES ($1, $2, $3, $4, $5, now())
             ON CONFLICT (chain_id, token0, token1)
             DO UPDATE SET enabled = EXCLUDED.enabled, meta = EXCLUDED.meta, updated_at = now()",
            &[
                &(chain_id as i64),
                &to_checksum(&token0, None),
                &to_checksum(&token1, None),
                &enabled,
                &meta,
            ],
        )
        .await?;
        Ok(PairRecord { chain_id, token0, token1, enabled, meta })
    }

    async fn list(&self, chain_id: u64) -> Result<Vec<PairRecord>, StoreError> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                "SELECT token0, token1, enabled, meta FROM pairs WHERE chain_id = $1
                 ORDER BY token0, token1",
                &[&(chain_id as i64)],
            )
            .await?;
        rows.into_iter()
            .map(|r| row_to_pair(chain_id, r.get(0), r.get(1), r.get(2), r.get(3)))
            .collect()
    }
}

/// In-memory pair store for the test harness.
#[derive(Debug, Default)]
pub struct InMemoryPairStore {
    pairs: RwLock<HashMap<(u64, Address, Address), PairRecord>>,
}

impl InMemoryPairStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PairStore for InMemoryPairStore {
    async fn find(
        &self,
        chain_id: u64,
        a: Address,
        b: Address,
    ) -> Result<Option<PairRecord>, StoreError> {
        let (token0, token1, _) = canonical_pair(a, b);
        Ok(self
            .pairs
            .read()
            .await
            .get(&(chain_id, token0, token1))
            .cloned())
    }

    async fn upsert(
        &self,
        chain_id: u64,
        a: Address,
        b: Address,
        enabled: bool,
        meta: Option<Value>,
    ) -> Result<PairRecord, StoreError> {
        let (token0, token1, _) = canonical_pair(a, b);
        let record = PairRecord { chain_id, token0, token1, enabled, meta };
        self.pairs
            .write()
            .await
            .insert((chain_id, token0, token1), record.clone());
        Ok(record)
    }

    async fn list(&self, chain_id: u64) -> Result<Vec<PairRecord>, StoreError> {
        let mut out: Vec<PairRecord> = self
            .pairs
            .read()
            .await
            .values()
            .filter(|p| p.chain_id == chain_id)
            .cloned()
            .collect();
        out.sort_by_key(|p| (p.token0, p.token1));
        Ok(out)
    }
}
