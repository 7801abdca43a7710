//! Per-`(chain, maker)` nonce allocation. This is the one globally-ordered
//! resource in the service: allocations are strictly serialized, values are
//! handed to exactly one caller, and a nonce burned by a downstream failure
//! is never reissued. The interface is narrow so a database row lock, an
//! in-memory mutex, or a distributed lock can back it interchangeably.

use crate::errors::StoreError;
use crate::metrics::QuoterMetrics;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use ethers::types::{Address, U256};
use ethers::utils::to_checksum;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

#[async_trait]
pub trait NonceAllocator: Send + Sync + fmt::Debug {
    /// Return the current nonce for `(chain_id, maker)` and advance by one.
    /// Concurrent callers are serialized; returned values are strictly
    /// increasing with no duplicates.
    async fn allocate(&self, chain_id: u64, maker: Address) -> Result<U256, StoreError>;
}

/// Postgres-backed allocator. The read-modify-write happens inside a single
/// transaction holding a row-level exclusive lock (`SELECT ... FOR UPDATE`),
/// so the database serializes concurrent allocations for us. The counter
/// lives in a NUMERIC(78,0) column and is incremented in SQL, which keeps the
/// full uint256 range without client-side numeric types.
#[derive(Debug)]
pub struct PostgresNonceAllocator {
    pool: Arc<Pool>,
}

impl PostgresNonceAllocator {
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NonceAllocator for PostgresNonceAllocator {
    #[instrument(skip(self), fields(chain_id, maker = %maker))]
    async fn allocate(&self, chain_id: u64, maker: Address) -> Result<U256, StoreError> {
        let maker_key = to_checksum(&maker, None);
        let chain_key = chain_id as i64;

        let mut conn = self.pool.get().await?;
        let tx = conn.transaction().await?;
        tx.execute(
            "INSERT INTO nonce_state (chain_id, maker, next_nonce) VALUES ($1, $2, 0)
             ON CONFLICT (chain_id, maker) DO NOTHING",
            &[&chain_key, &maker_key],
        )
        .await?;
        let row = tx
            .query_one(
                "SELECT next_nonce::text FROM nonce_state
                 WHERE chain_id = $1 AND maker = $2 FOR UPDATE",
                &[&chain_key, &maker_key],
            )
            .await?;
        let current: String = row.get(0);
        tx.execute(
            "UPDATE nonce_state SET next_nonce = next_nonce + 1
             WHERE chain_id = $1 AND maker = $2",
            &[&chain_key, &maker_key],
        )
        .await?;
        tx.commit().await?;

        let nonce = U256::from_dec_str(&current)
            .map_err(|_| StoreError::Corrupt(format!("nonce_state.next_nonce = {current:?}")))?;
        QuoterMetrics::global()
            .nonces_allocated
            .with_label_values(&[&chain_id.to_string()])
            .inc();
        debug!(target: "nonce", chain_id, maker = %maker_key, nonce = %nonce, "nonce allocated");
        Ok(nonce)
    }
}

/// In-memory allocator: a single mutex over the counters gives the same
/// strict serialization as the row lock. Used by the test harness.
#[derive(Debug, Default)]
pub struct InMemoryNonceAllocator {
    counters: Mutex<HashMap<(u64, Address), U256>>,
}

impl InMemoryNonceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: read the next value without advancing.
    pub async fn peek(&self, chain_id: u64, maker: Address) -> U256 {
        self.counters
            .lock()
            .await
            .get(&(chain_id, maker))
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl NonceAllocator for InMemoryNonceAllocator {
    async fn allocate(&self, chain_id: u64, maker: Address) -> Result<U256, StoreError> {
        let mut counters = self.counters.lock().await;
        let entry = counters.entry((chain_id, maker)).or_insert_with(U256::zero);
        let current = *entry;
        *entry = current
            .checked_add(U256::one())
            .ok_or_else(|| StoreError::Corrupt("nonce counter overflow".into()))?;
        QuoterMetrics::global()
            .nonces_allocated
            .with_label_values(&[&chain_id.to_string()])
            .inc();
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn nonces_start_at_zero_and_increase() {
        let alloc = InMemoryNonceAllocator::new();
        let maker = Address::repeat_byte(0xaa);
        assert_eq!(alloc.allocate(1, maker).await.unwrap(), U256::zero());
        assert_eq!(alloc.allocate(1, maker).await.unwrap(), U256::one());
        assert_eq!(alloc.allocate(1, maker).await.unwrap(), U256::from(2u64));
    }

    #[tokio::test]
    async fn counters_are_independent_per_chain_and_maker() {
        let alloc = InMemoryNonceAllocator::new();
        let a = Address::repeat_byte(0x01);
        let b = Address::repeat_byte(0x02);
        alloc.allocate(1, a).await.unwrap();
        alloc.allocate(1, a).await.unwrap();
        assert_eq!(alloc.allocate(1, b).await.unwrap(), U256::zero());
        assert_eq!(alloc.allocate(2, a).await.unwrap(), U256::zero());
        assert_eq!(alloc.peek(1, a).await, U256::from(2u64));
    }

    #[tokio::test]
    async fn concurrent_allocations_form_a_contiguous_prefix() {
        let alloc = Arc::new(InMemoryNonceAllocator::new());
        let maker = Address::repeat_byte(0x33);

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let alloc = alloc.clone();
                tokio::spawn(async move { alloc.allocate(8453, maker).await.unwrap() })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            assert!(seen.insert(handle.await.unwrap()));
        }
        for i in 0..100u64 {
            assert!(seen.contains(&U256::from(i)));
        }
    }
}
