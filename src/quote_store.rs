//! Persistence for issued quotes. The orchestrator owns the single insert;
//! rows are immutable afterwards and `find_by_id` returns them verbatim.

use crate::errors::StoreError;
use crate::types::{QuoteRecord, QuoteStatus};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait QuoteStore: Send + Sync + fmt::Debug {
    async fn insert(&self, record: &QuoteRecord) -> Result<(), StoreError>;
    async fn find_by_id(&self, quote_id: Uuid) -> Result<Option<QuoteRecord>, StoreError>;
}

#[derive(Debug)]
pub struct PostgresQuoteStore {
    pool: Arc<Pool>,
}

impl PostgresQuoteStore {
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuoteStore for PostgresQuoteStore {
    async fn insert(&self, record: &QuoteRecord) -> Result<(), StoreError> {
        let conn = self.pool.get().await?;
        let sources = Value::from(record.pricing_sources.clone());
        let status = record.status.as_str();
        conn.execute(
            "INSERT INTO quotes (
                quote_id, chain_id, maker, taker, recipient, executor,
                strategy_id, strategy_version, strategy_hash,
                sell_token, buy_token, sell_amount, buy_amount,
                fee_bps, fee_amount, nonce, expiry,
                typed_data, signature, tx_to, tx_data, tx_value,
                status, reject_code,
                pricing_as_of_ms, pricing_confidence, pricing_stale, pricing_sources,
                created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26,
                $27, $28, $29
            )",
            &[
                &record.quote_id,
                &(record.chain_id as i64),
                &record.maker,
                &record.taker,
                &record.recipient,
                &record.executor,
                &record.strategy_id,
                &record.strategy_version,
                &record.strategy_hash,
                &record.sell_token,
                &record.buy_token,
                &record.sell_amount,
                &record.buy_amount,
                &record.fee_bps,
                &record.fee_amount,
                &record.nonce,
                &record.expiry,
                &record.typed_data,
                &record.signature,
                &record.tx_to,
                &record.tx_data,
                &record.tx_value,
                &status,
                &record.reject_code,
                &record.pricing_as_of_ms,
                &record.pricing_confidence,
                &record.pricing_stale,
                &sources,
                &record.created_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, quote_id: Uuid) -> Result<Option<QuoteRecord>, StoreError> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt("SELECT * FROM quotes WHERE quote_id = $1", &[&quote_id])
            .await?;
        row.map(|r| {
            let status_raw: String = r.get("status");
            let status = match status_raw.as_str() {
                "ISSUED" => QuoteStatus::Issued,
                other => return Err(StoreError::Corrupt(format!("quote status {other:?}"))),
            };
            let sources: Option<Value> = r.get("pricing_sources");
            let pricing_sources = sources
                .and_then(|v| serde_json::from_value::<Vec<String>>(v).ok())
                .unwrap_or_default();
            Ok(QuoteRecord {
                quote_id: r.get("quote_id"),
                chain_id: r.get::<_, i64>("chain_id") as u64,
                maker: r.get("maker"),
                taker: r.get("taker"),
                recipient: r.get("recipient"),
                executor: r.get("executor"),
                strategy_id: r.get("strategy_id"),
                strategy_version: r.get("strategy_version"),
                strategy_hash: r.get("strategy_hash"),
                sell_token: r.get("sell_token"),
                buy_token: r.get("buy_token"),
                sell_amount: r.get("sell_amount"),
                buy_amount: r.get("buy_amount"),
                fee_bps: r.get("fee_bps"),
                fee_amount: r.get("fee_amount"),
                nonce: r.get("nonce"),
                expiry: r.get("expiry"),
                typed_data: r.get("typed_data"),
                signature: r.get("signature"),
                tx_to: r.get("tx_to"),
                tx_data: r.get("tx_data"),
                tx_value: r.get("tx_value"),
                status,
                reject_code: r.get("reject_code"),
                pricing_as_of_ms: r.get("pricing_as_of_ms"),
                pricing_confidence: r.get("pricing_confidence"),
                pricing_stale: r.get("pricing_stale"),
                pricing_sources,
                created_at: r.get("created_at"),
            })
        })
        .transpose()
    }
}

/// In-memory quote store for the test harness.
#[derive(Debug, Default)]
pub struct InMemoryQuoteStore {
    quotes: RwLock<HashMap<Uuid, QuoteRecord>>,
    fail_inserts: std::sync::atomic::AtomicBool,
}

impl InMemoryQuoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: how many quotes have been persisted.
    pub async fn count(&self) -> usize {
        self.quotes.read().await.len()
    }

    /// Test hook: make subsequent inserts fail, as a crashed write would.
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl QuoteStore for InMemoryQuoteStore {
    async fn insert(&self, record: &QuoteRecord) -> Result<(), StoreError> {
        if self.fail_inserts.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StoreError::Query("insert failed".into()));
        }
        let mut quotes = self.quotes.write().await;
        if quotes.contains_key(&record.quote_id) {
            return Err(StoreError::Query(format!(
                "duplicate quote_id {}",
                record.quote_id
            )));
        }
        quotes.insert(record.quote_id, record.clone());
        Ok(())
    }

    async fn find_by_id(&self, quote_id: Uuid) -> Result<Option<QuoteRecord>, StoreError> {
        Ok(self.quotes.read().await.get(&quote_id).cloned())
    }
}
