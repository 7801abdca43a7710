//! Strategy catalog and per-chain state (active strategy, paused flag).
//! Strategy rows are immutable once created except for `enabled`; the chain
//! state row is created lazily on first read.

use crate::errors::{QuoteError, StoreError};
use crate::types::{ChainState, StrategyRecord};
use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::Pool;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Input for `create`. New strategies are always enabled.
#[derive(Debug, Clone)]
pub struct NewStrategy {
    pub chain_id: u64,
    pub name: String,
    pub version: i32,
    pub params: Value,
    pub hash: String,
}

/// A strategy hash is the 32-byte on-chain identity fingerprint.
pub fn validate_strategy_hash(hash: &str) -> Result<(), String> {
    let body = hash.strip_prefix("0x").ok_or("strategy hash must be 0x-prefixed")?;
    if body.len() != 64 || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(format!("strategy hash must be 32 bytes of hex, got {hash:?}"));
    }
    Ok(())
}

#[async_trait]
pub trait StrategyCatalog: Send + Sync + fmt::Debug {
    async fn list(&self, chain_id: u64) -> Result<Vec<StrategyRecord>, StoreError>;
    async fn create(&self, new: NewStrategy) -> Result<StrategyRecord, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<StrategyRecord>, StoreError>;
    /// Point the chain at a strategy; fails `STRATEGY_NOT_FOUND` when the
    /// strategy does not exist on that chain.
    async fn set_active(&self, chain_id: u64, strategy_id: Uuid) -> Result<(), QuoteError>;
    async fn set_paused(&self, chain_id: u64, paused: bool) -> Result<ChainState, StoreError>;
    /// Per-chain state, lazily created as `{paused: false}`.
    async fn chain_state(&self, chain_id: u64) -> Result<ChainState, StoreError>;
    /// The strategy quotes are currently priced against. Fails
    /// `STRATEGY_NOT_CONFIGURED` when none is active and
    /// `STRATEGY_NOT_ENABLED` when the active one has been disabled.
    async fn active_strategy(&self, chain_id: u64) -> Result<StrategyRecord, QuoteError>;
}

//================================================================================================//
//                                        POSTGRES                                                //
//================================================================================================//

#[derive(Debug)]
pub struct PostgresStrategyCatalog {
    pool: Arc<Pool>,
}

impl PostgresStrategyCatalog {
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool }
    }
}

fn row_to_strategy(row: &tokio_postgres::Row) -> StrategyRecord {
    StrategyRecord {
        id: row.get("id"),
        chain_id: row.get::<_, i64>("chain_id") as u64,
        name: row.get("name"),
        version: row.get("version"),
        params: row.get("params"),
        hash: row.get("hash"),
        enabled: row.get("enabled"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl StrategyCatalog for PostgresStrategyCatalog {
    async fn list(&self, chain_id: u64) -> Result<Vec<StrategyRecord>, StoreError> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                "SELECT id, chain_id, name, version, params, hash, enabled, created_at
                 FROM strategies WHERE chain_id = $1 ORDER BY created_at",
                &[&(chain_id as i64)],
            )
            .await?;
        Ok(rows.iter().map(row_to_strategy).collect())
    }

    async fn create(&self, new: NewStrategy) -> Result<StrategyRecord, StoreError> {
        let record = StrategyRecord {
            id: Uuid::new_v4(),
            chain_id: new.chain_id,
            name: new.name,
            version: new.version,
            params: new.params,
            hash: new.hash,
            enabled: true,
            created_at: Utc::now(),
        };
        let conn = self.pool.get().await?;
        conn.execute(
            "INSERT INTO strategies (id, chain_id, name, version, params, hash, enabled, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &record.id,
                &(record.chain_id as i64),
                &record.name,
                &record.version,
                &record.params,
                &record.hash,
                &record.enabled,
                &record.created_at,
            ],
        )
        .await?;
        info!(target: "strategies", id = %record.id, chain_id = record.chain_id, "strategy created");
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<StrategyRecord>, StoreError> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                "SELECT id, chain_id, name, version, params, hash, enabled, created_at
                 FROM strategies WHERE id = $1",
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(row_to_strategy))
    }

    async fn set_active(&self, chain_id: u64, strategy_id: Uuid) -> Result<(), QuoteError> {
        let mut conn = self.pool.get().await.map_err(StoreError::from)?;
        let tx = conn.transaction().await.map_err(StoreError::from)?;
        let found = tx
            .query_opt(
                "SELECT 1 FROM strategies WHERE id = $1 AND chain_id = $2",
                &[&strategy_id, &(chain_id as i64)],
            )
            .await
            .map_err(StoreError::from)?;
        if found.is_none() {
            return Err(QuoteError::StrategyNotFound(strategy_id.to_string()));
        }
        tx.execute(
            "INSERT INTO app_config (chain_id, active_strategy_id, paused)
             VALUES ($1, $2, FALSE)
             ON CONFLICT (chain_id) DO UPDATE SET active_strategy_id = EXCLUDED.active_strategy_id",
            &[&(chain_id as i64), &strategy_id],
        )
        .await
        .map_err(StoreError::from)?;
        tx.commit().await.map_err(StoreError::from)?;
        info!(target: "strategies", chain_id, strategy_id = %strategy_id, "active strategy changed");
        Ok(())
    }

    async fn set_paused(&self, chain_id: u64, paused: bool) -> Result<ChainState, StoreError> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_one(
                "INSERT INTO app_config (chain_id, paused) VALUES ($1, $2)
                 ON CONFLICT (chain_id) DO UPDATE SET paused = EXCLUDED.paused
                 RETURNING active_strategy_id, paused",
                &[&(chain_id as i64), &paused],
            )
            .await?;
        info!(target: "strategies", chain_id, paused, "chain pause toggled");
        Ok(ChainState {
            chain_id,
            active_strategy_id: row.get(0),
            paused: row.get(1),
        })
    }

    async fn chain_state(&self, chain_id: u64) -> Result<ChainState, StoreError> {
        let conn = self.pool.get().await?;
        conn.execute(
            "INSERT INTO app_config (chain_id) VALUES ($1) ON CONFLICT (chain_id) DO NOTHING",
            &[&(chain_id as i64)],
        )
        .await?;
        let row = conn
            .query_one(
                "SELECT active_strategy_id, paused FROM app_config WHERE chain_id = $1",
                &[&(chain_id as i64)],
            )
            .await?;
        Ok(ChainState {
            chain_id,
            active_strategy_id: row.get(0),
            paused: row.get(1),
        })
    }

    async fn active_strategy(&self, chain_id: u64) -> Result<StrategyRecord, QuoteError> {
        let state = self.chain_state(chain_id).await?;
        let id = state
            .active_strategy_id
            .ok_or(QuoteError::StrategyNotConfigured(chain_id))?;
        let strategy = self
            .find_by_id(id)
            .await?
            .ok_or(QuoteError::StrategyNotConfigured(chain_id))?;
        if !strategy.enabled {
            return Err(QuoteError::StrategyNotEnabled(strategy.id.to_string()));
        }
        Ok(strategy)
    }
}

//================================================================================================//
//                                        IN-MEMORY                                               //
//================================================================================================//

#[derive(Debug, Default)]
struct CatalogState {
    strategies: Vec<StrategyRecord>,
    chain_state: HashMap<u64, ChainState>,
}

/// In-memory catalog for the test harness.
#[derive(Debug, Default)]
pub struct InMemoryStrategyCatalog {
    state: RwLock<CatalogState>,
}

impl InMemoryStrategyCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: flip `enabled` on an existing strategy.
    pub async fn set_enabled(&self, id: Uuid, enabled: bool) {
        let mut state = self.state.write().await;
        if let Some(s) = state.strategies.iter_mut().find(|s| s.id == id) {
            s.enabled = enabled;
        }
    }
}

fn default_state(chain_id: u64) -> ChainState {
    ChainState {
        chain_id,
        active_strategy_id: None,
        paused: false,
    }
}

#[async_trait]
impl StrategyCatalog for InMemoryStrategyCatalog {
    async fn list(&self, chain_id: u64) -> Result<Vec<StrategyRecord>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .strategies
            .iter()
            .filter(|s| s.chain_id == chain_id)
            .cloned()
            .collect())
    }

    async fn create(&self, new: NewStrategy) -> Result<StrategyRecord, StoreError> {
        let record = StrategyRecord {
            id: Uuid::new_v4(),
            chain_id: new.chain_id,
            name: new.name,
            version: new.version,
            params: new.params,
            hash: new.hash,
            enabled: true,
            created_at: Utc::now(),
        };
        self.state.write().await.strategies.push(record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<StrategyRecord>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .strategies
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn set_active(&self, chain_id: u64, strategy_id: Uuid) -> Result<(), QuoteError> {
        let mut state = self.state.write().await;
        let on_chain = state
            .strategies
            .iter()
            .any(|s| s.id == strategy_id && s.chain_id == chain_id);
        if !on_chain {
            return Err(QuoteError::StrategyNotFound(strategy_id.to_string()));
        }
        state
            .chain_state
            .entry(chain_id)
            .or_insert_with(|| default_state(chain_id))
            .active_strategy_id = Some(strategy_id);
        Ok(())
    }

    async fn set_paused(&self, chain_id: u64, paused: bool) -> Result<ChainState, StoreError> {
        let mut state = self.state.write().await;
        let entry = state
            .chain_state
            .entry(chain_id)
            .or_insert_with(|| default_state(chain_id));
        entry.paused = paused;
        Ok(entry.clone())
    }

    async fn chain_state(&self, chain_id: u64) -> Result<ChainState, StoreError> {
        let mut state = self.state.write().await;
        Ok(state
            .chain_state
            .entry(chain_id)
            .or_insert_with(|| default_state(chain_id))
            .clone())
    }

    async fn active_strategy(&self, chain_id: u64) -> Result<StrategyRecord, QuoteError> {
        let state = self.chain_state(chain_id).await?;
        let id = state
            .active_strategy_id
            .ok_or(QuoteError::StrategyNotConfigured(chain_id))?;
        let strategy = self
            .find_by_id(id)
            .await?
            .ok_or(QuoteError::StrategyNotConfigured(chain_id))?;
        if !strategy.enabled {
            return Err(QuoteError::StrategyNotEnabled(strategy.id.to_string()));
        }
        Ok(strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_strategy(chain_id: u64) -> NewStrategy {
        NewStrategy {
            chain_id,
            name: "tight-spread".into(),
            version: 1,
            params: json!({"spreadBps": 5}),
            hash: format!("0x{}", "ab".repeat(32)),
        }
    }

    #[test]
    fn strategy_hashes_must_be_bytes32_hex() {
        assert!(validate_strategy_hash(&format!("0x{}", "ab".repeat(32))).is_ok());
        assert!(validate_strategy_hash("0xabc").is_err());
        assert!(validate_strategy_hash(&"ab".repeat(32)).is_err());
        assert!(validate_strategy_hash(&format!("0x{}", "zz".repeat(32))).is_err());
    }

    #[tokio::test]
    async fn chain_state_is_created_lazily() {
        let catalog = InMemoryStrategyCatalog::new();
        let state = catalog.chain_state(8453).await.unwrap();
        assert!(!state.paused);
        assert!(state.active_strategy_id.is_none());
    }

    #[tokio::test]
    async fn active_strategy_selection_failures_are_typed() {
        let catalog = InMemoryStrategyCatalog::new();
        assert!(matches!(
            catalog.active_strategy(1).await,
            Err(QuoteError::StrategyNotConfigured(1))
        ));

        let created = catalog.create(new_strategy(1)).await.unwrap();
        assert!(created.enabled);

        // activating on the wrong chain is a 404
        assert!(matches!(
            catalog.set_active(2, created.id).await,
            Err(QuoteError::StrategyNotFound(_))
        ));

        catalog.set_active(1, created.id).await.unwrap();
        assert_eq!(catalog.active_strategy(1).await.unwrap().id, created.id);

        catalog.set_enabled(created.id, false).await;
        assert!(matches!(
            catalog.active_strategy(1).await,
            Err(QuoteError::StrategyNotEnabled(_))
        ));
    }

    #[tokio::test]
    async fn pause_toggle_round_trips() {
        let catalog = InMemoryStrategyCatalog::new();
        assert!(catalog.set_paused(1, true).await.unwrap().paused);
        assert!(catalog.chain_state(1).await.unwrap().paused);
        assert!(!catalog.set_paused(1, false).await.unwrap().paused);
    }
}
