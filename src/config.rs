//! # Configuration
//!
//! Loads the per-chain JSON file and the process environment into immutable,
//! validated runtime state. Signing keys are resolved from the environment
//! variable each chain entry names, held in zeroizing wrappers, and never
//! serialized; the maker address is derived from the key at load time so a
//! misconfigured key fails the boot, not the first quote.

use crate::errors::{ConfigError, QuoteError};
use crate::utils::parse_checksummed;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use ethers::utils::to_checksum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Default per-upstream-call timeout (`REQUEST_TIMEOUT_MS`).
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
/// Default whole-request deadline (`GLOBAL_TIMEOUT_MS`).
const DEFAULT_GLOBAL_TIMEOUT_MS: u64 = 8_000;
/// Default quote TTL applied when the strategy intent carries no usable expiry.
const DEFAULT_QUOTE_EXPIRY_SECONDS: u64 = 120;
const DEFAULT_PORT: u16 = 8080;

/// A raw signing key as loaded from the environment. Hex, no `0x` retained.
/// Debug and serialization never reveal the material.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SigningKey(String);

impl SigningKey {
    /// Wrap raw hex key material (no `0x` prefix expected).
    pub fn new(hex: impl Into<String>) -> Self {
        SigningKey(hex.into())
    }

    pub fn reveal(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

/// One entry of the chains JSON file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainEntry {
    name: String,
    rpc_url: String,
    aqua: String,
    executor: String,
    signing_key_env: String,
    #[serde(default)]
    executor_fee_bps: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ChainsFile {
    #[serde(flatten)]
    chains: HashMap<String, ChainEntry>,
}

/// Fully resolved, immutable per-chain state.
#[derive(Debug, Clone)]
pub struct ChainContext {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    pub aqua: Address,
    pub executor: Address,
    pub maker: Address,
    pub executor_fee_bps: u32,
    pub signing_key: SigningKey,
}

/// Secret-stripped view of a chain for the `/chains` listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainView {
    pub chain_id: u64,
    pub name: String,
    pub aqua: String,
    pub executor: String,
    pub maker: String,
    pub executor_fee_bps: u32,
}

impl From<&ChainContext> for ChainView {
    fn from(c: &ChainContext) -> Self {
        ChainView {
            chain_id: c.chain_id,
            name: c.name.clone(),
            aqua: to_checksum(&c.aqua, None),
            executor: to_checksum(&c.executor, None),
            maker: to_checksum(&c.maker, None),
            executor_fee_bps: c.executor_fee_bps,
        }
    }
}

/// Process-wide settings resolved from the environment at startup.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub database_url: Option<String>,
    pub pricing_url: String,
    pub strategy_url: String,
    pub request_timeout: Duration,
    pub global_timeout: Duration,
    pub quote_expiry_seconds: u64,
    pub port: u16,
}

impl AppSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(AppSettings {
            database_url: std::env::var("DATABASE_URL").ok(),
            pricing_url: require_env("PRICING_URL")?,
            strategy_url: require_env("STRATEGY_URL")?,
            request_timeout: Duration::from_millis(env_u64(
                "REQUEST_TIMEOUT_MS",
                DEFAULT_REQUEST_TIMEOUT_MS,
            )?),
            global_timeout: Duration::from_millis(env_u64(
                "GLOBAL_TIMEOUT_MS",
                DEFAULT_GLOBAL_TIMEOUT_MS,
            )?),
            quote_expiry_seconds: env_u64("QUOTE_EXPIRY_SECONDS", DEFAULT_QUOTE_EXPIRY_SECONDS)?,
            port: env_u64("PORT", DEFAULT_PORT as u64)? as u16,
        })
    }
}

fn require_env(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnv(name.to_string()))
}

fn env_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidEnv(name.to_string(), e.to_string())),
    }
}

/// The chains registry: every configured chain, fully resolved.
#[derive(Debug)]
pub struct ChainsRegistry {
    chains: HashMap<u64, Arc<ChainContext>>,
}

impl ChainsRegistry {
    /// Load and resolve the chains file. Each entry must parse, checksum,
    /// and carry a signing key whose derived address becomes the maker.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Read(path.display().to_string(), e.to_string()))?;
        let file: ChainsFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.display().to_string(), e.to_string()))?;

        let mut chains = HashMap::with_capacity(file.chains.len());
        for (key, entry) in file.chains {
            let chain_id: u64 = key
                .parse()
                .map_err(|_| ConfigError::Chain(key.clone(), "chain key is not a number".into()))?;
            let ctx = resolve_entry(chain_id, entry)
                .map_err(|msg| ConfigError::Chain(key.clone(), msg))?;
            tracing::info!(
                target: "config",
                chain_id,
                name = %ctx.name,
                maker = %to_checksum(&ctx.maker, None),
                executor_fee_bps = ctx.executor_fee_bps,
                "chain configured"
            );
            chains.insert(chain_id, Arc::new(ctx));
        }
        Ok(ChainsRegistry { chains })
    }

    /// Assemble a registry from already-resolved contexts. Test harnesses and
    /// alternative loaders use this.
    pub fn from_contexts(contexts: Vec<ChainContext>) -> Self {
        ChainsRegistry {
            chains: contexts
                .into_iter()
                .map(|c| (c.chain_id, Arc::new(c)))
                .collect(),
        }
    }

    pub fn get(&self, chain_id: u64) -> Result<Arc<ChainContext>, QuoteError> {
        self.chains
            .get(&chain_id)
            .cloned()
            .ok_or(QuoteError::ChainNotSupported(chain_id))
    }

    pub fn list(&self) -> Vec<ChainView> {
        let mut views: Vec<ChainView> = self.chains.values().map(|c| ChainView::from(c.as_ref())).collect();
        views.sort_by_key(|v| v.chain_id);
        views
    }
}

fn resolve_entry(chain_id: u64, entry: ChainEntry) -> Result<ChainContext, String> {
    let aqua = parse_checksummed(&entry.aqua).map_err(|e| format!("aqua: {e}"))?;
    let executor = parse_checksummed(&entry.executor).map_err(|e| format!("executor: {e}"))?;

    let raw_key = std::env::var(&entry.signing_key_env)
        .map_err(|_| format!("signing key env {} is not set", entry.signing_key_env))?;
    let normalized = raw_key.trim().trim_start_matches("0x").to_string();
    if normalized.len() != 64 || !normalized.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(format!(
            "signing key from {} is not 32 bytes of hex",
            entry.signing_key_env
        ));
    }
    let wallet: LocalWallet = normalized
        .parse()
        .map_err(|_| format!("signing key from {} does not parse", entry.signing_key_env))?;
    let maker = wallet.address();

    let fee = entry.executor_fee_bps.unwrap_or(0);
    if !(0..=9_999).contains(&fee) {
        return Err(format!("executorFeeBps {fee} outside [0, 9999]"));
    }

    Ok(ChainContext {
        chain_id,
        name: entry.name,
        rpc_url: entry.rpc_url,
        aqua,
        executor,
        maker,
        executor_fee_bps: fee as u32,
        signing_key: SigningKey(normalized),
    })
}
