//! # Chain RPC Access
//!
//! A thin, reused JSON-RPC surface: one HTTP provider per chain, created on
//! first use, plus the two raw ERC-20 reads the token cache needs. This
//! module does not sign or send anything; quotes settle through calldata the
//! taker submits, never through this process.

use crate::config::ChainContext;
use crate::errors::RpcError;
use async_trait::async_trait;
use ethers::abi::{self, ParamType};
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, Bytes, TransactionRequest, U256};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// ERC20 `decimals()` selector.
static DECIMALS_SELECTOR: Lazy<Bytes> = Lazy::new(|| {
    hex::decode("313ce567")
        .map(Bytes::from)
        .expect("Invalid selector for decimals()")
});

/// ERC20 `symbol()` selector.
static SYMBOL_SELECTOR: Lazy<Bytes> = Lazy::new(|| {
    hex::decode("95d89b41")
        .map(Bytes::from)
        .expect("Invalid selector for symbol()")
});

/// On-chain reads the token metadata cache depends on. Kept narrow so tests
/// can substitute a canned reader.
#[async_trait]
pub trait ChainReader: Send + Sync + fmt::Debug {
    /// Read `decimals()` and `symbol()` for a token. The `decimals` read is
    /// fatal on failure; `symbol` is tolerated to fail and comes back `None`.
    async fn erc20_metadata(
        &self,
        chain: &ChainContext,
        token: Address,
    ) -> Result<(u8, Option<String>), RpcError>;
}

/// Production reader backed by cached `Provider<Http>` instances, one per
/// chain, initialized on first use and reused for the process lifetime.
#[derive(Debug, Default)]
pub struct RpcChainReader {
    providers: RwLock<HashMap<u64, Arc<Provider<Http>>>>,
}

impl RpcChainReader {
    pub fn new() -> Self {
        Self::default()
    }

    async fn provider(&self, chain: &ChainContext) -> Result<Arc<Provider<Http>>, RpcError> {
        if let Some(p) = self.providers.read().await.get(&chain.chain_id) {
            return Ok(p.clone());
        }
        let mut providers = self.providers.write().await;
        // another caller may have won the race while we waited for the lock
        if let Some(p) = providers.get(&chain.chain_id) {
            return Ok(p.clone());
        }
        let provider = Provider::<Http>::try_from(chain.rpc_url.as_str())
            .map_err(|e| RpcError::InvalidUrl(chain.chain_id, e.to_string()))?;
        let provider = Arc::new(provider);
        providers.insert(chain.chain_id, provider.clone());
        debug!(target: "blockchain", chain_id = chain.chain_id, "rpc provider created");
        Ok(provider)
    }

    async fn eth_call(
        &self,
        provider: &Provider<Http>,
        chain_id: u64,
        target: Address,
        data: Bytes,
    ) -> Result<Bytes, RpcError> {
        let tx = TransactionRequest::new().to(target).data(data);
        provider
            .call(&tx.into(), None)
            .await
            .map_err(|e| RpcError::Call {
                chain_id,
                target,
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn erc20_metadata(
        &self,
        chain: &ChainContext,
        token: Address,
    ) -> Result<(u8, Option<String>), RpcError> {
        let provider = self.provider(chain).await?;

        let decimals_call =
            self.eth_call(&provider, chain.chain_id, token, DECIMALS_SELECTOR.clone());
        let symbol_call = self.eth_call(&provider, chain.chain_id, token, SYMBOL_SELECTOR.clone());
        let (decimals_raw, symbol_raw) = tokio::join!(decimals_call, symbol_call);

        let decimals = decode_decimals(token, &decimals_raw?)?;
        let symbol = match symbol_raw {
            Ok(raw) => decode_symbol(&raw),
            Err(e) => {
                warn!(target: "blockchain", token = %token, error = %e, "symbol() read failed");
                None
            }
        };

        Ok((decimals, symbol))
    }
}

fn decode_decimals(target: Address, raw: &Bytes) -> Result<u8, RpcError> {
    let tokens = abi::decode(&[ParamType::Uint(8)], raw).map_err(|e| RpcError::Decode {
        target,
        message: format!("decimals(): {e}"),
    })?;
    let value = tokens
        .first()
        .and_then(|t| t.clone().into_uint())
        .ok_or_else(|| RpcError::Decode {
            target,
            message: "decimals(): empty return".into(),
        })?;
    if value > U256::from(u8::MAX) {
        return Err(RpcError::Decode {
            target,
            message: format!("decimals(): {value} exceeds uint8"),
        });
    }
    Ok(value.as_u32() as u8)
}

/// Tolerant `symbol()` decoding: modern tokens return an ABI string, a few
/// legacy mainnet tokens return a right-padded bytes32.
fn decode_symbol(raw: &Bytes) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(tokens) = abi::decode(&[ParamType::String], raw) {
        if let Some(s) = tokens.into_iter().next().and_then(|t| t.into_string()) {
            let s = s.trim_matches(char::from(0)).trim().to_string();
            return (!s.is_empty()).then_some(s);
        }
    }
    if raw.len() == 32 {
        let trimmed: Vec<u8> = raw.iter().copied().take_while(|b| *b != 0).collect();
        if let Ok(s) = String::from_utf8(trimmed) {
            let s = s.trim().to_string();
            return (!s.is_empty()).then_some(s);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::Token;

    #[test]
    fn decimals_decodes_uint8_words() {
        let raw = Bytes::from(abi::encode(&[Token::Uint(U256::from(6u64))]));
        assert_eq!(decode_decimals(Address::zero(), &raw).unwrap(), 6);
    }

    #[test]
    fn decimals_rejects_oversized_values() {
        let raw = Bytes::from(abi::encode(&[Token::Uint(U256::from(300u64))]));
        assert!(decode_decimals(Address::zero(), &raw).is_err());
    }

    #[test]
    fn decimals_rejects_garbage() {
        assert!(decode_decimals(Address::zero(), &Bytes::from(vec![1u8, 2, 3])).is_err());
    }

    #[test]
    fn symbol_decodes_abi_strings() {
        let raw = Bytes::from(abi::encode(&[Token::String("USDC".into())]));
        assert_eq!(decode_symbol(&raw), Some("USDC".to_string()));
    }

    #[test]
    fn symbol_decodes_legacy_bytes32() {
        let mut word = [0u8; 32];
        word[..3].copy_from_slice(b"MKR");
        assert_eq!(decode_symbol(&Bytes::from(word.to_vec())), Some("MKR".to_string()));
    }

    #[test]
    fn symbol_tolerates_empty_returns() {
        assert_eq!(decode_symbol(&Bytes::default()), None);
    }
}
