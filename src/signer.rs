//! # Quote Signer
//!
//! Produces the EIP-712 signature the executor contract verifies. The domain
//! string, type string, and field order below must byte-match the contract's
//! domain separator and type hash; any drift makes every fill revert. Hashing
//! is done with explicit `ethers::abi` encoding rather than a derive macro so
//! the byte layout is visible and testable.

use crate::config::ChainContext;
use crate::errors::SignerError;
use ethers::abi::{self, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Signature, H256, U256};
use ethers::utils::{keccak256, to_checksum};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

const DOMAIN_NAME: &str = "AquaQuoteExecutor";
const DOMAIN_VERSION: &str = "1";

const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
const QUOTE_TYPE: &str = "Quote(address maker,address tokenIn,address tokenOut,uint256 amountIn,uint256 amountOut,bytes32 strategyHash,uint256 nonce,uint256 expiry)";

static DOMAIN_TYPEHASH: Lazy<[u8; 32]> = Lazy::new(|| keccak256(DOMAIN_TYPE.as_bytes()));
static QUOTE_TYPEHASH: Lazy<[u8; 32]> = Lazy::new(|| keccak256(QUOTE_TYPE.as_bytes()));

/// The message the maker signs. Field order mirrors the `Quote` type string.
#[derive(Debug, Clone)]
pub struct QuotePayload {
    pub chain_id: u64,
    pub executor: Address,
    pub maker: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub amount_out: U256,
    pub strategy_hash: H256,
    pub nonce: U256,
    pub expiry: U256,
}

/// A produced signature plus the typed-data document it attests to.
#[derive(Debug, Clone)]
pub struct SignedQuote {
    /// 65-byte ECDSA signature, `0x`-prefixed hex.
    pub signature: String,
    /// Raw signature bytes for calldata assembly.
    pub signature_bytes: Vec<u8>,
    /// The EIP-712 JSON document (types, domain, primaryType, message).
    pub typed_data: Value,
    /// The domain-separated digest that was signed.
    pub digest: H256,
}

/// Signing seam: the in-process wallet implementation below can be replaced
/// by an HSM or remote signer without touching the orchestrator.
#[async_trait::async_trait]
pub trait QuoteSigner: Send + Sync + fmt::Debug {
    fn maker(&self) -> Address;
    async fn sign(&self, payload: &QuotePayload) -> Result<SignedQuote, SignerError>;
}

/// Parse a stored strategy hash into its 32-byte form.
pub fn parse_strategy_hash(raw: &str) -> Result<H256, SignerError> {
    H256::from_str(raw).map_err(|_| SignerError::StrategyHash(raw.to_string()))
}

/// EIP-712 domain separator for a chain's executor.
pub fn domain_separator(chain_id: u64, executor: Address) -> [u8; 32] {
    keccak256(abi::encode(&[
        Token::FixedBytes(DOMAIN_TYPEHASH.to_vec()),
        Token::FixedBytes(keccak256(DOMAIN_NAME.as_bytes()).to_vec()),
        Token::FixedBytes(keccak256(DOMAIN_VERSION.as_bytes()).to_vec()),
        Token::Uint(U256::from(chain_id)),
        Token::Address(executor),
    ]))
}

fn struct_hash(payload: &QuotePayload) -> [u8; 32] {
    keccak256(abi::encode(&[
        Token::FixedBytes(QUOTE_TYPEHASH.to_vec()),
        Token::Address(payload.maker),
        Token::Address(payload.token_in),
        Token::Address(payload.token_out),
        Token::Uint(payload.amount_in),
        Token::Uint(payload.amount_out),
        Token::FixedBytes(payload.strategy_hash.as_bytes().to_vec()),
        Token::Uint(payload.nonce),
        Token::Uint(payload.expiry),
    ]))
}

/// The digest a verifier reconstructs: `keccak256(0x1901 ‖ domain ‖ struct)`.
pub fn signing_digest(payload: &QuotePayload) -> H256 {
    let mut preimage = Vec::with_capacity(66);
    preimage.extend_from_slice(&[0x19, 0x01]);
    preimage.extend_from_slice(&domain_separator(payload.chain_id, payload.executor));
    preimage.extend_from_slice(&struct_hash(payload));
    H256::from(keccak256(preimage))
}

/// The typed-data JSON document stored with the quote and returned to takers
/// so wallets and auditors can re-derive the digest.
pub fn typed_data_document(payload: &QuotePayload) -> Value {
    json!({
        "types": {
            "EIP712Domain": [
                {"name": "name", "type": "string"},
                {"name": "version", "type": "string"},
                {"name": "chainId", "type": "uint256"},
                {"name": "verifyingContract", "type": "address"},
            ],
            "Quote": [
                {"name": "maker", "type": "address"},
                {"name": "tokenIn", "type": "address"},
                {"name": "tokenOut", "type": "address"},
                {"name": "amountIn", "type": "uint256"},
                {"name": "amountOut", "type": "uint256"},
                {"name": "strategyHash", "type": "bytes32"},
                {"name": "nonce", "type": "uint256"},
                {"name": "expiry", "type": "uint256"},
            ],
        },
        "primaryType": "Quote",
        "domain": {
            "name": DOMAIN_NAME,
            "version": DOMAIN_VERSION,
            "chainId": payload.chain_id,
            "verifyingContract": to_checksum(&payload.executor, None),
        },
        "message": {
            "maker": to_checksum(&payload.maker, None),
            "tokenIn": to_checksum(&payload.token_in, None),
            "tokenOut": to_checksum(&payload.token_out, None),
            "amountIn": payload.amount_in.to_string(),
            "amountOut": payload.amount_out.to_string(),
            "strategyHash": format!("{:?}", payload.strategy_hash),
            "nonce": payload.nonce.to_string(),
            "expiry": payload.expiry.to_string(),
        },
    })
}

/// In-process signer holding the chain's wallet.
pub struct LocalQuoteSigner {
    wallet: LocalWallet,
}

impl fmt::Debug for LocalQuoteSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalQuoteSigner")
            .field("maker", &self.wallet.address())
            .finish()
    }
}

impl LocalQuoteSigner {
    pub fn from_chain(chain: &ChainContext) -> Result<Self, SignerError> {
        let wallet: LocalWallet = chain
            .signing_key
            .reveal()
            .parse()
            .map_err(|_| SignerError::InvalidKey(chain.chain_id))?;
        Ok(Self { wallet })
    }
}

#[async_trait::async_trait]
impl QuoteSigner for LocalQuoteSigner {
    fn maker(&self) -> Address {
        self.wallet.address()
    }

    async fn sign(&self, payload: &QuotePayload) -> Result<SignedQuote, SignerError> {
        let digest = signing_digest(payload);
        let signature: Signature = self
            .wallet
            .sign_hash(digest)
            .map_err(|e| SignerError::Sign(e.to_string()))?;
        let signature_bytes = signature.to_vec();
        Ok(SignedQuote {
            signature: format!("0x{}", hex::encode(&signature_bytes)),
            signature_bytes,
            typed_data: typed_data_document(payload),
            digest,
        })
    }
}

/// Keyed store of signers, one per chain. Initialization is guarded so
/// concurrent first requests build the wallet once; reads share the `Arc`.
#[derive(Debug, Default)]
pub struct SignerCache {
    signers: RwLock<HashMap<u64, Arc<dyn QuoteSigner>>>,
}

impl SignerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn for_chain(&self, chain: &ChainContext) -> Result<Arc<dyn QuoteSigner>, SignerError> {
        if let Some(signer) = self.signers.read().await.get(&chain.chain_id) {
            return Ok(signer.clone());
        }
        let mut signers = self.signers.write().await;
        if let Some(signer) = signers.get(&chain.chain_id) {
            return Ok(signer.clone());
        }
        let signer: Arc<dyn QuoteSigner> = Arc::new(LocalQuoteSigner::from_chain(chain)?);
        signers.insert(chain.chain_id, signer.clone());
        Ok(signer)
    }
}
