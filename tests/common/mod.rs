// Shared test harness: the full quote pipeline wired onto in-memory stores
// and fake upstream clients, so every scenario runs hermetically.

#[allow(dead_code)]

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use ethers::utils::to_checksum;
use serde_json::json;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use aqua_quoter::blockchain::ChainReader;
use aqua_quoter::config::{ChainContext, ChainsRegistry, SigningKey};
use aqua_quoter::errors::{QuoteError, RpcError};
use aqua_quoter::nonce::InMemoryNonceAllocator;
use aqua_quoter::orchestrator::{PriceArgs, QuoteArgs, QuoteOrchestrator};
use aqua_quoter::pairs::{InMemoryPairStore, PairStore};
use aqua_quoter::pricing_client::PricingClient;
use aqua_quoter::quote_store::InMemoryQuoteStore;
use aqua_quoter::server::AppState;
use aqua_quoter::signer::SignerCache;
use aqua_quoter::strategies::{InMemoryStrategyCatalog, NewStrategy, StrategyCatalog};
use aqua_quoter::strategy_client::StrategyClient;
use aqua_quoter::token_registry::{InMemoryTokenStore, TokenRegistry};
use aqua_quoter::types::{
    DepthRequest, IntentRequest, PricingSnapshot, StrategyIntent, StrategyRecord,
};

pub const TEST_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
pub const CHAIN_ID: u64 = 8453;
pub const WETH: &str = "0x4200000000000000000000000000000000000006";
pub const USDC: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";
pub const SELL_AMOUNT: &str = "100000000000000000";
pub const DEPTH_OUT: &str = "350000000";

pub fn weth() -> Address {
    Address::from_str(WETH).unwrap()
}

pub fn usdc() -> Address {
    Address::from_str(USDC).unwrap()
}

pub fn taker() -> Address {
    Address::repeat_byte(0x77)
}

pub fn executor() -> Address {
    Address::repeat_byte(0xee)
}

pub fn strategy_hash() -> String {
    format!("0x{}", "ab".repeat(32))
}

pub fn maker() -> Address {
    let wallet: LocalWallet = TEST_KEY.parse().unwrap();
    wallet.address()
}

pub fn default_snapshot() -> PricingSnapshot {
    serde_json::from_value(json!({
        "asOfMs": 1_736_000_000_000i64,
        "midPrice": "3500.0",
        "depthPoints": [{
            "amountInRaw": SELL_AMOUNT,
            "amountOutRaw": DEPTH_OUT,
            "price": 3500.0,
            "impactBps": 2.5,
            "provenance": [{"venue": "uniswap_v3", "feeTier": 500}],
        }],
        "sourcesUsed": ["uniswap_v3_base"],
        "latencyMs": 42,
        "confidenceScore": 0.95,
        "stale": false,
        "reasonCodes": [],
    }))
    .unwrap()
}

/// Pricing service double: serves a canned snapshot, counts calls, can be
/// switched into failure mode.
#[derive(Debug)]
pub struct FakePricingClient {
    pub snapshot: Mutex<PricingSnapshot>,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub delay_ms: AtomicUsize,
}

impl FakePricingClient {
    pub fn new() -> Self {
        Self {
            snapshot: Mutex::new(default_snapshot()),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            delay_ms: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn set_snapshot(&self, snapshot: PricingSnapshot) {
        *self.snapshot.lock().await = snapshot;
    }
}

#[async_trait]
impl PricingClient for FakePricingClient {
    async fn request_depth(&self, _request: &DepthRequest) -> Result<PricingSnapshot, QuoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay as u64)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(QuoteError::PricingUpstream("connection refused".into()));
        }
        Ok(self.snapshot.lock().await.clone())
    }
}

/// Strategy service double: echoes a canned intent and records the last
/// request payload for assertions.
#[derive(Debug)]
pub struct FakeStrategyClient {
    pub intent: Mutex<StrategyIntent>,
    pub last_request: Mutex<Option<IntentRequest>>,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl FakeStrategyClient {
    pub fn new(strategy: &StrategyRecord) -> Self {
        Self {
            intent: Mutex::new(default_intent(strategy)),
            last_request: Mutex::new(None),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn set_intent(&self, intent: StrategyIntent) {
        *self.intent.lock().await = intent;
    }

    pub async fn mutate_intent<F: FnOnce(&mut StrategyIntent)>(&self, f: F) {
        f(&mut *self.intent.lock().await);
    }
}

pub fn default_intent(strategy: &StrategyRecord) -> StrategyIntent {
    serde_json::from_value(json!({
        "strategy": {
            "id": strategy.id.to_string(),
            "version": strategy.version,
            "hash": strategy.hash,
        },
        "buyAmount": DEPTH_OUT,
        "feeBps": 5,
        "feeAmount": "175000",
        "expiry": 1_736_000_120i64,
        "pricing": {
            "asOfMs": 1_736_000_000_000i64,
            "confidenceScore": 0.95,
            "stale": false,
            "sourcesUsed": ["uniswap_v3_base"],
        },
    }))
    .unwrap()
}

#[async_trait]
impl StrategyClient for FakeStrategyClient {
    async fn request_intent(&self, request: &IntentRequest) -> Result<StrategyIntent, QuoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(QuoteError::StrategyUpstream("connection refused".into()));
        }
        *self.last_request.lock().await = Some(request.clone());
        Ok(self.intent.lock().await.clone())
    }
}

/// Chain reader double: canned ERC-20 metadata, no RPC.
#[derive(Debug)]
pub struct StaticChainReader;

#[async_trait]
impl ChainReader for StaticChainReader {
    async fn erc20_metadata(
        &self,
        _chain: &ChainContext,
        token: Address,
    ) -> Result<(u8, Option<String>), RpcError> {
        if token == usdc() {
            Ok((6, Some("USDC".into())))
        } else {
            Ok((18, Some("WETH".into())))
        }
    }
}

pub struct TestHarness {
    pub chain: Arc<ChainContext>,
    pub chains: Arc<ChainsRegistry>,
    pub catalog: Arc<InMemoryStrategyCatalog>,
    pub pairs: Arc<InMemoryPairStore>,
    pub tokens: Arc<TokenRegistry>,
    pub pricing: Arc<FakePricingClient>,
    pub strategy_client: Arc<FakeStrategyClient>,
    pub nonces: Arc<InMemoryNonceAllocator>,
    pub quotes: Arc<InMemoryQuoteStore>,
    pub orchestrator: Arc<QuoteOrchestrator>,
    pub strategy: StrategyRecord,
    pub global_timeout: std::time::Duration,
}

impl TestHarness {
    /// Full pipeline on chain 8453 with an enabled WETH/USDC pair and an
    /// active strategy.
    pub async fn new(executor_fee_bps: u32) -> Self {
        let chain = ChainContext {
            chain_id: CHAIN_ID,
            name: "base".into(),
            rpc_url: "http://localhost:8545".into(),
            aqua: Address::repeat_byte(0xaa),
            executor: executor(),
            maker: maker(),
            executor_fee_bps,
            signing_key: SigningKey::new(TEST_KEY),
        };
        let chains = Arc::new(ChainsRegistry::from_contexts(vec![chain.clone()]));
        let chain = chains.get(CHAIN_ID).unwrap();

        let catalog = Arc::new(InMemoryStrategyCatalog::new());
        let strategy = catalog
            .create(NewStrategy {
                chain_id: CHAIN_ID,
                name: "tight-spread".into(),
                version: 1,
                params: json!({"spreadBps": 5}),
                hash: strategy_hash(),
            })
            .await
            .unwrap();
        catalog.set_active(CHAIN_ID, strategy.id).await.unwrap();

        let pairs = Arc::new(InMemoryPairStore::new());
        pairs
            .upsert(CHAIN_ID, weth(), usdc(), true, None)
            .await
            .unwrap();

        let tokens = Arc::new(TokenRegistry::new(
            Arc::new(InMemoryTokenStore::new()),
            Arc::new(StaticChainReader),
        ));
        let pricing = Arc::new(FakePricingClient::new());
        let strategy_client = Arc::new(FakeStrategyClient::new(&strategy));
        let nonces = Arc::new(InMemoryNonceAllocator::new());
        let quotes = Arc::new(InMemoryQuoteStore::new());

        let orchestrator = Arc::new(QuoteOrchestrator::new(
            chains.clone(),
            catalog.clone(),
            pairs.clone(),
            tokens.clone(),
            pricing.clone(),
            strategy_client.clone(),
            nonces.clone(),
            Arc::new(SignerCache::new()),
            quotes.clone(),
            120,
        ));

        Self {
            chain,
            chains,
            catalog,
            pairs,
            tokens,
            pricing,
            strategy_client,
            nonces,
            quotes,
            orchestrator,
            strategy,
            global_timeout: std::time::Duration::from_secs(8),
        }
    }

    pub fn price_args(&self) -> PriceArgs {
        PriceArgs {
            chain_id: CHAIN_ID,
            sell_token: weth(),
            buy_token: usdc(),
            sell_amount: U256::from_dec_str(SELL_AMOUNT).unwrap(),
        }
    }

    pub fn quote_args(&self) -> QuoteArgs {
        QuoteArgs {
            price: self.price_args(),
            taker: taker(),
            recipient: None,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            orchestrator: self.orchestrator.clone(),
            chains: self.chains.clone(),
            catalog: self.catalog.clone(),
            pairs: self.pairs.clone(),
            tokens: self.tokens.clone(),
            global_timeout: self.global_timeout,
        }
    }

    pub fn taker_checksummed(&self) -> String {
        to_checksum(&taker(), None)
    }
}
