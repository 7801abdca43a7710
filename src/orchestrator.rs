//! # Quote Orchestrator
//!
//! Composes the registry, stores, upstream clients, nonce allocator and
//! signer into the two hot paths: an indicative `get_price` and a firm
//! `create_quote`. Ordering is load-bearing: every precondition is checked
//! before the nonce is allocated, because the nonce commits immediately and
//! is burned by any later failure.

use crate::config::{ChainContext, ChainsRegistry};
use crate::errors::QuoteError;
use crate::executor::build_fill_transaction;
use crate::metrics::QuoterMetrics;
use crate::nonce::NonceAllocator;
use crate::pairs::{ensure_enabled, PairStore};
use crate::pricing_client::PricingClient;
use crate::quote_store::QuoteStore;
use crate::signer::{parse_strategy_hash, QuotePayload, QuoteSigner, SignerCache};
use crate::strategies::StrategyCatalog;
use crate::strategy_client::StrategyClient;
use crate::token_registry::TokenRegistry;
use crate::types::{
    DepthRequest, IntentRequest, PricingSnapshot, QuoteRecord, QuoteStatus, StrategyInfo,
};
use crate::utils::{normalize_expiry, normalize_uint};
use chrono::Utc;
use ethers::types::{Address, U256, U512};
use ethers::utils::to_checksum;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

const BPS_DENOMINATOR: u64 = 10_000;
const MAX_EXECUTOR_FEE_BPS: u32 = 9_999;

/// Validated inputs for the indicative price path.
#[derive(Debug, Clone)]
pub struct PriceArgs {
    pub chain_id: u64,
    pub sell_token: Address,
    pub buy_token: Address,
    pub sell_amount: U256,
}

/// Validated inputs for the firm quote path.
#[derive(Debug, Clone)]
pub struct QuoteArgs {
    pub price: PriceArgs,
    pub taker: Address,
    pub recipient: Option<Address>,
}

/// Output of the price sub-flow, reused by `create_quote`.
#[derive(Debug, Clone)]
pub struct PriceOutcome {
    pub chain: Arc<ChainContext>,
    pub snapshot: PricingSnapshot,
    /// `depthPoints[0].amountOutRaw`, or `"0"` when the book is empty.
    pub buy_amount: String,
}

pub struct QuoteOrchestrator {
    chains: Arc<ChainsRegistry>,
    catalog: Arc<dyn StrategyCatalog>,
    pairs: Arc<dyn PairStore>,
    tokens: Arc<TokenRegistry>,
    pricing: Arc<dyn PricingClient>,
    strategy: Arc<dyn StrategyClient>,
    nonces: Arc<dyn NonceAllocator>,
    signers: Arc<SignerCache>,
    quotes: Arc<dyn QuoteStore>,
    quote_expiry_seconds: u64,
}

impl QuoteOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chains: Arc<ChainsRegistry>,
        catalog: Arc<dyn StrategyCatalog>,
        pairs: Arc<dyn PairStore>,
        tokens: Arc<TokenRegistry>,
        pricing: Arc<dyn PricingClient>,
        strategy: Arc<dyn StrategyClient>,
        nonces: Arc<dyn NonceAllocator>,
        signers: Arc<SignerCache>,
        quotes: Arc<dyn QuoteStore>,
        quote_expiry_seconds: u64,
    ) -> Self {
        Self {
            chains,
            catalog,
            pairs,
            tokens,
            pricing,
            strategy,
            nonces,
            signers,
            quotes,
            quote_expiry_seconds,
        }
    }

    /// Indicative price: admission checks, token metadata, one depth call.
    /// No signing, no nonce, no persistence.
    #[instrument(skip(self, args), fields(chain_id = args.chain_id))]
    pub async fn get_price(&self, args: &PriceArgs) -> Result<PriceOutcome, QuoteError> {
        let chain = self.chains.get(args.chain_id)?;

        let state = self.catalog.chain_state(chain.chain_id).await?;
        if state.paused {
            return Err(QuoteError::ChainPaused(chain.chain_id));
        }

        ensure_enabled(
            self.pairs.as_ref(),
            chain.chain_id,
            args.sell_token,
            args.buy_token,
        )
        .await?;

        tokio::try_join!(
            self.tokens.ensure(&chain, args.sell_token),
            self.tokens.ensure(&chain, args.buy_token),
        )?;

        let snapshot = self
            .pricing
            .request_depth(&DepthRequest {
                chain_id: chain.chain_id,
                sell_token: to_checksum(&args.sell_token, None),
                buy_token: to_checksum(&args.buy_token, None),
                sell_amount: args.sell_amount.to_string(),
            })
            .await?;

        let buy_amount = snapshot
            .depth_points
            .first()
            .map(|p| p.amount_out_raw.clone())
            .unwrap_or_else(|| "0".to_string());

        Ok(PriceOutcome {
            chain,
            snapshot,
            buy_amount,
        })
    }

    /// Firm quote: the price sub-flow plus strategy intent, amount math,
    /// nonce, signature, calldata and persistence.
    #[instrument(skip(self, args), fields(chain_id = args.price.chain_id, taker = %args.taker))]
    pub async fn create_quote(&self, args: &QuoteArgs) -> Result<QuoteRecord, QuoteError> {
        let price = self.get_price(&args.price).await?;
        let chain = price.chain.clone();
        let recipient = args.recipient.unwrap_or(args.taker);

        let strategy = self.catalog.active_strategy(chain.chain_id).await?;
        let strategy_hash = parse_strategy_hash(&strategy.hash)?;

        let intent = self
            .strategy
            .request_intent(&IntentRequest {
                chain_id: chain.chain_id,
                maker: to_checksum(&chain.maker, None),
                executor: to_checksum(&chain.executor, None),
                taker: to_checksum(&args.taker, None),
                sell_token: to_checksum(&args.price.sell_token, None),
                buy_token: to_checksum(&args.price.buy_token, None),
                sell_amount: args.price.sell_amount.to_string(),
                recipient: to_checksum(&recipient, None),
                pricing_snapshot: price.snapshot.clone(),
                strategy: StrategyInfo {
                    id: strategy.id.to_string(),
                    version: strategy.version,
                    hash: strategy.hash.clone(),
                    params: strategy.params.clone(),
                },
            })
            .await?;

        // on-chain amounts: the signed gross covers the executor fee skim so
        // the taker still nets at least the strategy's amount
        let net_out = normalize_uint(&intent.buy_amount)?;
        let fee_amount = normalize_uint(&intent.fee_amount)?;
        let gross_out = gross_for_net(net_out, chain.executor_fee_bps)?;
        let min_net_out = net_out;

        let now = Utc::now().timestamp().max(0) as u64;
        let expiry = normalize_expiry(&intent.expiry, now + self.quote_expiry_seconds);

        // the nonce commits here; any failure below burns it. The allocation
        // runs detached so a dropped request cannot abort the row lock
        // mid-write.
        let nonces = self.nonces.clone();
        let (nonce_chain, maker) = (chain.chain_id, chain.maker);
        let nonce = tokio::spawn(async move { nonces.allocate(nonce_chain, maker).await })
            .await
            .map_err(|e| QuoteError::Internal(format!("nonce task failed: {e}")))??;

        let quote_id = Uuid::new_v4();

        let payload = QuotePayload {
            chain_id: chain.chain_id,
            executor: chain.executor,
            maker: chain.maker,
            token_in: args.price.sell_token,
            token_out: args.price.buy_token,
            amount_in: args.price.sell_amount,
            amount_out: gross_out,
            strategy_hash,
            nonce,
            expiry: U256::from(expiry),
        };

        let signer = self.signers.for_chain(&chain).await?;
        let signed = signer.sign(&payload).await?;
        let tx = build_fill_transaction(&payload, &signed.signature_bytes, min_net_out);

        let record = QuoteRecord {
            quote_id,
            chain_id: chain.chain_id,
            maker: to_checksum(&chain.maker, None),
            taker: to_checksum(&args.taker, None),
            recipient: to_checksum(&recipient, None),
            executor: to_checksum(&chain.executor, None),
            strategy_id: strategy.id,
            strategy_version: strategy.version,
            strategy_hash: strategy.hash.clone(),
            sell_token: to_checksum(&args.price.sell_token, None),
            buy_token: to_checksum(&args.price.buy_token, None),
            sell_amount: args.price.sell_amount.to_string(),
            buy_amount: net_out.to_string(),
            fee_bps: intent.fee_bps,
            fee_amount: fee_amount.to_string(),
            nonce: nonce.to_string(),
            expiry: expiry as i64,
            typed_data: signed.typed_data,
            signature: signed.signature,
            tx_to: tx.to,
            tx_data: tx.data,
            tx_value: tx.value,
            status: QuoteStatus::Issued,
            reject_code: None,
            pricing_as_of_ms: Some(price.snapshot.as_of_ms),
            pricing_confidence: Some(price.snapshot.confidence_score),
            pricing_stale: Some(price.snapshot.stale),
            pricing_sources: price.snapshot.sources_used.clone(),
            created_at: Utc::now(),
        };

        self.quotes.insert(&record).await?;
        QuoterMetrics::global()
            .quotes_issued
            .with_label_values(&[&chain.chain_id.to_string()])
            .inc();
        info!(
            target: "orchestrator",
            quote_id = %record.quote_id,
            chain_id = chain.chain_id,
            nonce = %record.nonce,
            gross_out = %gross_out,
            net_out = %net_out,
            expiry,
            "quote issued"
        );
        Ok(record)
    }

    /// Return the persisted record verbatim.
    pub async fn get_quote(&self, quote_id: &str) -> Result<QuoteRecord, QuoteError> {
        let id = Uuid::parse_str(quote_id)
            .map_err(|_| QuoteError::QuoteNotFound(quote_id.to_string()))?;
        self.quotes
            .find_by_id(id)
            .await?
            .ok_or_else(|| QuoteError::QuoteNotFound(quote_id.to_string()))
    }
}

/// Gross the executor must move so the taker nets `net` after an `fee_bps`
/// skim: `ceil(net * 10000 / (10000 - fee))`, all big-integer.
pub fn gross_for_net(net: U256, fee_bps: u32) -> Result<U256, QuoteError> {
    let fb = fee_bps.min(MAX_EXECUTOR_FEE_BPS) as u64;
    if fb == 0 || net.is_zero() {
        return Ok(net);
    }
    let den = U512::from(BPS_DENOMINATOR - fb);
    let num = net.full_mul(U256::from(BPS_DENOMINATOR));
    let gross = (num + den - U512::one()) / den;
    U256::try_from(gross).map_err(|_| QuoteError::InvalidAmount(crate::errors::AmountError::Overflow))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    #[test]
    fn zero_fee_and_zero_net_pass_through() {
        let net = U256::from(350_000_000u64);
        assert_eq!(gross_for_net(net, 0).unwrap(), net);
        assert_eq!(gross_for_net(U256::zero(), 25).unwrap(), U256::zero());
    }

    #[test]
    fn executor_fee_scaling_matches_the_contract_math() {
        // ceil(350000000 * 10000 / 9975) = 350877193
        let gross = gross_for_net(U256::from(350_000_000u64), 25).unwrap();
        assert_eq!(gross, U256::from(350_877_193u64));
    }

    #[test]
    fn fee_bps_clamps_at_9999() {
        let net = U256::from(1u64);
        // clamped to 9999 bps: ceil(1 * 10000 / 1) = 10000
        assert_eq!(gross_for_net(net, 60_000).unwrap(), U256::from(10_000u64));
    }

    #[test]
    fn taker_minimum_survives_the_skim_for_any_fee() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for _ in 0..2_000 {
            let net = U256::from(rng.gen_range(0u64..=u64::MAX));
            let fee = rng.gen_range(0u32..=9_999);
            let gross = gross_for_net(net, fee).unwrap();
            // what the taker actually receives after the executor skims
            let paid_out = gross
                .full_mul(U256::from(BPS_DENOMINATOR - fee as u64))
                / U512::from(BPS_DENOMINATOR);
            assert!(
                paid_out >= U512::from(net.as_u64()),
                "fee {fee} net {net} gross {gross}"
            );
        }
    }

    #[test]
    fn gross_is_minimal() {
        // one wei less than the computed gross must under-pay the taker
        let net = U256::from(350_000_000u64);
        let fee = 25u32;
        let gross = gross_for_net(net, fee).unwrap();
        let lesser = gross - U256::one();
        let paid_out = lesser.full_mul(U256::from(BPS_DENOMINATOR - fee as u64))
            / U512::from(BPS_DENOMINATOR);
        assert!(paid_out < U512::from(net.as_u64()));
    }

    #[test]
    fn huge_nets_use_wide_arithmetic() {
        let net = U256::MAX / U256::from(2u64);
        let gross = gross_for_net(net, 1).unwrap();
        assert!(gross > net);
    }
}
