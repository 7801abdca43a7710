//! Executor calldata assembly. The taker submits this transaction themselves;
//! the service only encodes it. The tuple layout mirrors the signed `Quote`
//! struct, and the third argument is the net minimum the executor must pay
//! out after its fee skim.

use crate::errors::QuoteError;
use crate::signer::QuotePayload;
use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::to_checksum;
use once_cell::sync::Lazy;
use serde::Serialize;

const FILL_SIGNATURE: &str =
    "fill((address,address,address,uint256,uint256,bytes32,uint256,uint256),bytes,uint256)";

static FILL_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| ethers::utils::id(FILL_SIGNATURE));

/// The transaction a taker submits to settle a quote.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TxPayload {
    pub to: String,
    pub data: String,
    pub value: String,
}

/// ABI-encode `fill(quote, sig, minAmountOutNet)` against the executor.
pub fn build_fill_transaction(
    payload: &QuotePayload,
    signature: &[u8],
    min_amount_out_net: U256,
) -> TxPayload {
    let quote_tuple = Token::Tuple(vec![
        Token::Address(payload.maker),
        Token::Address(payload.token_in),
        Token::Address(payload.token_out),
        Token::Uint(payload.amount_in),
        Token::Uint(payload.amount_out),
        Token::FixedBytes(payload.strategy_hash.as_bytes().to_vec()),
        Token::Uint(payload.nonce),
        Token::Uint(payload.expiry),
    ]);

    let mut data = FILL_SELECTOR.to_vec();
    data.extend_from_slice(&abi::encode(&[
        quote_tuple,
        Token::Bytes(signature.to_vec()),
        Token::Uint(min_amount_out_net),
    ]));

    TxPayload {
        to: to_checksum(&payload.executor, None),
        data: format!("0x{}", hex::encode(data)),
        value: "0".to_string(),
    }
}

/// A decoded `fill` call. Exists so tests (and auditors) can prove the
/// calldata matches the signed message byte-for-byte.
#[derive(Debug, Clone, PartialEq)]
pub struct FillCall {
    pub maker: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub amount_out: U256,
    pub strategy_hash: H256,
    pub nonce: U256,
    pub expiry: U256,
    pub signature: Vec<u8>,
    pub min_amount_out_net: U256,
}

pub fn decode_fill_transaction(data_hex: &str) -> Result<FillCall, QuoteError> {
    let raw = hex::decode(data_hex.trim_start_matches("0x"))
        .map_err(|e| QuoteError::Internal(format!("calldata is not hex: {e}")))?;
    if raw.len() < 4 || raw[..4] != FILL_SELECTOR[..] {
        return Err(QuoteError::Internal("calldata does not target fill()".into()));
    }

    let tokens = abi::decode(
        &[
            ParamType::Tuple(vec![
                ParamType::Address,
                ParamType::Address,
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::FixedBytes(32),
                ParamType::Uint(256),
                ParamType::Uint(256),
            ]),
            ParamType::Bytes,
            ParamType::Uint(256),
        ],
        &raw[4..],
    )
    .map_err(|e| QuoteError::Internal(format!("calldata does not decode: {e}")))?;

    let mut iter = tokens.into_iter();
    let tuple = match iter.next() {
        Some(Token::Tuple(fields)) => fields,
        _ => return Err(QuoteError::Internal("fill(): missing quote tuple".into())),
    };
    let signature = match iter.next() {
        Some(Token::Bytes(b)) => b,
        _ => return Err(QuoteError::Internal("fill(): missing signature bytes".into())),
    };
    let min_amount_out_net = match iter.next() {
        Some(Token::Uint(u)) => u,
        _ => return Err(QuoteError::Internal("fill(): missing min amount".into())),
    };

    if tuple.len() != 8 {
        return Err(QuoteError::Internal(format!(
            "fill(): quote tuple has {} fields",
            tuple.len()
        )));
    }
    let mut fields = tuple.into_iter();
    let maker = expect_address(fields.next())?;
    let token_in = expect_address(fields.next())?;
    let token_out = expect_address(fields.next())?;
    let amount_in = expect_uint(fields.next())?;
    let amount_out = expect_uint(fields.next())?;
    let strategy_hash = match fields.next() {
        Some(Token::FixedBytes(b)) if b.len() == 32 => H256::from_slice(&b),
        other => {
            return Err(QuoteError::Internal(format!(
                "fill(): expected strategyHash, got {other:?}"
            )))
        }
    };
    let nonce = expect_uint(fields.next())?;
    let expiry = expect_uint(fields.next())?;

    Ok(FillCall {
        maker,
        token_in,
        token_out,
        amount_in,
        amount_out,
        strategy_hash,
        nonce,
        expiry,
        signature,
        min_amount_out_net,
    })
}

fn expect_address(token: Option<Token>) -> Result<Address, QuoteError> {
    match token {
        Some(Token::Address(a)) => Ok(a),
        other => Err(QuoteError::Internal(format!("fill(): expected address, got {other:?}"))),
    }
}

fn expect_uint(token: Option<Token>) -> Result<U256, QuoteError> {
    match token {
        Some(Token::Uint(u)) => Ok(u),
        other => Err(QuoteError::Internal(format!("fill(): expected uint, got {other:?}"))),
    }
}
