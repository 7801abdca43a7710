//! # Centralized Error Handling
//!
//! Every component raises a typed failure from this module; the orchestrator
//! never recovers, and the transport layer maps each failure onto exactly one
//! wire code. Keeping the whole taxonomy in one place prevents ambiguous
//! string errors from leaking across component boundaries.

use ethers::types::Address;
use thiserror::Error;

/// Wire-level error codes rendered in the HTTP error envelope.
///
/// The set mirrors what the on-chain and upstream collaborators can observe;
/// every `QuoteError` variant maps to exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ChainNotSupported,
    ChainPaused,
    PairNotEnabled,
    StrategyNotConfigured,
    StrategyNotEnabled,
    StrategyNotFound,
    PricingUpstreamFailed,
    StrategyUpstreamFailed,
    InvalidAmount,
    ValidationFailed,
    RequestTimeout,
    QuoteNotFound,
    InternalServerError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ChainNotSupported => "CHAIN_NOT_SUPPORTED",
            ErrorCode::ChainPaused => "CHAIN_PAUSED",
            ErrorCode::PairNotEnabled => "PAIR_NOT_ENABLED",
            ErrorCode::StrategyNotConfigured => "STRATEGY_NOT_CONFIGURED",
            ErrorCode::StrategyNotEnabled => "STRATEGY_NOT_ENABLED",
            ErrorCode::StrategyNotFound => "STRATEGY_NOT_FOUND",
            ErrorCode::PricingUpstreamFailed => "PRICING_UPSTREAM_FAILED",
            ErrorCode::StrategyUpstreamFailed => "STRATEGY_UPSTREAM_FAILED",
            ErrorCode::InvalidAmount => "INVALID_AMOUNT",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::RequestTimeout => "REQUEST_TIMEOUT",
            ErrorCode::QuoteNotFound => "QUOTE_NOT_FOUND",
            ErrorCode::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }

    /// HTTP status carried by the envelope for this code.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorCode::StrategyNotFound | ErrorCode::QuoteNotFound => 404,
            ErrorCode::PricingUpstreamFailed | ErrorCode::StrategyUpstreamFailed => 502,
            ErrorCode::RequestTimeout => 504,
            ErrorCode::InternalServerError => 500,
            _ => 400,
        }
    }
}

/// Failures while loading or resolving chain configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read chains file {0}: {1}")]
    Read(String, String),
    #[error("failed to parse chains file {0}: {1}")]
    Parse(String, String),
    #[error("chain {0}: {1}")]
    Chain(String, String),
    #[error("missing environment variable {0}")]
    MissingEnv(String),
    #[error("invalid environment variable {0}: {1}")]
    InvalidEnv(String, String),
}

/// Failures crossing the database boundary.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("stored row is corrupt: {0}")]
    Corrupt(String),
}

impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        StoreError::Pool(e.to_string())
    }
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        StoreError::Query(e.to_string())
    }
}

/// Failures talking JSON-RPC to a chain.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("invalid RPC url for chain {0}: {1}")]
    InvalidUrl(u64, String),
    #[error("eth_call failed on chain {chain_id} to {target}: {message}")]
    Call {
        chain_id: u64,
        target: Address,
        message: String,
    },
    #[error("malformed return data from {target}: {message}")]
    Decode { target: Address, message: String },
}

/// Failures producing a typed-data signature.
#[derive(Error, Debug)]
pub enum SignerError {
    #[error("invalid signing key for chain {0}")]
    InvalidKey(u64),
    #[error("signing failed: {0}")]
    Sign(String),
    #[error("invalid strategy hash: {0}")]
    StrategyHash(String),
}

/// Amount normalization failures (non-parseable or non-finite inputs).
#[derive(Error, Debug)]
pub enum AmountError {
    #[error("amount is not an unsigned decimal integer: {0:?}")]
    NotUint(String),
    #[error("amount is not finite")]
    NonFinite,
    #[error("amount overflows uint256")]
    Overflow,
}

/// The top-level failure type for the quote pipeline. Each variant carries
/// enough context to log and maps onto one wire code via [`QuoteError::code`].
#[derive(Error, Debug)]
pub enum QuoteError {
    #[error("chain {0} is not supported")]
    ChainNotSupported(u64),
    #[error("chain {0} is paused")]
    ChainPaused(u64),
    #[error("pair {0}/{1} is not enabled on chain {2}")]
    PairNotEnabled(Address, Address, u64),
    #[error("no active strategy configured for chain {0}")]
    StrategyNotConfigured(u64),
    #[error("strategy {0} is disabled")]
    StrategyNotEnabled(String),
    #[error("strategy {0} not found")]
    StrategyNotFound(String),
    #[error("pricing upstream failed: {0}")]
    PricingUpstream(String),
    #[error("strategy upstream failed: {0}")]
    StrategyUpstream(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),
    #[error("request validation failed: {0}")]
    Validation(String),
    #[error("request deadline exceeded")]
    Timeout,
    #[error("quote {0} not found")]
    QuoteNotFound(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
    #[error("signer error: {0}")]
    Signer(#[from] SignerError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl QuoteError {
    pub fn code(&self) -> ErrorCode {
        match self {
            QuoteError::ChainNotSupported(_) => ErrorCode::ChainNotSupported,
            QuoteError::ChainPaused(_) => ErrorCode::ChainPaused,
            QuoteError::PairNotEnabled(..) => ErrorCode::PairNotEnabled,
            QuoteError::StrategyNotConfigured(_) => ErrorCode::StrategyNotConfigured,
            QuoteError::StrategyNotEnabled(_) => ErrorCode::StrategyNotEnabled,
            QuoteError::StrategyNotFound(_) => ErrorCode::StrategyNotFound,
            QuoteError::PricingUpstream(_) => ErrorCode::PricingUpstreamFailed,
            QuoteError::StrategyUpstream(_) => ErrorCode::StrategyUpstreamFailed,
            QuoteError::InvalidAmount(_) => ErrorCode::InvalidAmount,
            QuoteError::Validation(_) => ErrorCode::ValidationFailed,
            QuoteError::Timeout => ErrorCode::RequestTimeout,
            QuoteError::QuoteNotFound(_) => ErrorCode::QuoteNotFound,
            QuoteError::Store(_) | QuoteError::Rpc(_) | QuoteError::Signer(_) | QuoteError::Internal(_) => {
                ErrorCode::InternalServerError
            }
        }
    }
}
