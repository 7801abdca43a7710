//! Pure helpers shared across the quote pipeline: strict address parsing,
//! canonical pair ordering, and the amount/expiry normalization rules applied
//! to upstream intent values.

use crate::errors::AmountError;
use ethers::types::{Address, U256};
use ethers::utils::to_checksum;
use serde_json::Value;

/// Millisecond/second boundary for expiry heuristics. Anything above this is
/// interpreted as a millisecond timestamp.
const EXPIRY_MS_THRESHOLD: f64 = 1e12;

/// Parse an address and require it to be rendered in exact EIP-55 checksum
/// form. All-lowercase or wrong-case inputs are rejected; the signing and
/// canonicalization paths depend on a single canonical rendering.
pub fn parse_checksummed(raw: &str) -> Result<Address, String> {
    let addr: Address = raw
        .parse()
        .map_err(|_| format!("not a 20-byte hex address: {raw:?}"))?;
    let rendered = to_checksum(&addr, None);
    if rendered != raw {
        return Err(format!("address {raw:?} fails EIP-55 checksum (expected {rendered})"));
    }
    Ok(addr)
}

/// Canonical pair ordering: `(min, max)` by lowercase-hex comparison, which
/// for fixed-width addresses is the raw byte ordering. The third element
/// reports whether the first input was `token0`.
pub fn canonical_pair(a: Address, b: Address) -> (Address, Address, bool) {
    if a <= b {
        (a, b, true)
    } else {
        (b, a, false)
    }
}

/// Parse a request-supplied amount: a non-empty unsigned decimal-string
/// integer, no sign, no fraction, no whitespace.
pub fn parse_raw_amount(raw: &str) -> Result<U256, AmountError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AmountError::NotUint(raw.to_string()));
    }
    U256::from_dec_str(raw).map_err(|_| AmountError::Overflow)
}

/// Normalize an upstream-supplied amount into a uint256.
///
/// Strings with a fractional part are truncated at the decimal point,
/// negatives clamp to zero, empty (or null) becomes zero, and non-finite
/// numerics fail. JSON numbers are tolerated because the strategy service is
/// loosely typed about them.
pub fn normalize_uint(value: &Value) -> Result<U256, AmountError> {
    match value {
        Value::Null => Ok(U256::zero()),
        Value::String(s) => normalize_uint_str(s),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Ok(U256::from(u))
            } else if n.as_i64().is_some() {
                // negative integral clamps to zero
                Ok(U256::zero())
            } else if let Some(f) = n.as_f64() {
                normalize_uint_f64(f)
            } else {
                Err(AmountError::NonFinite)
            }
        }
        other => Err(AmountError::NotUint(other.to_string())),
    }
}

fn normalize_uint_str(s: &str) -> Result<U256, AmountError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Ok(U256::zero());
    }
    if trimmed.starts_with('-') {
        // validate the remainder is numeric before clamping
        let rest = trimmed[1..].trim_start();
        let integral = rest.split('.').next().unwrap_or("");
        if !integral.is_empty() && integral.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(U256::zero());
        }
        return Err(AmountError::NotUint(s.to_string()));
    }
    let integral = trimmed.split('.').next().unwrap_or("");
    if integral.is_empty() {
        // inputs like ".5" truncate to zero
        if trimmed.starts_with('.') && trimmed[1..].bytes().all(|b| b.is_ascii_digit()) {
            return Ok(U256::zero());
        }
        return Err(AmountError::NotUint(s.to_string()));
    }
    if !integral.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AmountError::NotUint(s.to_string()));
    }
    U256::from_dec_str(integral).map_err(|_| AmountError::Overflow)
}

fn normalize_uint_f64(f: f64) -> Result<U256, AmountError> {
    if !f.is_finite() {
        return Err(AmountError::NonFinite);
    }
    if f <= 0.0 {
        return Ok(U256::zero());
    }
    let rendered = format!("{:.0}", f.floor());
    U256::from_dec_str(&rendered).map_err(|_| AmountError::Overflow)
}

/// Normalize an upstream intent expiry into unix seconds.
///
/// Numeric values above 10^12 are treated as milliseconds and floor-divided
/// by 1000; everything else is floored seconds, clamped at zero. A missing or
/// unparseable expiry yields `fallback` (now + the configured quote TTL) so
/// an issued quote always carries a deadline.
pub fn normalize_expiry(value: &Value, fallback: u64) -> u64 {
    let numeric = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let e = match numeric {
        Some(e) if e.is_finite() => e,
        _ => return fallback,
    };
    if e <= 0.0 {
        return 0;
    }
    let seconds = if e > EXPIRY_MS_THRESHOLD { (e / 1000.0).floor() } else { e.floor() };
    seconds as u64
}
