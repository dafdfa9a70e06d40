//! Contract bindings and helpers for decoding probe results.
//!
//! Fixed ERC-20 and pool surfaces are bound with `abigen!`. Probe accessors and
//! the router entry points are parsed from human-readable signatures so new
//! interface variants can be added through configuration.

use crate::errors::{AppError, Result};
use ethers::{
    abi::{Function, HumanReadableParser, Token},
    contract::abigen,
    types::{I256, U256},
};
use serde::{Deserialize, Serialize};

abigen!(
    Erc20,
    r"[
        function symbol() view returns (string)
        function decimals() view returns (uint8)
        function balanceOf(address account) view returns (uint256)
        function allowance(address owner, address spender) view returns (uint256)
        function approve(address spender, uint256 amount) returns (bool)
    ]",
);

abigen!(
    PoolTokens,
    r"[
        function token0() view returns (address)
        function token1() view returns (address)
        function liquidity() view returns (uint128)
    ]",
);

/// Parse `function name(args) view returns (...)`; the `function` keyword is optional.
pub fn parse_function(signature: &str) -> Result<Function> {
    let signature = signature.trim();
    let full = if signature.starts_with("function ") {
        signature.to_string()
    } else {
        format!("function {signature}")
    };
    HumanReadableParser::parse_function(&full)
        .map_err(|err| AppError::Abi(format!("bad signature `{signature}`: {err}")))
}

/// Location of a value inside a decoded return tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldRef {
    Index(usize),
    Name(String),
}

impl FieldRef {
    fn position(&self, function: &Function) -> Option<usize> {
        match self {
            FieldRef::Index(idx) => Some(*idx),
            FieldRef::Name(name) => function.outputs.iter().position(|p| &p.name == name),
        }
    }

    /// Pick the referenced token out of `tokens`, unwrapping a lone returned struct.
    pub fn pick<'a>(&self, function: &Function, tokens: &'a [Token]) -> Option<&'a Token> {
        if let [Token::Tuple(inner)] = tokens {
            if function.outputs.len() == 1 {
                return match self {
                    FieldRef::Index(idx) => inner.get(*idx),
                    FieldRef::Name(_) => None,
                };
            }
        }
        tokens.get(self.position(function)?)
    }
}

/// Signed integer view of an `intN`/`uintN` token, if it fits in `i64`.
pub fn token_to_i64(token: &Token) -> Option<i64> {
    match token {
        Token::Int(raw) => {
            let value = I256::from_raw(*raw);
            if value > I256::from(i64::MAX) || value < I256::from(i64::MIN) {
                return None;
            }
            Some(value.low_i64())
        }
        Token::Uint(raw) => {
            if *raw > U256::from(i64::MAX as u64) {
                return None;
            }
            Some(raw.low_u64() as i64)
        }
        _ => None,
    }
}

pub fn token_to_u256(token: &Token) -> Option<U256> {
    match token {
        Token::Uint(raw) => Some(*raw),
        _ => None,
    }
}

pub fn token_to_u128(token: &Token) -> Option<u128> {
    let raw = token_to_u256(token)?;
    if raw > U256::from(u128::MAX) {
        return None;
    }
    Some(raw.as_u128())
}
