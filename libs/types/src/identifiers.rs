//! Typed identifiers for tokens, accounts, pools and transactions
//!
//! Pool identifiers are derived CREATE2-style from the canonical pair key, so a
//! pool's id is known before the pool exists:
//!
//! ```text
//! salt    = keccak256(token0 || 0x00 || token1)
//! pool_id = keccak256(0xff || namespace || salt)[12..32]
//! ```

use crate::errors::TypesError;
use serde::{de, Deserialize, Deserializer, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;
use uuid::Uuid;

/// Ledger-level token identifier (contract address or asset code)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenId(String);

impl TokenId {
    pub fn new(raw: impl Into<String>) -> Result<Self, TypesError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(TypesError::InvalidToken(raw));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Skip validation for ids built from already-valid parts
    pub(crate) fn from_trusted(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TokenId {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TokenId> for String {
    fn from(value: TokenId) -> Self {
        value.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ledger account: a user, a liquidity provider, the treasury or the intermediary
///
/// The name [`AccountId::LOCKED`] is reserved: `new` refuses it, so only
/// [`AccountId::locked`] (and state restored from disk) can refer to it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(into = "String")]
pub struct AccountId(String);

impl AccountId {
    /// Holder of the permanently locked minimum liquidity
    pub const LOCKED: &'static str = "locked";

    pub fn new(raw: impl Into<String>) -> Result<Self, TypesError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TypesError::InvalidAccount(raw));
        }
        if trimmed == Self::LOCKED {
            return Err(TypesError::ReservedAccount(raw));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn is_locked(&self) -> bool {
        self.0 == Self::LOCKED
    }

    /// Account that owns the shares locked by the first deposit
    pub fn locked() -> Self {
        Self(Self::LOCKED.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AccountId {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AccountId> for String {
    fn from(value: AccountId) -> Self {
        value.0
    }
}

// Persisted positions name the locked holder, so it deserializes
impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == Self::LOCKED {
            return Ok(Self::locked());
        }
        Self::new(raw).map_err(de::Error::custom)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unordered token pair in canonical (lexicographic) order
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairKey {
    pub token0: TokenId,
    pub token1: TokenId,
}

impl PairKey {
    /// Canonicalize a pair; `(a, b)` and `(b, a)` give the same key
    pub fn new(a: &TokenId, b: &TokenId) -> Result<Self, TypesError> {
        if a == b {
            return Err(TypesError::IdenticalTokens(a.to_string()));
        }
        let (token0, token1) = if a < b { (a, b) } else { (b, a) };
        Ok(Self {
            token0: token0.clone(),
            token1: token1.clone(),
        })
    }

    /// True when `token` is the first (token0) side of the pair
    pub fn is_token0(&self, token: &TokenId) -> bool {
        &self.token0 == token
    }

    pub fn contains(&self, token: &TokenId) -> bool {
        &self.token0 == token || &self.token1 == token
    }

    /// The other side of the pair, if `token` belongs to it
    pub fn other(&self, token: &TokenId) -> Option<&TokenId> {
        if &self.token0 == token {
            Some(&self.token1)
        } else if &self.token1 == token {
            Some(&self.token0)
        } else {
            None
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.token0, self.token1)
    }
}

/// 20-byte pool identifier, rendered as `0x`-prefixed hex
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PoolId([u8; 20]);

impl PoolId {
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Deterministic id for `pair` under a deployment namespace
    pub fn derive(namespace: &str, pair: &PairKey) -> Self {
        let mut salt_hasher = Keccak256::new();
        salt_hasher.update(pair.token0.as_str().as_bytes());
        salt_hasher.update([0u8]);
        salt_hasher.update(pair.token1.as_str().as_bytes());
        let salt = salt_hasher.finalize();

        let mut hasher = Keccak256::new();
        hasher.update([0xffu8]);
        hasher.update(namespace.as_bytes());
        hasher.update(salt);
        let digest = hasher.finalize();

        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[12..32]);
        Self(bytes)
    }

    /// Short form for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl TryFrom<String> for PoolId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let stripped = value.strip_prefix("0x").unwrap_or(&value);
        let decoded = hex::decode(stripped).map_err(|e| format!("invalid pool id {value}: {e}"))?;
        let bytes: [u8; 20] = decoded
            .try_into()
            .map_err(|_| format!("pool id {value} must be 20 bytes"))?;
        Ok(Self(bytes))
    }
}

impl From<PoolId> for String {
    fn from(value: PoolId) -> Self {
        value.to_string()
    }
}

/// Pending transaction identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(Uuid);

impl TxId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
