//! Content hashes binding an account address to free text.
//!
//! A [`ContentHash`] is `keccak256(address ‖ utf8(text))`, the same bytes
//! Solidity's `abi.encodePacked(address, string)` produces. The address is
//! always 20 bytes, so the split between actor and text is fixed.
//!
//! The chain sees the raw 32 bytes as a `bytes32` argument; the backend sees
//! `0x` followed by 64 lowercase hex digits. Both renderings come from this
//! type and nowhere else.

use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use web3::{
    ethabi::Token,
    types::{Address, H256},
};

use crate::error::{Error, Result};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(H256);

impl ContentHash {
    pub fn derive(actor: Address, content: &str) -> Self {
        let mut hasher = Keccak256::new();
        hasher.update(actor.as_bytes());
        hasher.update(content.as_bytes());
        ContentHash(H256::from_slice(hasher.finalize().as_slice()))
    }

    /// Hash for the connected account; fails when no wallet is connected.
    pub fn for_actor(actor: Option<Address>, content: &str) -> Result<Self> {
        actor
            .map(|actor| Self::derive(actor, content))
            .ok_or(Error::WalletNotConnected)
    }

    /// Strict parse of a stored hash: optional `0x`, exactly 64 hex digits.
    pub fn from_hex(s: &str) -> Result<Self> {
        let clean = s.trim();
        let clean = clean.strip_prefix("0x").unwrap_or(clean);
        if clean.len() != 64 {
            return Err(Error::InvalidHash(format!(
                "expected 64 hex digits, got {}",
                clean.len()
            )));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(clean, &mut bytes).map_err(|e| Error::InvalidHash(e.to_string()))?;
        Ok(ContentHash(H256(bytes)))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0.as_bytes()))
    }

    pub fn as_h256(&self) -> H256 {
        self.0
    }

    pub fn into_token(self) -> Token {
        Token::FixedBytes(self.0.as_bytes().to_vec())
    }
}

impl From<H256> for ContentHash {
    fn from(h: H256) -> Self {
        ContentHash(h)
    }
}

impl FromStr for ContentHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentHash::from_hex(&s).map_err(de::Error::custom)
    }
}
