use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{ADDRESS_HEX_LEN, ADDRESS_LEN, ADDRESS_PREFIX, KDF_CONTEXT_OBJECT_ID};
use crate::error::AddressError;

// Account address: "0x" + 64 hex digits, stored lower-cased
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Validate and normalise a raw address string.
    ///
    /// Fails fast on a missing prefix, a wrong total length, or non-hex
    /// digits, so malformed input never reaches the network.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let trimmed = raw.trim();
        let Some(hex_part) = trimmed.strip_prefix(ADDRESS_PREFIX) else {
            return Err(AddressError::MissingPrefix(raw.to_string()));
        };
        if trimmed.len() != ADDRESS_LEN {
            return Err(AddressError::WrongLength {
                raw: raw.to_string(),
                expected: ADDRESS_LEN,
                actual: trimmed.len(),
            });
        }
        if !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AddressError::NotHex(raw.to_string()));
        }
        Ok(Self(format!("{ADDRESS_PREFIX}{}", hex_part.to_ascii_lowercase())))
    }

    /// Build an address from 32 raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(format!("{ADDRESS_PREFIX}{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight hex digits, for log lines.
    pub fn short(&self) -> &str {
        &self.0[ADDRESS_PREFIX.len()..ADDRESS_PREFIX.len() + 8]
    }

    pub fn zero() -> Self {
        Self(format!("{ADDRESS_PREFIX}{}", "0".repeat(ADDRESS_HEX_LEN)))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

opaque_id!(
    /// On-chain channel object id.
    ChannelId
);

opaque_id!(
    /// Membership capability object id.
    CapabilityId
);

opaque_id!(
    /// Digest of a submitted transaction.
    TxDigest
);

opaque_id!(
    /// Opaque pagination cursor handed out by a remote store.
    Cursor
);

/// Derive a fresh object id from a transaction digest and an output index.
///
/// Mirrors how a chain assigns ids to objects created by one transaction.
pub fn derive_object_id(digest: &TxDigest, index: u32) -> String {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_OBJECT_ID);
    hasher.update(digest.as_str().as_bytes());
    hasher.update(&index.to_le_bytes());
    format!("{ADDRESS_PREFIX}{}", hasher.finalize().to_hex())
}
