//! # murmur-shared
//!
//! Types shared by every Murmur crate: validated account addresses and
//! on-chain identifiers, protocol constants, the XChaCha20-Poly1305 helpers
//! used for channel keys and message payloads, and the local Ed25519 wallet
//! identity.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod types;

pub use error::{AddressError, CryptoError, IdentityError};
pub use types::{Address, CapabilityId, ChannelId, Cursor, TxDigest};
