/// Application name
pub const APP_NAME: &str = "Murmur";

/// Prefix carried by every account address and object id
pub const ADDRESS_PREFIX: &str = "0x";

/// Number of hex digits following the prefix (32 bytes)
pub const ADDRESS_HEX_LEN: usize = 64;

/// Total address length including the prefix
pub const ADDRESS_LEN: usize = ADDRESS_PREFIX.len() + ADDRESS_HEX_LEN;

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Maximum plaintext message size in bytes (16 KiB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// Default session key lifetime in minutes
pub const DEFAULT_SESSION_TTL_MINUTES: u32 = 30;

/// Milliseconds per minute, used for session expiry arithmetic
pub const MS_PER_MINUTE: u64 = 60_000;

/// Default number of messages per history page
pub const DEFAULT_MESSAGE_PAGE_SIZE: usize = 50;

/// Default page size for a full activity refresh
pub const DEFAULT_REFRESH_PAGE_SIZE: usize = 20;

/// Default page size for a timer-driven incremental poll
pub const DEFAULT_INCREMENTAL_PAGE_SIZE: usize = 5;

/// Upper bound on pages walked by one incremental poll to reach known items
pub const MAX_CATCH_UP_PAGES: usize = 20;

/// Default activity poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 15_000;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_MEMBER_WRAP: &str = "murmur-member-key-wrap-v1";
pub const KDF_CONTEXT_ADDRESS: &str = "murmur-address-v1";
pub const KDF_CONTEXT_OBJECT_ID: &str = "murmur-object-id-v1";
