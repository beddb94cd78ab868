use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Address must start with 0x: {0}")]
    MissingPrefix(String),

    #[error("Address must be {expected} characters, got {actual}: {raw}")]
    WrongLength {
        raw: String,
        expected: usize,
        actual: usize,
    },

    #[error("Address contains non-hex characters: {0}")]
    NotHex(String),
}

impl AddressError {
    /// The raw input that failed validation.
    pub fn raw(&self) -> &str {
        match self {
            AddressError::MissingPrefix(raw) | AddressError::NotHex(raw) => raw,
            AddressError::WrongLength { raw, .. } => raw,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Plaintext too large: {size} bytes (max {max})")]
    PlaintextTooLarge { size: usize, max: usize },
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Invalid signature")]
    InvalidSignature,
}
