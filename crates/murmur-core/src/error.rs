use thiserror::Error;

use murmur_shared::{Address, AddressError, TxDigest};

use crate::channel_flow::ChannelOnChain;
use crate::ports::{RemoteError, SignerError};

/// How a caller should react to a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input, rejected locally before any I/O.
    Validation,
    /// The same call can be retried without side effects.
    Retryable,
    /// The current flow is dead; start it again from its first step.
    RestartFlow,
    /// A fresh session key must be initialized first.
    Reauthenticate,
    /// The channel exists; only key attachment needs to run again.
    ResumeKeyAttachment,
    /// The outcome is unknown; confirm it before retrying.
    Unconfirmed,
    /// Not expected to succeed on retry.
    Fatal,
}

/// Errors produced by the session layer.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Duplicate member address: {0}")]
    DuplicateAddress(Address),

    #[error("Creator cannot be listed as a member: {0}")]
    SelfReference(Address),

    #[error("A channel needs at least one member besides the creator")]
    EmptyMemberList,

    #[error("Signature request rejected by the user")]
    UserRejectedSignature,

    #[error("Signer is connected as {connected}, not {requested}")]
    SignerMismatch {
        connected: Address,
        requested: Address,
    },

    #[error("Transaction rejected: {0}")]
    TransactionRejected(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Session key expired")]
    SessionExpired,

    #[error("No session key; initialize a session first")]
    SessionNotInitialized,

    #[error("Channel {} created but key attachment failed: {reason}", .pending.channel_id)]
    ChannelCreatedWithoutKey {
        pending: ChannelOnChain,
        reason: Box<CoreError>,
    },

    #[error("Encryption key attachment failed: {0}")]
    KeyAttachFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Send outcome unknown: {reason}")]
    SendUnconfirmed {
        digest: Option<TxDigest>,
        reason: String,
    },

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Page limit must be at least 1")]
    InvalidPageLimit,

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
}

impl CoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CoreError::InvalidAddress(_)
            | CoreError::DuplicateAddress(_)
            | CoreError::SelfReference(_)
            | CoreError::EmptyMemberList
            | CoreError::MessageTooLarge { .. }
            | CoreError::InvalidPageLimit
            | CoreError::SignerMismatch { .. } => ErrorClass::Validation,
            CoreError::UserRejectedSignature
            | CoreError::FetchFailed(_)
            | CoreError::SendFailed(_) => ErrorClass::Retryable,
            CoreError::TransactionRejected(_)
            | CoreError::TransactionFailed(_)
            | CoreError::KeyAttachFailed(_) => ErrorClass::RestartFlow,
            CoreError::SessionExpired | CoreError::SessionNotInitialized => {
                ErrorClass::Reauthenticate
            }
            CoreError::ChannelCreatedWithoutKey { .. } => ErrorClass::ResumeKeyAttachment,
            CoreError::SendUnconfirmed { .. } => ErrorClass::Unconfirmed,
            CoreError::NotFound(_) | CoreError::DecryptionFailed(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    pub(crate) fn from_signer(err: SignerError) -> Self {
        match err {
            SignerError::UserRejected => CoreError::UserRejectedSignature,
            SignerError::Rejected(reason) => CoreError::TransactionRejected(reason),
            SignerError::Failed { digest, reason } => {
                CoreError::TransactionFailed(format!("{digest}: {reason}"))
            }
            SignerError::Transport(reason) => CoreError::TransactionFailed(reason),
        }
    }

    /// Map a failed message submission. Only failures that prove the
    /// message was not stored are reported as retryable.
    pub(crate) fn from_send(err: SignerError) -> Self {
        match err {
            SignerError::UserRejected => CoreError::UserRejectedSignature,
            SignerError::Rejected(reason) => CoreError::SendFailed(reason),
            SignerError::Failed { digest, reason } => {
                CoreError::SendFailed(format!("{digest}: {reason}"))
            }
            SignerError::Transport(reason) => CoreError::SendUnconfirmed {
                digest: None,
                reason,
            },
        }
    }

    pub(crate) fn fetch(err: RemoteError) -> Self {
        match err {
            RemoteError::NotFound(what) => CoreError::NotFound(what),
            other => CoreError::FetchFailed(other.to_string()),
        }
    }
}

impl From<AddressError> for CoreError {
    fn from(err: AddressError) -> Self {
        CoreError::InvalidAddress(err.raw().to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoreError>;
