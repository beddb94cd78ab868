use thiserror::Error;

use murmur_core::{ChannelOnChain, CoreError, ErrorClass};

#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("No wallet connected")]
    NotConnected,

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ClientError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ClientError::NotConnected => ErrorClass::Reauthenticate,
            ClientError::Core(e) => e.class(),
        }
    }

    /// The channel left without a key, if this is a partial creation.
    pub fn pending_channel(&self) -> Option<&ChannelOnChain> {
        match self {
            ClientError::Core(CoreError::ChannelCreatedWithoutKey { pending, .. }) => Some(pending),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
