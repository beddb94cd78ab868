//! Capability traits the session layer consumes.
//!
//! Implementations live outside this crate (wallet adapters, chain RPC
//! clients, key servers). The core only sequences calls to them and maps
//! their failures into [`crate::CoreError`].

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use murmur_shared::{Address, CapabilityId, ChannelId, Cursor, TxDigest};

use crate::model::{
    ActivityRecord, Channel, Direction, EncryptedMessage, EncryptionKeyRecord, GeneratedKey,
    MembershipCapability,
};
use crate::session::SessionKey;

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// What a transaction does once executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxKind {
    /// Create a channel and issue one membership capability per member.
    CreateChannel {
        creator: Address,
        members: Vec<Address>,
    },
    /// Attach the generated encryption key, proving ownership with the
    /// creator's capability.
    AttachEncryptionKey {
        channel_id: ChannelId,
        creator_capability: CapabilityId,
        encrypted_key: Vec<u8>,
    },
    /// Append an encrypted message to a channel.
    SendMessage {
        channel_id: ChannelId,
        capability_id: CapabilityId,
        ciphertext: Vec<u8>,
        key_version: u32,
    },
}

/// A built, not yet signed transaction.
///
/// Deliberately not `Clone`: submitting consumes it, so a built
/// transaction can be executed at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct UnsignedTx {
    pub nonce: Uuid,
    pub sender: Address,
    pub kind: TxKind,
}

impl UnsignedTx {
    pub fn new(sender: Address, kind: TxKind) -> Self {
        Self {
            nonce: Uuid::new_v4(),
            sender,
            kind,
        }
    }

    pub fn label(&self) -> &'static str {
        match self.kind {
            TxKind::CreateChannel { .. } => "create_channel",
            TxKind::AttachEncryptionKey { .. } => "attach_encryption_key",
            TxKind::SendMessage { .. } => "send_message",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("user rejected the signature request")]
    UserRejected,

    /// The node refused the transaction before execution.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The transaction executed and aborted.
    #[error("transaction {digest} failed: {reason}")]
    Failed { digest: TxDigest, reason: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// The connected wallet.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Address the wallet is connected as.
    fn address(&self) -> Address;

    /// Sign an arbitrary personal message (session challenge).
    async fn sign_personal_message(&self, message: &[u8]) -> Result<Vec<u8>, SignerError>;

    /// Sign, submit and wait for confirmation.
    async fn sign_and_submit(&self, tx: UnsignedTx) -> Result<TxDigest, SignerError>;
}

// ---------------------------------------------------------------------------
// Remote stores
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote error: {0}")]
    Other(String),
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<Cursor>,
    pub has_next_page: bool,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
            has_next_page: false,
        }
    }
}

#[async_trait]
pub trait RemoteChannelStore: Send + Sync {
    async fn list_channels(&self, address: &Address) -> Result<Vec<Channel>, RemoteError>;

    async fn get_channel(&self, channel_id: &ChannelId) -> Result<Channel, RemoteError>;

    async fn list_memberships(
        &self,
        address: &Address,
        cursor: Option<Cursor>,
    ) -> Result<Page<MembershipCapability>, RemoteError>;

    /// Capabilities created by a confirmed transaction.
    async fn issued_capabilities(
        &self,
        digest: &TxDigest,
    ) -> Result<Vec<MembershipCapability>, RemoteError>;
}

#[async_trait]
pub trait RemoteMessageStore: Send + Sync {
    async fn list_messages(
        &self,
        channel_id: &ChannelId,
        member: &Address,
        limit: usize,
        direction: Direction,
        cursor: Option<Cursor>,
    ) -> Result<Page<EncryptedMessage>, RemoteError>;

    /// The stored message written by a confirmed send transaction.
    async fn confirm_message(&self, digest: &TxDigest) -> Result<EncryptedMessage, RemoteError>;
}

#[async_trait]
pub trait RemoteActivityFeed: Send + Sync {
    /// Transactions touching `address`, newest first.
    async fn list_activity(
        &self,
        address: &Address,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Result<Page<ActivityRecord>, RemoteError>;
}

// ---------------------------------------------------------------------------
// Keys and encryption
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("key attachment failed: {0}")]
    Attach(String),

    #[error("no encryption key for channel {0}")]
    NotFound(ChannelId),

    #[error("key service error: {0}")]
    Service(String),
}

#[async_trait]
pub trait EncryptionKeyProvider: Send + Sync {
    /// Generate a channel key and encrypt it for every member.
    async fn generate_and_attach(
        &self,
        channel_id: &ChannelId,
        creator_capability: &MembershipCapability,
    ) -> Result<GeneratedKey, KeyError>;

    /// The current key of a channel, wrapped for `member`.
    async fn fetch_for_channel(
        &self,
        channel_id: &ChannelId,
        member: &Address,
    ) -> Result<EncryptionKeyRecord, KeyError>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncryptorError {
    #[error("session does not authorize this key")]
    Unauthorized,

    #[error("{0}")]
    Crypto(String),
}

/// The only place cryptographic primitives run.
#[async_trait]
pub trait Encryptor: Send + Sync {
    async fn encrypt(
        &self,
        key: &EncryptionKeyRecord,
        session: &SessionKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, EncryptorError>;

    async fn decrypt(
        &self,
        key: &EncryptionKeyRecord,
        session: &SessionKey,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, EncryptorError>;
}
