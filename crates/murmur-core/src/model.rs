//! Domain model shared by the session layer and its ports.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to a UI layer.

use std::fmt;

use serde::{Deserialize, Serialize};

use murmur_shared::{Address, CapabilityId, ChannelId, TxDigest};

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Preview of the newest message in a channel, as stored on-chain.
///
/// The payload stays encrypted; [`crate::MessageStore::decrypt_preview`]
/// turns it into a [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub sender: Address,
    pub ciphertext: Vec<u8>,
    pub key_version: u32,
    pub created_at_ms: u64,
}

/// An on-chain messaging channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: ChannelId,
    /// Every member, creator first. Fixed at creation.
    pub members: Vec<Address>,
    pub created_at_ms: u64,
    /// Version of the active encryption key; 0 until a key is attached.
    pub key_version: u32,
    pub last_message: Option<LastMessage>,
    pub messages_count: u64,
}

impl Channel {
    /// Time of the newest message, falling back to creation time.
    pub fn last_activity_ms(&self) -> u64 {
        self.last_message
            .as_ref()
            .map(|m| m.created_at_ms)
            .unwrap_or(self.created_at_ms)
    }

    pub fn is_member(&self, address: &Address) -> bool {
        self.members.contains(address)
    }

    pub fn has_encryption_key(&self) -> bool {
        self.key_version > 0
    }
}

/// Proof of membership in one channel, owned by one member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct MembershipCapability {
    pub id: CapabilityId,
    pub owner: Address,
    pub channel_id: ChannelId,
}

// ---------------------------------------------------------------------------
// Encryption keys
// ---------------------------------------------------------------------------

/// The channel key as a member fetches it: wrapped for that member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionKeyRecord {
    pub channel_id: ChannelId,
    pub member: Address,
    pub encrypted_key: Vec<u8>,
    pub version: u32,
}

/// Output of key generation during channel creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedKey {
    pub channel_id: ChannelId,
    pub encrypted_key_bytes: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A message as it comes back from the remote store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedMessage {
    pub channel_id: ChannelId,
    pub sender: Address,
    pub ciphertext: Vec<u8>,
    pub key_version: u32,
    pub created_at_ms: u64,
}

/// Message identity: creation time, sender and channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn derive(created_at_ms: u64, sender: &Address, channel_id: &ChannelId) -> Self {
        Self(format!("{created_at_ms}:{sender}:{channel_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decrypted content, or the reason it could not be decrypted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MessageBody {
    Text { text: String },
    Undecryptable { reason: String },
}

/// A decrypted (or undecryptable) chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub sender: Address,
    pub body: MessageBody,
    pub created_at_ms: u64,
}

impl Message {
    pub fn new(channel_id: ChannelId, sender: Address, body: MessageBody, created_at_ms: u64) -> Self {
        Self {
            id: MessageId::derive(created_at_ms, &sender, &channel_id),
            channel_id,
            sender,
            body,
            created_at_ms,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text { text } => Some(text),
            MessageBody::Undecryptable { .. } => None,
        }
    }

    pub fn decrypt_error(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text { .. } => None,
            MessageBody::Undecryptable { reason } => Some(reason),
        }
    }
}

/// Pagination direction for message history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    /// Newest first, walking back in time from the cursor.
    #[default]
    Backward,
    /// Oldest first, walking forward from the cursor.
    Forward,
}

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

/// A transaction touching the tracked address, keyed by digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub digest: TxDigest,
    pub sender: Address,
    pub kind: String,
    pub timestamp_ms: u64,
}
