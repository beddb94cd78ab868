//! Encrypted message send and paginated, decrypted history.
//!
//! Decryption is per message: one bad payload turns into a
//! [`MessageBody::Undecryptable`] entry instead of failing the whole page.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use murmur_shared::constants::{DEFAULT_MESSAGE_PAGE_SIZE, MAX_MESSAGE_SIZE};
use murmur_shared::{Address, CapabilityId, ChannelId, Cursor};

use crate::error::{CoreError, Result};
use crate::model::{
    Channel, Direction, EncryptedMessage, EncryptionKeyRecord, Message, MessageBody, MessageId,
};
use crate::ports::{
    EncryptionKeyProvider, Encryptor, KeyError, RemoteMessageStore, Signer, TxKind, UnsignedTx,
};
use crate::session::{SessionKey, SessionKeyManager};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Start after this cursor; `None` starts at the newest message.
    pub cursor: Option<Cursor>,
    /// Page size. Zero is rejected with [`CoreError::InvalidPageLimit`].
    pub limit: usize,
    pub direction: Direction,
}

impl FetchOptions {
    pub fn latest(limit: usize) -> Self {
        Self {
            cursor: None,
            limit,
            direction: Direction::Backward,
        }
    }

    pub fn before(cursor: Cursor, limit: usize) -> Self {
        Self {
            cursor: Some(cursor),
            limit,
            direction: Direction::Backward,
        }
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::latest(DEFAULT_MESSAGE_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    /// In remote order: newest first for [`Direction::Backward`].
    pub messages: Vec<Message>,
    pub next_cursor: Option<Cursor>,
    /// True iff the page came back full. A heuristic, not a remote count.
    pub has_more: bool,
}

type ChannelMessages = BTreeMap<(u64, MessageId), Message>;

pub struct MessageStore {
    signer: Arc<dyn Signer>,
    remote: Arc<dyn RemoteMessageStore>,
    keys: Arc<dyn EncryptionKeyProvider>,
    encryptor: Arc<dyn Encryptor>,
    sessions: Arc<SessionKeyManager>,
    key_cache: RwLock<HashMap<(ChannelId, Address), EncryptionKeyRecord>>,
    messages: RwLock<HashMap<ChannelId, ChannelMessages>>,
}

impl MessageStore {
    pub fn new(
        signer: Arc<dyn Signer>,
        remote: Arc<dyn RemoteMessageStore>,
        keys: Arc<dyn EncryptionKeyProvider>,
        encryptor: Arc<dyn Encryptor>,
        sessions: Arc<SessionKeyManager>,
    ) -> Self {
        Self {
            signer,
            remote,
            keys,
            encryptor,
            sessions,
            key_cache: RwLock::new(HashMap::new()),
            messages: RwLock::new(HashMap::new()),
        }
    }

    /// Encrypt `plaintext` under `key` and submit it to the channel.
    ///
    /// Returns the stored message with its ledger-assigned timestamp. A
    /// [`CoreError::SendUnconfirmed`] means the message may have landed;
    /// check history before sending again.
    pub async fn send(
        &self,
        channel_id: &ChannelId,
        capability_id: &CapabilityId,
        plaintext: &str,
        key: &EncryptionKeyRecord,
    ) -> Result<Message> {
        if plaintext.len() > MAX_MESSAGE_SIZE {
            return Err(CoreError::MessageTooLarge {
                size: plaintext.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let sender = self.signer.address();
        let session = self.sessions.ensure_valid(&sender).await?;

        let ciphertext = self
            .encryptor
            .encrypt(key, &session, plaintext.as_bytes())
            .await
            .map_err(|e| CoreError::SendFailed(format!("encryption: {e}")))?;

        let tx = UnsignedTx::new(
            sender.clone(),
            TxKind::SendMessage {
                channel_id: channel_id.clone(),
                capability_id: capability_id.clone(),
                ciphertext,
                key_version: key.version,
            },
        );
        let digest = self
            .signer
            .sign_and_submit(tx)
            .await
            .map_err(CoreError::from_send)?;

        let confirmed = self.remote.confirm_message(&digest).await.map_err(|e| {
            CoreError::SendUnconfirmed {
                digest: Some(digest.clone()),
                reason: e.to_string(),
            }
        })?;

        let message = Message::new(
            channel_id.clone(),
            confirmed.sender,
            MessageBody::Text {
                text: plaintext.to_string(),
            },
            confirmed.created_at_ms,
        );
        self.remember(channel_id, std::slice::from_ref(&message)).await;

        info!(
            channel_id = %channel_id,
            digest = %digest,
            created_at_ms = message.created_at_ms,
            "Message sent"
        );
        Ok(message)
    }

    /// Fetch one page of history and decrypt it.
    pub async fn fetch(
        &self,
        channel_id: &ChannelId,
        member: &Address,
        options: FetchOptions,
    ) -> Result<MessagePage> {
        let limit = options.limit;
        if limit == 0 {
            return Err(CoreError::InvalidPageLimit);
        }
        let session = self.sessions.ensure_valid(member).await?;
        let key = self.key_for(channel_id, member).await?;

        let page = self
            .remote
            .list_messages(channel_id, member, limit, options.direction, options.cursor)
            .await
            .map_err(CoreError::fetch)?;

        let mut messages = Vec::with_capacity(page.items.len());
        for encrypted in page.items {
            messages.push(self.open(&key, &session, encrypted).await);
        }
        let has_more = messages.len() == limit;

        self.remember(channel_id, &messages).await;
        debug!(
            channel_id = %channel_id,
            count = messages.len(),
            has_more,
            "Fetched message page"
        );

        Ok(MessagePage {
            messages,
            next_cursor: page.next_cursor,
            has_more,
        })
    }

    /// Decrypt the preview carried by a channel listing.
    pub async fn decrypt_preview(&self, channel: &Channel, member: &Address) -> Result<Option<Message>> {
        let Some(last) = channel.last_message.clone() else {
            return Ok(None);
        };
        let session = self.sessions.ensure_valid(member).await?;
        let key = self.key_for(&channel.id, member).await?;
        let encrypted = EncryptedMessage {
            channel_id: channel.id.clone(),
            sender: last.sender,
            ciphertext: last.ciphertext,
            key_version: last.key_version,
            created_at_ms: last.created_at_ms,
        };
        Ok(Some(self.open(&key, &session, encrypted).await))
    }

    /// The channel key wrapped for `member`, fetched once and cached.
    pub async fn key_for(&self, channel_id: &ChannelId, member: &Address) -> Result<EncryptionKeyRecord> {
        let cache_key = (channel_id.clone(), member.clone());
        if let Some(record) = self.key_cache.read().await.get(&cache_key) {
            return Ok(record.clone());
        }

        let record = self
            .keys
            .fetch_for_channel(channel_id, member)
            .await
            .map_err(|e| match e {
                KeyError::NotFound(id) => CoreError::NotFound(format!("encryption key for {id}")),
                other => CoreError::FetchFailed(other.to_string()),
            })?;

        self.key_cache.write().await.insert(cache_key, record.clone());
        Ok(record)
    }

    /// Every message seen for a channel, oldest first.
    pub async fn cached_messages(&self, channel_id: &ChannelId) -> Vec<Message> {
        self.messages
            .read()
            .await
            .get(channel_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every cached key and message.
    pub async fn clear(&self) {
        self.key_cache.write().await.clear();
        self.messages.write().await.clear();
    }

    async fn open(
        &self,
        key: &EncryptionKeyRecord,
        session: &SessionKey,
        encrypted: EncryptedMessage,
    ) -> Message {
        let body = if encrypted.key_version != key.version {
            MessageBody::Undecryptable {
                reason: format!("key version {} unavailable", encrypted.key_version),
            }
        } else {
            match self.encryptor.decrypt(key, session, &encrypted.ciphertext).await {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => MessageBody::Text { text },
                    Err(_) => MessageBody::Undecryptable {
                        reason: "payload is not UTF-8".to_string(),
                    },
                },
                Err(e) => MessageBody::Undecryptable {
                    reason: e.to_string(),
                },
            }
        };

        if let MessageBody::Undecryptable { reason } = &body {
            warn!(
                channel_id = %encrypted.channel_id,
                created_at_ms = encrypted.created_at_ms,
                reason = %reason,
                "Message could not be decrypted"
            );
        }

        Message::new(encrypted.channel_id, encrypted.sender, body, encrypted.created_at_ms)
    }

    async fn remember(&self, channel_id: &ChannelId, messages: &[Message]) {
        let mut cache = self.messages.write().await;
        let entry = cache.entry(channel_id.clone()).or_default();
        for message in messages {
            entry.insert((message.created_at_ms, message.id.clone()), message.clone());
        }
    }
}
