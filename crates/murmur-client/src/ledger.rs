//! In-process ledger implementing every remote port.
//!
//! Submitted transactions execute synchronously against in-memory tables.
//! It also plays the key server: channel keys are wrapped per member under
//! a secret that never leaves this process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use murmur_core::ports::{
    EncryptionKeyProvider, KeyError, Page, RemoteActivityFeed, RemoteChannelStore, RemoteError,
    RemoteMessageStore, SignerError, TxKind, UnsignedTx,
};
use murmur_core::{
    ActivityRecord, Channel, Clock, Direction, EncryptedMessage, EncryptionKeyRecord,
    GeneratedKey, LastMessage, MembershipCapability, SessionKey,
};
use murmur_shared::crypto::{self, SymmetricKey};
use murmur_shared::identity::verify_signature;
use murmur_shared::types::derive_object_id;
use murmur_shared::{Address, CapabilityId, ChannelId, Cursor, TxDigest};

/// Page size of membership listings.
pub const DEFAULT_MEMBERSHIP_PAGE_SIZE: usize = 50;

struct ChannelKey {
    version: u32,
    wrapped: HashMap<Address, Vec<u8>>,
}

struct ActivityEntry {
    record: ActivityRecord,
    participants: Vec<Address>,
}

#[derive(Default)]
struct Tables {
    wallets: HashMap<Address, [u8; 32]>,
    channels: HashMap<ChannelId, Channel>,
    capabilities: HashMap<CapabilityId, MembershipCapability>,
    issued: HashMap<TxDigest, Vec<MembershipCapability>>,
    generated: HashMap<ChannelId, HashMap<Address, Vec<u8>>>,
    keys: HashMap<ChannelId, ChannelKey>,
    messages: HashMap<ChannelId, Vec<EncryptedMessage>>,
    sent: HashMap<TxDigest, EncryptedMessage>,
    activity: Vec<ActivityEntry>,
    fail_next: Option<&'static str>,
    last_timestamp_ms: u64,
}

pub struct MemoryLedger {
    clock: Arc<dyn Clock>,
    master: SymmetricKey,
    membership_page_size: usize,
    tables: Mutex<Tables>,
}

impl MemoryLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            master: crypto::generate_symmetric_key(),
            membership_page_size: DEFAULT_MEMBERSHIP_PAGE_SIZE,
            tables: Mutex::new(Tables::default()),
        }
    }

    pub fn with_membership_page_size(mut self, size: usize) -> Self {
        self.membership_page_size = size.max(1);
        self
    }

    /// Record the public key behind an address so session signatures can
    /// be checked.
    pub fn register_wallet(&self, address: Address, public_key: [u8; 32]) {
        self.lock().wallets.insert(address, public_key);
    }

    /// Make the next transaction with this label abort after execution.
    pub fn fail_next(&self, label: &'static str) {
        self.lock().fail_next = Some(label);
    }

    /// Whether `session` carries a live signature by its address.
    pub fn verify_session(&self, session: &SessionKey) -> bool {
        if !session.is_valid(self.clock.now_ms()) {
            return false;
        }
        let Some(public_key) = self.lock().wallets.get(&session.address).copied() else {
            return false;
        };
        verify_signature(&public_key, session.challenge().as_bytes(), &session.signature).is_ok()
    }

    pub(crate) fn master_key(&self) -> &SymmetricKey {
        &self.master
    }

    /// Execute a signed transaction and return its digest.
    pub fn execute(&self, tx: UnsignedTx) -> Result<TxDigest, SignerError> {
        let mut tables = self.lock();
        let digest = TxDigest::new(format!(
            "0x{}",
            hex::encode(blake3::hash(tx.nonce.as_bytes()).as_bytes())
        ));
        let label = tx.label();

        if tables.fail_next == Some(label) {
            tables.fail_next = None;
            warn!(digest = %digest, label, "Injected transaction failure");
            return Err(SignerError::Failed {
                digest,
                reason: "injected abort".to_string(),
            });
        }

        let now = self.clock.now_ms().max(tables.last_timestamp_ms + 1);
        let participants = match tx.kind {
            TxKind::CreateChannel { creator, members } => {
                create_channel(&mut tables, &digest, &tx.sender, creator, members, now)?
            }
            TxKind::AttachEncryptionKey {
                channel_id,
                creator_capability,
                encrypted_key,
            } => attach_key(
                &mut tables,
                &digest,
                &tx.sender,
                &channel_id,
                &creator_capability,
                &encrypted_key,
            )?,
            TxKind::SendMessage {
                channel_id,
                capability_id,
                ciphertext,
                key_version,
            } => {
                let message = EncryptedMessage {
                    channel_id,
                    sender: tx.sender.clone(),
                    ciphertext,
                    key_version,
                    created_at_ms: now,
                };
                send_message(&mut tables, &digest, &capability_id, message)?
            }
        };

        tables.last_timestamp_ms = now;
        tables.activity.push(ActivityEntry {
            record: ActivityRecord {
                digest: digest.clone(),
                sender: tx.sender,
                kind: label.to_string(),
                timestamp_ms: now,
            },
            participants,
        });
        debug!(digest = %digest, label, "Transaction executed");
        Ok(digest)
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---- Transaction execution ----

fn aborted(digest: &TxDigest, reason: impl Into<String>) -> SignerError {
    SignerError::Failed {
        digest: digest.clone(),
        reason: reason.into(),
    }
}

fn create_channel(
    tables: &mut Tables,
    digest: &TxDigest,
    sender: &Address,
    creator: Address,
    members: Vec<Address>,
    now: u64,
) -> Result<Vec<Address>, SignerError> {
    if &creator != sender {
        return Err(SignerError::Rejected("creator must be the sender".into()));
    }
    if members.is_empty() {
        return Err(SignerError::Rejected("channel needs members".into()));
    }

    let channel_id = ChannelId::new(derive_object_id(digest, 0));
    let mut all = Vec::with_capacity(members.len() + 1);
    all.push(creator);
    all.extend(members);

    let caps: Vec<MembershipCapability> = all
        .iter()
        .zip(1u32..)
        .map(|(owner, index)| MembershipCapability {
            id: CapabilityId::new(derive_object_id(digest, index)),
            owner: owner.clone(),
            channel_id: channel_id.clone(),
        })
        .collect();
    for cap in &caps {
        tables.capabilities.insert(cap.id.clone(), cap.clone());
    }
    tables.issued.insert(digest.clone(), caps);
    tables.channels.insert(
        channel_id.clone(),
        Channel {
            id: channel_id.clone(),
            members: all.clone(),
            created_at_ms: now,
            key_version: 0,
            last_message: None,
            messages_count: 0,
        },
    );
    info!(channel_id = %channel_id, members = all.len(), "Channel created on ledger");
    Ok(all)
}

fn attach_key(
    tables: &mut Tables,
    digest: &TxDigest,
    sender: &Address,
    channel_id: &ChannelId,
    capability_id: &CapabilityId,
    encrypted_key: &[u8],
) -> Result<Vec<Address>, SignerError> {
    let channel = tables
        .channels
        .get(channel_id)
        .ok_or_else(|| aborted(digest, format!("no channel {channel_id}")))?;
    let owns_channel = tables.capabilities.get(capability_id).is_some_and(|cap| {
        &cap.owner == sender && &cap.channel_id == channel_id && channel.members.first() == Some(sender)
    });
    if !owns_channel {
        return Err(aborted(digest, "capability does not prove channel ownership"));
    }

    let wrapped = tables
        .generated
        .remove(channel_id)
        .ok_or_else(|| aborted(digest, "no generated key for channel"))?;
    if wrapped.get(sender).map(Vec::as_slice) != Some(encrypted_key) {
        tables.generated.insert(channel_id.clone(), wrapped);
        return Err(aborted(digest, "encrypted key does not match the generated key"));
    }

    let version = channel.key_version + 1;
    let members = channel.members.clone();
    tables
        .keys
        .insert(channel_id.clone(), ChannelKey { version, wrapped });
    if let Some(channel) = tables.channels.get_mut(channel_id) {
        channel.key_version = version;
    }
    info!(channel_id = %channel_id, version, "Encryption key attached");
    Ok(members)
}

fn send_message(
    tables: &mut Tables,
    digest: &TxDigest,
    capability_id: &CapabilityId,
    message: EncryptedMessage,
) -> Result<Vec<Address>, SignerError> {
    let is_member = tables.capabilities.get(capability_id).is_some_and(|cap| {
        cap.owner == message.sender && cap.channel_id == message.channel_id
    });
    if !is_member {
        return Err(aborted(digest, "capability does not grant membership"));
    }

    let channel = tables
        .channels
        .get_mut(&message.channel_id)
        .ok_or_else(|| aborted(digest, format!("no channel {}", message.channel_id)))?;
    if !channel.has_encryption_key() || channel.key_version != message.key_version {
        return Err(aborted(digest, "stale or missing encryption key"));
    }

    channel.last_message = Some(LastMessage {
        sender: message.sender.clone(),
        ciphertext: message.ciphertext.clone(),
        key_version: message.key_version,
        created_at_ms: message.created_at_ms,
    });
    channel.messages_count += 1;
    let members = channel.members.clone();

    tables.sent.insert(digest.clone(), message.clone());
    tables
        .messages
        .entry(message.channel_id.clone())
        .or_default()
        .push(message);
    Ok(members)
}

// ---- Pagination ----

fn parse_cursor(cursor: Option<&Cursor>) -> Result<Option<usize>, RemoteError> {
    cursor
        .map(|c| {
            c.as_str()
                .parse::<usize>()
                .map_err(|_| RemoteError::Other(format!("invalid cursor {c}")))
        })
        .transpose()
}

/// Page forward from index `start` through a list.
fn page_forward<T: Clone>(items: &[T], start: usize, limit: usize) -> Page<T> {
    let start = start.min(items.len());
    let end = (start + limit).min(items.len());
    let has_next_page = end < items.len();
    Page {
        items: items[start..end].to_vec(),
        next_cursor: has_next_page.then(|| Cursor::new(end.to_string())),
        has_next_page,
    }
}

// ---- Ports ----

#[async_trait]
impl RemoteChannelStore for MemoryLedger {
    async fn list_channels(&self, address: &Address) -> Result<Vec<Channel>, RemoteError> {
        Ok(self
            .lock()
            .channels
            .values()
            .filter(|c| c.is_member(address))
            .cloned()
            .collect())
    }

    async fn get_channel(&self, channel_id: &ChannelId) -> Result<Channel, RemoteError> {
        self.lock()
            .channels
            .get(channel_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("channel {channel_id}")))
    }

    async fn list_memberships(
        &self,
        address: &Address,
        cursor: Option<Cursor>,
    ) -> Result<Page<MembershipCapability>, RemoteError> {
        let start = parse_cursor(cursor.as_ref())?.unwrap_or(0);
        let mut owned: Vec<MembershipCapability> = self
            .lock()
            .capabilities
            .values()
            .filter(|cap| &cap.owner == address)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(page_forward(&owned, start, self.membership_page_size))
    }

    async fn issued_capabilities(
        &self,
        digest: &TxDigest,
    ) -> Result<Vec<MembershipCapability>, RemoteError> {
        self.lock()
            .issued
            .get(digest)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("transaction {digest}")))
    }
}

#[async_trait]
impl RemoteMessageStore for MemoryLedger {
    async fn list_messages(
        &self,
        channel_id: &ChannelId,
        member: &Address,
        limit: usize,
        direction: Direction,
        cursor: Option<Cursor>,
    ) -> Result<Page<EncryptedMessage>, RemoteError> {
        let position = parse_cursor(cursor.as_ref())?;
        let tables = self.lock();
        let channel = tables
            .channels
            .get(channel_id)
            .ok_or_else(|| RemoteError::NotFound(format!("channel {channel_id}")))?;
        if !channel.is_member(member) {
            return Err(RemoteError::Other(format!(
                "{} is not a member of {channel_id}",
                member.short()
            )));
        }

        let all = tables
            .messages
            .get(channel_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let limit = limit.max(1);

        Ok(match direction {
            Direction::Forward => page_forward(all, position.unwrap_or(0), limit),
            Direction::Backward => {
                // Cursor is the exclusive upper bound.
                let end = position.unwrap_or(all.len()).min(all.len());
                let start = end.saturating_sub(limit);
                let has_next_page = start > 0;
                Page {
                    items: all[start..end].iter().rev().cloned().collect(),
                    next_cursor: has_next_page.then(|| Cursor::new(start.to_string())),
                    has_next_page,
                }
            }
        })
    }

    async fn confirm_message(&self, digest: &TxDigest) -> Result<EncryptedMessage, RemoteError> {
        self.lock()
            .sent
            .get(digest)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("message transaction {digest}")))
    }
}

#[async_trait]
impl RemoteActivityFeed for MemoryLedger {
    async fn list_activity(
        &self,
        address: &Address,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Result<Page<ActivityRecord>, RemoteError> {
        let start = parse_cursor(cursor.as_ref())?.unwrap_or(0);
        let newest_first: Vec<ActivityRecord> = self
            .lock()
            .activity
            .iter()
            .rev()
            .filter(|entry| entry.participants.contains(address))
            .map(|entry| entry.record.clone())
            .collect();
        Ok(page_forward(&newest_first, start, limit.max(1)))
    }
}

#[async_trait]
impl EncryptionKeyProvider for MemoryLedger {
    async fn generate_and_attach(
        &self,
        channel_id: &ChannelId,
        creator_capability: &MembershipCapability,
    ) -> Result<GeneratedKey, KeyError> {
        let mut guard = self.lock();
        let tables = &mut *guard;
        let channel = tables
            .channels
            .get(channel_id)
            .ok_or_else(|| KeyError::NotFound(channel_id.clone()))?;
        if channel.members.first() != Some(&creator_capability.owner) {
            return Err(KeyError::Attach("only the creator can attach a key".into()));
        }

        let channel_key = crypto::generate_symmetric_key();
        let mut wrapped = HashMap::with_capacity(channel.members.len());
        for member in &channel.members {
            let bytes = crypto::wrap_channel_key(&self.master, channel_id, member, &channel_key)
                .map_err(|e| KeyError::Service(e.to_string()))?;
            wrapped.insert(member.clone(), bytes);
        }
        let encrypted_key_bytes = wrapped
            .get(&creator_capability.owner)
            .cloned()
            .ok_or_else(|| KeyError::Attach("creator key missing".into()))?;
        tables.generated.insert(channel_id.clone(), wrapped);

        Ok(GeneratedKey {
            channel_id: channel_id.clone(),
            encrypted_key_bytes,
        })
    }

    async fn fetch_for_channel(
        &self,
        channel_id: &ChannelId,
        member: &Address,
    ) -> Result<EncryptionKeyRecord, KeyError> {
        let tables = self.lock();
        let key = tables
            .keys
            .get(channel_id)
            .ok_or_else(|| KeyError::NotFound(channel_id.clone()))?;
        let encrypted_key = key
            .wrapped
            .get(member)
            .cloned()
            .ok_or_else(|| KeyError::NotFound(channel_id.clone()))?;
        Ok(EncryptionKeyRecord {
            channel_id: channel_id.clone(),
            member: member.clone(),
            encrypted_key,
            version: key.version,
        })
    }
}
