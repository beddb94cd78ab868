//! Scripted port implementations for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use murmur_shared::{Address, CapabilityId, ChannelId, Cursor, TxDigest};

use crate::model::*;
use crate::ports::*;
use crate::session::SessionKey;

pub fn addr(byte: u8) -> Address {
    Address::from_bytes([byte; 32])
}

pub fn capability(owner: &Address, channel: &ChannelId) -> MembershipCapability {
    MembershipCapability {
        id: CapabilityId::new(format!("cap:{}:{}", channel, owner.short())),
        owner: owner.clone(),
        channel_id: channel.clone(),
    }
}

pub fn session_for(address: &Address) -> SessionKey {
    SessionKey {
        address: address.clone(),
        package_id: Address::zero(),
        signature: vec![9; 64],
        creation_time_ms: 0,
        ttl_minutes: 30,
    }
}

/// Ordered record of port calls shared between mocks.
#[derive(Default)]
pub struct EventLog(Mutex<Vec<String>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

// ---------------------------------------------------------------------------
// Signer
// ---------------------------------------------------------------------------

pub struct MockSigner {
    address: Address,
    pub log: Arc<EventLog>,
    personal_signs: AtomicUsize,
    reject_personal: AtomicBool,
    submitted: Mutex<Vec<TxKind>>,
    scripted: Mutex<VecDeque<Result<TxDigest, SignerError>>>,
    gate: Option<Semaphore>,
    digests: AtomicU64,
}

impl MockSigner {
    pub fn new(address: Address) -> Arc<Self> {
        Arc::new(Self::build(address, Arc::new(EventLog::default()), None))
    }

    pub fn with_log(address: Address, log: Arc<EventLog>) -> Arc<Self> {
        Arc::new(Self::build(address, log, None))
    }

    fn build(address: Address, log: Arc<EventLog>, gate: Option<Semaphore>) -> Self {
        Self {
            address,
            log,
            personal_signs: AtomicUsize::new(0),
            reject_personal: AtomicBool::new(false),
            submitted: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            gate,
            digests: AtomicU64::new(0),
        }
    }

    /// Every signing call waits for a permit from [`release`](Self::release).
    pub fn gated(self: Arc<Self>) -> Arc<Self> {
        let inner = Arc::try_unwrap(self).unwrap_or_else(|_| panic!("signer already shared"));
        Arc::new(Self {
            gate: Some(Semaphore::new(0)),
            ..inner
        })
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub fn reject_next_personal_sign(&self) {
        self.reject_personal.store(true, Ordering::SeqCst);
    }

    /// Queue the outcome of the next `sign_and_submit` call.
    pub fn script(&self, result: Result<TxDigest, SignerError>) {
        self.scripted.lock().unwrap().push_back(result);
    }

    pub fn personal_sign_count(&self) -> usize {
        self.personal_signs.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<TxKind> {
        self.submitted.lock().unwrap().clone()
    }

    async fn wait_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
    }
}

#[async_trait]
impl Signer for MockSigner {
    fn address(&self) -> Address {
        self.address.clone()
    }

    async fn sign_personal_message(&self, message: &[u8]) -> Result<Vec<u8>, SignerError> {
        self.personal_signs.fetch_add(1, Ordering::SeqCst);
        self.wait_gate().await;
        if self.reject_personal.swap(false, Ordering::SeqCst) {
            return Err(SignerError::UserRejected);
        }
        Ok(message.iter().rev().copied().take(64).collect())
    }

    async fn sign_and_submit(&self, tx: UnsignedTx) -> Result<TxDigest, SignerError> {
        let label = tx.label();
        self.log.push(format!("submit:{label}"));
        self.submitted.lock().unwrap().push(tx.kind);
        self.wait_gate().await;

        let scripted = self.scripted.lock().unwrap().pop_front();
        let result = scripted.unwrap_or_else(|| {
            let n = self.digests.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TxDigest::new(format!("digest-{n}")))
        });
        self.log.push(format!("confirmed:{label}"));
        result
    }
}

// ---------------------------------------------------------------------------
// Channel store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockChannelStore {
    pub log: Arc<EventLog>,
    channels: Mutex<Vec<Channel>>,
    memberships: Mutex<HashMap<Option<Cursor>, Page<MembershipCapability>>>,
    issued: Mutex<Vec<MembershipCapability>>,
    fail_next: AtomicBool,
    pub list_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    pub membership_calls: AtomicUsize,
}

impl MockChannelStore {
    pub fn with_log(log: Arc<EventLog>) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn set_channels(&self, channels: Vec<Channel>) {
        *self.channels.lock().unwrap() = channels;
    }

    pub fn set_membership_page(&self, cursor: Option<Cursor>, page: Page<MembershipCapability>) {
        self.memberships.lock().unwrap().insert(cursor, page);
    }

    /// Capabilities reported for any confirmed digest.
    pub fn issue(&self, caps: Vec<MembershipCapability>) {
        *self.issued.lock().unwrap() = caps;
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    fn check_failure(&self) -> Result<(), RemoteError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(RemoteError::Transport("connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteChannelStore for MockChannelStore {
    async fn list_channels(&self, address: &Address) -> Result<Vec<Channel>, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(self
            .channels
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.is_member(address))
            .cloned()
            .collect())
    }

    async fn get_channel(&self, channel_id: &ChannelId) -> Result<Channel, RemoteError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        self.channels
            .lock()
            .unwrap()
            .iter()
            .find(|c| &c.id == channel_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(channel_id.to_string()))
    }

    async fn list_memberships(
        &self,
        _address: &Address,
        cursor: Option<Cursor>,
    ) -> Result<Page<MembershipCapability>, RemoteError> {
        self.membership_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(self
            .memberships
            .lock()
            .unwrap()
            .get(&cursor)
            .cloned()
            .unwrap_or_else(|| Page::last(Vec::new())))
    }

    async fn issued_capabilities(
        &self,
        digest: &TxDigest,
    ) -> Result<Vec<MembershipCapability>, RemoteError> {
        self.log.push(format!("issued_capabilities:{digest}"));
        self.check_failure()?;
        Ok(self.issued.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// Message store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListCall {
    pub limit: usize,
    pub direction: Direction,
    pub cursor: Option<Cursor>,
}

#[derive(Default)]
pub struct MockMessageStore {
    pages: Mutex<VecDeque<Result<Page<EncryptedMessage>, RemoteError>>>,
    confirmations: Mutex<VecDeque<Result<EncryptedMessage, RemoteError>>>,
    pub calls: Mutex<Vec<ListCall>>,
}

impl MockMessageStore {
    pub fn push_page(&self, page: Result<Page<EncryptedMessage>, RemoteError>) {
        self.pages.lock().unwrap().push_back(page);
    }

    pub fn push_confirmation(&self, message: Result<EncryptedMessage, RemoteError>) {
        self.confirmations.lock().unwrap().push_back(message);
    }

    pub fn calls(&self) -> Vec<ListCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteMessageStore for MockMessageStore {
    async fn list_messages(
        &self,
        _channel_id: &ChannelId,
        _member: &Address,
        limit: usize,
        direction: Direction,
        cursor: Option<Cursor>,
    ) -> Result<Page<EncryptedMessage>, RemoteError> {
        self.calls.lock().unwrap().push(ListCall {
            limit,
            direction,
            cursor,
        });
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Page::last(Vec::new())))
    }

    async fn confirm_message(&self, digest: &TxDigest) -> Result<EncryptedMessage, RemoteError> {
        self.confirmations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RemoteError::NotFound(digest.to_string())))
    }
}

// ---------------------------------------------------------------------------
// Keys and encryption
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockKeyProvider {
    pub log: Arc<EventLog>,
    fail_attach: AtomicBool,
    records: Mutex<HashMap<ChannelId, EncryptionKeyRecord>>,
    pub fetch_calls: AtomicUsize,
}

impl MockKeyProvider {
    pub fn with_log(log: Arc<EventLog>) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn fail_attach(&self, fail: bool) {
        self.fail_attach.store(fail, Ordering::SeqCst);
    }

    pub fn set_record(&self, record: EncryptionKeyRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.channel_id.clone(), record);
    }
}

#[async_trait]
impl EncryptionKeyProvider for MockKeyProvider {
    async fn generate_and_attach(
        &self,
        channel_id: &ChannelId,
        _creator_capability: &MembershipCapability,
    ) -> Result<GeneratedKey, KeyError> {
        self.log.push("generate_and_attach");
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(KeyError::Attach("key server unavailable".into()));
        }
        Ok(GeneratedKey {
            channel_id: channel_id.clone(),
            encrypted_key_bytes: vec![7; 32],
        })
    }

    async fn fetch_for_channel(
        &self,
        channel_id: &ChannelId,
        _member: &Address,
    ) -> Result<EncryptionKeyRecord, KeyError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .unwrap()
            .get(channel_id)
            .cloned()
            .ok_or_else(|| KeyError::NotFound(channel_id.clone()))
    }
}

/// "Encrypts" by prefixing `enc:`; anything else fails to decrypt.
#[derive(Default)]
pub struct MockEncryptor {
    pub encrypt_calls: AtomicUsize,
}

#[async_trait]
impl Encryptor for MockEncryptor {
    async fn encrypt(
        &self,
        key: &EncryptionKeyRecord,
        session: &SessionKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, EncryptorError> {
        self.encrypt_calls.fetch_add(1, Ordering::SeqCst);
        if key.member != session.address {
            return Err(EncryptorError::Unauthorized);
        }
        let mut out = b"enc:".to_vec();
        out.extend_from_slice(plaintext);
        Ok(out)
    }

    async fn decrypt(
        &self,
        key: &EncryptionKeyRecord,
        session: &SessionKey,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, EncryptorError> {
        if key.member != session.address {
            return Err(EncryptorError::Unauthorized);
        }
        ciphertext
            .strip_prefix(b"enc:")
            .map(<[u8]>::to_vec)
            .ok_or_else(|| EncryptorError::Crypto("bad ciphertext".into()))
    }
}
