//! The messaging client: every core component wired to one set of ports.
//!
//! All caches are scoped to the connected address. Connecting as a
//! different address drops the session and every cached channel, key and
//! message before anything is fetched for the new one.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tracing::info;

use murmur_core::feeds::{MessageFeed, TransactionFeed};
use murmur_core::ports::{
    EncryptionKeyProvider, Encryptor, RemoteActivityFeed, RemoteChannelStore, RemoteMessageStore,
    Signer,
};
use murmur_core::{
    ActivityPoller, Channel, ChannelCreationFlow, ChannelOnChain, ChannelRegistry, Clock,
    CreatedChannel, Direction, FetchOptions, Message, MessagePage, MessageStore, SessionKey,
    SessionKeyManager, SessionStatus,
};
use murmur_shared::{Address, ChannelId, Cursor};

use crate::config::ClientConfig;
use crate::encryptor::LedgerEncryptor;
use crate::error::{ClientError, Result};
use crate::ledger::MemoryLedger;

/// The external services a client talks to.
pub struct Ports {
    pub signer: Arc<dyn Signer>,
    pub channels: Arc<dyn RemoteChannelStore>,
    pub messages: Arc<dyn RemoteMessageStore>,
    pub activity: Arc<dyn RemoteActivityFeed>,
    pub keys: Arc<dyn EncryptionKeyProvider>,
    pub encryptor: Arc<dyn Encryptor>,
    pub clock: Arc<dyn Clock>,
}

impl Ports {
    /// Every remote port served by one in-memory ledger.
    pub fn local(ledger: Arc<MemoryLedger>, signer: Arc<dyn Signer>, clock: Arc<dyn Clock>) -> Self {
        Self {
            signer,
            channels: ledger.clone(),
            messages: ledger.clone(),
            activity: ledger.clone(),
            keys: ledger.clone(),
            encryptor: Arc::new(LedgerEncryptor::new(ledger)),
            clock,
        }
    }
}

pub struct MessagingClient {
    config: ClientConfig,
    signer: Arc<dyn Signer>,
    activity: Arc<dyn RemoteActivityFeed>,
    sessions: Arc<SessionKeyManager>,
    registry: ChannelRegistry,
    flow: ChannelCreationFlow,
    messages: Arc<MessageStore>,
    connected: Mutex<Option<Address>>,
}

impl MessagingClient {
    pub fn new(config: ClientConfig, ports: Ports) -> Self {
        let sessions = Arc::new(SessionKeyManager::new(
            ports.signer.clone(),
            ports.clock,
            config.session_config(),
        ));
        let messages = Arc::new(MessageStore::new(
            ports.signer.clone(),
            ports.messages,
            ports.keys.clone(),
            ports.encryptor,
            sessions.clone(),
        ));
        Self {
            registry: ChannelRegistry::new(ports.channels.clone()),
            flow: ChannelCreationFlow::new(ports.signer.clone(), ports.channels, ports.keys),
            signer: ports.signer,
            activity: ports.activity,
            sessions,
            messages,
            config,
            connected: Mutex::new(None),
        }
    }

    /// Bind the client to the wallet's current account.
    ///
    /// Connecting as a different address than before resets the session and
    /// every cache.
    pub async fn connect(&self) -> Address {
        let address = self.signer.address();
        let previous = self
            .connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(address.clone());

        if previous.as_ref() != Some(&address) {
            if let Some(previous) = previous {
                self.sessions.reset();
                self.registry.clear().await;
                self.messages.clear().await;
                info!(
                    from = %previous.short(),
                    to = %address.short(),
                    "Account switched, caches cleared"
                );
            }
            info!(address = %address.short(), "Wallet connected");
        }
        address
    }

    pub fn address(&self) -> Result<Address> {
        self.connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ClientError::NotConnected)
    }

    /// Ask the wallet to sign a session challenge.
    pub async fn sign_in(&self) -> Result<SessionKey> {
        let address = self.address()?;
        Ok(self.sessions.initialize(&address).await?)
    }

    pub fn session_status(&self) -> SessionStatus {
        self.sessions.status()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<SessionStatus> {
        self.sessions.subscribe()
    }

    /// Refresh the channel list, newest activity first.
    pub async fn channels(&self) -> Result<Vec<Channel>> {
        let address = self.address()?;
        Ok(self.registry.fetch_channels(address.as_str()).await?)
    }

    pub async fn channel(&self, channel_id: &ChannelId) -> Result<Channel> {
        Ok(self.registry.get_channel_by_id(channel_id).await?)
    }

    /// Create a channel with `members` and attach its encryption key.
    ///
    /// On [`ClientError::pending_channel`] the channel exists without a key;
    /// pass it to [`resume_key_attachment`](Self::resume_key_attachment).
    pub async fn create_channel<S: AsRef<str>>(&self, members: &[S]) -> Result<CreatedChannel> {
        let address = self.address()?;
        self.sessions.ensure_valid(&address).await?;
        let created = self.flow.create_channel(members).await?;
        self.track_created(&created).await?;
        Ok(created)
    }

    pub async fn resume_key_attachment(&self, pending: ChannelOnChain) -> Result<CreatedChannel> {
        let created = self.flow.resume_key_attachment(pending).await?;
        self.track_created(&created).await?;
        Ok(created)
    }

    /// Encrypt and send `text` to a channel the connected address belongs to.
    pub async fn send(&self, channel_id: &ChannelId, text: &str) -> Result<Message> {
        let address = self.address()?;
        let capability = self
            .registry
            .membership_capability(channel_id, &address)
            .await?;
        let key = self.messages.key_for(channel_id, &address).await?;
        Ok(self
            .messages
            .send(channel_id, &capability.id, text, &key)
            .await?)
    }

    /// One page of history, newest first. Pass the previous page's cursor
    /// to walk further back.
    pub async fn history(&self, channel_id: &ChannelId, cursor: Option<Cursor>) -> Result<MessagePage> {
        let address = self.address()?;
        let options = FetchOptions {
            cursor,
            limit: self.config.message_page_size,
            direction: Direction::Backward,
        };
        Ok(self.messages.fetch(channel_id, &address, options).await?)
    }

    /// Decrypted preview of a channel's newest message.
    pub async fn preview(&self, channel: &Channel) -> Result<Option<Message>> {
        let address = self.address()?;
        Ok(self.messages.decrypt_preview(channel, &address).await?)
    }

    pub async fn cached_messages(&self, channel_id: &ChannelId) -> Vec<Message> {
        self.messages.cached_messages(channel_id).await
    }

    /// A poller over new messages of one channel.
    pub fn message_poller(&self, channel_id: ChannelId) -> ActivityPoller<MessageFeed> {
        ActivityPoller::new(
            Arc::new(MessageFeed::new(self.messages.clone(), channel_id)),
            self.config.poller_config(),
        )
    }

    /// A poller over transactions touching the connected address.
    pub fn activity_poller(&self) -> ActivityPoller<TransactionFeed> {
        ActivityPoller::new(
            Arc::new(TransactionFeed::new(self.activity.clone())),
            self.config.poller_config(),
        )
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn track_created(&self, created: &CreatedChannel) -> Result<()> {
        self.registry
            .remember_capability(created.creator_capability.clone())
            .await;
        self.registry.refresh_channel(&created.channel_id).await?;
        Ok(())
    }
}
