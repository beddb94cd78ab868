//! Concrete [`ActivitySource`]s for the poller.

use std::sync::Arc;

use async_trait::async_trait;

use murmur_shared::{Address, ChannelId, Cursor};

use crate::error::{CoreError, Result};
use crate::messages::{FetchOptions, MessageStore};
use crate::model::{ActivityRecord, Direction, Message};
use crate::poller::ActivitySource;
use crate::ports::{Page, RemoteActivityFeed};

/// New messages of one channel, decrypted, keyed by message id.
pub struct MessageFeed {
    store: Arc<MessageStore>,
    channel_id: ChannelId,
}

impl MessageFeed {
    pub fn new(store: Arc<MessageStore>, channel_id: ChannelId) -> Self {
        Self { store, channel_id }
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }
}

#[async_trait]
impl ActivitySource for MessageFeed {
    type Item = Message;

    async fn fetch(
        &self,
        address: &Address,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Result<Page<Message>> {
        let options = FetchOptions {
            cursor,
            limit,
            direction: Direction::Backward,
        };
        let page = self.store.fetch(&self.channel_id, address, options).await?;
        Ok(Page {
            items: page.messages,
            next_cursor: page.next_cursor,
            has_next_page: page.has_more,
        })
    }

    fn identity_key(&self, item: &Message) -> String {
        item.id.to_string()
    }

    fn timestamp_ms(&self, item: &Message) -> u64 {
        item.created_at_ms
    }
}

/// Transactions touching the tracked address, keyed by digest.
pub struct TransactionFeed {
    remote: Arc<dyn RemoteActivityFeed>,
}

impl TransactionFeed {
    pub fn new(remote: Arc<dyn RemoteActivityFeed>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl ActivitySource for TransactionFeed {
    type Item = ActivityRecord;

    async fn fetch(
        &self,
        address: &Address,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Result<Page<ActivityRecord>> {
        self.remote
            .list_activity(address, cursor, limit)
            .await
            .map_err(CoreError::fetch)
    }

    fn identity_key(&self, item: &ActivityRecord) -> String {
        item.digest.to_string()
    }

    fn timestamp_ms(&self, item: &ActivityRecord) -> u64 {
        item.timestamp_ms
    }
}
