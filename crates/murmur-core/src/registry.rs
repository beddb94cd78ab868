//! Cached view of the connected address's channels and capabilities.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use murmur_shared::{Address, ChannelId, Cursor};

use crate::error::{CoreError, Result};
use crate::model::{Channel, MembershipCapability};
use crate::ports::RemoteChannelStore;

#[derive(Default)]
struct Cache {
    owner: Option<Address>,
    channels: HashMap<ChannelId, Channel>,
    capabilities: HashMap<ChannelId, MembershipCapability>,
}

impl Cache {
    /// Forget everything cached for a previous owner.
    fn claim(&mut self, owner: &Address) {
        if self.owner.as_ref() != Some(owner) {
            self.channels.clear();
            self.capabilities.clear();
            self.owner = Some(owner.clone());
        }
    }
}

/// Channel list and membership capabilities of one address.
///
/// Writes follow last-fetch-wins: whatever the remote returned most recently
/// replaces the cached entry.
pub struct ChannelRegistry {
    remote: Arc<dyn RemoteChannelStore>,
    cache: RwLock<Cache>,
}

impl ChannelRegistry {
    pub fn new(remote: Arc<dyn RemoteChannelStore>) -> Self {
        Self {
            remote,
            cache: RwLock::new(Cache::default()),
        }
    }

    /// Fetch every channel `address` belongs to and replace the cached list.
    ///
    /// Returned newest activity first.
    pub async fn fetch_channels(&self, address: &str) -> Result<Vec<Channel>> {
        let address = Address::parse(address)?;
        let channels = self
            .remote
            .list_channels(&address)
            .await
            .map_err(CoreError::fetch)?;

        let mut cache = self.cache.write().await;
        cache.claim(&address);
        cache.channels = channels.into_iter().map(|c| (c.id.clone(), c)).collect();
        info!(
            address = %address.short(),
            count = cache.channels.len(),
            "Channel list refreshed"
        );
        Ok(sorted(cache.channels.values()))
    }

    /// Serve a channel from cache, falling back to a single remote lookup.
    pub async fn get_channel_by_id(&self, channel_id: &ChannelId) -> Result<Channel> {
        if let Some(channel) = self.cache.read().await.channels.get(channel_id) {
            return Ok(channel.clone());
        }

        let channel = self
            .remote
            .get_channel(channel_id)
            .await
            .map_err(CoreError::fetch)?;
        self.upsert(channel.clone()).await;
        Ok(channel)
    }

    /// Re-read a channel from the remote even if it is cached.
    pub async fn refresh_channel(&self, channel_id: &ChannelId) -> Result<Channel> {
        let channel = self
            .remote
            .get_channel(channel_id)
            .await
            .map_err(CoreError::fetch)?;
        self.upsert(channel.clone()).await;
        Ok(channel)
    }

    pub async fn upsert(&self, channel: Channel) {
        self.cache
            .write()
            .await
            .channels
            .insert(channel.id.clone(), channel);
    }

    /// Cached channels, newest activity first.
    pub async fn channels(&self) -> Vec<Channel> {
        sorted(self.cache.read().await.channels.values())
    }

    /// The capability `address` holds for `channel_id`.
    ///
    /// Scans the address's membership pages until the channel shows up,
    /// caching every capability seen on the way.
    pub async fn membership_capability(
        &self,
        channel_id: &ChannelId,
        address: &Address,
    ) -> Result<MembershipCapability> {
        {
            let cache = self.cache.read().await;
            if cache.owner.as_ref() == Some(address) {
                if let Some(cap) = cache.capabilities.get(channel_id) {
                    return Ok(cap.clone());
                }
            }
        }

        let mut cursor: Option<Cursor> = None;
        let mut found = None;
        loop {
            let page = self
                .remote
                .list_memberships(address, cursor.take())
                .await
                .map_err(CoreError::fetch)?;

            {
                let mut cache = self.cache.write().await;
                if cache.owner.is_none() {
                    cache.claim(address);
                }
                // Another address's capabilities are never cached.
                let owned = cache.owner.as_ref() == Some(address);
                for cap in page.items {
                    if &cap.channel_id == channel_id {
                        found = Some(cap.clone());
                    }
                    if owned {
                        cache.capabilities.insert(cap.channel_id.clone(), cap);
                    }
                }
            }

            if found.is_some() || !page.has_next_page {
                break;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        found.ok_or_else(|| {
            debug!(channel_id = %channel_id, address = %address.short(), "No membership capability");
            CoreError::NotFound(format!("membership of {} in {channel_id}", address.short()))
        })
    }

    /// Record a capability learned elsewhere, e.g. from channel creation.
    pub async fn remember_capability(&self, capability: MembershipCapability) {
        let mut cache = self.cache.write().await;
        cache.claim(&capability.owner);
        cache
            .capabilities
            .insert(capability.channel_id.clone(), capability);
    }

    pub async fn clear(&self) {
        *self.cache.write().await = Cache::default();
    }
}

fn sorted<'a>(channels: impl Iterator<Item = &'a Channel>) -> Vec<Channel> {
    let mut list: Vec<Channel> = channels.cloned().collect();
    list.sort_by(|a, b| {
        b.last_activity_ms()
            .cmp(&a.last_activity_ms())
            .then_with(|| a.id.cmp(&b.id))
    });
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::Page;
    use crate::testing::*;
    use std::sync::atomic::Ordering;

    fn channel(id: &str, members: Vec<Address>, created: u64) -> Channel {
        Channel {
            id: ChannelId::new(id),
            members,
            created_at_ms: created,
            key_version: 1,
            last_message: None,
            messages_count: 0,
        }
    }

    fn setup() -> (Arc<MockChannelStore>, ChannelRegistry) {
        let remote = Arc::new(MockChannelStore::default());
        let registry = ChannelRegistry::new(remote.clone());
        (remote, registry)
    }

    #[tokio::test]
    async fn test_fetch_channels_sorted_by_activity() {
        let (remote, registry) = setup();
        remote.set_channels(vec![
            channel("0xold", vec![addr(1), addr(2)], 10),
            channel("0xnew", vec![addr(1), addr(3)], 30),
            channel("0xother", vec![addr(4), addr(5)], 50),
        ]);

        let list = registry.fetch_channels(addr(1).as_str()).await.unwrap();
        let ids: Vec<_> = list.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["0xnew", "0xold"]);
        assert_eq!(registry.channels().await, list);
    }

    #[tokio::test]
    async fn test_fetch_channels_rejects_bad_address() {
        let (remote, registry) = setup();
        let err = registry.fetch_channels("0x1234").await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidAddress(_)));
        assert_eq!(remote.list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetch_channels_replaces_list() {
        let (remote, registry) = setup();
        remote.set_channels(vec![channel("0xa", vec![addr(1)], 1)]);
        registry.fetch_channels(addr(1).as_str()).await.unwrap();

        remote.set_channels(vec![channel("0xb", vec![addr(1)], 2)]);
        let list = registry.fetch_channels(addr(1).as_str()).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id.as_str(), "0xb");
    }

    #[tokio::test]
    async fn test_get_channel_by_id_caches_remote_hit() {
        let (remote, registry) = setup();
        remote.set_channels(vec![channel("0xa", vec![addr(1)], 1)]);

        registry.get_channel_by_id(&ChannelId::new("0xa")).await.unwrap();
        registry.get_channel_by_id(&ChannelId::new("0xa")).await.unwrap();
        assert_eq!(remote.get_calls.load(Ordering::SeqCst), 1);

        let err = registry
            .get_channel_by_id(&ChannelId::new("0xmissing"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remote_failure_is_retryable() {
        let (remote, registry) = setup();
        remote.fail_next();
        let err = registry.fetch_channels(addr(1).as_str()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_membership_capability_scans_pages() {
        let (remote, registry) = setup();
        let a = ChannelId::new("0xa");
        let b = ChannelId::new("0xb");
        remote.set_membership_page(
            None,
            Page {
                items: vec![capability(&addr(1), &a)],
                next_cursor: Some(Cursor::from("p2")),
                has_next_page: true,
            },
        );
        remote.set_membership_page(
            Some(Cursor::from("p2")),
            Page::last(vec![capability(&addr(1), &b)]),
        );

        let cap = registry.membership_capability(&b, &addr(1)).await.unwrap();
        assert_eq!(cap.channel_id, b);
        assert_eq!(remote.membership_calls.load(Ordering::SeqCst), 2);

        // Both pages are now cached.
        registry.membership_capability(&a, &addr(1)).await.unwrap();
        assert_eq!(remote.membership_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_membership_capability_not_found() {
        let (_remote, registry) = setup();
        let err = registry
            .membership_capability(&ChannelId::new("0xnone"), &addr(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_owner_change_resets_cache() {
        let (remote, registry) = setup();
        remote.set_channels(vec![
            channel("0xa", vec![addr(1)], 1),
            channel("0xb", vec![addr(2)], 2),
        ]);
        registry.fetch_channels(addr(1).as_str()).await.unwrap();
        registry
            .remember_capability(capability(&addr(1), &ChannelId::new("0xa")))
            .await;

        let list = registry.fetch_channels(addr(2).as_str()).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id.as_str(), "0xb");

        // The old owner's capability went with the reset.
        let err = registry
            .membership_capability(&ChannelId::new("0xa"), &addr(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
