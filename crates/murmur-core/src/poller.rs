//! Interval-driven activity polling with a de-duplicating merge.
//!
//! The poller owns one list of items for one tracked address. A refresh
//! replaces the list, a scheduled poll prepends whatever is new, and
//! `load_more` appends older items through the cursor. Every merge is keyed
//! by [`ActivitySource::identity_key`], so an item is never listed twice.
//!
//! Results are applied only if nothing invalidated them while the fetch was
//! in flight: pausing, stopping or restarting bumps an epoch, switching
//! addresses bumps a generation, and a stale result is dropped on arrival.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use murmur_shared::constants::{
    DEFAULT_INCREMENTAL_PAGE_SIZE, DEFAULT_POLL_INTERVAL_MS, DEFAULT_REFRESH_PAGE_SIZE,
    MAX_CATCH_UP_PAGES,
};
use murmur_shared::{Address, Cursor};

use crate::error::Result;
use crate::ports::Page;

/// Something the poller can fetch pages of, newest first.
#[async_trait]
pub trait ActivitySource: Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;

    async fn fetch(
        &self,
        address: &Address,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Result<Page<Self::Item>>;

    /// Stable identity used for de-duplication.
    fn identity_key(&self, item: &Self::Item) -> String;

    fn timestamp_ms(&self, item: &Self::Item) -> u64;
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Page size of the initial refresh and of `load_more`.
    pub refresh_page_size: usize,
    /// Page size of each scheduled poll.
    pub incremental_page_size: usize,
    /// Pages one poll may walk back before it gives up on reaching known items.
    pub max_catch_up_pages: usize,
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            refresh_page_size: DEFAULT_REFRESH_PAGE_SIZE,
            incremental_page_size: DEFAULT_INCREMENTAL_PAGE_SIZE,
            max_catch_up_pages: MAX_CATCH_UP_PAGES,
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PollerStatus {
    Stopped,
    Polling,
    Paused,
}

/// Render-ready copy of the poller state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySnapshot<T> {
    pub address: Option<Address>,
    /// Most recent first.
    pub items: Vec<T>,
    pub new_count: usize,
    pub has_more: bool,
    pub status: PollerStatus,
    pub last_error: Option<String>,
}

struct State<T> {
    address: Option<Address>,
    items: Vec<T>,
    seen: HashSet<String>,
    next_cursor: Option<Cursor>,
    has_more: bool,
    new_count: usize,
    status: PollerStatus,
    interval: Duration,
    generation: u64,
    epoch: u64,
    in_flight: Option<(u64, u64)>,
    loading_more: bool,
    visible: bool,
    auto_paused: bool,
    last_error: Option<String>,
    timer: Option<JoinHandle<()>>,
}

impl<T> State<T> {
    fn new(interval: Duration) -> Self {
        Self {
            address: None,
            items: Vec::new(),
            seen: HashSet::new(),
            next_cursor: None,
            has_more: true,
            new_count: 0,
            status: PollerStatus::Stopped,
            interval,
            generation: 0,
            epoch: 0,
            in_flight: None,
            loading_more: false,
            visible: true,
            auto_paused: false,
            last_error: None,
            timer: None,
        }
    }

    fn ticket(&self) -> (u64, u64) {
        (self.generation, self.epoch)
    }

    /// Forget everything tied to the previous address.
    fn reset_for(&mut self, address: Address) {
        self.generation += 1;
        self.address = Some(address);
        self.items.clear();
        self.seen.clear();
        self.next_cursor = None;
        self.has_more = true;
        self.new_count = 0;
        self.in_flight = None;
        self.loading_more = false;
        self.last_error = None;
    }

    fn halt_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn replace(&mut self, batch: Vec<(String, T)>) -> usize {
        self.items.clear();
        self.seen.clear();
        self.append(batch)
    }

    fn append(&mut self, batch: Vec<(String, T)>) -> usize {
        let before = self.items.len();
        for (key, item) in batch {
            if self.seen.insert(key) {
                self.items.push(item);
            }
        }
        self.items.len() - before
    }

    fn prepend(&mut self, batch: Vec<(String, T)>) -> usize {
        let fresh: Vec<T> = batch
            .into_iter()
            .filter_map(|(key, item)| self.seen.insert(key).then_some(item))
            .collect();
        let added = fresh.len();
        if added > 0 {
            let older = std::mem::take(&mut self.items);
            self.items = fresh;
            self.items.extend(older);
        }
        added
    }
}

struct Inner<S: ActivitySource> {
    source: Arc<S>,
    config: PollerConfig,
    state: Mutex<State<S::Item>>,
}

impl<S: ActivitySource> Inner<S> {
    fn lock(&self) -> MutexGuard<'_, State<S::Item>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn keyed(&self, items: Vec<S::Item>) -> Vec<(String, S::Item)> {
        items
            .into_iter()
            .map(|item| (self.source.identity_key(&item), item))
            .collect()
    }

    async fn catch_up(
        &self,
        address: &Address,
        ticket: (u64, u64),
    ) -> Result<Vec<(String, S::Item)>> {
        let mut batch = Vec::new();
        let mut cursor = None;

        for pages in 1.. {
            let page = self
                .source
                .fetch(address, cursor, self.config.incremental_page_size)
                .await?;
            let keyed = self.keyed(page.items);

            let reached_known = {
                let state = self.lock();
                if state.ticket() != ticket {
                    return Ok(Vec::new());
                }
                keyed.iter().any(|(key, _)| state.seen.contains(key))
            };
            batch.extend(keyed);

            if reached_known || !page.has_next_page {
                break;
            }
            match page.next_cursor {
                Some(next) if pages < self.config.max_catch_up_pages => cursor = Some(next),
                Some(_) => {
                    warn!(
                        address = %address.short(),
                        pages,
                        "Catch-up page limit reached, older items left for load_more"
                    );
                    break;
                }
                None => break,
            }
        }

        Ok(batch)
    }

    /// Walk back from the newest page until a page reaches an item already
    /// listed, then prepend everything unseen as one batch.
    async fn poll_incremental(&self, scheduled: bool) -> Result<usize> {
        let (address, ticket) = {
            let mut state = self.lock();
            let Some(address) = state.address.clone() else {
                return Ok(0);
            };
            if scheduled && state.status != PollerStatus::Polling {
                return Ok(0);
            }
            if state.in_flight.is_some() {
                debug!(address = %address.short(), "Poll already in flight, skipping");
                return Ok(0);
            }
            let ticket = state.ticket();
            state.in_flight = Some(ticket);
            (address, ticket)
        };

        let result = self.catch_up(&address, ticket).await;

        let mut state = self.lock();
        if state.in_flight == Some(ticket) {
            state.in_flight = None;
        }
        if state.ticket() != ticket {
            warn!(address = %address.short(), "Discarding poll result after pause or address switch");
            return Ok(0);
        }

        match result {
            Ok(batch) => {
                let added = state.prepend(batch);
                state.new_count += added;
                state.last_error = None;
                debug!(address = %address.short(), added, new_count = state.new_count, "Poll merged");
                Ok(added)
            }
            Err(e) => {
                warn!(address = %address.short(), error = %e, "Poll failed");
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }
}

impl<S: ActivitySource> Drop for Inner<S> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.halt_timer();
    }
}

/// Polling controller for one [`ActivitySource`].
///
/// Cheap to clone; clones share state. The scheduled timer holds only a weak
/// reference, so dropping the last handle tears it down.
pub struct ActivityPoller<S: ActivitySource> {
    inner: Arc<Inner<S>>,
}

impl<S: ActivitySource> Clone for ActivityPoller<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ActivitySource> ActivityPoller<S> {
    pub fn new(source: Arc<S>, config: PollerConfig) -> Self {
        let state = State::new(config.interval);
        Self {
            inner: Arc::new(Inner {
                source,
                config,
                state: Mutex::new(state),
            }),
        }
    }

    /// Refresh the list for `address`, then poll every `interval`.
    ///
    /// The refresh replaces the cached list and clears the new-item badge.
    /// The timer is scheduled even if the refresh fails, so polling can
    /// recover on its own.
    pub async fn start(&self, address: &Address, interval: Duration) -> Result<usize> {
        let ticket = {
            let mut state = self.inner.lock();
            if state.address.as_ref() != Some(address) {
                state.reset_for(address.clone());
            }
            state.halt_timer();
            state.epoch += 1;
            state.in_flight = None;
            state.status = PollerStatus::Polling;
            state.interval = interval;
            state.auto_paused = false;
            state.new_count = 0;
            state.ticket()
        };
        info!(
            address = %address.short(),
            interval_ms = interval.as_millis() as u64,
            "Activity poller started"
        );

        let result = self
            .inner
            .source
            .fetch(address, None, self.inner.config.refresh_page_size)
            .await;

        let mut state = self.inner.lock();
        if state.ticket() != ticket {
            warn!(address = %address.short(), "Discarding superseded refresh");
            return Ok(0);
        }

        let outcome = match result {
            Ok(page) => {
                let count = state.replace(self.inner.keyed(page.items));
                state.next_cursor = page.next_cursor;
                state.has_more = page.has_next_page;
                state.new_count = 0;
                state.last_error = None;
                Ok(count)
            }
            Err(e) => {
                warn!(address = %address.short(), error = %e, "Refresh failed");
                state.last_error = Some(e.to_string());
                Err(e)
            }
        };

        if state.visible {
            self.schedule(&mut state);
        } else {
            state.status = PollerStatus::Paused;
            state.auto_paused = true;
        }
        outcome
    }

    /// Stop scheduling polls and drop any result still in flight.
    pub fn pause(&self) {
        let mut state = self.inner.lock();
        if state.status == PollerStatus::Polling {
            Self::halt(&mut state, PollerStatus::Paused);
            state.auto_paused = false;
            info!("Activity poller paused");
        }
    }

    /// Reschedule polling with the interval given to `start`.
    ///
    /// While hidden the poller stays paused and resumes once visible again.
    pub fn resume(&self) {
        let mut state = self.inner.lock();
        if state.status != PollerStatus::Paused {
            return;
        }
        if state.visible {
            state.auto_paused = false;
            state.status = PollerStatus::Polling;
            self.schedule(&mut state);
            info!("Activity poller resumed");
        } else {
            state.auto_paused = true;
        }
    }

    /// Pause while the consuming surface is hidden, resume when shown.
    ///
    /// An explicit [`pause`](Self::pause) is not undone by becoming visible.
    pub fn set_visibility(&self, visible: bool) {
        let mut state = self.inner.lock();
        state.visible = visible;
        match (visible, state.status) {
            (false, PollerStatus::Polling) => {
                Self::halt(&mut state, PollerStatus::Paused);
                state.auto_paused = true;
                info!("Activity poller paused while hidden");
            }
            (true, PollerStatus::Paused) if state.auto_paused => {
                state.auto_paused = false;
                state.status = PollerStatus::Polling;
                self.schedule(&mut state);
                info!("Activity poller resumed on visibility");
            }
            _ => {}
        }
    }

    /// Stop polling. Cached items stay available through `snapshot`.
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        if state.status != PollerStatus::Stopped {
            Self::halt(&mut state, PollerStatus::Stopped);
            state.auto_paused = false;
            info!("Activity poller stopped");
        }
    }

    /// Track a different address. State is cleared before this returns.
    pub fn switch_address(&self, address: &Address) {
        let mut state = self.inner.lock();
        if state.address.as_ref() != Some(address) {
            state.reset_for(address.clone());
            info!(address = %address.short(), "Activity poller switched address");
        }
    }

    /// Run one incremental poll now. Skipped while another poll is running.
    pub async fn poll_now(&self) -> Result<usize> {
        self.inner.poll_incremental(false).await
    }

    /// Fetch the page after the cursor and append unseen items.
    ///
    /// Does not touch the new-item badge. Returns how many items were added.
    pub async fn load_more(&self) -> Result<usize> {
        let (address, cursor, generation) = {
            let mut state = self.inner.lock();
            let Some(address) = state.address.clone() else {
                return Ok(0);
            };
            if !state.has_more || state.loading_more {
                return Ok(0);
            }
            state.loading_more = true;
            (address, state.next_cursor.clone(), state.generation)
        };

        let result = self
            .inner
            .source
            .fetch(&address, cursor, self.inner.config.refresh_page_size)
            .await;

        let mut state = self.inner.lock();
        if state.generation != generation {
            warn!(address = %address.short(), "Discarding page for previous address");
            return Ok(0);
        }
        state.loading_more = false;

        match result {
            Ok(page) => {
                let added = state.append(self.inner.keyed(page.items));
                state.next_cursor = page.next_cursor;
                state.has_more = page.has_next_page;
                debug!(address = %address.short(), added, has_more = state.has_more, "Loaded more");
                Ok(added)
            }
            Err(e) => {
                warn!(address = %address.short(), error = %e, "Load more failed");
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Clear the new-item badge.
    pub fn mark_seen(&self) {
        self.inner.lock().new_count = 0;
    }

    pub fn status(&self) -> PollerStatus {
        self.inner.lock().status
    }

    pub fn snapshot(&self) -> ActivitySnapshot<S::Item> {
        let state = self.inner.lock();
        let mut items = state.items.clone();
        items.sort_by_key(|item| Reverse(self.inner.source.timestamp_ms(item)));
        ActivitySnapshot {
            address: state.address.clone(),
            items,
            new_count: state.new_count,
            has_more: state.has_more,
            status: state.status,
            last_error: state.last_error.clone(),
        }
    }

    fn halt(state: &mut State<S::Item>, status: PollerStatus) {
        state.status = status;
        state.epoch += 1;
        state.in_flight = None;
        state.halt_timer();
    }

    /// Spawn the timer loop. The next tick is measured from the end of the
    /// previous poll, so polls never overlap.
    fn schedule(&self, state: &mut State<S::Item>) {
        state.halt_timer();
        let weak = Arc::downgrade(&self.inner);
        let interval = state.interval;
        let epoch = state.epoch;

        state.timer = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.lock().epoch != epoch {
                    break;
                }
                // Failures are logged and recorded in the snapshot.
                let _ = inner.poll_incremental(true).await;
            }
        }));
    }
}
