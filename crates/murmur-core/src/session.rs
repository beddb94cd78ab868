//! Session keys: a time-boxed credential that authorizes decryption.
//!
//! A session key is only ever created by an explicit, user-approved signature
//! over a challenge. It is scoped to one address and expires after its TTL.
//! The manager exposes its lifecycle as a [`SessionStatus`] stream:
//!
//! ```text
//! Uninitialized -> Initializing -> Ready -> Expired -> Initializing (re-sign)
//!                       |                      |
//!                       |                      +-> Uninitialized (reset)
//!                       +-> Error -> Initializing (retry)
//! ```
//!
//! `Expired` stays published until the user signs again or the session is
//! reset, so a subscriber never misses it. No expired key is ever handed out.
//!
//! Concurrent `initialize` calls for the same address share a single
//! signature prompt.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use murmur_shared::constants::{DEFAULT_SESSION_TTL_MINUTES, MS_PER_MINUTE};
use murmur_shared::Address;

use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::ports::Signer;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Lifetime of a session key in minutes.
    pub ttl_minutes: u32,
    /// Package the session authorizes key access for.
    pub package_id: Address,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: DEFAULT_SESSION_TTL_MINUTES,
            package_id: Address::zero(),
        }
    }
}

/// A signed, time-boxed credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    pub address: Address,
    pub package_id: Address,
    pub signature: Vec<u8>,
    pub creation_time_ms: u64,
    pub ttl_minutes: u32,
}

impl SessionKey {
    pub fn expires_at_ms(&self) -> u64 {
        self.creation_time_ms
            .saturating_add(u64::from(self.ttl_minutes) * MS_PER_MINUTE)
    }

    /// Valid iff `now < creation + ttl`.
    pub fn is_valid(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms()
    }

    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.expires_at_ms().saturating_sub(now_ms)
    }

    /// The personal message this key's signature covers.
    pub fn challenge(&self) -> String {
        challenge_message(
            &self.address,
            &self.package_id,
            self.creation_time_ms,
            self.ttl_minutes,
        )
    }
}

pub fn challenge_message(
    address: &Address,
    package_id: &Address,
    creation_time_ms: u64,
    ttl_minutes: u32,
) -> String {
    let created = chrono::DateTime::from_timestamp_millis(creation_time_ms as i64)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| creation_time_ms.to_string());
    format!(
        "Murmur session for {address}: access keys of package {package_id} \
         for {ttl_minutes} minutes from {created}"
    )
}

/// Observable lifecycle of the session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    Initializing,
    Ready,
    Expired,
    Error(String),
}

type InitFuture = Shared<BoxFuture<'static, Result<SessionKey>>>;

enum Slot {
    Empty,
    Initializing {
        address: Address,
        generation: u64,
        future: InitFuture,
    },
    Ready(SessionKey),
    Failed(String),
}

pub struct SessionKeyManager {
    signer: Arc<dyn Signer>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    slot: Mutex<Slot>,
    generation: AtomicU64,
    status_tx: watch::Sender<SessionStatus>,
}

impl SessionKeyManager {
    pub fn new(signer: Arc<dyn Signer>, clock: Arc<dyn Clock>, config: SessionConfig) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Uninitialized);
        Self {
            signer,
            clock,
            config,
            slot: Mutex::new(Slot::Empty),
            generation: AtomicU64::new(0),
            status_tx,
        }
    }

    /// Prompt the wallet to sign a fresh session challenge.
    ///
    /// While a prompt for `address` is outstanding, further calls wait on
    /// that same prompt instead of opening another one.
    pub async fn initialize(&self, address: &Address) -> Result<SessionKey> {
        let connected = self.signer.address();
        if &connected != address {
            return Err(CoreError::SignerMismatch {
                connected,
                requested: address.clone(),
            });
        }

        let (generation, future) = {
            let mut slot = self.lock_slot();
            match &*slot {
                Slot::Initializing {
                    address: pending,
                    generation,
                    future,
                } if pending == address => {
                    debug!(address = %address.short(), "Joining in-flight session initialization");
                    (*generation, future.clone())
                }
                _ => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let future = self.sign_challenge(address.clone());
                    *slot = Slot::Initializing {
                        address: address.clone(),
                        generation,
                        future: future.clone(),
                    };
                    self.publish(SessionStatus::Initializing);
                    info!(address = %address.short(), "Session initialization started");
                    (generation, future)
                }
            }
        };

        let result = future.await;

        let mut slot = self.lock_slot();
        let still_current = matches!(
            &*slot,
            Slot::Initializing { generation: g, .. } if *g == generation
        );
        if still_current {
            match &result {
                Ok(key) => {
                    *slot = Slot::Ready(key.clone());
                    self.publish(SessionStatus::Ready);
                    info!(
                        address = %address.short(),
                        ttl_minutes = key.ttl_minutes,
                        "Session key ready"
                    );
                }
                Err(e) => {
                    *slot = Slot::Failed(e.to_string());
                    self.publish(SessionStatus::Error(e.to_string()));
                    warn!(address = %address.short(), error = %e, "Session initialization failed");
                }
            }
        }
        result
    }

    /// Return the cached key if it is still valid for `address`.
    ///
    /// Never prompts. An expired key is reported as
    /// [`CoreError::SessionExpired`] and publishes [`SessionStatus::Expired`];
    /// the caller must run [`initialize`](Self::initialize) again.
    pub async fn ensure_valid(&self, address: &Address) -> Result<SessionKey> {
        let pending = {
            let mut slot = self.lock_slot();
            match &*slot {
                Slot::Ready(key) if &key.address == address => {
                    if key.is_valid(self.clock.now_ms()) {
                        return Ok(key.clone());
                    }
                    self.publish_expired(address);
                    return Err(CoreError::SessionExpired);
                }
                Slot::Ready(_) => {
                    // Key belongs to a previously connected address.
                    *slot = Slot::Empty;
                    self.publish(SessionStatus::Uninitialized);
                    return Err(CoreError::SessionNotInitialized);
                }
                Slot::Initializing {
                    address: pending,
                    future,
                    ..
                } if pending == address => future.clone(),
                _ => return Err(CoreError::SessionNotInitialized),
            }
        };

        let key = pending.await?;
        if key.is_valid(self.clock.now_ms()) {
            Ok(key)
        } else {
            Err(CoreError::SessionExpired)
        }
    }

    /// Current lifecycle state. `Ready` turns into `Expired` once the TTL
    /// has elapsed, without any call being made.
    pub fn status(&self) -> SessionStatus {
        match &*self.lock_slot() {
            Slot::Empty => SessionStatus::Uninitialized,
            Slot::Initializing { .. } => SessionStatus::Initializing,
            Slot::Ready(key) if key.is_valid(self.clock.now_ms()) => SessionStatus::Ready,
            Slot::Ready(_) => SessionStatus::Expired,
            Slot::Failed(reason) => SessionStatus::Error(reason.clone()),
        }
    }

    /// The cached key, if any and still valid.
    pub fn current(&self) -> Option<SessionKey> {
        match &*self.lock_slot() {
            Slot::Ready(key) if key.is_valid(self.clock.now_ms()) => Some(key.clone()),
            _ => None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Forget the session, e.g. on disconnect or address switch.
    ///
    /// A signature still in flight is discarded when it lands.
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.lock_slot() = Slot::Empty;
        self.publish(SessionStatus::Uninitialized);
        debug!("Session reset");
    }

    fn sign_challenge(&self, address: Address) -> InitFuture {
        let signer = Arc::clone(&self.signer);
        let package_id = self.config.package_id.clone();
        let ttl_minutes = self.config.ttl_minutes;
        let creation_time_ms = self.clock.now_ms();

        async move {
            let message = challenge_message(&address, &package_id, creation_time_ms, ttl_minutes);
            let signature = signer
                .sign_personal_message(message.as_bytes())
                .await
                .map_err(CoreError::from_signer)?;
            Ok(SessionKey {
                address,
                package_id,
                signature,
                creation_time_ms,
                ttl_minutes,
            })
        }
        .boxed()
        .shared()
    }

    fn publish(&self, status: SessionStatus) {
        self.status_tx.send_replace(status);
    }

    fn publish_expired(&self, address: &Address) {
        let changed = self.status_tx.send_if_modified(|status| {
            if *status == SessionStatus::Expired {
                return false;
            }
            *status = SessionStatus::Expired;
            true
        });
        if changed {
            info!(address = %address.short(), "Session key expired");
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
