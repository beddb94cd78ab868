//! A local Ed25519 wallet that submits straight to a [`MemoryLedger`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, info};

use murmur_core::ports::{Signer, SignerError, UnsignedTx};
use murmur_shared::identity::Identity;
use murmur_shared::{Address, TxDigest};

use crate::ledger::MemoryLedger;

pub struct LocalWallet {
    identity: RwLock<Identity>,
    ledger: Arc<MemoryLedger>,
    decline_next: AtomicBool,
}

impl LocalWallet {
    pub fn new(identity: Identity, ledger: Arc<MemoryLedger>) -> Self {
        ledger.register_wallet(identity.address(), identity.public_key_bytes());
        Self {
            identity: RwLock::new(identity),
            ledger,
            decline_next: AtomicBool::new(false),
        }
    }

    /// Switch the active account, as a browser wallet would.
    pub fn switch_account(&self, identity: Identity) {
        self.ledger
            .register_wallet(identity.address(), identity.public_key_bytes());
        info!(address = %identity.address().short(), "Wallet account switched");
        *self.identity.write().unwrap_or_else(PoisonError::into_inner) = identity;
    }

    /// Decline the next signature request, as a user closing the prompt.
    pub fn decline_next(&self) {
        self.decline_next.store(true, Ordering::SeqCst);
    }

    fn identity(&self) -> Identity {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check_declined(&self) -> Result<(), SignerError> {
        if self.decline_next.swap(false, Ordering::SeqCst) {
            return Err(SignerError::UserRejected);
        }
        Ok(())
    }
}

#[async_trait]
impl Signer for LocalWallet {
    fn address(&self) -> Address {
        self.identity().address()
    }

    async fn sign_personal_message(&self, message: &[u8]) -> Result<Vec<u8>, SignerError> {
        self.check_declined()?;
        Ok(self.identity().sign(message).to_bytes().to_vec())
    }

    async fn sign_and_submit(&self, tx: UnsignedTx) -> Result<TxDigest, SignerError> {
        self.check_declined()?;
        let identity = self.identity();
        if tx.sender != identity.address() {
            return Err(SignerError::Rejected(format!(
                "transaction sender {} is not the connected account",
                tx.sender.short()
            )));
        }
        debug!(label = tx.label(), nonce = %tx.nonce, "Submitting transaction");
        self.ledger.execute(tx)
    }
}
