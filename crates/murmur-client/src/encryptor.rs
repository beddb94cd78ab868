use std::sync::Arc;

use async_trait::async_trait;

use murmur_core::ports::{Encryptor, EncryptorError};
use murmur_core::{EncryptionKeyRecord, SessionKey};
use murmur_shared::crypto::{self, SymmetricKey};

use crate::ledger::MemoryLedger;

/// XChaCha20-Poly1305 over channel keys held by a [`MemoryLedger`].
///
/// A key record is only unwrapped for a live session signed by the member
/// it was wrapped for.
pub struct LedgerEncryptor {
    ledger: Arc<MemoryLedger>,
}

impl LedgerEncryptor {
    pub fn new(ledger: Arc<MemoryLedger>) -> Self {
        Self { ledger }
    }

    fn channel_key(
        &self,
        key: &EncryptionKeyRecord,
        session: &SessionKey,
    ) -> Result<SymmetricKey, EncryptorError> {
        if key.member != session.address || !self.ledger.verify_session(session) {
            return Err(EncryptorError::Unauthorized);
        }
        crypto::unwrap_channel_key(
            self.ledger.master_key(),
            &key.channel_id,
            &key.member,
            &key.encrypted_key,
        )
        .map_err(|e| EncryptorError::Crypto(e.to_string()))
    }
}

#[async_trait]
impl Encryptor for LedgerEncryptor {
    async fn encrypt(
        &self,
        key: &EncryptionKeyRecord,
        session: &SessionKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, EncryptorError> {
        let channel_key = self.channel_key(key, session)?;
        crypto::encrypt(&channel_key, plaintext).map_err(|e| EncryptorError::Crypto(e.to_string()))
    }

    async fn decrypt(
        &self,
        key: &EncryptionKeyRecord,
        session: &SessionKey,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, EncryptorError> {
        let channel_key = self.channel_key(key, session)?;
        crypto::decrypt(&channel_key, ciphertext).map_err(|e| EncryptorError::Crypto(e.to_string()))
    }
}
