use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::constants::{KDF_CONTEXT_MEMBER_WRAP, NONCE_SIZE, SYMMETRIC_KEY_SIZE};
use crate::error::CryptoError;
use crate::types::{Address, ChannelId};

pub type SymmetricKey = [u8; SYMMETRIC_KEY_SIZE];

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn key_from_slice(bytes: &[u8]) -> Result<SymmetricKey, CryptoError> {
    bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength)
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

// BLAKE3 keyed KDF: one wrapping key per (channel, member) under a key-server secret
pub fn derive_member_wrap_key(
    master: &SymmetricKey,
    channel_id: &ChannelId,
    member: &Address,
) -> SymmetricKey {
    let context_key = blake3::derive_key(KDF_CONTEXT_MEMBER_WRAP, master);
    let mut hasher = blake3::Hasher::new_keyed(&context_key);
    hasher.update(channel_id.as_str().as_bytes());
    hasher.update(&[0x1f]);
    hasher.update(member.as_str().as_bytes());
    *hasher.finalize().as_bytes()
}

/// Encrypt a channel key so that only `member` can recover it.
pub fn wrap_channel_key(
    master: &SymmetricKey,
    channel_id: &ChannelId,
    member: &Address,
    channel_key: &SymmetricKey,
) -> Result<Vec<u8>, CryptoError> {
    encrypt(&derive_member_wrap_key(master, channel_id, member), channel_key)
}

pub fn unwrap_channel_key(
    master: &SymmetricKey,
    channel_id: &ChannelId,
    member: &Address,
    wrapped: &[u8],
) -> Result<SymmetricKey, CryptoError> {
    let bytes = decrypt(&derive_member_wrap_key(master, channel_id, member), wrapped)?;
    key_from_slice(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(byte: u8) -> Address {
        Address::from_bytes([byte; 32])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = generate_symmetric_key();
        let plaintext = b"long ETH, short patience";

        let encrypted = encrypt(&key, plaintext).unwrap();
        let decrypted = decrypt(&key, &encrypted).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = generate_symmetric_key();
        let key2 = generate_symmetric_key();

        let encrypted = encrypt(&key1, b"Secret message").unwrap();
        assert!(decrypt(&key2, &encrypted).is_err());
    }

    #[test]
    fn test_empty_data_fails() {
        let key = generate_symmetric_key();
        assert!(decrypt(&key, &[]).is_err());
    }

    #[test]
    fn test_wrapped_key_only_opens_for_its_member() {
        let master = generate_symmetric_key();
        let channel = ChannelId::new("0xchan");
        let channel_key = generate_symmetric_key();

        let wrapped = wrap_channel_key(&master, &channel, &member(1), &channel_key).unwrap();

        let opened = unwrap_channel_key(&master, &channel, &member(1), &wrapped).unwrap();
        assert_eq!(opened, channel_key);
        assert!(unwrap_channel_key(&master, &channel, &member(2), &wrapped).is_err());
        assert!(unwrap_channel_key(&master, &ChannelId::new("0xother"), &member(1), &wrapped).is_err());
    }

    #[test]
    fn test_key_from_slice_length() {
        assert!(key_from_slice(&[0u8; 31]).is_err());
        assert!(key_from_slice(&[0u8; 32]).is_ok());
    }
}
