//! Channel creation: build, execute, then attach the encryption key.
//!
//! The three steps run strictly in order. Each step's output is the next
//! step's input type, so the key cannot be generated before the channel
//! exists and the creator's capability is known:
//!
//! ```text
//! build() -> CreateChannelTx -> execute() -> ChannelOnChain
//!         -> attach_encryption_key() -> CreatedChannel
//! ```
//!
//! A failure after the channel exists is reported as
//! [`CoreError::ChannelCreatedWithoutKey`] carrying the [`ChannelOnChain`],
//! which [`ChannelCreationFlow::resume_key_attachment`] accepts.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use murmur_shared::{Address, ChannelId, TxDigest};

use crate::error::{CoreError, Result};
use crate::model::MembershipCapability;
use crate::ports::{EncryptionKeyProvider, RemoteChannelStore, Signer, TxKind, UnsignedTx};

/// A validated, single-use create-channel transaction.
#[derive(Debug)]
pub struct CreateChannelTx {
    creator: Address,
    members: Vec<Address>,
    tx: UnsignedTx,
}

impl CreateChannelTx {
    pub fn creator(&self) -> &Address {
        &self.creator
    }

    /// Members other than the creator, in the order given.
    pub fn members(&self) -> &[Address] {
        &self.members
    }
}

/// A channel that exists on-chain but may not have a key yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelOnChain {
    pub channel_id: ChannelId,
    pub creation_digest: TxDigest,
    pub creator_capability: MembershipCapability,
}

/// A fully created channel with its encryption key attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreatedChannel {
    pub channel_id: ChannelId,
    pub encrypted_key_bytes: Vec<u8>,
    pub creator_capability: MembershipCapability,
    pub creation_digest: TxDigest,
    pub key_digest: TxDigest,
}

pub struct ChannelCreationFlow {
    signer: Arc<dyn Signer>,
    channels: Arc<dyn RemoteChannelStore>,
    keys: Arc<dyn EncryptionKeyProvider>,
}

impl ChannelCreationFlow {
    pub fn new(
        signer: Arc<dyn Signer>,
        channels: Arc<dyn RemoteChannelStore>,
        keys: Arc<dyn EncryptionKeyProvider>,
    ) -> Self {
        Self {
            signer,
            channels,
            keys,
        }
    }

    /// Create a channel between the connected address and `members`.
    pub async fn create_channel<S: AsRef<str>>(&self, members: &[S]) -> Result<CreatedChannel> {
        let tx = self.build(&self.signer.address(), members)?;
        let on_chain = self.execute(tx).await?;
        self.attach_encryption_key(on_chain).await
    }

    /// Step 1: validate members and build the transaction. No I/O.
    pub fn build<S: AsRef<str>>(&self, creator: &Address, members: &[S]) -> Result<CreateChannelTx> {
        let members = validate_members(creator, members)?;
        let tx = UnsignedTx::new(
            creator.clone(),
            TxKind::CreateChannel {
                creator: creator.clone(),
                members: members.clone(),
            },
        );
        debug!(creator = %creator.short(), members = members.len(), "Built create-channel transaction");
        Ok(CreateChannelTx {
            creator: creator.clone(),
            members,
            tx,
        })
    }

    /// Step 2: submit the creation and find the creator's capability among
    /// the issued ones. Failures here are terminal for this attempt.
    pub async fn execute(&self, tx: CreateChannelTx) -> Result<ChannelOnChain> {
        let CreateChannelTx {
            creator,
            members,
            tx,
        } = tx;

        let digest = self
            .signer
            .sign_and_submit(tx)
            .await
            .map_err(CoreError::from_signer)?;

        let issued = self
            .channels
            .issued_capabilities(&digest)
            .await
            .map_err(|e| CoreError::TransactionFailed(format!("effects of {digest}: {e}")))?;

        if issued.len() != members.len() + 1 {
            warn!(
                digest = %digest,
                expected = members.len() + 1,
                issued = issued.len(),
                "Unexpected number of issued capabilities"
            );
        }

        let creator_capability = issued
            .into_iter()
            .find(|cap| cap.owner == creator)
            .ok_or_else(|| {
                CoreError::TransactionFailed(format!("{digest} issued no capability for creator"))
            })?;

        info!(
            channel_id = %creator_capability.channel_id,
            digest = %digest,
            members = members.len(),
            "Channel created on-chain"
        );

        Ok(ChannelOnChain {
            channel_id: creator_capability.channel_id.clone(),
            creation_digest: digest,
            creator_capability,
        })
    }

    /// Step 3: generate the channel key and attach it with the creator's
    /// capability.
    pub async fn attach_encryption_key(&self, on_chain: ChannelOnChain) -> Result<CreatedChannel> {
        let result = self
            .keys
            .generate_and_attach(&on_chain.channel_id, &on_chain.creator_capability)
            .await;
        let generated = match result {
            Ok(generated) => generated,
            Err(e) => {
                return Err(without_key(on_chain, CoreError::KeyAttachFailed(e.to_string())));
            }
        };

        let tx = UnsignedTx::new(
            on_chain.creator_capability.owner.clone(),
            TxKind::AttachEncryptionKey {
                channel_id: on_chain.channel_id.clone(),
                creator_capability: on_chain.creator_capability.id.clone(),
                encrypted_key: generated.encrypted_key_bytes.clone(),
            },
        );

        let key_digest = match self.signer.sign_and_submit(tx).await {
            Ok(digest) => digest,
            Err(e) => return Err(without_key(on_chain, CoreError::from_signer(e))),
        };

        info!(channel_id = %on_chain.channel_id, digest = %key_digest, "Encryption key attached");

        Ok(CreatedChannel {
            channel_id: generated.channel_id,
            encrypted_key_bytes: generated.encrypted_key_bytes,
            creator_capability: on_chain.creator_capability,
            creation_digest: on_chain.creation_digest,
            key_digest,
        })
    }

    /// Retry only step 3 for a channel left without a key.
    pub async fn resume_key_attachment(&self, pending: ChannelOnChain) -> Result<CreatedChannel> {
        info!(channel_id = %pending.channel_id, "Resuming key attachment");
        self.attach_encryption_key(pending).await
    }
}

fn without_key(pending: ChannelOnChain, reason: CoreError) -> CoreError {
    warn!(channel_id = %pending.channel_id, error = %reason, "Channel left without encryption key");
    CoreError::ChannelCreatedWithoutKey {
        pending,
        reason: Box::new(reason),
    }
}

/// Parse and check member addresses. The creator is implicit and may not
/// appear in the list.
fn validate_members<S: AsRef<str>>(creator: &Address, raw: &[S]) -> Result<Vec<Address>> {
    if raw.is_empty() {
        return Err(CoreError::EmptyMemberList);
    }

    let mut seen = HashSet::with_capacity(raw.len());
    let mut members = Vec::with_capacity(raw.len());
    for candidate in raw {
        let address = Address::parse(candidate.as_ref())?;
        if &address == creator {
            return Err(CoreError::SelfReference(address));
        }
        if !seen.insert(address.clone()) {
            return Err(CoreError::DuplicateAddress(address));
        }
        members.push(address);
    }
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::SignerError;
    use crate::testing::*;

    struct Fixture {
        log: Arc<EventLog>,
        signer: Arc<MockSigner>,
        channels: Arc<MockChannelStore>,
        keys: Arc<MockKeyProvider>,
        flow: ChannelCreationFlow,
    }

    fn fixture_with(signer: Arc<MockSigner>) -> Fixture {
        let log = signer.log.clone();
        let channels = Arc::new(MockChannelStore::with_log(log.clone()));
        let keys = Arc::new(MockKeyProvider::with_log(log.clone()));
        let chan = ChannelId::new("0xCHAN01");
        channels.issue(vec![capability(&addr(1), &chan), capability(&addr(2), &chan)]);
        let flow = ChannelCreationFlow::new(signer.clone(), channels.clone(), keys.clone());
        Fixture {
            log,
            signer,
            channels,
            keys,
            flow,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockSigner::with_log(addr(1), Arc::new(EventLog::default())))
    }

    #[tokio::test]
    async fn test_happy_path_two_submissions_in_order() {
        let f = fixture();

        let created = f.flow.create_channel(&[addr(2).to_string()]).await.unwrap();

        assert_eq!(created.channel_id, ChannelId::new("0xCHAN01"));
        assert_eq!(created.encrypted_key_bytes.len(), 32);
        assert_eq!(created.creator_capability.owner, addr(1));

        let submitted = f.signer.submitted();
        assert_eq!(submitted.len(), 2);
        assert!(matches!(submitted[0], TxKind::CreateChannel { .. }));
        assert!(matches!(
            &submitted[1],
            TxKind::AttachEncryptionKey { channel_id, .. } if channel_id.as_str() == "0xCHAN01"
        ));
    }

    #[tokio::test]
    async fn test_empty_members_fails_before_signing() {
        let f = fixture();
        let empty: [&str; 0] = [];

        let err = f.flow.create_channel(&empty).await.unwrap_err();

        assert!(matches!(err, CoreError::EmptyMemberList));
        assert!(f.signer.submitted().is_empty());
        assert!(f.log.events().is_empty());
    }

    #[tokio::test]
    async fn test_creator_as_member_is_self_reference() {
        let f = fixture();
        let err = f.flow.create_channel(&[addr(1).to_string()]).await.unwrap_err();
        assert!(matches!(err, CoreError::SelfReference(a) if a == addr(1)));
        assert!(f.signer.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_member_is_invalid_address() {
        let f = fixture();
        let err = f.flow.create_channel(&["0xBADADDR"]).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidAddress(raw) if raw == "0xBADADDR"));
        assert!(f.signer.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_member_rejected() {
        let f = fixture();
        let upper = format!("0x{}", "02".repeat(32).to_uppercase());
        let err = f
            .flow
            .create_channel(&[addr(2).to_string(), upper])
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateAddress(a) if a == addr(2)));
        assert!(f.signer.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_key_generated_only_after_creation_confirms() {
        let signer = MockSigner::with_log(addr(1), Arc::new(EventLog::default())).gated();
        let f = Arc::new(fixture_with(signer));

        let task = tokio::spawn({
            let f = f.clone();
            async move { f.flow.create_channel(&[addr(2).to_string()]).await }
        });

        while f.log.position("submit:create_channel").is_none() {
            tokio::task::yield_now().await;
        }
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(f.log.position("generate_and_attach").is_none());

        f.signer.release(2);
        task.await.unwrap().unwrap();

        let confirmed = f.log.position("confirmed:create_channel").unwrap();
        let generated = f.log.position("generate_and_attach").unwrap();
        let attach = f.log.position("submit:attach_encryption_key").unwrap();
        assert!(confirmed < generated);
        assert!(generated < attach);
    }

    #[tokio::test]
    async fn test_creation_failure_is_terminal() {
        let f = fixture();
        f.signer.script(Err(SignerError::Failed {
            digest: TxDigest::new("d1"),
            reason: "MoveAbort".into(),
        }));

        let err = f.flow.create_channel(&[addr(2).to_string()]).await.unwrap_err();

        assert!(matches!(err, CoreError::TransactionFailed(_)));
        assert_eq!(err.class(), crate::ErrorClass::RestartFlow);
        assert!(f.log.position("generate_and_attach").is_none());
    }

    #[tokio::test]
    async fn test_missing_creator_capability_fails() {
        let f = fixture();
        f.channels
            .issue(vec![capability(&addr(2), &ChannelId::new("0xCHAN01"))]);

        let err = f.flow.create_channel(&[addr(2).to_string()]).await.unwrap_err();
        assert!(matches!(err, CoreError::TransactionFailed(_)));
    }

    #[tokio::test]
    async fn test_attach_rejection_surfaces_channel_without_key() {
        let f = fixture();
        f.signer.script(Ok(TxDigest::new("create-digest")));
        f.signer.script(Err(SignerError::Rejected("insufficient gas".into())));

        let err = f.flow.create_channel(&[addr(2).to_string()]).await.unwrap_err();

        let pending = match err {
            CoreError::ChannelCreatedWithoutKey { pending, reason } => {
                assert!(matches!(*reason, CoreError::TransactionRejected(_)));
                pending
            }
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(pending.channel_id, ChannelId::new("0xCHAN01"));
        assert_eq!(pending.creation_digest, TxDigest::new("create-digest"));
        assert_eq!(pending.creator_capability.owner, addr(1));

        let resumed = f.flow.resume_key_attachment(pending).await.unwrap();
        assert_eq!(resumed.channel_id, ChannelId::new("0xCHAN01"));

        let kinds = f.signer.submitted();
        let creates = kinds
            .iter()
            .filter(|k| matches!(k, TxKind::CreateChannel { .. }))
            .count();
        assert_eq!(creates, 1);
        assert_eq!(kinds.len(), 3);
    }

    #[tokio::test]
    async fn test_key_provider_failure_surfaces_channel_without_key() {
        let f = fixture();
        f.keys.fail_attach(true);

        let err = f.flow.create_channel(&[addr(2).to_string()]).await.unwrap_err();

        assert_eq!(err.class(), crate::ErrorClass::ResumeKeyAttachment);
        assert_eq!(f.signer.submitted().len(), 1);

        f.keys.fail_attach(false);
        if let CoreError::ChannelCreatedWithoutKey { pending, .. } = err {
            f.flow.resume_key_attachment(pending).await.unwrap();
        }
        assert_eq!(f.signer.submitted().len(), 2);
    }
}
