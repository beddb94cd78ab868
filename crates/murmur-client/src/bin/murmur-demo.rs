//! Scripted two-party conversation against an in-memory ledger.
//!
//! Alice opens a channel with Bob, both exchange messages, and Bob's
//! activity poller picks up what happened. Run with `RUST_LOG=debug` to
//! see every step.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use murmur_client::ledger::MemoryLedger;
use murmur_client::wallet::LocalWallet;
use murmur_client::{init_tracing, ClientConfig, MessagingClient, Ports};
use murmur_core::SystemClock;
use murmur_shared::identity::Identity;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Tracing and configuration
    // -----------------------------------------------------------------------
    init_tracing();
    info!("Starting Murmur demo v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 2. One ledger, two wallets
    // -----------------------------------------------------------------------
    let clock = Arc::new(SystemClock);
    let ledger = Arc::new(MemoryLedger::new(clock.clone()));

    let alice_wallet = Arc::new(LocalWallet::new(Identity::generate(), ledger.clone()));
    let bob_wallet = Arc::new(LocalWallet::new(Identity::generate(), ledger.clone()));
    let alice = MessagingClient::new(
        config.clone(),
        Ports::local(ledger.clone(), alice_wallet, clock.clone()),
    );
    let bob = MessagingClient::new(config.clone(), Ports::local(ledger, bob_wallet, clock));

    let alice_address = alice.connect().await;
    let bob_address = bob.connect().await;

    // -----------------------------------------------------------------------
    // 3. Alice opens a channel and says hello
    // -----------------------------------------------------------------------
    alice.sign_in().await.context("alice sign-in")?;
    let created = alice
        .create_channel(&[bob_address.as_str()])
        .await
        .context("create channel")?;
    info!(channel_id = %created.channel_id, "Channel ready");

    alice
        .send(&created.channel_id, "hi bob, this channel is end-to-end encrypted")
        .await
        .context("alice send")?;

    // -----------------------------------------------------------------------
    // 4. Bob catches up and replies
    // -----------------------------------------------------------------------
    bob.sign_in().await.context("bob sign-in")?;
    let activity = bob.activity_poller();
    activity
        .start(&bob_address, config.poll_interval)
        .await
        .context("start activity poller")?;

    for channel in bob.channels().await.context("list channels")? {
        let preview = bob.preview(&channel).await.context("decrypt preview")?;
        info!(
            channel_id = %channel.id,
            members = channel.members.len(),
            preview = preview.as_ref().and_then(|m| m.text()).unwrap_or("<none>"),
            "Bob sees channel"
        );
    }

    bob.send(&created.channel_id, "hey alice, loud and clear")
        .await
        .context("bob send")?;
    activity.poll_now().await.context("poll activity")?;

    // -----------------------------------------------------------------------
    // 5. Print the conversation as Alice sees it
    // -----------------------------------------------------------------------
    let page = alice
        .history(&created.channel_id, None)
        .await
        .context("fetch history")?;
    for message in page.messages.iter().rev() {
        let who = if message.sender == alice_address { "alice" } else { "bob" };
        println!(
            "[{}] {who}: {}",
            message.created_at_ms,
            message.text().unwrap_or("<undecryptable>")
        );
    }

    let snapshot = activity.snapshot();
    println!(
        "bob's activity: {}",
        serde_json::to_string_pretty(&snapshot).context("serialize activity snapshot")?
    );
    activity.stop();

    Ok(())
}
