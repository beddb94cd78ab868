//! # murmur-client
//!
//! Runnable wiring for the Murmur session layer: environment configuration,
//! an in-memory ledger that serves every remote port, a local Ed25519
//! wallet, and the [`MessagingClient`] facade a UI binds to.

pub mod config;
pub mod encryptor;
pub mod error;
pub mod ledger;
pub mod state;
pub mod wallet;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use state::{MessagingClient, Ports};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("murmur_client=debug,murmur_core=debug,warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
