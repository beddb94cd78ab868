//! # murmur-core
//!
//! The encrypted channel session layer of Murmur.
//!
//! Everything that touches a wallet, a chain node or a key server is reached
//! through the narrow capability traits in [`ports`]. On top of them this
//! crate sequences:
//!
//! - [`session::SessionKeyManager`]: a time-boxed, user-approved credential
//!   that authorizes decryption without per-message prompts
//! - [`channel_flow::ChannelCreationFlow`]: the create-channel then
//!   attach-key transaction protocol
//! - [`messages::MessageStore`]: encrypted send and paginated, decrypted
//!   history
//! - [`registry::ChannelRegistry`]: the cached channel list and membership
//!   capabilities of the connected address
//! - [`poller::ActivityPoller`]: interval refresh with de-duplicating merge,
//!   pause/resume and cursor pagination

pub mod channel_flow;
pub mod clock;
pub mod feeds;
pub mod messages;
pub mod model;
pub mod poller;
pub mod ports;
pub mod registry;
pub mod session;

mod error;

#[cfg(test)]
mod testing;

pub use channel_flow::{ChannelCreationFlow, ChannelOnChain, CreateChannelTx, CreatedChannel};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, ErrorClass, Result};
pub use messages::{FetchOptions, MessagePage, MessageStore};
pub use model::*;
pub use poller::{ActivityPoller, ActivitySnapshot, ActivitySource, PollerConfig, PollerStatus};
pub use registry::ChannelRegistry;
pub use session::{SessionConfig, SessionKey, SessionKeyManager, SessionStatus};
