//! # Game Host Library
//!
//! Backend half of the relay. A game host accepts one relay stream per
//! player from the gateway, runs the game handlers on the frames it
//! receives, and lets any component on the host push frames to a connected
//! player through the [`registry::Registry`].
//!
//! ## Module Organization
//!
//! - `server`: TCP accept loop, one router task per stream
//! - `router`: per-stream loop dispatching gateway frames and mailbox pushes
//! - `registry`: concurrent player-to-mailbox map with generation-checked
//!   removal, safe against a player reconnecting before its old stream ended
//! - `handlers`: the relay-range messages this host answers
//! - `session`: host-local state of one stream

pub mod handlers;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;

pub use registry::{Registration, Registry};
pub use router::{serve_stream, RouterError};
