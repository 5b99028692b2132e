//! # Gateway Library
//!
//! Edge-facing half of the game backend. The gateway terminates client
//! connections over TCP and KCP, bootstraps an encrypted channel with each
//! client, validates and sequences its traffic, and relays everything in the
//! relay message range to a game host over one duplex stream per player.
//!
//! ## Session Model
//!
//! Each accepted connection runs as a small task group:
//!
//! - a **reader** pulling length-prefixed frames off the socket, bounded by
//!   a read deadline that resets on every frame
//! - the **session loop**, sole owner of the [`session::Session`], which
//!   validates frames and dispatches them
//! - a **writer** draining the [`buffer::OutputBuffer`] queue in order
//! - after login, a **relay pump** moving game host frames into the
//!   session mailbox
//!
//! The tasks talk through bounded queues. The only state they share is the
//! session flag word, which is only ever OR'd.
//!
//! ## Secure Channel
//!
//! Clients send two public seeds; the gateway answers with two of its own and
//! keys one RC4 instance per direction. The acknowledgement itself leaves in
//! clear, and every frame after it is encrypted in both directions.
//!
//! ## Module Organization
//!
//! ### Session (`session`, `lifecycle`)
//! Per-connection state, the state machine, the control loop and the
//! finalizer every exit path runs through.
//!
//! ### Routing (`dispatcher`, `handlers`, `bridge`)
//! Frame validation order, the closed set of local handlers and the relay
//! stream to the game host.
//!
//! ### Transport (`listener`, `buffer`)
//! Accept loops for both transports, the reader loop and the single writer
//! per connection.
//!
//! ### Process (`context`, `config`, `services`, `flood`, `shutdown`)
//! Components owned by the entry point and injected into every session:
//! configuration, the backend service pool, the player id allocator, the
//! flood guard and the shutdown coordinator.

pub mod bridge;
pub mod buffer;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod flood;
pub mod handlers;
pub mod lifecycle;
pub mod listener;
pub mod services;
pub mod session;
pub mod shutdown;

pub use config::Config;
pub use context::GatewayContext;
pub use error::SessionError;
pub use services::ServicePool;
pub use shutdown::ShutdownCoordinator;
