//! # Gateway Client Library
//!
//! Client side of the gateway protocol, used by the `simulate` traffic
//! generator and by the workspace integration tests.
//!
//! ## Protocol Walkthrough
//!
//! 1. Connect over TCP ([`GatewayClient::connect_tcp`]) or KCP
//!    ([`GatewayClient::connect_kcp`])
//! 2. Exchange seeds ([`GatewayClient::exchange_keys`]); the request and
//!    its ack are the last frames in clear
//! 3. Log in ([`GatewayClient::login`]) to get a player id and a relay
//!    stream to a game host
//! 4. Send relay-range messages with [`GatewayClient::send`] and read
//!    replies, or frames the game host pushes, with [`GatewayClient::recv`]
//!
//! Every frame the client sends carries a sequence number starting at 0.
//! The gateway drops the connection on the first gap.
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::GatewayClient;
//! use shared::proto::{AutoId, UserLoginInfo, PROTO_PING_ACK, PROTO_PING_REQ};
//!
//! # async fn run() -> Result<(), client::ClientError> {
//! let mut client = GatewayClient::connect_tcp("127.0.0.1:8888".parse().unwrap()).await?;
//! client.exchange_random_keys().await?;
//! let player_id = client.login(&UserLoginInfo::default()).await?;
//!
//! client.send(PROTO_PING_REQ, Some(&AutoId { id: player_id })).await?;
//! let echo: AutoId = client.recv().await?.expect(PROTO_PING_ACK)?;
//! # Ok(())
//! # }
//! ```

pub mod network;

pub use network::{ClientError, GatewayClient, Reply};
