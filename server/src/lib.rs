//! # Snapshot Sync Server Library
//!
//! Authoritative server side of the snapshot synchronization protocol. The
//! server accepts unreliable UDP datagrams, keeps per-client connection state
//! and sends delta snapshots so that every client eventually agrees with the
//! server's entity world, even when packets are lost, duplicated or reordered.
//!
//! ## Core Responsibilities
//!
//! ### Admission
//! Join requests are checked against the client capacity and the set of
//! display names in use. Accepted clients get a player entity spawned in the
//! world and a response carrying its id; rejected ones get a response code.
//!
//! ### Command Ingestion
//! Clients send numbered commands. Only a command with a sequence number newer
//! than the last accepted one is applied, so duplicates and late arrivals are
//! ignored. Each command also acknowledges the newest snapshot tick the client
//! has seen.
//!
//! ### Delta Broadcasting
//! Every tick the world's changes are collected into one snapshot. Each
//! in-game client keeps a backlog of snapshots it has not acknowledged; the
//! backlog is merged into a single outbound packet, newest entries winning,
//! so a client that missed several packets catches up with one.
//!
//! ## Module Organization
//!
//! - [`client_manager`]: per-client state machine and the client table.
//! - [`dispatcher`]: the synchronous tick logic, independent of any socket.
//! - [`game`]: the [`game::World`] collaborator trait and a small arena world.
//! - [`network`]: socket ownership, the receiver task and the tick timer.
//! - [`config`]: command line configuration.
//! - [`error`]: server-level error type.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::game::{GameWorld, WORLD_HEIGHT, WORLD_WIDTH};
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let world = GameWorld::new(WORLD_WIDTH, WORLD_HEIGHT);
//!
//!     let mut server = Server::bind(&config, world).await?;
//!     let shutdown = server.shutdown_handle();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         shutdown.shutdown();
//!     });
//!
//!     server.run().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency
//!
//! A single receiver task reads the socket and pushes datagrams into a bounded
//! queue. The tick loop drains the queue at the start of every tick without
//! blocking and is the only code that touches client or world state.

pub mod client_manager;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod game;
pub mod network;
