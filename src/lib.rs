//! # Auction Server
//!
//! This crate runs a single-round, time-boxed English auction over TCP.
//! Many clients submit increasing bids, the server accepts or rejects
//! each one, every client sees accepted bids and the countdown in real
//! time, and the round resolves to a winner (or no winner) when the clock
//! runs out.
//!
//! ## Features
//!
//! - One shared auction register guarded by a single mutex; concurrent
//!   bids serialize and the first higher bid wins.
//! - Broadcast hub that fans records out to every client, drops failing
//!   peers and bounds every write with a send timeout.
//! - Countdown thread that waits for an operator start signal, ticks once
//!   per second, warns at 10 and 5 seconds left and announces the outcome.
//! - Idempotent shutdown cascade triggered by Ctrl+C, operator cancel,
//!   round end or a listener fault.
//!
//! ## Architecture Overview
//!
//! - [`auction_state`](crate::auction_state) — high bid, its owner and the bid-acceptance rule.
//! - [`hub`](crate::hub) — client registry and broadcast fan-out.
//! - [`connection`](crate::connection) — per-client worker translating wire records into bids.
//! - [`timer`](crate::timer) — countdown driving the round phases.
//! - [`shutdown`](crate::shutdown) — process-wide one-shot shutdown signal.
//! - [`context`](crate::context) — process-scoped owner of state, hub, timer and signal.
//! - [`tcp_server`](crate::tcp_server) — listener, accept loop and shutdown cascade.
//! - [`message`](crate::message) — wire records and their JSON encoding.
//! - [`config`](crate::config) — auction and server configuration.
//! - [`defs`](crate::defs) — shared constants and timing parameters.
//! - [`errors`](crate::errors) — error types used across modules.
//!
//! ## Wire Protocol
//!
//! One JSON object per line, tagged by `"type"`. Clients send:
//!
//! - `{"type":"BID","user":"alice","value":1500}`
//!
//! The server sends `WELCOME` on connect, `GAME_START` when the round
//! starts, `NEW_PRICE` on every accepted bid, `ERROR` to a bidder whose
//! bid was rejected, `UPDATE_TIMER` every second, `WARNING` at the
//! thresholds, then `WINNER` or `NO_WINNER`, and finally `SHUTDOWN`.
//!
//! ## Example: Running the Server
//!
//! ```no_run
//! use auction_server::config::{AuctionConfig, ServerConfig};
//! use auction_server::context::AuctionContext;
//! use auction_server::tcp_server::AuctionServer;
//! use auction_server::timer::TimerSettings;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let auction = AuctionConfig::default();
//!     auction.validate()?;
//!     let server_config = ServerConfig::default();
//!
//!     let context = AuctionContext::new(&auction, &server_config, TimerSettings::default());
//!     let server = AuctionServer::new(&server_config.bind_addr(), context.clone())?;
//!
//!     // Start immediately instead of waiting for the operator.
//!     std::thread::spawn(move || {
//!         std::thread::sleep(std::time::Duration::from_secs(5));
//!         context.timer.start_round();
//!     });
//!
//!     server.run()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unreachable_pub)]

pub mod auction_state;
pub mod config;
pub mod connection;
pub mod context;
pub mod defs;
pub mod errors;
pub mod hub;
pub mod message;
pub mod shutdown;
pub mod tcp_server;
pub mod timer;
