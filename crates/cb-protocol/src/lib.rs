//! # cb-protocol
//!
//! The bootstrap wire protocol: message catalog, expectation registry, and
//! bounded per-peer sessions.
//!
//! ## Overview
//!
//! This crate provides:
//! - **Message Catalog**: tagged variants per message kind, each carrying
//!   exactly its own field set; a `type`/field mismatch is unrepresentable
//!   via the constructors and rejected at decode time.
//! - **Expectation Registry**: per-(peer, chain) bookkeeping of which
//!   response is still owed for each outstanding request or advertisement,
//!   consumed exactly once by a matching reply.
//! - **Peer Session**: bounded sent/received queues per (peer, chain) with
//!   backpressure instead of unbounded growth.
//!
//! ## Message Flow
//!
//! ```text
//! Sessions::send ──registers──→ ExpectationRegistry
//!       │                              │
//!       ▼                              │
//!  PeerSession.sent                    │
//!                                      │
//! Sessions::receive ──→ PeerSession.received
//!       │                              │
//! Sessions::consume ──resolves─────────┘
//!       │
//!       └──→ Consumed { message, expectation }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod expectation;
pub mod messages;
pub mod session;

pub use config::ProtocolConfig;
pub use error::ProtocolError;
pub use expectation::ExpectationRegistry;
pub use messages::{Ack, Advertise, ErrorReply, Expect, ExpectKind, Message, Request, SystemEvent};
pub use session::{Consumed, PeerSession, Sessions};
