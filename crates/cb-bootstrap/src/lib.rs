//! # cb-bootstrap
//!
//! The chain synchronization controller: given connected peers, it brings
//! the local chain from a stale head to the network's quorum-agreed state.
//!
//! ## Architecture
//!
//! Hexagonal layout:
//! - `domain`: pure round state - candidate header aggregation with
//!   descendant-implies-ancestor support propagation, the request frontier,
//!   branch claims, and fetched operations.
//! - `ports`: the inbound [`BootstrapApi`] and the outbound collaborators
//!   (peer transport, chain store, block importer).
//! - `application`: [`BootstrapService`], the phase machine driving a round
//!   from claim solicitation through header quorum, operation fetching, and
//!   in-order block application.
//!
//! ## A round at a glance
//!
//! ```text
//! Unsynced ──start──→ RequestingBranches ──enough claims──→ RequestingHeaders
//!                                                                 │
//!                     Synced ←──fresh── Applying ←──ops──  RequestingOperations
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

pub use application::BootstrapService;
pub use config::BootstrapConfig;
pub use domain::{BootstrapError, HeaderAggregator, SyncPhase};
pub use ports::{BlockImporter, BootstrapApi, ChainStore, PeerLink};
