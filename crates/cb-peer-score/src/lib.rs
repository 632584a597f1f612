//! # cb-peer-score
//!
//! Peer reputation scoring for the bootstrap core.
//!
//! Every peer starts at the maximum score. Protocol violations lower it by a
//! severity-dependent weight; crossing the disconnect or blacklist threshold
//! escalates to a verdict the controller acts on. The score also throttles
//! request cadence: well-behaved peers are polled more often.
//!
//! ## Violations scored here
//!
//! | Violation | Severity |
//! |-----------|----------|
//! | Losing-branch support after quorum | Minor |
//! | Queue-capacity abuse | Minor |
//! | Unrequested header/operations response | Major |
//! | Branch deviation below the accepted head | Fatal |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod manager;
pub mod score;

pub use config::PeerScoreConfig;
pub use manager::PeerScoreManager;
pub use score::{PeerScore, Severity, Verdict};
