//! # Shared Types Crate
//!
//! Identifiers and chain entities shared across the bootstrap subsystem
//! crates: chains, branches, peers, headers, blocks, and operation sets.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every cross-crate type is defined here.
//! - **Hash Discipline**: `BlockHeader::compute_hash` is the only way a
//!   header hash is derived; nothing else re-implements the preimage.

pub mod entities;
pub mod errors;

pub use entities::*;
pub use errors::*;
