//! # Chain-Bootstrap Test Suite
//!
//! Unified test crate containing:
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── protocol_flows.rs   # Wire/session behavior across crates
//!     └── sync_scenarios.rs   # End-to-end synchronization rounds
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p cb-tests
//!
//! # By category
//! cargo test -p cb-tests integration::protocol_flows::
//! cargo test -p cb-tests integration::sync_scenarios::
//! ```

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod integration;
