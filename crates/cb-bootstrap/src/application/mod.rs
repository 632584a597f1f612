//! Application layer: the controller orchestrating domain state through the
//! outbound ports.

pub mod service;

pub use service::BootstrapService;
