//! Tripdesk Shared Types
//!
//! Identifiers, roles, topics and the realtime error taxonomy shared by the
//! Tripdesk crates.

pub mod error;
pub mod types;

pub use error::*;
pub use types::*;
