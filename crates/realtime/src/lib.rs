//! Tripdesk Realtime Library
//!
//! Presence tracking and live event fanout for the Tripdesk CRM: who is
//! online, who is typing, and which lead or inbox events each open tab
//! should see right now.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod websocket;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
pub use websocket::{HubConfig, RealtimeHub};
