//! Shared application state

use std::sync::Arc;

use crate::auth::IdentityResolver;
use crate::config::Config;
use crate::websocket::RealtimeHub;

/// State handed to every axum handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: RealtimeHub,
    pub resolver: Arc<dyn IdentityResolver>,
}

impl AppState {
    pub fn new(config: Config, hub: RealtimeHub, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self {
            config: Arc::new(config),
            hub,
            resolver,
        }
    }
}
