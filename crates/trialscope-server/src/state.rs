//! Shared application state for the Axum server.

use std::sync::Arc;

use trialscope_core::{MasterSource, ScopeConfig};

#[derive(Clone)]
pub struct AppState {
    pub source: Arc<dyn MasterSource>,
    pub config: Arc<ScopeConfig>,
}

impl AppState {
    pub fn new(source: Arc<dyn MasterSource>, config: ScopeConfig) -> Self {
        Self {
            source,
            config: Arc::new(config),
        }
    }
}

/// Configuration for the web server.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub scope: ScopeConfig,
}

impl ServerConfig {
    pub fn new(scope: ScopeConfig) -> Self {
        Self { scope }
    }

    pub fn host(&self) -> &str {
        &self.scope.host
    }

    pub fn port(&self) -> u16 {
        self.scope.port
    }
}
