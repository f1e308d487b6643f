pub mod auth;
pub mod error;
pub mod message;
pub mod registry;
pub mod room;
pub mod typing;

use std::sync::Arc;

use hearth_db::DbPool;

use registry::ConnectionRegistry;
use typing::TypingTracker;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub token_expiry_seconds: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub registry: Arc<ConnectionRegistry>,
    pub typing: Arc<TypingTracker>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let typing = Arc::new(TypingTracker::new(registry.clone()));
        Self {
            db,
            registry,
            typing,
            config,
        }
    }
}
