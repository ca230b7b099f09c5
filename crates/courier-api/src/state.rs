//! Shared application state

use courier_core::CampaignManager;
use courier_storage::DatabasePool;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<CampaignManager>,
    /// Absent with the in-memory backend
    pub db_pool: Option<DatabasePool>,
    /// Provider callbacks must be signed with this secret when set
    pub webhook_secret: Option<String>,
}

impl AppState {
    pub fn new(manager: Arc<CampaignManager>) -> Self {
        Self {
            manager,
            db_pool: None,
            webhook_secret: None,
        }
    }

    pub fn with_db_pool(mut self, db_pool: DatabasePool) -> Self {
        self.db_pool = Some(db_pool);
        self
    }

    pub fn with_webhook_secret(mut self, secret: Option<String>) -> Self {
        self.webhook_secret = secret.filter(|s| !s.is_empty());
        self
    }
}
