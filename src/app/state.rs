//! Application state management.

use std::sync::Arc;

use crate::domain::DatabaseClient;

use super::hub::NotificationHub;
use super::registry::SessionRegistry;
use super::service::AppService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AppService>,
    pub registry: Arc<SessionRegistry>,
    pub hub: Arc<NotificationHub>,
    pub db_client: Arc<dyn DatabaseClient>,
    /// Shared secret expected in the `Authorization` header of deposit webhooks
    pub webhook_secret: Option<String>,
}

impl AppState {
    #[must_use]
    pub fn new(
        service: Arc<AppService>,
        hub: Arc<NotificationHub>,
        db_client: Arc<dyn DatabaseClient>,
    ) -> Self {
        Self {
            registry: Arc::clone(service.registry()),
            service,
            hub,
            db_client,
            webhook_secret: None,
        }
    }

    #[must_use]
    pub fn with_webhook_secret(mut self, secret: Option<String>) -> Self {
        self.webhook_secret = secret;
        self
    }
}
