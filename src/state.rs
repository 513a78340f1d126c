use std::sync::Arc;

use crate::config::AuthConfig;
use crate::db::DbConnection;
use crate::mailer::Mailer;

/// Shared by every handler. The connection is the only process-wide resource.
#[derive(Clone)]
pub struct AppState {
    pub db: DbConnection,
    pub auth: Arc<AuthConfig>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub fn new(db: DbConnection, auth: AuthConfig, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            db,
            auth: Arc::new(auth),
            mailer,
        }
    }
}
