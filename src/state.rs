use crate::auth::{AccountSource, JwtKeys};
use crate::config::Config;
use crate::db::DbPool;
use crate::storage::FileStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<Config>,
    pub jwt: Arc<JwtKeys>,
    pub accounts: Arc<dyn AccountSource>,
    pub store: Arc<FileStore>,
}
