pub mod chats;
pub mod error;
pub mod middleware;
pub mod storage;
pub mod token;

use std::sync::Arc;

use bazaar_chat::{ChatService, TokenBroker};
use bazaar_db::Database;

use error::ApiError;
use storage::Storage;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub chats: Arc<ChatService>,
    pub tokens: Arc<TokenBroker>,
    pub storage: Storage,
    pub jwt_secret: String,
}

pub type AppState = Arc<AppStateInner>;

/// Run a database lookup off the async runtime.
pub(crate) async fn blocking<T, F>(db: &Arc<Database>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| ApiError::from(anyhow::anyhow!("blocking task failed: {}", e)))?
        .map_err(ApiError::from)
}
