pub mod connection;
pub mod dispatcher;

use std::sync::Arc;

use bazaar_chat::{ChatService, TokenBroker};
use bazaar_db::Database;

use dispatcher::Dispatcher;

/// Everything a live WebSocket connection needs: the room/fan-out state,
/// the token broker for the handshake, the chat core for membership checks,
/// and the user-directory projection.
#[derive(Clone)]
pub struct Gateway {
    pub dispatcher: Dispatcher,
    pub tokens: Arc<TokenBroker>,
    pub chats: Arc<ChatService>,
    pub db: Arc<Database>,
}
