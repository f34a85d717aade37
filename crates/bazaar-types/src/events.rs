use serde::{Deserialize, Serialize};

/// Commands sent FROM client TO server over the WebSocket.
///
/// Anything that fails to parse into one of these variants is rejected at the
/// connection layer before reaching any component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum GatewayCommand {
    /// Redeem a single-use exchange token obtained over HTTP.
    Auth { token: String },

    /// Subscribe to a chat's room. Requires prior auth and chat membership.
    #[serde(rename_all = "camelCase")]
    Listen { chat_id: i64 },
}

/// Events sent FROM server TO client over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum GatewayEvent {
    /// Authentication acknowledged.
    Auth,

    /// A message was appended to a chat the session is subscribed to.
    /// Delivered to every room member, including the sender's own other
    /// connections.
    #[serde(rename_all = "camelCase")]
    Chat {
        id: i64,
        chat_id: i64,
        /// Listing title, resolved by the HTTP layer; absent for chats not
        /// tied to a listing.
        chat_title: Option<String>,
        timestamp: i64,
        author_id: i64,
        author_name: String,
        message: String,
        image: Option<String>,
    },

    /// A command failed. Invalid and expired tokens surface identically.
    Error { message: String },
}
