use serde::{Deserialize, Serialize};

// -- JWT Claims --

/// JWT claims minted by the out-of-scope auth service and verified by the
/// HTTP middleware. Carrying the name fields means a request supplies the
/// full user without a directory round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub first_name: String,
    pub last_name: String,
    pub exp: usize,
}

// -- Requests --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CreateChatRequest {
    pub post_id: i64,
    pub initial_message: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    /// Keyset cursor: only messages with `id < before` are returned.
    pub before: Option<i64>,
}

// -- Responses --

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub success: bool,
    pub token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: i64,
    pub post_title: Option<String>,
    pub post_archived: Option<bool>,
    pub recipient_name: String,
    pub last_update: i64,
    pub unread_count: u32,
}

#[derive(Debug, Serialize)]
pub struct ListChatsResponse {
    pub success: bool,
    pub chats: Vec<ChatSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatResponse {
    pub success: bool,
    pub chat_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: i64,
    pub author_id: i64,
    pub timestamp: i64,
    pub message: String,
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagesResponse {
    pub success: bool,
    pub post_id: Option<i64>,
    pub post_name: Option<String>,
    pub post_archived: Option<bool>,
    pub recipient_name: String,
    pub messages: Vec<MessageView>,
}
