use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use chrono::Utc;
use tracing::error;

use bazaar_chat::MessageBody;
use bazaar_types::api::{
    ChatMessagesResponse, ChatSummary, CreateChatRequest, CreateChatResponse, ListChatsResponse,
    MessageView, MessagesQuery, OkResponse, SendMessageRequest,
};
use bazaar_types::models::{Chat, User};

use crate::error::ApiError;
use crate::{AppState, blocking};

const MAX_MESSAGE_CHARS: usize = 2000;
const MAX_IMAGE_BYTES: usize = 5 * 1000 * 1000;

fn validate_message(message: &str) -> Result<(), ApiError> {
    let len = message.chars().count();
    if len == 0 || len > MAX_MESSAGE_CHARS {
        return Err(ApiError::bad_request("Invalid message data"));
    }
    Ok(())
}

/// Sniff the upload by magic number; only png and jpeg are accepted.
fn image_extension(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("png")
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpg")
    } else {
        None
    }
}

/// Broadcasts carry the listing title; resolve it once per send.
async fn chat_title(state: &AppState, chat: &Chat) -> Result<Option<String>, ApiError> {
    let Some(post_id) = chat.post_id else {
        return Ok(None);
    };
    let post = blocking(&state.db, move |db| db.get_post(post_id)).await?;
    Ok(post.map(|p| p.title))
}

/// GET /messages — the caller's conversations, newest activity first, with
/// listing labels, counterpart names and the caller's unread counts.
pub async fn list_chats(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<ListChatsResponse>, ApiError> {
    let chats = state.chats.list_chats(&user).await?;

    let post_ids: Vec<i64> = chats.iter().filter_map(|c| c.post_id).collect();
    let other_ids: Vec<i64> = chats
        .iter()
        .filter_map(|c| c.other_participant(user.id))
        .collect();

    let (posts, others) = blocking(&state.db, move |db| {
        Ok((db.get_posts_by_ids(&post_ids)?, db.get_users_by_ids(&other_ids)?))
    })
    .await?;

    let posts: HashMap<i64, _> = posts.into_iter().map(|p| (p.id, p)).collect();
    let names: HashMap<i64, String> = others
        .into_iter()
        .map(|u| (u.id, u.display_label()))
        .collect();

    let chats = chats
        .into_iter()
        .map(|chat| {
            let post = chat.post_id.and_then(|id| posts.get(&id));
            ChatSummary {
                id: chat.id,
                post_title: post.map(|p| p.title.clone()),
                post_archived: post.map(|p| p.archived),
                recipient_name: chat
                    .other_participant(user.id)
                    .and_then(|id| names.get(&id).cloned())
                    .unwrap_or_default(),
                last_update: chat.last_update,
                unread_count: chat
                    .side_of(user.id)
                    .map(|side| chat.unread_for(side))
                    .unwrap_or(0),
            }
        })
        .collect();

    Ok(Json(ListChatsResponse {
        success: true,
        chats,
    }))
}

/// POST /messages — open (or reuse) the conversation for a listing and send
/// the opening message.
pub async fn create_chat(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<CreateChatRequest>,
) -> Result<Json<CreateChatResponse>, ApiError> {
    validate_message(&req.initial_message)?;

    let post = blocking(&state.db, move |db| db.get_post(req.post_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Post not found"))?;

    let chat = state.chats.find_or_create_chat(&user, &post).await?;
    state
        .chats
        .send_message(
            &chat,
            &user,
            MessageBody::text(req.initial_message),
            Some(post.title),
        )
        .await?;

    Ok(Json(CreateChatResponse {
        success: true,
        chat_id: chat.id,
    }))
}

/// GET /messages/{chat_id} — one keyset page of history, newest first.
/// Fetching the thread acknowledges it: the caller's unread counter clears.
pub async fn get_chat_messages(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(chat_id): Path<i64>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<ChatMessagesResponse>, ApiError> {
    let chat = state
        .chats
        .find_chat(&user, chat_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Chat not found"))?;

    let messages = state.chats.page_messages(&chat, query.before).await?;
    state.chats.mark_read(&chat, &user).await?;

    let recipient_name = state
        .chats
        .recipient_name(&chat, &user)
        .await?
        .unwrap_or_default();

    let post = match chat.post_id {
        Some(post_id) => blocking(&state.db, move |db| db.get_post(post_id)).await?,
        None => None,
    };

    Ok(Json(ChatMessagesResponse {
        success: true,
        post_id: chat.post_id,
        post_name: post.as_ref().map(|p| p.title.clone()),
        post_archived: post.as_ref().map(|p| p.archived),
        recipient_name,
        messages: messages
            .into_iter()
            .map(|m| MessageView {
                id: m.id,
                author_id: m.author_id,
                timestamp: m.timestamp,
                message: m.message,
                image: m.image,
            })
            .collect(),
    }))
}

/// POST /messages/{chat_id} — send a text message.
pub async fn send_chat_message(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(chat_id): Path<i64>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    validate_message(&req.message)?;

    let chat = state
        .chats
        .find_chat(&user, chat_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Chat not found"))?;

    let title = chat_title(&state, &chat).await?;
    state
        .chats
        .send_message(&chat, &user, MessageBody::text(req.message), title)
        .await?;

    Ok(Json(OkResponse { success: true }))
}

/// POST /messages/{chat_id}/read — clear the caller's unread counter only.
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(chat_id): Path<i64>,
) -> Result<Json<OkResponse>, ApiError> {
    let chat = state
        .chats
        .find_chat(&user, chat_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Chat not found"))?;

    state.chats.mark_read(&chat, &user).await?;
    Ok(Json(OkResponse { success: true }))
}

/// POST /messages/{chat_id}/image — store an image and send it as an
/// image-only message. Seller-only.
pub async fn upload_image(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(chat_id): Path<i64>,
    body: Bytes,
) -> Result<Json<OkResponse>, ApiError> {
    let chat = state
        .chats
        .find_chat(&user, chat_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Chat not found"))?;

    if chat.seller_id != user.id {
        return Err(ApiError::forbidden("Insufficient permissions to send image"));
    }
    if body.is_empty() || body.len() > MAX_IMAGE_BYTES {
        return Err(ApiError::bad_request("Invalid image file"));
    }
    let ext = image_extension(&body).ok_or_else(|| ApiError::bad_request("Invalid image file"))?;

    let path = format!(
        "messages/{}/{}.{}",
        chat.id,
        Utc::now().timestamp_millis(),
        ext
    );
    let url = state.storage.put(&path, &body).await.map_err(|e| {
        error!("image upload failed: {:#}", e);
        ApiError::internal("Something went wrong while uploading your image")
    })?;

    let title = chat_title(&state, &chat).await?;
    state
        .chats
        .send_message(&chat, &user, MessageBody::image(url), title)
        .await?;

    Ok(Json(OkResponse { success: true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_validation_bounds() {
        assert!(validate_message("").is_err());
        assert!(validate_message("x").is_ok());
        assert!(validate_message(&"y".repeat(2000)).is_ok());
        assert!(validate_message(&"y".repeat(2001)).is_err());
    }

    #[test]
    fn image_sniffing_accepts_png_and_jpeg_only() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00];
        let jpg = [0xFF, 0xD8, 0xFF, 0xE0, 0x00];
        let gif = *b"GIF89a";

        assert_eq!(image_extension(&png), Some("png"));
        assert_eq!(image_extension(&jpg), Some("jpg"));
        assert_eq!(image_extension(&gif), None);
        assert_eq!(image_extension(&[]), None);
    }
}
