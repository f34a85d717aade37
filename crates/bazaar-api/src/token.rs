use axum::{Extension, Json, extract::State};

use bazaar_types::api::TokenResponse;
use bazaar_types::models::User;

use crate::AppState;

/// Issue a single-use exchange token for the WebSocket handshake. The caller
/// is already authenticated over HTTP; the token lets them authenticate the
/// stream without re-sending credentials.
pub async fn issue_token(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Json<TokenResponse> {
    let token = state.tokens.issue(user.id);
    Json(TokenResponse {
        success: true,
        token,
    })
}
