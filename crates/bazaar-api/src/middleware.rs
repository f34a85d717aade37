use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{DecodingKey, Validation, decode};

use bazaar_types::api::Claims;
use bazaar_types::models::User;

use crate::AppState;
use crate::error::ApiError;

/// Extract and validate the Bearer JWT minted by the auth service, exposing
/// the request's user as an extension. The claims carry the name fields, so
/// no directory lookup happens per request.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(ApiError::unauthorized)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(ApiError::unauthorized)?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::unauthorized())?;

    let claims = token_data.claims;
    req.extensions_mut().insert(User {
        id: claims.sub,
        first_name: claims.first_name,
        last_name: claims.last_name,
    });
    Ok(next.run(req).await)
}
