use thiserror::Error;

/// Domain errors surfaced to the HTTP and stream layers.
///
/// The messages are the client-facing texts; they deliberately reveal
/// nothing a caller isn't entitled to know (`NotFound` covers both a
/// nonexistent chat and one the caller isn't a participant of, and
/// `InvalidToken` covers expired and unknown tokens alike).
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Authentication required")]
    NotAuthenticated,

    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("No chat found")]
    NotFound,

    #[error("Insufficient permissions")]
    Forbidden,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
