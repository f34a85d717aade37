use serde::{Deserialize, Serialize};

/// Minimal projection of the user directory: just enough to authorize chat
/// access and render display names. Rows are provisioned by the directory
/// service, never by this backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
}

impl User {
    /// Display label used for broadcast author names and recipient names:
    /// `"{first} {last-initial}."`. The trailing period is dropped when the
    /// last name is already a single character.
    pub fn display_label(&self) -> String {
        let mut initial = self.last_name.chars();
        match (initial.next(), initial.next()) {
            (Some(c), Some(_)) => format!("{} {}.", self.first_name, c),
            (Some(c), None) => format!("{} {}", self.first_name, c),
            (None, _) => self.first_name.clone(),
        }
    }
}

/// Minimal projection of a listing. Chats on archived listings stay readable;
/// `archived` is only surfaced so clients can label them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub author_id: i64,
    pub archived: bool,
}

/// Which side of a two-party chat a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Seller,
    Buyer,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Seller => Side::Buyer,
            Side::Buyer => Side::Seller,
        }
    }
}

/// A two-party conversation between a buyer and a seller, optionally tied to
/// a listing. Participant ids are immutable after creation.
#[derive(Debug, Clone)]
pub struct Chat {
    pub id: i64,
    pub post_id: Option<i64>,
    pub seller_id: i64,
    pub buyer_id: i64,
    /// Unix milliseconds of the newest message (or creation time).
    pub last_update: i64,
    pub seller_unread: u32,
    pub buyer_unread: u32,
}

impl Chat {
    pub fn side_of(&self, user_id: i64) -> Option<Side> {
        if user_id == self.seller_id {
            Some(Side::Seller)
        } else if user_id == self.buyer_id {
            Some(Side::Buyer)
        } else {
            None
        }
    }

    pub fn is_participant(&self, user_id: i64) -> bool {
        self.side_of(user_id).is_some()
    }

    /// Id of the participant opposite `user_id`, if `user_id` is a participant.
    pub fn other_participant(&self, user_id: i64) -> Option<i64> {
        match self.side_of(user_id)? {
            Side::Seller => Some(self.buyer_id),
            Side::Buyer => Some(self.seller_id),
        }
    }

    pub fn unread_for(&self, side: Side) -> u32 {
        match side {
            Side::Seller => self.seller_unread,
            Side::Buyer => self.buyer_unread,
        }
    }
}

/// A persisted chat message. Immutable once created. Exactly one of `message`
/// (non-empty) or `image` is the primary payload; image-only sends carry
/// `message == ""`.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: i64,
    pub chat_id: i64,
    pub author_id: i64,
    pub message: String,
    pub image: Option<String>,
    /// Unix milliseconds, server-assigned.
    pub timestamp: i64,
}
