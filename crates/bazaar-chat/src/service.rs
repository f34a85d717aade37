use std::sync::Arc;

use bazaar_db::Database;
use bazaar_types::events::GatewayEvent;
use bazaar_types::models::{Chat, ChatMessage, Post, User};
use chrono::Utc;

use crate::error::ChatError;
use crate::publish::EventSink;

/// Page size for message history.
pub const MESSAGE_PAGE_SIZE: u32 = 25;

/// Payload of a send: either non-empty text, or an image URL with an empty
/// text body.
#[derive(Debug, Clone)]
pub struct MessageBody {
    pub text: String,
    pub image: Option<String>,
}

impl MessageBody {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            image: Some(url.into()),
        }
    }
}

/// The chat core: conversation registry, message store and unread counters
/// over [`Database`], publishing through an injected [`EventSink`] so the
/// connection layer stays a one-directional dependency.
pub struct ChatService {
    db: Arc<Database>,
    events: Arc<dyn EventSink>,
}

impl ChatService {
    pub fn new(db: Arc<Database>, events: Arc<dyn EventSink>) -> Self {
        Self { db, events }
    }

    /// Run a database operation off the async runtime. No async lock is held
    /// while the caller waits here.
    async fn blocking<T, F>(&self, f: F) -> Result<T, ChatError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| ChatError::Storage(anyhow::anyhow!("blocking task failed: {}", e)))?
            .map_err(ChatError::Storage)
    }

    /// Look up the chat between `buyer` and `post`, creating it if absent.
    /// Safe against concurrent calls for the same pair: exactly one chat
    /// exists afterwards.
    pub async fn find_or_create_chat(&self, buyer: &User, post: &Post) -> Result<Chat, ChatError> {
        let buyer_id = buyer.id;
        let post = post.clone();
        let now = Utc::now().timestamp_millis();
        self.blocking(move |db| db.find_or_create_chat(buyer_id, &post, now))
            .await
    }

    /// Participant-only lookup. A chat the user isn't part of behaves exactly
    /// like one that doesn't exist.
    pub async fn find_chat(&self, user: &User, chat_id: i64) -> Result<Option<Chat>, ChatError> {
        let user_id = user.id;
        let chat = self.blocking(move |db| db.get_chat(chat_id)).await?;
        Ok(chat.filter(|c| c.is_participant(user_id)))
    }

    /// All chats the user participates in, newest activity first.
    pub async fn list_chats(&self, user: &User) -> Result<Vec<Chat>, ChatError> {
        let user_id = user.id;
        self.blocking(move |db| db.list_chats_for_user(user_id)).await
    }

    /// Display name of the other participant, or `None` when `user` isn't a
    /// participant.
    pub async fn recipient_name(&self, chat: &Chat, user: &User) -> Result<Option<String>, ChatError> {
        let Some(other_id) = chat.other_participant(user.id) else {
            return Ok(None);
        };
        let other = self.blocking(move |db| db.get_user(other_id)).await?;
        Ok(other.map(|u| u.display_label()))
    }

    /// Append a message and fan it out.
    ///
    /// The insert and the chat's `last_update` bump share one transaction;
    /// the unread rule then runs (sender's side clears, the other side gains
    /// one); the broadcast goes out only after the append is durable, which
    /// makes append the single ordering point for a chat's subscribers.
    pub async fn send_message(
        &self,
        chat: &Chat,
        sender: &User,
        body: MessageBody,
        chat_title: Option<String>,
    ) -> Result<ChatMessage, ChatError> {
        let side = chat.side_of(sender.id).ok_or(ChatError::NotFound)?;
        let chat_id = chat.id;
        let author_id = sender.id;
        let now = Utc::now().timestamp_millis();

        let message = self
            .blocking(move |db| {
                let message =
                    db.insert_message(chat_id, author_id, &body.text, body.image.as_deref(), now)?;
                db.clear_unread(chat_id, side)?;
                db.increment_unread(chat_id, side.other())?;
                Ok(message)
            })
            .await?;

        self.events
            .publish(
                chat_id,
                GatewayEvent::Chat {
                    id: message.id,
                    chat_id,
                    chat_title,
                    timestamp: message.timestamp,
                    author_id,
                    author_name: sender.display_label(),
                    message: message.message.clone(),
                    image: message.image.clone(),
                },
            )
            .await;

        Ok(message)
    }

    /// One page of history, newest first; `before` is the keyset cursor.
    pub async fn page_messages(
        &self,
        chat: &Chat,
        before: Option<i64>,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let chat_id = chat.id;
        self.blocking(move |db| db.page_messages(chat_id, MESSAGE_PAGE_SIZE, before))
            .await
    }

    /// Clear the acting user's unread counter. No-op for non-participants.
    pub async fn mark_read(&self, chat: &Chat, user: &User) -> Result<(), ChatError> {
        let Some(side) = chat.side_of(user.id) else {
            return Ok(());
        };
        let chat_id = chat.id;
        self.blocking(move |db| db.clear_unread(chat_id, side)).await
    }

    /// Sum of unread messages across all the user's chats.
    pub async fn total_unread(&self, user: &User) -> Result<u64, ChatError> {
        let user_id = user.id;
        self.blocking(move |db| db.total_unread(user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CollectorSink {
        events: Mutex<Vec<(i64, GatewayEvent)>>,
    }

    impl CollectorSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn take(&self) -> Vec<(i64, GatewayEvent)> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    #[async_trait]
    impl EventSink for CollectorSink {
        async fn publish(&self, chat_id: i64, event: GatewayEvent) {
            self.events.lock().unwrap().push((chat_id, event));
        }
    }

    fn seed(db: &Database) {
        db.with_conn_mut(|conn| {
            conn.execute_batch(
                "INSERT INTO users (id, first_name, last_name) VALUES
                     (1, 'Ana', 'Reyes'), (2, 'Ben', 'Kato'), (3, 'Cho', 'Lee');
                 INSERT INTO posts (id, title, author_id, archived) VALUES
                     (42, 'Vintage bike', 1, 0);",
            )?;
            Ok(())
        })
        .unwrap();
    }

    fn setup() -> (ChatService, Arc<Database>, Arc<CollectorSink>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        seed(&db);
        let sink = CollectorSink::new();
        let service = ChatService::new(db.clone(), sink.clone());
        (service, db, sink)
    }

    fn user(db: &Database, id: i64) -> User {
        db.get_user(id).unwrap().unwrap()
    }

    fn post(db: &Database, id: i64) -> Post {
        db.get_post(id).unwrap().unwrap()
    }

    #[tokio::test]
    async fn buyer_seller_unread_scenario() {
        let (service, db, _sink) = setup();
        let seller = user(&db, 1);
        let buyer = user(&db, 2);
        let post = post(&db, 42);

        // buyer opens the conversation
        let chat = service.find_or_create_chat(&buyer, &post).await.unwrap();
        assert_eq!(chat.seller_id, 1);
        assert_eq!(chat.buyer_id, 2);
        service
            .send_message(&chat, &buyer, MessageBody::text("Is this available?"), None)
            .await
            .unwrap();

        let chat = db.get_chat(chat.id).unwrap().unwrap();
        assert_eq!(chat.seller_unread, 1);
        assert_eq!(chat.buyer_unread, 0);

        // seller reads
        service.mark_read(&chat, &seller).await.unwrap();
        let chat = db.get_chat(chat.id).unwrap().unwrap();
        assert_eq!(chat.seller_unread, 0);

        // seller replies
        service
            .send_message(&chat, &seller, MessageBody::text("It is!"), None)
            .await
            .unwrap();
        let chat = db.get_chat(chat.id).unwrap().unwrap();
        assert_eq!(chat.seller_unread, 0);
        assert_eq!(chat.buyer_unread, 1);

        assert_eq!(service.total_unread(&buyer).await.unwrap(), 1);
        assert_eq!(service.total_unread(&seller).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn resend_clears_own_side_even_if_never_read() {
        let (service, db, _sink) = setup();
        let seller = user(&db, 1);
        let buyer = user(&db, 2);
        let post = post(&db, 42);

        let chat = service.find_or_create_chat(&buyer, &post).await.unwrap();
        service
            .send_message(&chat, &buyer, MessageBody::text("hello?"), None)
            .await
            .unwrap();
        service
            .send_message(&chat, &buyer, MessageBody::text("anyone?"), None)
            .await
            .unwrap();

        let chat = db.get_chat(chat.id).unwrap().unwrap();
        assert_eq!(chat.seller_unread, 2);

        // the seller's own send clears the seller side without any read
        service
            .send_message(&chat, &seller, MessageBody::text("here"), None)
            .await
            .unwrap();
        let chat = db.get_chat(chat.id).unwrap().unwrap();
        assert_eq!(chat.seller_unread, 0);
        assert_eq!(chat.buyer_unread, 1);
    }

    #[tokio::test]
    async fn send_publishes_the_persisted_message() {
        let (service, db, sink) = setup();
        let buyer = user(&db, 2);
        let post = post(&db, 42);

        let chat = service.find_or_create_chat(&buyer, &post).await.unwrap();
        let sent = service
            .send_message(
                &chat,
                &buyer,
                MessageBody::text("Is this available?"),
                Some(post.title.clone()),
            )
            .await
            .unwrap();

        let events = sink.take();
        assert_eq!(events.len(), 1);
        let (room, event) = &events[0];
        assert_eq!(*room, chat.id);
        match event {
            GatewayEvent::Chat {
                id,
                chat_id,
                chat_title,
                author_id,
                author_name,
                message,
                image,
                ..
            } => {
                assert_eq!(*id, sent.id);
                assert_eq!(*chat_id, chat.id);
                assert_eq!(chat_title.as_deref(), Some("Vintage bike"));
                assert_eq!(*author_id, buyer.id);
                assert_eq!(author_name, "Ben K.");
                assert_eq!(message, "Is this available?");
                assert!(image.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn image_sends_carry_empty_text() {
        let (service, db, sink) = setup();
        let buyer = user(&db, 2);
        let post = post(&db, 42);

        let chat = service.find_or_create_chat(&buyer, &post).await.unwrap();
        let seller = user(&db, 1);
        let sent = service
            .send_message(
                &chat,
                &seller,
                MessageBody::image("https://cdn.example/messages/1/1.png"),
                None,
            )
            .await
            .unwrap();

        assert_eq!(sent.message, "");
        assert_eq!(
            sent.image.as_deref(),
            Some("https://cdn.example/messages/1/1.png")
        );
        let events = sink.take();
        assert!(matches!(
            &events[0].1,
            GatewayEvent::Chat { image: Some(_), .. }
        ));
    }

    #[tokio::test]
    async fn find_chat_hides_existence_from_non_participants() {
        let (service, db, _sink) = setup();
        let buyer = user(&db, 2);
        let outsider = user(&db, 3);
        let post = post(&db, 42);

        let chat = service.find_or_create_chat(&buyer, &post).await.unwrap();

        assert!(service.find_chat(&buyer, chat.id).await.unwrap().is_some());
        assert!(service.find_chat(&outsider, chat.id).await.unwrap().is_none());
        assert!(service.find_chat(&buyer, 9_999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recipient_name_resolves_the_other_side() {
        let (service, db, _sink) = setup();
        let seller = user(&db, 1);
        let buyer = user(&db, 2);
        let outsider = user(&db, 3);
        let post = post(&db, 42);

        let chat = service.find_or_create_chat(&buyer, &post).await.unwrap();

        assert_eq!(
            service.recipient_name(&chat, &buyer).await.unwrap().as_deref(),
            Some("Ana R.")
        );
        assert_eq!(
            service.recipient_name(&chat, &seller).await.unwrap().as_deref(),
            Some("Ben K.")
        );
        assert!(service.recipient_name(&chat, &outsider).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_read_is_a_noop_for_non_participants() {
        let (service, db, _sink) = setup();
        let buyer = user(&db, 2);
        let outsider = user(&db, 3);
        let post = post(&db, 42);

        let chat = service.find_or_create_chat(&buyer, &post).await.unwrap();
        service
            .send_message(&chat, &buyer, MessageBody::text("hi"), None)
            .await
            .unwrap();

        service.mark_read(&chat, &outsider).await.unwrap();
        let chat = db.get_chat(chat.id).unwrap().unwrap();
        assert_eq!(chat.seller_unread, 1);
    }

    #[tokio::test]
    async fn page_messages_returns_newest_page() {
        let (service, db, _sink) = setup();
        let buyer = user(&db, 2);
        let post = post(&db, 42);

        let chat = service.find_or_create_chat(&buyer, &post).await.unwrap();
        for i in 0..30 {
            service
                .send_message(&chat, &buyer, MessageBody::text(format!("msg {}", i)), None)
                .await
                .unwrap();
        }

        let first = service.page_messages(&chat, None).await.unwrap();
        assert_eq!(first.len(), 25);
        assert_eq!(first[0].message, "msg 29");

        let cursor = first.last().unwrap().id;
        let rest = service.page_messages(&chat, Some(cursor)).await.unwrap();
        assert_eq!(rest.len(), 5);
        assert_eq!(rest[0].message, "msg 4");
    }
}
