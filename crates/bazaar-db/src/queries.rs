use crate::Database;
use anyhow::{Result, anyhow};
use bazaar_types::models::{Chat, ChatMessage, Post, Side, User};
use rusqlite::{Connection, OptionalExtension, Row};

fn unread_column(side: Side) -> &'static str {
    match side {
        Side::Seller => "seller_unread",
        Side::Buyer => "buyer_unread",
    }
}

impl Database {
    // -- Users (directory projection, read-only) --

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, first_name, last_name FROM users WHERE id = ?1",
                    [id],
                    map_user,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Batch-fetch users for a set of ids.
    pub fn get_users_by_ids(&self, ids: &[i64]) -> Result<Vec<User>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, first_name, last_name FROM users WHERE id IN ({})",
                placeholders.join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();
            let rows = stmt
                .query_map(params.as_slice(), map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Posts (listings projection, read-only) --

    pub fn get_post(&self, id: i64) -> Result<Option<Post>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, title, author_id, archived FROM posts WHERE id = ?1",
                    [id],
                    map_post,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Batch-fetch posts for a set of ids.
    pub fn get_posts_by_ids(&self, ids: &[i64]) -> Result<Vec<Post>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, title, author_id, archived FROM posts WHERE id IN ({})",
                placeholders.join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();
            let rows = stmt
                .query_map(params.as_slice(), map_post)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Chats --

    pub fn get_chat(&self, id: i64) -> Result<Option<Chat>> {
        self.with_conn(|conn| query_chat(conn, id))
    }

    /// Look up the chat for `(buyer, post)`, creating it if absent.
    ///
    /// The partial unique index on `chats(buyer_id, post_id)` makes the
    /// insert conditional; a concurrent creator wins the race and the
    /// re-read below returns its row.
    pub fn find_or_create_chat(&self, buyer_id: i64, post: &Post, now_ms: i64) -> Result<Chat> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if let Some(chat) = query_chat_by_buyer_post(&tx, buyer_id, post.id)? {
                tx.commit()?;
                return Ok(chat);
            }

            tx.execute(
                "INSERT OR IGNORE INTO chats (post_id, seller_id, buyer_id, last_update)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![post.id, post.author_id, buyer_id, now_ms],
            )?;

            let chat = query_chat_by_buyer_post(&tx, buyer_id, post.id)?
                .ok_or_else(|| anyhow!("chat missing after insert for post {}", post.id))?;
            tx.commit()?;
            Ok(chat)
        })
    }

    /// All chats where the user is seller or buyer, newest activity first.
    pub fn list_chats_for_user(&self, user_id: i64) -> Result<Vec<Chat>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, post_id, seller_id, buyer_id, last_update, seller_unread, buyer_unread
                 FROM chats
                 WHERE seller_id = ?1 OR buyer_id = ?1
                 ORDER BY last_update DESC, id DESC",
            )?;
            let rows = stmt
                .query_map([user_id], map_chat)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Insert a message and bump the owning chat's `last_update` to the same
    /// timestamp in one transaction, so no reader observes a chat whose
    /// `last_update` predates its newest message.
    pub fn insert_message(
        &self,
        chat_id: i64,
        author_id: i64,
        message: &str,
        image: Option<&str>,
        timestamp: i64,
    ) -> Result<ChatMessage> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO chat_messages (chat_id, author_id, message, image, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![chat_id, author_id, message, image, timestamp],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE chats SET last_update = ?1 WHERE id = ?2",
                rusqlite::params![timestamp, chat_id],
            )?;
            tx.commit()?;

            Ok(ChatMessage {
                id,
                chat_id,
                author_id,
                message: message.to_string(),
                image: image.map(str::to_string),
                timestamp,
            })
        })
    }

    /// Keyset-paginated history: up to `limit` messages, newest first,
    /// strictly older than `before` when supplied. Stable under concurrent
    /// inserts, unlike offset pagination.
    pub fn page_messages(
        &self,
        chat_id: i64,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<ChatMessage>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, chat_id, author_id, message, image, timestamp
                 FROM chat_messages
                 WHERE chat_id = ?1 AND (?2 IS NULL OR id < ?2)
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![chat_id, before, limit], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Unread counters --

    pub fn clear_unread(&self, chat_id: i64, side: Side) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!("UPDATE chats SET {} = 0 WHERE id = ?1", unread_column(side)),
                [chat_id],
            )?;
            Ok(())
        })
    }

    /// Single atomic increment; never a read-then-write in app code, so
    /// concurrent sends can't lose updates.
    pub fn increment_unread(&self, chat_id: i64, side: Side) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "UPDATE chats SET {col} = {col} + 1 WHERE id = ?1",
                    col = unread_column(side)
                ),
                [chat_id],
            )?;
            Ok(())
        })
    }

    /// Sum of the user's side of the counter across all their chats.
    pub fn total_unread(&self, user_id: i64) -> Result<u64> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COALESCE(SUM(CASE WHEN seller_id = ?1 THEN seller_unread
                                          ELSE buyer_unread END), 0)
                 FROM chats
                 WHERE seller_id = ?1 OR buyer_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(total as u64)
        })
    }
}

fn query_chat(conn: &Connection, id: i64) -> Result<Option<Chat>> {
    let row = conn
        .query_row(
            "SELECT id, post_id, seller_id, buyer_id, last_update, seller_unread, buyer_unread
             FROM chats WHERE id = ?1",
            [id],
            map_chat,
        )
        .optional()?;
    Ok(row)
}

fn query_chat_by_buyer_post(conn: &Connection, buyer_id: i64, post_id: i64) -> Result<Option<Chat>> {
    let row = conn
        .query_row(
            "SELECT id, post_id, seller_id, buyer_id, last_update, seller_unread, buyer_unread
             FROM chats WHERE buyer_id = ?1 AND post_id = ?2",
            [buyer_id, post_id],
            map_chat,
        )
        .optional()?;
    Ok(row)
}

fn map_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
    })
}

fn map_post(row: &Row) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        title: row.get(1)?,
        author_id: row.get(2)?,
        archived: row.get(3)?,
    })
}

fn map_chat(row: &Row) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: row.get(0)?,
        post_id: row.get(1)?,
        seller_id: row.get(2)?,
        buyer_id: row.get(3)?,
        last_update: row.get(4)?,
        seller_unread: row.get(5)?,
        buyer_unread: row.get(6)?,
    })
}

fn map_message(row: &Row) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        author_id: row.get(2)?,
        message: row.get(3)?,
        image: row.get(4)?,
        timestamp: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Seeds two users (1: seller Ana R., 2: buyer Ben K.) and one post
    /// (42, owned by the seller). Provisioning is raw SQL because user and
    /// listing rows belong to out-of-scope services.
    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.with_conn_mut(|conn| {
            conn.execute_batch(
                "INSERT INTO users (id, first_name, last_name) VALUES
                     (1, 'Ana', 'Reyes'), (2, 'Ben', 'Kato');
                 INSERT INTO posts (id, title, author_id, archived) VALUES
                     (42, 'Vintage bike', 1, 0);",
            )?;
            Ok(())
        })
        .unwrap();
        db
    }

    fn post(db: &Database) -> Post {
        db.get_post(42).unwrap().unwrap()
    }

    #[test]
    fn find_or_create_is_idempotent_per_buyer_post() {
        let db = test_db();
        let post = post(&db);

        let first = db.find_or_create_chat(2, &post, 1_000).unwrap();
        let second = db.find_or_create_chat(2, &post, 2_000).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.seller_id, 1);
        assert_eq!(first.buyer_id, 2);
        // the existing chat is returned untouched
        assert_eq!(second.last_update, 1_000);
        assert_eq!(db.list_chats_for_user(2).unwrap().len(), 1);
    }

    #[test]
    fn insert_message_bumps_last_update() {
        let db = test_db();
        let chat = db.find_or_create_chat(2, &post(&db), 1_000).unwrap();

        let msg = db
            .insert_message(chat.id, 2, "Is this available?", None, 5_000)
            .unwrap();

        assert_eq!(msg.chat_id, chat.id);
        let reloaded = db.get_chat(chat.id).unwrap().unwrap();
        assert_eq!(reloaded.last_update, 5_000);
    }

    #[test]
    fn pagination_is_disjoint_and_contiguous() {
        let db = test_db();
        let chat = db.find_or_create_chat(2, &post(&db), 0).unwrap();
        for i in 0..30 {
            db.insert_message(chat.id, 2, &format!("msg {}", i), None, 1_000 + i)
                .unwrap();
        }

        let first = db.page_messages(chat.id, 25, None).unwrap();
        assert_eq!(first.len(), 25);
        // newest first
        assert_eq!(first[0].message, "msg 29");
        assert_eq!(first[24].message, "msg 5");

        let cursor = first.last().unwrap().id;
        let second = db.page_messages(chat.id, 25, Some(cursor)).unwrap();
        assert_eq!(second.len(), 5);
        assert_eq!(second[0].message, "msg 4");
        assert_eq!(second[4].message, "msg 0");

        // strictly older, no overlap
        assert!(second.iter().all(|m| m.id < cursor));
    }

    #[test]
    fn pagination_is_stable_under_new_inserts() {
        let db = test_db();
        let chat = db.find_or_create_chat(2, &post(&db), 0).unwrap();
        for i in 0..10 {
            db.insert_message(chat.id, 2, &format!("old {}", i), None, 1_000 + i)
                .unwrap();
        }

        let first = db.page_messages(chat.id, 5, None).unwrap();
        let cursor = first.last().unwrap().id;

        // new messages arrive between page fetches
        db.insert_message(chat.id, 1, "new", None, 9_000).unwrap();

        let second = db.page_messages(chat.id, 5, Some(cursor)).unwrap();
        let first_ids: Vec<i64> = first.iter().map(|m| m.id).collect();
        assert!(second.iter().all(|m| !first_ids.contains(&m.id)));
        assert!(second.iter().all(|m| m.message.starts_with("old")));
    }

    #[test]
    fn unread_counters_update_atomically() {
        let db = test_db();
        let chat = db.find_or_create_chat(2, &post(&db), 0).unwrap();

        db.increment_unread(chat.id, Side::Seller).unwrap();
        db.increment_unread(chat.id, Side::Seller).unwrap();
        db.increment_unread(chat.id, Side::Buyer).unwrap();

        let reloaded = db.get_chat(chat.id).unwrap().unwrap();
        assert_eq!(reloaded.seller_unread, 2);
        assert_eq!(reloaded.buyer_unread, 1);

        db.clear_unread(chat.id, Side::Seller).unwrap();
        let reloaded = db.get_chat(chat.id).unwrap().unwrap();
        assert_eq!(reloaded.seller_unread, 0);
        // clearing one side never touches the other
        assert_eq!(reloaded.buyer_unread, 1);
    }

    #[test]
    fn total_unread_sums_the_users_side() {
        let db = test_db();
        db.with_conn_mut(|conn| {
            conn.execute_batch(
                "INSERT INTO users (id, first_name, last_name) VALUES (3, 'Cho', 'Lee');
                 INSERT INTO posts (id, title, author_id, archived) VALUES (43, 'Desk', 3, 0);",
            )?;
            Ok(())
        })
        .unwrap();

        // user 2 buys on both posts; sellers are 1 and 3
        let a = db.find_or_create_chat(2, &db.get_post(42).unwrap().unwrap(), 0).unwrap();
        let b = db.find_or_create_chat(2, &db.get_post(43).unwrap().unwrap(), 0).unwrap();

        db.increment_unread(a.id, Side::Buyer).unwrap();
        db.increment_unread(b.id, Side::Buyer).unwrap();
        db.increment_unread(b.id, Side::Buyer).unwrap();
        db.increment_unread(a.id, Side::Seller).unwrap();

        assert_eq!(db.total_unread(2).unwrap(), 3);
        assert_eq!(db.total_unread(1).unwrap(), 1);
        assert_eq!(db.total_unread(3).unwrap(), 0);
    }

    #[test]
    fn batch_lookups_handle_empty_and_missing_ids() {
        let db = test_db();
        assert!(db.get_posts_by_ids(&[]).unwrap().is_empty());
        let posts = db.get_posts_by_ids(&[42, 999]).unwrap();
        assert_eq!(posts.len(), 1);
        let users = db.get_users_by_ids(&[1, 2]).unwrap();
        assert_eq!(users.len(), 2);
    }
}
