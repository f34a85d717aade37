use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use bazaar_chat::EventSink;
use bazaar_types::events::GatewayEvent;

/// Owns the fan-out state: which sessions are live and which room each one
/// has joined. Cheap to clone; all clones share the same maps.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Per-session outbound channels. Unbounded so a slow consumer can never
    /// block a publisher; a dead receiver just drops sends on the floor
    /// until the session is removed.
    sessions: RwLock<HashMap<Uuid, mpsc::UnboundedSender<GatewayEvent>>>,

    /// Room membership: chat id -> subscribed sessions.
    rooms: RwLock<HashMap<i64, HashSet<Uuid>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                sessions: RwLock::new(HashMap::new()),
                rooms: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a new session. Returns its id and the receiving end of its
    /// outbound channel.
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.sessions.write().await.insert(session_id, tx);
        (session_id, rx)
    }

    /// Send a targeted event to one session (acks, errors).
    pub async fn send_to_session(&self, session_id: Uuid, event: GatewayEvent) {
        let sessions = self.inner.sessions.read().await;
        if let Some(tx) = sessions.get(&session_id) {
            let _ = tx.send(event);
        }
    }

    /// Subscribe a session to a chat's room. The caller has already proven
    /// chat membership.
    pub async fn join_room(&self, chat_id: i64, session_id: Uuid) {
        self.inner
            .rooms
            .write()
            .await
            .entry(chat_id)
            .or_default()
            .insert(session_id);
    }

    /// Subscribe a session to several rooms at once (post-auth auto-join).
    pub async fn join_rooms(&self, chat_ids: &[i64], session_id: Uuid) {
        let mut rooms = self.inner.rooms.write().await;
        for &chat_id in chat_ids {
            rooms.entry(chat_id).or_default().insert(session_id);
        }
    }

    /// Drop a session and every room membership it holds. Idempotent; safe
    /// to call at any point of the connection lifecycle.
    pub async fn remove_session(&self, session_id: Uuid) {
        self.inner.sessions.write().await.remove(&session_id);

        let mut rooms = self.inner.rooms.write().await;
        for members in rooms.values_mut() {
            members.remove(&session_id);
        }
        rooms.retain(|_, members| !members.is_empty());
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for Dispatcher {
    /// Deliver an event to every member of the chat's room. Best-effort per
    /// session: sends to closed channels are ignored.
    async fn publish(&self, chat_id: i64, event: GatewayEvent) {
        let members = match self.inner.rooms.read().await.get(&chat_id) {
            Some(members) => members.clone(),
            None => return,
        };

        let sessions = self.inner.sessions.read().await;
        for session_id in &members {
            if let Some(tx) = sessions.get(session_id) {
                let _ = tx.send(event.clone());
            }
        }
    }
}
