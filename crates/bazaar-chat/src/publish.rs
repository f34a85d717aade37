use async_trait::async_trait;
use bazaar_types::events::GatewayEvent;

/// Capability to push an event to every live session subscribed to a chat's
/// room. Implemented by the connection layer and injected into
/// [`ChatService`](crate::ChatService), so the chat core never depends on
/// the concrete connection manager.
///
/// Delivery is best-effort per session: a slow or disconnected session must
/// not block the publisher or its peers.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, chat_id: i64, event: GatewayEvent);
}
