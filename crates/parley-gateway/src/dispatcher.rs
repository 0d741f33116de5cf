use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use parley_types::events::GatewayEvent;

/// Owns the room registry: which live connections are subscribed to which
/// conversation. Purely ephemeral routing state: rebuilt from join commands
/// after a restart, the persistent store stays the source of truth.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// conversation_id -> connection ids currently in the room.
    /// Lock order: `rooms` before `senders`.
    rooms: RwLock<HashMap<Uuid, HashSet<Uuid>>>,

    /// connection id -> outbound event channel
    senders: RwLock<HashMap<Uuid, mpsc::UnboundedSender<GatewayEvent>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                rooms: RwLock::new(HashMap::new()),
                senders: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a connection. Returns (conn_id, receiver); the connection
    /// task drains the receiver into its socket.
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.senders.write().await.insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Add the connection to a conversation's room. Idempotent.
    pub async fn join(&self, conn_id: Uuid, conversation_id: Uuid) {
        self.inner
            .rooms
            .write()
            .await
            .entry(conversation_id)
            .or_default()
            .insert(conn_id);
    }

    /// Fire-and-forget fan-out to every connection in the room. Returns the
    /// number of connections the event was handed to; connections whose
    /// receiver is gone are pruned from the room on the way through.
    pub async fn emit(&self, conversation_id: Uuid, event: GatewayEvent) -> usize {
        let mut rooms = self.inner.rooms.write().await;
        let Some(members) = rooms.get_mut(&conversation_id) else {
            debug!("emit into empty room {}", conversation_id);
            return 0;
        };

        let senders = self.inner.senders.read().await;
        let mut delivered = 0;
        members.retain(|conn_id| match senders.get(conn_id) {
            Some(tx) if tx.send(event.clone()).is_ok() => {
                delivered += 1;
                true
            }
            _ => false,
        });

        if members.is_empty() {
            rooms.remove(&conversation_id);
        }
        delivered
    }

    /// Remove the connection from every room and drop its sender.
    pub async fn disconnect(&self, conn_id: Uuid) {
        let mut rooms = self.inner.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&conn_id);
            !members.is_empty()
        });
        self.inner.senders.write().await.remove(&conn_id);
    }

    pub async fn room_size(&self, conversation_id: Uuid) -> usize {
        self.inner
            .rooms
            .read()
            .await
            .get(&conversation_id)
            .map_or(0, |members| members.len())
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
