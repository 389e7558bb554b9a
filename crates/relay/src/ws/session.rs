use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use cowatch_common::protocol::ws::ServerEvent;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::rooms::RoomKey;

pub(crate) const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
pub(crate) const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(45);

/// Live WebSocket connections and their room subscriptions.
///
/// Each connection owns an unbounded outbound queue drained by its socket
/// task; emitting never awaits the socket itself.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<Uuid, ConnectionRecord>>>,
}

#[derive(Debug)]
struct ConnectionRecord {
    user_id: Option<Uuid>,
    outbound: mpsc::UnboundedSender<ServerEvent>,
    rooms: HashSet<RoomKey>,
}

impl ConnectionRegistry {
    pub(crate) async fn register(
        &self,
        connection_id: Uuid,
        outbound: mpsc::UnboundedSender<ServerEvent>,
    ) {
        self.connections
            .write()
            .await
            .insert(connection_id, ConnectionRecord { user_id: None, outbound, rooms: HashSet::new() });
    }

    pub(crate) async fn mark_authenticated(&self, connection_id: Uuid, user_id: Uuid) -> bool {
        match self.connections.write().await.get_mut(&connection_id) {
            Some(record) => {
                record.user_id = Some(user_id);
                true
            }
            None => false,
        }
    }

    pub(crate) async fn user_for_connection(&self, connection_id: Uuid) -> Option<Uuid> {
        self.connections.read().await.get(&connection_id).and_then(|record| record.user_id)
    }

    /// Removes the connection and returns the rooms it was still in.
    pub(crate) async fn unregister(&self, connection_id: Uuid) -> Vec<RoomKey> {
        self.connections
            .write()
            .await
            .remove(&connection_id)
            .map(|record| record.rooms.into_iter().collect())
            .unwrap_or_default()
    }

    pub(crate) async fn join_room(&self, connection_id: Uuid, room: RoomKey) -> bool {
        match self.connections.write().await.get_mut(&connection_id) {
            Some(record) => {
                record.rooms.insert(room);
                true
            }
            None => false,
        }
    }

    pub(crate) async fn leave_room(&self, connection_id: Uuid, room: RoomKey) -> bool {
        self.connections
            .write()
            .await
            .get_mut(&connection_id)
            .is_some_and(|record| record.rooms.remove(&room))
    }

    pub(crate) async fn leave_all_rooms(&self, connection_id: Uuid) -> usize {
        self.connections
            .write()
            .await
            .get_mut(&connection_id)
            .map(|record| {
                let left = record.rooms.len();
                record.rooms.clear();
                left
            })
            .unwrap_or(0)
    }

    pub(crate) async fn rooms_for_connection(&self, connection_id: Uuid) -> Vec<RoomKey> {
        let mut rooms: Vec<RoomKey> = self
            .connections
            .read()
            .await
            .get(&connection_id)
            .map(|record| record.rooms.iter().copied().collect())
            .unwrap_or_default();
        rooms.sort_by_key(|room| room.to_string());
        rooms
    }

    pub(crate) async fn send_to(&self, connection_id: Uuid, event: ServerEvent) -> bool {
        let sender = self
            .connections
            .read()
            .await
            .get(&connection_id)
            .map(|record| record.outbound.clone());
        sender.is_some_and(|sender| sender.send(event).is_ok())
    }

    /// Queues `event` for every connection in `room` except `exclude`.
    /// Returns how many connections accepted it.
    pub(crate) async fn broadcast(
        &self,
        room: RoomKey,
        event: ServerEvent,
        exclude: Option<Uuid>,
    ) -> usize {
        let mut recipients = Vec::new();
        {
            let guard = self.connections.read().await;
            for (connection_id, record) in guard.iter() {
                if Some(*connection_id) == exclude || !record.rooms.contains(&room) {
                    continue;
                }
                recipients.push(record.outbound.clone());
            }
        }

        let mut sent_count = 0;
        for recipient in recipients {
            if recipient.send(event.clone()).is_ok() {
                sent_count += 1;
            }
        }

        sent_count
    }

    pub(crate) async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
