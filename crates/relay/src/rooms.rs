// Room-based fan-out over the live connection registry.

use std::fmt;

use cowatch_common::protocol::ws::ServerEvent;
use tracing::debug;
use uuid::Uuid;

use crate::ws::session::ConnectionRegistry;

/// A broadcast room: everyone watching a video, or the members of one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKey {
    Video(Uuid),
    Group(Uuid),
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video(video_id) => write!(f, "timeline:video:{video_id}"),
            Self::Group(group_id) => write!(f, "timeline:group:{group_id}"),
        }
    }
}

/// Where an event goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Room(RoomKey),
    RoomExcept(RoomKey, Uuid),
    Connection(Uuid),
}

/// Join/leave/emit over rooms. Holds no state of its own; membership lives in
/// the connection registry.
#[derive(Debug, Clone, Default)]
pub struct RoomRouter {
    connections: ConnectionRegistry,
}

impl RoomRouter {
    pub fn new(connections: ConnectionRegistry) -> Self {
        Self { connections }
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub async fn join_room(&self, connection_id: Uuid, room: RoomKey) {
        if !self.connections.join_room(connection_id, room).await {
            debug!(connection_id = %connection_id, room = %room, "join for unknown connection ignored");
        }
    }

    pub async fn leave_room(&self, connection_id: Uuid, room: RoomKey) {
        self.connections.leave_room(connection_id, room).await;
    }

    pub async fn leave_all_rooms(&self, connection_id: Uuid) {
        self.connections.leave_all_rooms(connection_id).await;
    }

    /// Queues the event for its target. Returns the number of recipients.
    pub async fn emit(&self, target: Target, event: ServerEvent) -> usize {
        match target {
            Target::Room(room) => self.connections.broadcast(room, event, None).await,
            Target::RoomExcept(room, excluded) => {
                self.connections.broadcast(room, event, Some(excluded)).await
            }
            Target::Connection(connection_id) => {
                usize::from(self.connections.send_to(connection_id, event).await)
            }
        }
    }
}
