//! Binding of one live connection to one room.
//!
//! `Disconnected -> Connecting -> Joined(room) -> Disconnected`.
//!
//! Entering a room registers presence before subscribing, so the user is
//! countable before any broadcast can reach them. Leaving unsubscribes before
//! removing presence. A dropped [`Connection`] that is still joined releases
//! itself on a spawned task, so a transport that closes without a leave
//! signal still ends up `Disconnected`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastEvent, Broadcaster};
use crate::directory::Directory;
use crate::error::{ChatError, ChatResult};
use crate::guard;
use crate::ids::{ConnectionId, RoomId, UserId};
use crate::presence::PresenceStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Joined(RoomId),
}

pub type EventReceiver = mpsc::Receiver<Arc<BroadcastEvent>>;

pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    state: ConnectionState,

    directory: Arc<dyn Directory>,
    presence: PresenceStore,
    broadcaster: Broadcaster,
}

impl Connection {
    pub fn new(
        user_id: UserId,
        directory: Arc<dyn Directory>,
        presence: PresenceStore,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            id: ConnectionId::generate(),
            user_id,
            state: ConnectionState::Disconnected,
            directory,
            presence,
            broadcaster,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Authorizes and joins `room_id`, leaving any room currently held.
    /// On rejection the connection is back to `Disconnected` and was never
    /// registered as present.
    pub async fn join(&mut self, room_id: &RoomId) -> ChatResult<EventReceiver> {
        self.leave().await;
        self.state = ConnectionState::Connecting;

        match self.enter(room_id).await {
            Ok(rx) => {
                self.state = ConnectionState::Joined(room_id.clone());
                info!(room = %room_id, user = %self.user_id, conn = %self.id, "joined");
                Ok(rx)
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                debug!(room = %room_id, user = %self.user_id, error = %e, "join rejected");
                Err(e)
            }
        }
    }

    async fn enter(&self, room_id: &RoomId) -> ChatResult<EventReceiver> {
        let mut room = self
            .directory
            .resolve_room(room_id)
            .await?
            .ok_or_else(|| ChatError::RoomNotFound(room_id.clone()))?;
        guard::admit(self.directory.as_ref(), &mut room, &self.user_id).await?;

        if let Err(e) = self.presence.join(room_id, &self.user_id).await {
            warn!(room = %room_id, user = %self.user_id, error = %e, "presence join dropped");
        }
        Ok(self.broadcaster.subscribe(room_id, self.id, &self.user_id).await)
    }

    /// Leaves the current room, if any. Safe to call in any state.
    pub async fn leave(&mut self) {
        let state = std::mem::replace(&mut self.state, ConnectionState::Disconnected);
        if let ConnectionState::Joined(room_id) = state {
            release(&self.broadcaster, &self.presence, &room_id, self.id, &self.user_id).await;
            info!(room = %room_id, user = %self.user_id, conn = %self.id, "left");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let ConnectionState::Joined(room_id) = std::mem::replace(&mut self.state, ConnectionState::Disconnected) else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(room = %room_id, conn = %self.id, "connection dropped outside a runtime, presence not released");
            return;
        };

        let (broadcaster, presence) = (self.broadcaster.clone(), self.presence.clone());
        let (conn_id, user_id) = (self.id, self.user_id.clone());
        handle.spawn(async move {
            release(&broadcaster, &presence, &room_id, conn_id, &user_id).await;
            info!(room = %room_id, user = %user_id, conn = %conn_id, "released dropped connection");
        });
    }
}

async fn release(
    broadcaster: &Broadcaster,
    presence: &PresenceStore,
    room_id: &RoomId,
    conn_id: ConnectionId,
    user_id: &UserId,
) {
    let remaining = broadcaster.unsubscribe(room_id, &conn_id, user_id).await;
    // the user stays online while another of their connections is still in the room
    if remaining > 0 {
        debug!(room = %room_id, user = %user_id, remaining, "user still connected elsewhere");
        return;
    }
    if let Err(e) = presence.leave(room_id, user_id).await {
        warn!(room = %room_id, user = %user_id, error = %e, "presence leave dropped");
    }
}
