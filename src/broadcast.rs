//! Room-scoped fan-out to live connections.
//!
//! Each subscriber owns a bounded queue. Publishing never waits on a
//! subscriber: a full queue drops the new event for that subscriber only, and
//! a closed queue is pruned. There is no backlog, so a subscriber only sees
//! events published while it is subscribed.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::ids::{ConnectionId, MessageId, RoomId, UserId};

/// What happened. Carries only a reference; receivers resolve it against
/// message storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    #[serde(rename = "message_handler")]
    Message { message_id: MessageId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BroadcastEvent {
    #[serde(skip)]
    pub room_id: RoomId,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl BroadcastEvent {
    pub fn message(room_id: RoomId, message_id: MessageId) -> Self {
        Self {
            room_id,
            kind: EventKind::Message { message_id },
        }
    }

    pub fn to_json(&self) -> String {
        // a tagged enum of plain ids cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    /// Maximum number of queued events per subscriber.
    pub subscriber_queue_capacity: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: 64,
        }
    }
}

/// Outcome of one publish, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Subscribers whose queue was full.
    pub dropped: usize,
    /// Subscribers that had gone away; they are pruned.
    pub closed: usize,
}

#[derive(Debug)]
struct Subscriber {
    user_id: UserId,
    tx: mpsc::Sender<Arc<BroadcastEvent>>,
}

#[derive(Debug, Default)]
struct Registry {
    rooms: HashMap<RoomId, HashMap<ConnectionId, Subscriber>>,
    /// A connection is subscribed to at most one room.
    room_of: HashMap<ConnectionId, RoomId>,
}

impl Registry {
    fn remove(&mut self, room_id: &RoomId, conn_id: &ConnectionId) -> Option<Subscriber> {
        let subs = self.rooms.get_mut(room_id)?;
        let removed = subs.remove(conn_id)?;
        if subs.is_empty() {
            self.rooms.remove(room_id);
        }
        self.room_of.remove(conn_id);
        Some(removed)
    }

    fn live_connections(&self, room_id: &RoomId, user_id: &UserId) -> usize {
        self.rooms
            .get(room_id)
            .map(|subs| {
                subs.values()
                    .filter(|s| s.user_id == *user_id && !s.tx.is_closed())
                    .count()
            })
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct Broadcaster {
    inner: Arc<RwLock<Registry>>,
    cfg: BroadcasterConfig,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(BroadcasterConfig::default())
    }
}

impl Broadcaster {
    pub fn new(cfg: BroadcasterConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Registry::default())),
            cfg,
        }
    }

    /// Subscribes `conn_id` to `room_id`, moving it out of any other room.
    pub async fn subscribe(
        &self,
        room_id: &RoomId,
        conn_id: ConnectionId,
        user_id: &UserId,
    ) -> mpsc::Receiver<Arc<BroadcastEvent>> {
        let (tx, rx) = mpsc::channel(self.cfg.subscriber_queue_capacity.max(1));

        let mut reg = self.inner.write().await;
        if let Some(previous) = reg.room_of.get(&conn_id).cloned() {
            reg.remove(&previous, &conn_id);
            debug!(conn = %conn_id, room = %previous, "moved out of previous room");
        }
        let subs = reg.rooms.entry(room_id.clone()).or_default();
        subs.insert(
            conn_id,
            Subscriber {
                user_id: user_id.clone(),
                tx,
            },
        );
        debug!(room = %room_id, conn = %conn_id, subs = subs.len(), "subscribed");
        reg.room_of.insert(conn_id, room_id.clone());

        rx
    }

    /// Removes the subscription and returns how many live connections of
    /// `user_id` remain subscribed to the room. The count holds even when
    /// `conn_id` was already pruned by a publish. Queued, undelivered events
    /// for it are discarded.
    pub async fn unsubscribe(&self, room_id: &RoomId, conn_id: &ConnectionId, user_id: &UserId) -> usize {
        let mut reg = self.inner.write().await;
        let removed = reg.remove(room_id, conn_id).is_some();
        let remaining = reg.live_connections(room_id, user_id);
        debug!(room = %room_id, conn = %conn_id, removed, remaining, "unsubscribed");
        remaining
    }

    /// Drops the room's subscriptions, all of them or only those of
    /// `user_id`. Their receivers see the channel close. Returns how many
    /// were dropped.
    pub async fn evict(&self, room_id: &RoomId, user_id: Option<&UserId>) -> usize {
        let mut reg = self.inner.write().await;
        let conns: Vec<ConnectionId> = match reg.rooms.get(room_id) {
            Some(subs) => subs
                .iter()
                .filter(|(_, s)| user_id.is_none_or(|u| s.user_id == *u))
                .map(|(conn_id, _)| *conn_id)
                .collect(),
            None => return 0,
        };
        for conn_id in &conns {
            reg.remove(room_id, conn_id);
        }
        debug!(room = %room_id, evicted = conns.len(), "subscribers evicted");
        conns.len()
    }

    /// Hands `event` to every current subscriber of its room without waiting.
    pub async fn publish(&self, event: BroadcastEvent) -> PublishReport {
        let room_id = event.room_id.clone();
        let event = Arc::new(event);
        let mut report = PublishReport::default();
        let mut closed = Vec::new();
        {
            let reg = self.inner.read().await;
            let Some(subs) = reg.rooms.get(&room_id) else {
                return report;
            };
            for (conn_id, sub) in subs {
                match sub.tx.try_send(Arc::clone(&event)) {
                    Ok(()) => report.delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        report.dropped += 1;
                        debug!(room = %room_id, conn = %conn_id, "subscriber queue full, event dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        report.closed += 1;
                        closed.push(*conn_id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            let mut reg = self.inner.write().await;
            for conn_id in &closed {
                let still_closed = reg
                    .rooms
                    .get(&room_id)
                    .and_then(|subs| subs.get(conn_id))
                    .is_some_and(|s| s.tx.is_closed());
                if still_closed {
                    reg.remove(&room_id, conn_id);
                }
            }
            debug!(room = %room_id, pruned = closed.len(), "pruned closed subscribers");
        }

        report
    }

    pub async fn subscriber_count(&self, room_id: &RoomId) -> usize {
        let reg = self.inner.read().await;
        reg.rooms.get(room_id).map(HashMap::len).unwrap_or(0)
    }

    pub async fn room_of(&self, conn_id: &ConnectionId) -> Option<RoomId> {
        self.inner.read().await.room_of.get(conn_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    fn event(room: &str) -> (BroadcastEvent, MessageId) {
        let id = MessageId::generate();
        (BroadcastEvent::message(RoomId::from(room), id), id)
    }

    async fn recv(rx: &mut mpsc::Receiver<Arc<BroadcastEvent>>) -> Arc<BroadcastEvent> {
        timeout(Duration::from_millis(250), rx.recv())
            .await
            .expect("expected to receive within timeout")
            .expect("channel open")
    }

    #[test]
    fn wire_shape() {
        let (ev, id) = event("r");
        let json: serde_json::Value = serde_json::from_str(&ev.to_json()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "message_handler", "message_id": id.to_string() })
        );
        let back: EventKind = serde_json::from_value(json).unwrap();
        assert_eq!(back, ev.kind);
    }

    #[tokio::test]
    async fn publish_reaches_only_that_room() {
        let hub = Broadcaster::default();
        let (a, b) = (RoomId::from("a"), RoomId::from("b"));
        let mut rx_a1 = hub.subscribe(&a, ConnectionId::generate(), &UserId::from("u1")).await;
        let mut rx_a2 = hub.subscribe(&a, ConnectionId::generate(), &UserId::from("u2")).await;
        let mut rx_b = hub.subscribe(&b, ConnectionId::generate(), &UserId::from("u3")).await;

        let (ev, _) = event("a");
        let report = hub.publish(ev.clone()).await;
        assert_eq!(report.delivered, 2);

        assert_eq!(*recv(&mut rx_a1).await, ev);
        assert_eq!(*recv(&mut rx_a2).await, ev);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn no_replay_and_no_delivery_after_unsubscribe() {
        let hub = Broadcaster::default();
        let room = RoomId::from("r");
        let early = ConnectionId::generate();
        let mut rx_early = hub.subscribe(&room, early, &UserId::from("u1")).await;

        let (first, _) = event("r");
        hub.publish(first.clone()).await;

        let mut rx_late = hub.subscribe(&room, ConnectionId::generate(), &UserId::from("u2")).await;
        assert_eq!(*recv(&mut rx_early).await, first);
        assert!(rx_late.try_recv().is_err());

        assert_eq!(hub.unsubscribe(&room, &early, &UserId::from("u1")).await, 0);
        let (second, _) = event("r");
        hub.publish(second.clone()).await;
        assert_eq!(*recv(&mut rx_late).await, second);
        assert!(rx_early.recv().await.is_none());
    }

    #[tokio::test]
    async fn full_queue_drops_newest_without_blocking_others() {
        let hub = Broadcaster::new(BroadcasterConfig {
            subscriber_queue_capacity: 1,
        });
        let room = RoomId::from("r");
        let mut slow = hub.subscribe(&room, ConnectionId::generate(), &UserId::from("slow")).await;
        let mut fast = hub.subscribe(&room, ConnectionId::generate(), &UserId::from("fast")).await;

        let (e1, _) = event("r");
        let (e2, _) = event("r");
        hub.publish(e1.clone()).await;
        assert_eq!(*recv(&mut fast).await, e1);

        let report = hub.publish(e2.clone()).await;
        assert_eq!(report, PublishReport { delivered: 1, dropped: 1, closed: 0 });
        assert_eq!(*recv(&mut fast).await, e2);

        assert_eq!(*recv(&mut slow).await, e1);
        assert!(slow.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let hub = Broadcaster::default();
        let room = RoomId::from("r");
        let rx = hub.subscribe(&room, ConnectionId::generate(), &UserId::from("u")).await;
        drop(rx);

        let (ev, _) = event("r");
        let report = hub.publish(ev).await;
        assert_eq!(report.closed, 1);
        assert_eq!(hub.subscriber_count(&room).await, 0);
    }

    #[tokio::test]
    async fn connection_holds_one_room() {
        let hub = Broadcaster::default();
        let (a, b) = (RoomId::from("a"), RoomId::from("b"));
        let conn = ConnectionId::generate();
        let user = UserId::from("u");

        let mut rx_a = hub.subscribe(&a, conn, &user).await;
        let _rx_b = hub.subscribe(&b, conn, &user).await;
        assert_eq!(hub.room_of(&conn).await, Some(b.clone()));
        assert_eq!(hub.subscriber_count(&a).await, 0);
        assert!(rx_a.recv().await.is_none());

        assert_eq!(hub.unsubscribe(&a, &conn, &user).await, 0);
        assert_eq!(hub.subscriber_count(&b).await, 1);
        assert_eq!(hub.unsubscribe(&b, &conn, &user).await, 0);
        assert_eq!(hub.subscriber_count(&b).await, 0);
    }

    #[tokio::test]
    async fn unsubscribe_reports_same_user_connections() {
        let hub = Broadcaster::default();
        let room = RoomId::from("r");
        let user = UserId::from("u");
        let (c1, c2) = (ConnectionId::generate(), ConnectionId::generate());
        let _rx1 = hub.subscribe(&room, c1, &user).await;
        let _rx2 = hub.subscribe(&room, c2, &user).await;
        let _other = hub.subscribe(&room, ConnectionId::generate(), &UserId::from("x")).await;

        assert_eq!(hub.unsubscribe(&room, &c1, &user).await, 1);
        assert_eq!(hub.unsubscribe(&room, &c2, &user).await, 0);
    }

    #[tokio::test]
    async fn unsubscribe_after_prune_still_counts_other_connections() {
        let hub = Broadcaster::default();
        let room = RoomId::from("r");
        let user = UserId::from("u");
        let (c1, c2) = (ConnectionId::generate(), ConnectionId::generate());
        let rx1 = hub.subscribe(&room, c1, &user).await;
        let _rx2 = hub.subscribe(&room, c2, &user).await;

        drop(rx1);
        let (ev, _) = event("r");
        assert_eq!(hub.publish(ev).await.closed, 1);
        assert_eq!(hub.subscriber_count(&room).await, 1);

        assert_eq!(hub.unsubscribe(&room, &c1, &user).await, 1);
    }

    #[tokio::test]
    async fn evict_one_user_or_everyone() {
        let hub = Broadcaster::default();
        let room = RoomId::from("r");
        let (gone, stays) = (UserId::from("gone"), UserId::from("stays"));
        let mut rx_gone = hub.subscribe(&room, ConnectionId::generate(), &gone).await;
        let mut rx_stays = hub.subscribe(&room, ConnectionId::generate(), &stays).await;

        assert_eq!(hub.evict(&room, Some(&gone)).await, 1);
        assert!(rx_gone.recv().await.is_none());
        assert_eq!(hub.subscriber_count(&room).await, 1);

        assert_eq!(hub.evict(&room, None).await, 1);
        assert!(rx_stays.recv().await.is_none());
        assert_eq!(hub.subscriber_count(&room).await, 0);
        assert_eq!(hub.evict(&room, None).await, 0);
    }
}
