use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use zenzone_types::events::GatewayEvent;

/// Identifies one realtime connection. A user may hold several.
pub type ConnId = Uuid;

/// Topic-based pub/sub for appointment rooms, independent of the transport.
///
/// Delivery is at-most-once: an event goes to whoever is a member at publish
/// time and is never queued or replayed. A connection that is gone, or whose
/// receiver was dropped, simply misses it.
#[derive(Clone, Default)]
pub struct Broker {
    inner: Arc<RwLock<Registry>>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnId, Member>,
    /// appointment_id -> members. A room exists only while non-empty.
    rooms: HashMap<Uuid, HashSet<ConnId>>,
}

struct Member {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
    rooms: HashSet<Uuid>,
}

impl Registry {
    fn deliver(&self, conn_id: &ConnId, event: &GatewayEvent) -> bool {
        self.connections
            .get(conn_id)
            .is_some_and(|member| member.tx.send(event.clone()).is_ok())
    }

    fn publish(&self, appointment_id: Uuid, event: &GatewayEvent, except: Option<ConnId>) -> usize {
        let Some(room) = self.rooms.get(&appointment_id) else {
            return 0;
        };
        room.iter()
            .filter(|conn_id| Some(**conn_id) != except)
            .filter(|conn_id| self.deliver(conn_id, event))
            .count()
    }

    fn remove_from_room(&mut self, conn_id: ConnId, appointment_id: Uuid) -> bool {
        let Some(room) = self.rooms.get_mut(&appointment_id) else {
            return false;
        };
        let removed = room.remove(&conn_id);
        if room.is_empty() {
            self.rooms.remove(&appointment_id);
        }
        if let Some(member) = self.connections.get_mut(&conn_id) {
            member.rooms.remove(&appointment_id);
        }
        removed
    }
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for `user_id`. Returns (conn_id, receiver).
    pub async fn register(&self, user_id: Uuid) -> (ConnId, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().await.connections.insert(
            conn_id,
            Member {
                user_id,
                tx,
                rooms: HashSet::new(),
            },
        );
        (conn_id, rx)
    }

    /// Drop a connection, leave every room it joined, and tell the remaining
    /// peers it went offline. Returns the rooms it was in.
    pub async fn unregister(&self, conn_id: ConnId) -> Vec<Uuid> {
        let mut registry = self.inner.write().await;
        let Some(member) = registry.connections.remove(&conn_id) else {
            return vec![];
        };

        let mut left = Vec::with_capacity(member.rooms.len());
        for appointment_id in member.rooms {
            registry.remove_from_room(conn_id, appointment_id);
            registry.publish(
                appointment_id,
                &GatewayEvent::PeerOnline {
                    appointment_id,
                    user_id: Some(member.user_id),
                    online: false,
                    timestamp: Utc::now(),
                },
                None,
            );
            left.push(appointment_id);
        }
        left
    }

    /// Add a connection to an appointment room. Peers are told it came
    /// online. Returns false if the connection is unknown or already a member.
    ///
    /// Callers are expected to have passed the authorization gate already.
    pub async fn join(&self, conn_id: ConnId, appointment_id: Uuid) -> bool {
        let mut registry = self.inner.write().await;
        let Some(member) = registry.connections.get_mut(&conn_id) else {
            return false;
        };
        if !member.rooms.insert(appointment_id) {
            return false;
        }
        let user_id = member.user_id;
        registry.rooms.entry(appointment_id).or_default().insert(conn_id);

        debug!("{} joined room {} (conn {})", user_id, appointment_id, conn_id);
        registry.publish(
            appointment_id,
            &GatewayEvent::PeerOnline {
                appointment_id,
                user_id: Some(user_id),
                online: true,
                timestamp: Utc::now(),
            },
            Some(conn_id),
        );
        true
    }

    /// Remove a connection from a room. Peers are told it went offline.
    pub async fn leave(&self, conn_id: ConnId, appointment_id: Uuid) -> bool {
        let mut registry = self.inner.write().await;
        let Some(user_id) = registry.connections.get(&conn_id).map(|m| m.user_id) else {
            return false;
        };
        if !registry.remove_from_room(conn_id, appointment_id) {
            return false;
        }
        registry.publish(
            appointment_id,
            &GatewayEvent::PeerOnline {
                appointment_id,
                user_id: Some(user_id),
                online: false,
                timestamp: Utc::now(),
            },
            None,
        );
        true
    }

    /// Tell every member to reload, then drop them all from the room. Used
    /// when the conversation stops being allowed. Members must pass the gate
    /// again to rejoin. Returns how many connections were removed.
    pub async fn evict_room(&self, appointment_id: Uuid) -> usize {
        let mut registry = self.inner.write().await;
        registry.publish(appointment_id, &GatewayEvent::ReloadChat { appointment_id }, None);

        let Some(room) = registry.rooms.remove(&appointment_id) else {
            return 0;
        };
        for conn_id in &room {
            if let Some(member) = registry.connections.get_mut(conn_id) {
                member.rooms.remove(&appointment_id);
            }
        }
        debug!("Evicted {} connection(s) from room {}", room.len(), appointment_id);
        room.len()
    }

    /// Fan an event out to every member of the shared appointment room,
    /// optionally skipping one connection. Returns how many received it.
    pub async fn publish(&self, appointment_id: Uuid, event: GatewayEvent, except: Option<ConnId>) -> usize {
        self.inner.read().await.publish(appointment_id, &event, except)
    }

    /// Point-to-point delivery to every connection of `user_id` inside the
    /// appointment room.
    pub async fn send_to_participant(&self, appointment_id: Uuid, user_id: Uuid, event: GatewayEvent) -> usize {
        let registry = self.inner.read().await;
        let Some(room) = registry.rooms.get(&appointment_id) else {
            return 0;
        };
        room.iter()
            .filter(|conn_id| {
                registry
                    .connections
                    .get(conn_id)
                    .is_some_and(|m| m.user_id == user_id)
            })
            .filter(|conn_id| registry.deliver(conn_id, &event))
            .count()
    }

    /// Send a targeted event to one connection.
    pub async fn send_to_connection(&self, conn_id: ConnId, event: GatewayEvent) -> bool {
        self.inner.read().await.deliver(&conn_id, &event)
    }

    pub async fn is_member(&self, conn_id: ConnId, appointment_id: Uuid) -> bool {
        self.inner
            .read()
            .await
            .rooms
            .get(&appointment_id)
            .is_some_and(|room| room.contains(&conn_id))
    }

    /// Whether any user other than `user_id` is currently in the room.
    pub async fn others_present(&self, appointment_id: Uuid, user_id: Uuid) -> bool {
        let registry = self.inner.read().await;
        registry.rooms.get(&appointment_id).is_some_and(|room| {
            room.iter().any(|conn_id| {
                registry
                    .connections
                    .get(conn_id)
                    .is_some_and(|m| m.user_id != user_id)
            })
        })
    }

    pub async fn room_size(&self, appointment_id: Uuid) -> usize {
        self.inner
            .read()
            .await
            .rooms
            .get(&appointment_id)
            .map_or(0, HashSet::len)
    }

    pub async fn room_count(&self) -> usize {
        self.inner.read().await.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typing(appointment_id: Uuid, user_id: Uuid) -> GatewayEvent {
        GatewayEvent::UserTyping {
            appointment_id,
            user_id,
            is_typing: true,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_room_members_only() {
        let broker = Broker::new();
        let room = Uuid::new_v4();
        let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let (a, mut a_rx) = broker.register(alice).await;
        let (b, mut b_rx) = broker.register(bob).await;
        let (_c, mut c_rx) = broker.register(carol).await;

        assert!(broker.join(a, room).await);
        assert!(broker.join(b, room).await);
        assert!(!broker.join(b, room).await); // already a member

        // Alice was told Bob came online
        assert!(matches!(
            a_rx.try_recv(),
            Ok(GatewayEvent::PeerOnline { online: true, user_id: Some(u), .. }) if u == bob
        ));

        let delivered = broker.publish(room, typing(room, alice), Some(a)).await;
        assert_eq!(delivered, 1);
        assert_eq!(b_rx.try_recv().unwrap(), typing(room, alice));
        assert!(a_rx.try_recv().is_err());
        assert!(c_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_replay_for_late_joiners() {
        let broker = Broker::new();
        let room = Uuid::new_v4();
        let (a, _a_rx) = broker.register(Uuid::new_v4()).await;
        broker.join(a, room).await;

        broker.publish(room, typing(room, Uuid::new_v4()), None).await;

        let (late, mut late_rx) = broker.register(Uuid::new_v4()).await;
        broker.join(late, room).await;
        assert!(late_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_notifies_peers_and_drops_empty_rooms() {
        let broker = Broker::new();
        let room = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let (a, _a_rx) = broker.register(alice).await;
        let (b, mut b_rx) = broker.register(bob).await;
        broker.join(b, room).await;
        broker.join(a, room).await;
        let _ = b_rx.try_recv(); // alice online

        assert_eq!(broker.unregister(a).await, vec![room]);
        assert!(matches!(
            b_rx.try_recv(),
            Ok(GatewayEvent::PeerOnline { online: false, user_id: Some(u), .. }) if u == alice
        ));
        assert_eq!(broker.room_size(room).await, 1);

        assert!(broker.leave(b, room).await);
        assert_eq!(broker.room_count().await, 0);
        assert!(!broker.is_member(b, room).await);
    }

    #[tokio::test]
    async fn test_point_to_point_hits_every_device_of_a_user() {
        let broker = Broker::new();
        let room = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let (phone, mut phone_rx) = broker.register(alice).await;
        let (laptop, mut laptop_rx) = broker.register(alice).await;
        let (b, mut b_rx) = broker.register(bob).await;
        for conn in [phone, laptop, b] {
            broker.join(conn, room).await;
        }
        while phone_rx.try_recv().is_ok() {}
        while laptop_rx.try_recv().is_ok() {}
        while b_rx.try_recv().is_ok() {}

        let sent = broker
            .send_to_participant(room, alice, GatewayEvent::ReloadChat { appointment_id: room })
            .await;
        assert_eq!(sent, 2);
        assert!(phone_rx.try_recv().is_ok());
        assert!(laptop_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_err());

        assert!(broker.others_present(room, alice).await);
        broker.unregister(b).await;
        assert!(!broker.others_present(room, alice).await);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_skipped() {
        let broker = Broker::new();
        let room = Uuid::new_v4();
        let (a, a_rx) = broker.register(Uuid::new_v4()).await;
        let (b, mut b_rx) = broker.register(Uuid::new_v4()).await;
        broker.join(a, room).await;
        broker.join(b, room).await;
        drop(a_rx);

        let delivered = broker.publish(room, typing(room, Uuid::new_v4()), None).await;
        assert_eq!(delivered, 1);
        assert!(b_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_evicted_room_stops_fan_out() {
        let broker = Broker::new();
        let room = Uuid::new_v4();
        let other = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let (a, mut a_rx) = broker.register(alice).await;
        let (b, mut b_rx) = broker.register(bob).await;
        broker.join(a, room).await;
        broker.join(b, room).await;
        broker.join(b, other).await;
        while a_rx.try_recv().is_ok() {}

        assert_eq!(broker.evict_room(room).await, 2);
        assert_eq!(a_rx.try_recv().unwrap(), GatewayEvent::ReloadChat { appointment_id: room });
        assert!(!broker.is_member(a, room).await);
        assert!(broker.is_member(b, other).await);
        while b_rx.try_recv().is_ok() {}

        assert_eq!(broker.publish(room, typing(room, alice), None).await, 0);
        assert!(b_rx.try_recv().is_err());

        // Unregister no longer reports the evicted room
        assert_eq!(broker.unregister(b).await, vec![other]);
        assert_eq!(broker.evict_room(room).await, 0);
    }
}
