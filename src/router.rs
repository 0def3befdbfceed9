use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use uuid::Uuid;

struct Subscriber {
    tx: mpsc::UnboundedSender<String>,
    rooms: HashSet<Uuid>,
}

/// Maps connections to the set of rooms they are subscribed to and fans
/// events out to subscriber sets. Subscription is a transport-level grouping,
/// separate from persisted membership; sending is authorized elsewhere, at
/// ingest time. Delivery is fire-and-forget, at most once: a connection whose
/// channel is gone simply does not receive the event.
pub struct ConnectionRouter {
    inner: Mutex<HashMap<Uuid, Subscriber>>,
}

impl ConnectionRouter {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Register a connection's outbound channel.
    pub fn register(&self, conn_id: Uuid, tx: mpsc::UnboundedSender<String>) {
        self.inner.lock().insert(
            conn_id,
            Subscriber {
                tx,
                rooms: HashSet::new(),
            },
        );
    }

    /// Drop a connection and all its subscriptions.
    pub fn unregister(&self, conn_id: Uuid) {
        self.inner.lock().remove(&conn_id);
    }

    pub fn subscribe(&self, conn_id: Uuid, room_id: Uuid) {
        if let Some(sub) = self.inner.lock().get_mut(&conn_id) {
            sub.rooms.insert(room_id);
        }
    }

    pub fn unsubscribe(&self, conn_id: Uuid, room_id: Uuid) {
        if let Some(sub) = self.inner.lock().get_mut(&conn_id) {
            sub.rooms.remove(&room_id);
        }
    }

    /// Deliver a payload to one connection only.
    pub fn send_to(&self, conn_id: Uuid, payload: &str) {
        if let Some(sub) = self.inner.lock().get(&conn_id) {
            let _ = sub.tx.send(payload.to_string());
        }
    }

    /// Deliver a payload to every connection subscribed to the room, except
    /// the optionally excluded one.
    pub fn broadcast(&self, room_id: &Uuid, payload: &str, exclude: Option<Uuid>) {
        let guard = self.inner.lock();
        for (conn_id, sub) in guard.iter() {
            if Some(*conn_id) == exclude || !sub.rooms.contains(room_id) {
                continue;
            }
            let _ = sub.tx.send(payload.to_string());
        }
    }

    /// Deliver a payload to every registered connection, except the
    /// optionally excluded one. Used for presence transitions.
    pub fn broadcast_all(&self, payload: &str, exclude: Option<Uuid>) {
        let guard = self.inner.lock();
        for (conn_id, sub) in guard.iter() {
            if Some(*conn_id) == exclude {
                continue;
            }
            let _ = sub.tx.send(payload.to_string());
        }
    }
}

impl Default for ConnectionRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(router: &ConnectionRouter) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        router.register(id, tx);
        (id, rx)
    }

    #[test]
    fn broadcast_is_scoped_to_the_room() {
        let router = ConnectionRouter::new();
        let room_a = Uuid::new_v4();
        let room_b = Uuid::new_v4();
        let (c1, mut rx1) = conn(&router);
        let (c2, mut rx2) = conn(&router);
        let (_c3, mut rx3) = conn(&router);
        router.subscribe(c1, room_a);
        router.subscribe(c2, room_a);
        router.subscribe(c2, room_b);
        router.broadcast(&room_a, "hello", None);
        assert_eq!(rx1.try_recv().unwrap(), "hello");
        assert_eq!(rx2.try_recv().unwrap(), "hello");
        assert!(rx3.try_recv().is_err());
        router.broadcast(&room_b, "b-only", None);
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap(), "b-only");
    }

    #[test]
    fn exclusion_and_unsubscribe() {
        let router = ConnectionRouter::new();
        let room = Uuid::new_v4();
        let (c1, mut rx1) = conn(&router);
        let (c2, mut rx2) = conn(&router);
        router.subscribe(c1, room);
        router.subscribe(c2, room);
        router.broadcast(&room, "x", Some(c1));
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap(), "x");
        router.unsubscribe(c2, room);
        router.broadcast(&room, "y", None);
        assert_eq!(rx1.try_recv().unwrap(), "y");
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn dropped_receiver_does_not_block_others() {
        let router = ConnectionRouter::new();
        let room = Uuid::new_v4();
        let (c1, rx1) = conn(&router);
        let (c2, mut rx2) = conn(&router);
        router.subscribe(c1, room);
        router.subscribe(c2, room);
        drop(rx1);
        router.broadcast(&room, "still delivered", None);
        assert_eq!(rx2.try_recv().unwrap(), "still delivered");
    }

    #[test]
    fn send_to_and_unregister() {
        let router = ConnectionRouter::new();
        let (c1, mut rx1) = conn(&router);
        router.send_to(c1, "direct");
        assert_eq!(rx1.try_recv().unwrap(), "direct");
        router.unregister(c1);
        router.broadcast_all("gone", None);
        assert!(rx1.try_recv().is_err());
    }
}
