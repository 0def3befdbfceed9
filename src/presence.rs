use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

/// In-memory map from connection id to user id. Each transport connection is
/// tracked independently: a user with two tabs open toggles online/offline
/// per tab, because nothing de-duplicates across their connections. Known
/// limitation, carried deliberately.
pub struct Presence {
    inner: Mutex<HashMap<Uuid, Uuid>>,
}

impl Presence {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Record which user a connection belongs to.
    pub fn connect(&self, conn_id: Uuid, user_id: Uuid) {
        self.inner.lock().insert(conn_id, user_id);
    }

    /// Remove a connection's mapping, returning the user it carried.
    pub fn disconnect(&self, conn_id: Uuid) -> Option<Uuid> {
        self.inner.lock().remove(&conn_id)
    }
}

impl Default for Presence {
    fn default() -> Self {
        Self::new()
    }
}
