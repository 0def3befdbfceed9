use crate::router::ConnectionRouter;
use crate::wire::ServerEvent;
use anyhow::Result;
use uuid::Uuid;

// Typing signals are ephemeral: nothing is persisted and no timeout is kept
// server-side. The sending client owns the debounce and must emit stop-typing
// itself; a client that disconnects mid-typing leaves stale indicator state
// on receivers until they refresh.

/// Relay a typing signal to the other subscribers of the room.
pub fn typing(
    router: &ConnectionRouter,
    conn_id: Uuid,
    room_id: Uuid,
    user_id: Uuid,
    username: &str,
) -> Result<()> {
    let payload = serde_json::to_string(&ServerEvent::UserTyping {
        user_id,
        username: username.to_string(),
    })?;
    router.broadcast(&room_id, &payload, Some(conn_id));
    Ok(())
}

/// Relay a stop-typing signal to the other subscribers of the room.
pub fn stop_typing(
    router: &ConnectionRouter,
    conn_id: Uuid,
    room_id: Uuid,
    user_id: Uuid,
) -> Result<()> {
    let payload = serde_json::to_string(&ServerEvent::UserStopTyping { user_id })?;
    router.broadcast(&room_id, &payload, Some(conn_id));
    Ok(())
}
