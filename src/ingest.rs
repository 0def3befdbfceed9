use crate::router::ConnectionRouter;
use crate::wire::{SendMessage, ServerEvent};
use crate::{messages, rooms};
use anyhow::Result;
use rusqlite::Connection;
use uuid::Uuid;

/// Run one inbound message through the pipeline: authorize against persisted
/// membership, persist, then fan out to the room's subscribers, including
/// the sender's own connection. Every rejection goes back to the originating
/// connection only, as a `message-error`, and nothing is persisted or
/// broadcast for it.
pub fn handle_send_message(
    conn: &Connection,
    router: &ConnectionRouter,
    conn_id: Uuid,
    payload: &SendMessage,
) -> Result<()> {
    let room = match rooms::get_room(conn, &payload.room_id)? {
        Some(room) => room,
        None => return reject(router, conn_id, "Room not found"),
    };
    if !rooms::is_member(conn, &room.id, &payload.user_id)? {
        return reject(router, conn_id, "You must join the room to send messages");
    }
    let message = match messages::create_message(
        conn,
        &room.id,
        &payload.user_id,
        payload.content.as_deref(),
        payload.image.as_ref(),
    ) {
        Ok(message) => message,
        Err(e) => {
            tracing::error!(room = %room.id, error = %e, "failed to persist message");
            return reject(router, conn_id, "Failed to send message");
        }
    };
    let out = messages::with_author(conn, message)?;
    let encoded = serde_json::to_string(&ServerEvent::NewMessage(out))?;
    router.broadcast(&room.id, &encoded, None);
    Ok(())
}

/// Report a send failure back to the originating connection only.
pub(crate) fn reject(router: &ConnectionRouter, conn_id: Uuid, reason: &str) -> Result<()> {
    let encoded = serde_json::to_string(&ServerEvent::MessageError {
        error: reason.to_string(),
    })?;
    router.send_to(conn_id, &encoded);
    Ok(())
}
