use crate::api::AppState;
use crate::wire::{ClientEvent, ServerEvent};
use crate::{ingest, typing, users};
use anyhow::Result;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Per-connection socket loop. Events arriving on one connection are handled
/// in arrival order; outbound delivery goes through the router's channel so a
/// slow socket never blocks a broadcast.
pub async fn handle_socket(stream: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();
    let (mut sender, mut receiver) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.router.register(conn_id, tx);
    tracing::info!(conn = %conn_id, "socket connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            inbound = receiver.next() => {
                let Some(Ok(msg)) = inbound else { break };
                match msg {
                    Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => {
                            if let Err(e) = dispatch(&state, conn_id, event) {
                                tracing::warn!(conn = %conn_id, error = %e, "event handling failed");
                            }
                        }
                        Err(e) => tracing::debug!(conn = %conn_id, error = %e, "unparseable event"),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    send_task.abort();
    teardown(&state, conn_id);
}

fn dispatch(state: &AppState, conn_id: Uuid, event: ClientEvent) -> Result<()> {
    match event {
        ClientEvent::UserConnected { user_id } => {
            state.presence.connect(conn_id, user_id);
            // the status broadcast goes out even when the store write fails
            match state.pool.get() {
                Ok(db) => {
                    if let Err(e) = users::set_online(&db, &user_id, true) {
                        tracing::warn!(user = %user_id, error = %e, "failed to persist online status");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "no database connection for online status"),
            }
            let payload = serde_json::to_string(&ServerEvent::UserStatusChanged {
                user_id,
                is_online: true,
            })?;
            state.router.broadcast_all(&payload, Some(conn_id));
        }
        ClientEvent::JoinRoom { room_id } => {
            // transport-level subscription only; sending into the room is
            // authorized separately at ingest time
            state.router.subscribe(conn_id, room_id);
            tracing::info!(conn = %conn_id, room = %room_id, "subscribed");
        }
        ClientEvent::LeaveRoom { room_id } => {
            state.router.unsubscribe(conn_id, room_id);
            tracing::info!(conn = %conn_id, room = %room_id, "unsubscribed");
        }
        ClientEvent::SendMessage(payload) => match state.pool.get() {
            Ok(db) => ingest::handle_send_message(&db, &state.router, conn_id, &payload)?,
            Err(e) => {
                tracing::error!(conn = %conn_id, error = %e, "no database connection for message");
                ingest::reject(&state.router, conn_id, "Failed to send message")?;
            }
        },
        ClientEvent::Typing {
            room_id,
            user_id,
            username,
        } => {
            typing::typing(&state.router, conn_id, room_id, user_id, &username)?;
        }
        ClientEvent::StopTyping { room_id, user_id } => {
            typing::stop_typing(&state.router, conn_id, room_id, user_id)?;
        }
    }
    Ok(())
}

/// Disconnect teardown: drop subscriptions, then recompute presence for the
/// user this connection carried.
fn teardown(state: &AppState, conn_id: Uuid) {
    state.router.unregister(conn_id);
    let Some(user_id) = state.presence.disconnect(conn_id) else {
        tracing::info!(conn = %conn_id, "socket disconnected");
        return;
    };
    tracing::info!(conn = %conn_id, user = %user_id, "socket disconnected");
    match state.pool.get() {
        Ok(db) => {
            if let Err(e) = users::set_online(&db, &user_id, false) {
                tracing::warn!(user = %user_id, error = %e, "failed to persist offline status");
            }
        }
        Err(e) => tracing::warn!(error = %e, "no database connection for offline status"),
    }
    match serde_json::to_string(&ServerEvent::UserStatusChanged {
        user_id,
        is_online: false,
    }) {
        Ok(payload) => state.router.broadcast_all(&payload, Some(conn_id)),
        Err(e) => tracing::warn!(error = %e, "failed to encode status event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::presence::Presence;
    use crate::router::ConnectionRouter;
    use crate::wire::SendMessage;
    use r2d2_sqlite::SqliteConnectionManager;
    use std::sync::Arc;
    use std::time::Duration;

    // A pool whose single connection stays checked out, so every further
    // checkout times out. The holder must outlive the test body.
    fn starved_state(
        dir: &std::path::Path,
    ) -> (AppState, r2d2::PooledConnection<SqliteConnectionManager>) {
        let pool = r2d2::Pool::builder()
            .max_size(1)
            .connection_timeout(Duration::from_millis(50))
            .build(SqliteConnectionManager::memory())
            .unwrap();
        let held = pool.get().unwrap();
        let state = AppState {
            pool: pool.clone(),
            router: Arc::new(ConnectionRouter::new()),
            presence: Arc::new(Presence::new()),
            file_dir: dir.join("uploads"),
            config: Config {
                bind: "127.0.0.1:0".into(),
                data_dir: dir.to_path_buf(),
                max_upload_mb: 1,
                logging_enabled: false,
                sweep_minutes: 30,
                db_retry_secs: 1,
            },
            jwt_secret: Arc::new(Vec::new()),
        };
        (state, held)
    }

    fn register(state: &AppState) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        state.router.register(id, tx);
        (id, rx)
    }

    #[test]
    fn send_with_unavailable_store_reports_failure_to_sender() {
        let tmp = tempfile::tempdir().unwrap();
        let (state, _held) = starved_state(tmp.path());
        let (sender_conn, mut sender_rx) = register(&state);
        let (_other, mut other_rx) = register(&state);
        dispatch(
            &state,
            sender_conn,
            ClientEvent::SendMessage(SendMessage {
                content: Some("hi".into()),
                room_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                image: None,
            }),
        )
        .unwrap();
        let v: serde_json::Value = serde_json::from_str(&sender_rx.try_recv().unwrap()).unwrap();
        assert_eq!(v["event"], "message-error");
        assert_eq!(v["data"]["error"], "Failed to send message");
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn presence_broadcast_survives_store_outage() {
        let tmp = tempfile::tempdir().unwrap();
        let (state, _held) = starved_state(tmp.path());
        let (conn_a, mut rx_a) = register(&state);
        let (_conn_b, mut rx_b) = register(&state);
        let user = Uuid::new_v4();
        dispatch(&state, conn_a, ClientEvent::UserConnected { user_id: user }).unwrap();
        let v: serde_json::Value = serde_json::from_str(&rx_b.try_recv().unwrap()).unwrap();
        assert_eq!(v["event"], "user-status-changed");
        assert_eq!(v["data"]["user_id"], user.to_string());
        assert_eq!(v["data"]["is_online"], true);
        assert!(rx_a.try_recv().is_err());
        // the connection-to-user mapping was still recorded
        assert_eq!(state.presence.disconnect(conn_a), Some(user));
    }
}
