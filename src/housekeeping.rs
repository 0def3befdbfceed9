use crate::api::AppState;
use crate::rooms;
use tokio::time::interval;

/// Periodic safety net for the empty-room rule. The primary deletion path is
/// inline in `rooms::leave_room`; this catches rooms that were already empty
/// when the process started, e.g. after a crash between leave and cleanup.
/// Runs for the process lifetime.
pub fn spawn_sweeper(state: AppState) {
    tokio::spawn(async move {
        let mut tick = interval(state.config.sweep_interval());
        loop {
            tick.tick().await;
            let conn = match state.pool.get() {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "sweep skipped, no database connection");
                    continue;
                }
            };
            match rooms::sweep_empty_rooms(&conn) {
                Ok(0) => {}
                Ok(n) => tracing::info!(deleted = n, "cleaned up empty rooms"),
                Err(e) => tracing::warn!(error = %e, "empty room sweep failed"),
            }
        }
    });
}
