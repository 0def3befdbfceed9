pub use crate::model::Room;
use crate::model::{MemberRef, RoomSummary};
use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;
use uuid::Uuid;

/// Default rooms seeded at startup. Exempt from empty-room deletion.
const DEFAULT_ROOMS: &[(&str, &str)] = &[
    ("General", "General discussion"),
    ("Random", "Random conversations"),
    ("Tech Talk", "Technology discussions"),
    ("Help & Support", "Get help and support"),
];

/// Outcome of a leave: whether the room was deleted because it emptied, and
/// the surviving room state otherwise.
#[derive(Debug)]
pub struct LeaveOutcome {
    pub deleted: bool,
    pub room: Option<Room>,
}

/// Create a room with the creator as its first member.
pub fn create_room(
    conn: &Connection,
    name: &str,
    description: &str,
    created_by: &Uuid,
) -> Result<Room> {
    let id = Uuid::new_v4();
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO rooms (id, name, description, is_default, is_active, created_by, created_at) \
         VALUES (?1, ?2, ?3, 0, 1, ?4, ?5)",
        params![
            id.to_string(),
            name,
            description,
            created_by.to_string(),
            now
        ],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO room_members (room_id, user_id) VALUES (?1, ?2)",
        params![id.to_string(), created_by.to_string()],
    )?;
    Ok(Room {
        id,
        name: name.into(),
        description: description.into(),
        is_default: false,
        is_active: true,
        created_by: Some(*created_by),
        created_at: now,
    })
}

/// Seed the default rooms if they do not exist yet. Idempotent by name.
pub fn seed_default_rooms(conn: &Connection) -> Result<()> {
    for (name, description) in DEFAULT_ROOMS {
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM rooms WHERE name = ?1 AND is_default = 1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            let now = OffsetDateTime::now_utc().unix_timestamp();
            conn.execute(
                "INSERT INTO rooms (id, name, description, is_default, is_active, created_by, created_at) \
                 VALUES (?1, ?2, ?3, 1, 1, NULL, ?4)",
                params![Uuid::new_v4().to_string(), name, description, now],
            )?;
            tracing::info!(room = name, "created default room");
        }
    }
    Ok(())
}

pub fn get_room(conn: &Connection, id: &Uuid) -> Result<Option<Room>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, description, is_default, is_active, created_by, created_at \
         FROM rooms WHERE id = ?1",
    )?;
    let room = stmt.query_row([id.to_string()], row_to_room).optional()?;
    Ok(room)
}

/// Check persisted membership. The room must exist.
pub fn is_member(conn: &Connection, room_id: &Uuid, user_id: &Uuid) -> Result<bool> {
    if get_room(conn, room_id)?.is_none() {
        return Err(anyhow!("not_found"));
    }
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM room_members WHERE room_id = ?1 AND user_id = ?2",
            params![room_id.to_string(), user_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

/// Add a user to a room. Idempotent: joining twice leaves the member set
/// unchanged and still returns the current room state.
pub fn join_room(conn: &Connection, room_id: &Uuid, user_id: &Uuid) -> Result<Room> {
    let room = get_room(conn, room_id)?.ok_or_else(|| anyhow!("not_found"))?;
    conn.execute(
        "INSERT OR IGNORE INTO room_members (room_id, user_id) VALUES (?1, ?2)",
        params![room_id.to_string(), user_id.to_string()],
    )?;
    Ok(room)
}

/// Remove a user from a room (no-op if absent), then apply the empty-room
/// rule. The removal and the conditional delete commit in one transaction.
/// Returns whether the room was deleted.
pub fn leave_room(conn: &Connection, room_id: &Uuid, user_id: &Uuid) -> Result<LeaveOutcome> {
    if get_room(conn, room_id)?.is_none() {
        return Err(anyhow!("not_found"));
    }
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM room_members WHERE room_id = ?1 AND user_id = ?2",
        params![room_id.to_string(), user_id.to_string()],
    )?;
    let deleted = delete_room_if_empty(&tx, room_id)?;
    tx.commit()?;
    if deleted {
        return Ok(LeaveOutcome {
            deleted: true,
            room: None,
        });
    }
    Ok(LeaveOutcome {
        deleted: false,
        room: get_room(conn, room_id)?,
    })
}

/// The single authoritative deletion routine, used inline on leave and by the
/// periodic sweep. The DELETE re-checks the live member count, so a join that
/// lands between the caller's leave and this call keeps the room alive.
/// Message cleanup follows best-effort once the room row is gone; a failure
/// is logged and the orphaned rows are left for a later sweep.
pub fn delete_room_if_empty(conn: &Connection, room_id: &Uuid) -> Result<bool> {
    let changed = conn.execute(
        "DELETE FROM rooms WHERE id = ?1 AND is_default = 0 \
         AND NOT EXISTS (SELECT 1 FROM room_members WHERE room_id = ?1)",
        [room_id.to_string()],
    )?;
    if changed == 0 {
        return Ok(false);
    }
    if let Err(e) = conn.execute(
        "DELETE FROM messages WHERE room_id = ?1",
        [room_id.to_string()],
    ) {
        tracing::warn!(room = %room_id, error = %e, "failed to delete messages of removed room");
    }
    tracing::info!(room = %room_id, "deleted empty room");
    Ok(true)
}

/// Safety net for deletions missed on the inline path (e.g. a restart between
/// leave and cleanup). Returns the number of rooms deleted.
pub fn sweep_empty_rooms(conn: &Connection) -> Result<usize> {
    let mut stmt = conn.prepare(
        "SELECT id FROM rooms WHERE is_default = 0 \
         AND NOT EXISTS (SELECT 1 FROM room_members WHERE room_id = rooms.id)",
    )?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut deleted = 0;
    for id in ids {
        let Ok(id) = Uuid::parse_str(&id) else { continue };
        if delete_room_if_empty(conn, &id)? {
            deleted += 1;
        }
    }
    Ok(deleted)
}

/// Active rooms, newest first, with member names resolved.
pub fn list_rooms(conn: &Connection) -> Result<Vec<RoomSummary>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, description, is_default, is_active, created_by, created_at \
         FROM rooms WHERE is_active = 1 ORDER BY created_at DESC, id DESC",
    )?;
    let rooms = stmt
        .query_map([], row_to_room)?
        .collect::<Result<Vec<_>, _>>()?;
    rooms
        .into_iter()
        .map(|room| room_summary(conn, room))
        .collect()
}

/// Resolve member display names for a room.
pub fn room_summary(conn: &Connection, room: Room) -> Result<RoomSummary> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.name FROM room_members m JOIN users u ON u.id = m.user_id \
         WHERE m.room_id = ?1 ORDER BY u.name",
    )?;
    let members = stmt
        .query_map([room.id.to_string()], |row| {
            Ok(MemberRef {
                id: Uuid::parse_str(row.get::<_, String>(0)?.as_str()).unwrap_or_default(),
                name: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RoomSummary { room, members })
}

fn row_to_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<Room> {
    Ok(Room {
        id: Uuid::parse_str(row.get::<_, String>(0)?.as_str()).unwrap_or_default(),
        name: row.get(1)?,
        description: row.get(2)?,
        is_default: row.get::<_, i64>(3)? != 0,
        is_active: row.get::<_, i64>(4)? != 0,
        created_by: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| Uuid::parse_str(&s).ok()),
        created_at: row.get(6)?,
    })
}
