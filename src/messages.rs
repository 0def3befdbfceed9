use crate::model::{ImageMeta, Message, MessageKind, MessageOut};
use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use time::OffsetDateTime;
use uuid::Uuid;

/// Persist a chat message. Content may be empty only when an image descriptor
/// is present; the creation timestamp is assigned here, from the server
/// clock, so cross-client ordering within a room stays consistent.
pub fn create_message(
    conn: &Connection,
    room_id: &Uuid,
    user_id: &Uuid,
    content: Option<&str>,
    image: Option<&ImageMeta>,
) -> Result<Message> {
    let trimmed = content.map(str::trim).filter(|s| !s.is_empty());
    if trimmed.is_none() && image.is_none() {
        return Err(anyhow!("empty_message"));
    }
    let kind = if image.is_some() {
        MessageKind::Image
    } else {
        MessageKind::Text
    };
    let id = Uuid::new_v4();
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO messages (id, room_id, user_id, content, kind, image_filename, \
         image_original_name, image_mime, image_size, image_url, is_edited, edited_at, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, NULL, ?11)",
        params![
            id.to_string(),
            room_id.to_string(),
            user_id.to_string(),
            trimmed,
            kind.as_str(),
            image.map(|i| i.filename.as_str()),
            image.map(|i| i.original_name.as_str()),
            image.map(|i| i.mimetype.as_str()),
            image.map(|i| i.size),
            image.map(|i| i.url.as_str()),
            now
        ],
    )?;
    Ok(Message {
        id,
        room_id: *room_id,
        user_id: *user_id,
        content: trimmed.map(Into::into),
        kind,
        image: image.cloned(),
        is_edited: false,
        edited_at: None,
        created_at: now,
    })
}

/// Resolve the author's display fields for broadcast.
pub fn with_author(conn: &Connection, message: Message) -> Result<MessageOut> {
    let (author_name, author_avatar) = match crate::users::get_user(conn, &message.user_id)? {
        Some(user) => (user.name, user.avatar_url),
        None => ("Unknown".into(), None),
    };
    Ok(MessageOut {
        message,
        author_name,
        author_avatar,
    })
}

/// The most recent messages of a room, capped at `limit` (at most 100),
/// ascending by creation time, with author display fields resolved.
pub fn list_messages(conn: &Connection, room_id: &Uuid, limit: usize) -> Result<Vec<MessageOut>> {
    let limit = limit.min(100);
    let mut stmt = conn.prepare(
        "SELECT m.id, m.room_id, m.user_id, m.content, m.kind, m.image_filename, \
         m.image_original_name, m.image_mime, m.image_size, m.image_url, m.is_edited, \
         m.edited_at, m.created_at, u.name, u.avatar_url \
         FROM messages m LEFT JOIN users u ON u.id = m.user_id \
         WHERE m.room_id = ?1 ORDER BY m.created_at DESC, m.rowid DESC LIMIT ?2",
    )?;
    let mut out = stmt
        .query_map(params![room_id.to_string(), limit as i64], |row| {
            let image = match row.get::<_, Option<String>>(5)? {
                Some(filename) => Some(ImageMeta {
                    filename,
                    original_name: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                    mimetype: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                    size: row.get::<_, Option<i64>>(8)?.unwrap_or_default(),
                    url: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
                }),
                None => None,
            };
            Ok(MessageOut {
                message: Message {
                    id: Uuid::parse_str(row.get::<_, String>(0)?.as_str()).unwrap_or_default(),
                    room_id: Uuid::parse_str(row.get::<_, String>(1)?.as_str()).unwrap_or_default(),
                    user_id: Uuid::parse_str(row.get::<_, String>(2)?.as_str()).unwrap_or_default(),
                    content: row.get(3)?,
                    kind: MessageKind::parse(row.get::<_, String>(4)?.as_str()),
                    image,
                    is_edited: row.get::<_, i64>(10)? != 0,
                    edited_at: row.get(11)?,
                    created_at: row.get(12)?,
                },
                author_name: row
                    .get::<_, Option<String>>(13)?
                    .unwrap_or_else(|| "Unknown".into()),
                author_avatar: row.get(14)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    out.reverse();
    Ok(out)
}
