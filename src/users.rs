use crate::model::User;
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;
use uuid::Uuid;

/// Create or refresh a user at the external-identity boundary. The provider
/// id is the stable key; display fields are overwritten on every login.
pub fn upsert_user(
    conn: &Connection,
    provider_id: &str,
    name: &str,
    avatar_url: Option<&str>,
) -> Result<User> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO users (id, provider_id, name, avatar_url, is_online, last_seen) \
         VALUES (?1, ?2, ?3, ?4, 0, ?5) \
         ON CONFLICT(provider_id) DO UPDATE SET name = excluded.name, avatar_url = excluded.avatar_url",
        params![Uuid::new_v4().to_string(), provider_id, name, avatar_url, now],
    )?;
    let user = get_by_provider(conn, provider_id)?
        .ok_or_else(|| anyhow::anyhow!("not_found"))?;
    Ok(user)
}

pub fn get_user(conn: &Connection, id: &Uuid) -> Result<Option<User>> {
    let mut stmt = conn.prepare(
        "SELECT id, provider_id, name, avatar_url, is_online, last_seen FROM users WHERE id = ?1",
    )?;
    let user = stmt
        .query_row([id.to_string()], row_to_user)
        .optional()?;
    Ok(user)
}

fn get_by_provider(conn: &Connection, provider_id: &str) -> Result<Option<User>> {
    let mut stmt = conn.prepare(
        "SELECT id, provider_id, name, avatar_url, is_online, last_seen FROM users WHERE provider_id = ?1",
    )?;
    let user = stmt.query_row([provider_id], row_to_user).optional()?;
    Ok(user)
}

/// Flip the persisted online flag and stamp last-seen.
pub fn set_online(conn: &Connection, user_id: &Uuid, online: bool) -> Result<()> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "UPDATE users SET is_online = ?2, last_seen = ?3 WHERE id = ?1",
        params![user_id.to_string(), online as i64, now],
    )?;
    Ok(())
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: Uuid::parse_str(row.get::<_, String>(0)?.as_str()).unwrap_or_default(),
        provider_id: row.get(1)?,
        name: row.get(2)?,
        avatar_url: row.get(3)?,
        is_online: row.get::<_, i64>(4)? != 0,
        last_seen: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn upsert_is_stable_by_provider() {
        let conn = db::init_db(":memory:").unwrap();
        let first = upsert_user(&conn, "google-1", "Alice", None).unwrap();
        let second = upsert_user(&conn, "google-1", "Alice B", Some("http://a/p.png")).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Alice B");
        assert_eq!(second.avatar_url.as_deref(), Some("http://a/p.png"));
    }

    #[test]
    fn online_flag_and_last_seen() {
        let conn = db::init_db(":memory:").unwrap();
        let user = upsert_user(&conn, "google-2", "Bob", None).unwrap();
        assert!(!user.is_online);
        set_online(&conn, &user.id, true).unwrap();
        let user = get_user(&conn, &user.id).unwrap().unwrap();
        assert!(user.is_online);
        assert!(user.last_seen > 0);
        set_online(&conn, &user.id, false).unwrap();
        assert!(!get_user(&conn, &user.id).unwrap().unwrap().is_online);
    }
}
