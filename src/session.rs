use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::entities::user::User;

/// Issue a new session token for a user.
pub fn create_session(conn: &Connection, user_id: i64) -> Result<String> {
    let token = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sessions (token, user_id, created_at) VALUES (?1, ?2, ?3)",
        params![token, user_id, Utc::now().to_rfc3339()],
    )?;
    Ok(token)
}

/// Resolve a session token to its user, if the session exists.
pub fn session_user(conn: &Connection, token: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            "SELECT u.id, u.email
             FROM sessions s
             JOIN users u ON u.id = s.user_id
             WHERE s.token = ?1",
            params![token],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    email: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(user)
}

pub fn delete_session(conn: &Connection, token: &str) -> Result<()> {
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}
