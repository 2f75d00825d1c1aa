use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// An authenticated identity. Owns entries; never mutated after signup.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
}

/// Salted SHA-256, stored as "salt$hexdigest".
fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}${}", salt, password));
    format!("{:x}", hasher.finalize())
}

pub fn create_user(conn: &Connection, email: &str, password: &str) -> Result<User> {
    let salt = uuid::Uuid::new_v4().simple().to_string();
    let stored = format!("{}${}", salt, hash_password(&salt, password));

    conn.execute(
        "INSERT INTO users (email, password_hash, created_at) VALUES (?1, ?2, ?3)",
        params![email, stored, Utc::now().to_rfc3339()],
    )
    .with_context(|| format!("Failed to create user {}", email))?;

    Ok(User {
        id: conn.last_insert_rowid(),
        email: email.to_string(),
    })
}

pub fn find_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            "SELECT id, email FROM users WHERE email = ?1",
            params![email],
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

/// Check email + password, returning the user on a match.
pub fn verify_credentials(conn: &Connection, email: &str, password: &str) -> Result<Option<User>> {
    let row = conn
        .query_row(
            "SELECT id, email, password_hash FROM users WHERE email = ?1",
            params![email],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    let (id, email, stored) = match row {
        Some(row) => row,
        None => return Ok(None),
    };

    let (salt, digest) = match stored.split_once('$') {
        Some(parts) => parts,
        None => return Ok(None),
    };

    if hash_password(salt, password) == digest {
        Ok(Some(User { id, email }))
    } else {
        Ok(None)
    }
}
