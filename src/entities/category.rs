use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

/// Shared reference dimension for entries. Names are exact-match,
/// case-sensitive keys; categories are created on demand and never deleted.
#[derive(Debug, Clone, Serialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

pub fn find_category_by_name(conn: &Connection, name: &str) -> Result<Option<Category>> {
    let category = conn
        .query_row(
            "SELECT id, name FROM categories WHERE name = ?1",
            params![name],
            |row| {
                Ok(Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(category)
}

/// Look up a category by exact name, creating it on a miss.
///
/// The unique constraint on `name` is the arbiter under concurrent writers:
/// if another connection creates the same name between our lookup and
/// insert, the insert fails with a constraint violation and is retried as a
/// lookup.
pub fn find_or_create_category(conn: &Connection, name: &str) -> Result<Category> {
    if let Some(category) = find_category_by_name(conn, name)? {
        return Ok(category);
    }

    let result = conn.execute("INSERT INTO categories (name) VALUES (?1)", params![name]);
    match result {
        Ok(_) => Ok(Category {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
        }),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            find_category_by_name(conn, name)?
                .ok_or_else(|| anyhow!("category '{}' missing after constraint conflict", name))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn list_categories(conn: &Connection) -> Result<Vec<Category>> {
    let mut stmt = conn.prepare("SELECT id, name FROM categories ORDER BY name ASC")?;
    let categories = stmt
        .query_map([], |row| {
            Ok(Category {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(categories)
}
