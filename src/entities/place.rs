use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

/// Optional reference dimension for entries, same lifecycle as categories.
#[derive(Debug, Clone, Serialize)]
pub struct Place {
    pub id: i64,
    pub name: String,
}

pub fn find_place_by_name(conn: &Connection, name: &str) -> Result<Option<Place>> {
    let place = conn
        .query_row(
            "SELECT id, name FROM places WHERE name = ?1",
            params![name],
            |row| {
                Ok(Place {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(place)
}

/// Exact-name lookup, insert on miss, constraint conflict retried as lookup.
pub fn find_or_create_place(conn: &Connection, name: &str) -> Result<Place> {
    if let Some(place) = find_place_by_name(conn, name)? {
        return Ok(place);
    }

    let result = conn.execute("INSERT INTO places (name) VALUES (?1)", params![name]);
    match result {
        Ok(_) => Ok(Place {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
        }),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            find_place_by_name(conn, name)?
                .ok_or_else(|| anyhow!("place '{}' missing after constraint conflict", name))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn list_places(conn: &Connection) -> Result<Vec<Place>> {
    let mut stmt = conn.prepare("SELECT id, name FROM places ORDER BY name ASC")?;
    let places = stmt
        .query_map([], |row| {
            Ok(Place {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(places)
}
