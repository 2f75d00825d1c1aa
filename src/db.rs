use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Default database filename, overridable via the SPENDLOG_DB env var.
pub const DEFAULT_DB_PATH: &str = "spendlog.db";

/// Resolve the database path from the environment.
pub fn database_path() -> String {
    std::env::var("SPENDLOG_DB").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string())
}

/// Open a database file and make sure the schema exists.
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Users
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Reference dimensions: categories and places
    // Shared across users, keyed by exact (case-sensitive) name.
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS places (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Entries
    // Dates are stored as ISO text (YYYY-MM-DD) so lexicographic comparison
    // matches chronological order.
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id),
            type TEXT NOT NULL CHECK (type IN ('INCOME', 'EXPENSE')),
            amount REAL NOT NULL CHECK (amount >= 0),
            category_id INTEGER NOT NULL REFERENCES categories(id),
            place_id INTEGER REFERENCES places(id),
            date TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    // ==========================================================================
    // Sessions
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions (
            token TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES users(id),
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entries_user ON entries(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entries_date ON entries(date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entries_category ON entries(category_id)",
        [],
    )?;

    Ok(())
}
