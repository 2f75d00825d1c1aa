use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::entities::{category, place};
use crate::filter::{self, EntryFilter};

/// Income or expense. Exactly two variants, stored as their uppercase names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryType {
    Income,
    Expense,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Income => "INCOME",
            EntryType::Expense => "EXPENSE",
        }
    }

    pub fn parse(s: &str) -> Option<EntryType> {
        match s {
            "INCOME" => Some(EntryType::Income),
            "EXPENSE" => Some(EntryType::Expense),
            _ => None,
        }
    }
}

/// One income or expense record, joined with its category and place names.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: i64,
    pub user_id: i64,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub amount: f64,
    pub category_id: i64,
    pub place_id: Option<i64>,
    pub date: NaiveDate,
    pub description: String,
    pub category_name: String,
    pub place_name: Option<String>,
}

/// Input for creating an entry. Category and place arrive as free-text
/// names and are resolved (or created) before the insert.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub user_id: i64,
    pub entry_type: EntryType,
    pub amount: f64,
    pub category_name: String,
    pub place_name: Option<String>,
    pub date: NaiveDate,
    pub description: Option<String>,
}

/// Partial update for an entry; absent fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct EntryPatch {
    pub entry_type: Option<EntryType>,
    pub amount: Option<f64>,
    pub category_name: Option<String>,
    pub place_name: Option<String>,
    pub date: Option<NaiveDate>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPage {
    pub entries: Vec<Entry>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: i64,
}

pub(crate) const ENTRY_SELECT: &str = "SELECT e.id, e.user_id, e.type, e.amount, e.category_id, e.place_id, e.date, e.description, c.name, p.name
     FROM entries e
     JOIN categories c ON c.id = e.category_id
     LEFT JOIN places p ON p.id = e.place_id";

pub(crate) fn entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<Entry> {
    let type_str: String = row.get(2)?;
    let date_str: String = row.get(6)?;

    Ok(Entry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        entry_type: EntryType::parse(&type_str).ok_or(rusqlite::Error::InvalidQuery)?,
        amount: row.get(3)?,
        category_id: row.get(4)?,
        place_id: row.get(5)?,
        date: NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        description: row.get(7)?,
        category_name: row.get(8)?,
        place_name: row.get(9)?,
    })
}

pub fn get_entry(conn: &Connection, id: i64) -> Result<Option<Entry>> {
    let sql = format!("{} WHERE e.id = ?1", ENTRY_SELECT);
    let entry = conn
        .query_row(&sql, params![id], entry_from_row)
        .optional()?;
    Ok(entry)
}

pub fn add_entry(conn: &Connection, new: &NewEntry) -> Result<Entry> {
    let category = category::find_or_create_category(conn, &new.category_name)?;
    let place = match &new.place_name {
        Some(name) => Some(place::find_or_create_place(conn, name)?),
        None => None,
    };

    conn.execute(
        "INSERT INTO entries (user_id, type, amount, category_id, place_id, date, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            new.user_id,
            new.entry_type.as_str(),
            new.amount,
            category.id,
            place.as_ref().map(|p| p.id),
            new.date.format("%Y-%m-%d").to_string(),
            new.description.as_deref().unwrap_or(""),
        ],
    )?;

    let id = conn.last_insert_rowid();
    get_entry(conn, id)?.ok_or_else(|| anyhow!("entry {} missing after insert", id))
}

pub fn edit_entry(conn: &Connection, id: i64, patch: &EntryPatch) -> Result<Entry> {
    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(entry_type) = patch.entry_type {
        sets.push("type = ?");
        values.push(Box::new(entry_type.as_str()));
    }
    if let Some(amount) = patch.amount {
        sets.push("amount = ?");
        values.push(Box::new(amount));
    }
    if let Some(name) = &patch.category_name {
        let category = category::find_or_create_category(conn, name)?;
        sets.push("category_id = ?");
        values.push(Box::new(category.id));
    }
    if let Some(name) = &patch.place_name {
        let place = place::find_or_create_place(conn, name)?;
        sets.push("place_id = ?");
        values.push(Box::new(place.id));
    }
    if let Some(date) = patch.date {
        sets.push("date = ?");
        values.push(Box::new(date.format("%Y-%m-%d").to_string()));
    }
    if let Some(description) = &patch.description {
        sets.push("description = ?");
        values.push(Box::new(description.clone()));
    }

    if !sets.is_empty() {
        values.push(Box::new(id));
        let sql = format!("UPDATE entries SET {} WHERE id = ?", sets.join(", "));
        let refs: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
        conn.execute(&sql, &refs[..])?;
    }

    get_entry(conn, id)?.ok_or_else(|| anyhow!("entry {} not found", id))
}

pub fn delete_entry(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM entries WHERE id = ?1", params![id])?;
    Ok(())
}

/// All of a user's entries matching the filter, newest first.
pub fn get_filtered_entries(
    conn: &Connection,
    user_id: i64,
    entry_filter: &EntryFilter,
    today: NaiveDate,
) -> Result<Vec<Entry>> {
    let interval = entry_filter.resolved_interval(today);
    let sql_filter = filter::entry_where(user_id, entry_filter, interval);
    let sql = format!(
        "{} WHERE {} ORDER BY e.date DESC, e.id DESC",
        ENTRY_SELECT, sql_filter.clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let refs = sql_filter.param_refs();
    let entries = stmt
        .query_map(&refs[..], entry_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

/// The `take` most recent entries matching the filter.
pub fn get_recent_entries(
    conn: &Connection,
    user_id: i64,
    take: u32,
    entry_filter: &EntryFilter,
    today: NaiveDate,
) -> Result<Vec<Entry>> {
    let interval = entry_filter.resolved_interval(today);
    let mut sql_filter = filter::entry_where(user_id, entry_filter, interval);
    sql_filter.params.push(Box::new(take as i64));
    let sql = format!(
        "{} WHERE {} ORDER BY e.date DESC, e.id DESC LIMIT ?",
        ENTRY_SELECT, sql_filter.clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let refs = sql_filter.param_refs();
    let entries = stmt
        .query_map(&refs[..], entry_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

pub fn get_paginated_entries(
    conn: &Connection,
    user_id: i64,
    page: u32,
    page_size: u32,
    entry_filter: &EntryFilter,
    today: NaiveDate,
) -> Result<EntryPage> {
    let page = page.max(1);
    let page_size = page_size.max(1);
    let interval = entry_filter.resolved_interval(today);

    let count_filter = filter::entry_where(user_id, entry_filter, interval);
    let count_refs = count_filter.param_refs();
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM entries e WHERE {}", count_filter.clause),
        &count_refs[..],
        |row| row.get(0),
    )?;

    let mut sql_filter = filter::entry_where(user_id, entry_filter, interval);
    sql_filter.params.push(Box::new(page_size as i64));
    sql_filter
        .params
        .push(Box::new((page as i64 - 1) * page_size as i64));
    let sql = format!(
        "{} WHERE {} ORDER BY e.date DESC, e.id DESC LIMIT ? OFFSET ?",
        ENTRY_SELECT, sql_filter.clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let refs = sql_filter.param_refs();
    let entries = stmt
        .query_map(&refs[..], entry_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(EntryPage {
        entries,
        total,
        page,
        page_size,
        total_pages: (total + page_size as i64 - 1) / page_size as i64,
    })
}
