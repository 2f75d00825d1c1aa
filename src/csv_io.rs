use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;

use crate::entities::entry::{add_entry, get_filtered_entries, EntryType, NewEntry};
use crate::filter::EntryFilter;

/// One parsed CSV row, header -> raw cell text.
pub type CsvRow = HashMap<String, String>;

/// Batch-level result of an import. Per-row validation gaps are silent
/// skips; only a store failure (or a missing session upstream) turns this
/// false.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ImportOutcome {
    pub success: bool,
}

pub const CSV_HEADER: &str = "Date,Type,Amount,Category,Place,Description";

/// Serialize the user's filtered entries, newest first.
///
/// Text fields are quote-wrapped and the amount is left bare. Embedded
/// double quotes are NOT escaped beyond the wrapping; a name containing a
/// quote produces a row the importer's cleaning step tolerates but other
/// consumers may not (see DESIGN.md).
pub fn export_entries_to_csv(
    conn: &Connection,
    user_id: i64,
    entry_filter: &EntryFilter,
    today: NaiveDate,
) -> Result<String> {
    let entries = get_filtered_entries(conn, user_id, entry_filter, today)?;

    let mut csv = String::from(CSV_HEADER);
    csv.push('\n');
    let rows: Vec<String> = entries
        .iter()
        .map(|e| {
            format!(
                "\"{}\",\"{}\",{},\"{}\",\"{}\",\"{}\"",
                e.date.format("%Y-%m-%d"),
                e.entry_type.as_str(),
                e.amount,
                e.category_name,
                e.place_name.as_deref().unwrap_or(""),
                e.description,
            )
        })
        .collect();
    csv.push_str(&rows.join("\n"));
    Ok(csv)
}

/// Strip a leading BOM and trim, the same treatment headers get on import.
fn clean_header(raw: &str) -> String {
    raw.trim().trim_start_matches('\u{feff}').to_string()
}

/// Defensive per-field cleaning: leading BOM, whitespace, one layer of
/// matching surrounding quotes, doubled quotes, trailing commas. An empty
/// or `""` result means the field is absent.
fn clean_field(raw: &str) -> Option<String> {
    let mut s = raw.trim_start_matches('\u{feff}').trim().to_string();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"'))
            || (s.starts_with('\'') && s.ends_with('\'')))
    {
        s = s[1..s.len() - 1].to_string();
    }
    s = s.replace("\"\"", "\"");
    let s = s.trim_end_matches(',');
    if s.is_empty() || s == "\"\"" {
        None
    } else {
        Some(s.to_string())
    }
}

fn cleaned(row: &CsvRow, key: &str) -> Option<String> {
    row.get(key).and_then(|v| clean_field(v))
}

/// Parse raw CSV text into row maps. Structural parse failure is an error
/// reported before any row is processed.
///
/// Some spreadsheet tools export a file whose every line is one quoted
/// column holding the real comma-separated row. That shape is detected once
/// up front (a single header cell whose text contains a comma) and
/// re-parsed in headerless mode; both shapes are normalized to the same
/// row-map form before the per-row pipeline runs.
pub fn parse_csv_rows(text: &str) -> Result<Vec<CsvRow>> {
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .map(clean_header)
        .collect();

    if headers.len() == 1 && headers[0].contains(',') {
        return parse_mangled_rows(text);
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("Failed to parse CSV record")?;
        let mut row = CsvRow::new();
        for (idx, header) in headers.iter().enumerate() {
            row.insert(
                header.clone(),
                record.get(idx).unwrap_or("").to_string(),
            );
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Split one mangled line (a single cell holding a full CSV row) into its
/// real fields.
fn split_mangled_line(line: &str) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    match reader.records().next() {
        Some(record) => {
            let record = record.context("Failed to re-parse mangled CSV line")?;
            Ok(record.iter().map(|f| f.to_string()).collect())
        }
        None => Ok(Vec::new()),
    }
}

fn parse_mangled_rows(text: &str) -> Result<Vec<CsvRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut lines: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.context("Failed to parse mangled CSV")?;
        let raw = record.get(0).unwrap_or("");
        lines.push(split_mangled_line(raw)?);
    }

    let mut lines = lines.into_iter();
    let header_row: Vec<String> = match lines.next() {
        Some(fields) => fields.iter().map(|f| clean_header(f)).collect(),
        None => return Ok(Vec::new()),
    };

    let mut rows = Vec::new();
    for fields in lines {
        let mut row = CsvRow::new();
        for (idx, key) in header_row.iter().enumerate() {
            let value = fields
                .get(idx)
                .map(|f| f.trim().trim_matches('"').to_string())
                .unwrap_or_default();
            row.insert(key.clone(), value);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Create entries for the given rows, strictly sequentially.
///
/// A row missing Date, Type, Amount or Category after cleaning is skipped,
/// as is one whose type, amount or date does not parse. The first store
/// failure aborts the remaining rows and flips the outcome to failure;
/// rows already inserted are not rolled back.
pub fn import_entries(conn: &Connection, user_id: i64, rows: &[CsvRow]) -> ImportOutcome {
    match import_rows(conn, user_id, rows) {
        Ok(()) => ImportOutcome { success: true },
        Err(e) => {
            eprintln!("Error importing entries: {:#}", e);
            ImportOutcome { success: false }
        }
    }
}

fn import_rows(conn: &Connection, user_id: i64, rows: &[CsvRow]) -> Result<()> {
    for row in rows {
        let date_val = cleaned(row, "Date").or_else(|| cleaned(row, "\u{feff}Date"));
        let type_val = cleaned(row, "Type");
        let amount_val = cleaned(row, "Amount");
        let category_val = cleaned(row, "Category");
        let place_name = cleaned(row, "Place");
        let description = cleaned(row, "Description");

        let (date_raw, type_raw, amount_raw, category_name) =
            match (date_val, type_val, amount_val, category_val) {
                (Some(d), Some(t), Some(a), Some(c)) => (d, t, a, c),
                _ => continue,
            };

        // Unrecognized type text and unparseable amounts/dates are
        // validation gaps like a missing column: skip the row.
        let entry_type = match EntryType::parse(&type_raw) {
            Some(t) => t,
            None => continue,
        };
        let amount = match amount_raw.parse::<f64>() {
            Ok(a) if a >= 0.0 => a,
            _ => continue,
        };
        let date = match parse_entry_date(&date_raw) {
            Some(d) => d,
            None => continue,
        };

        add_entry(
            conn,
            &NewEntry {
                user_id,
                entry_type,
                amount,
                category_name,
                place_name,
                date,
                description: Some(description.unwrap_or_default()),
            },
        )?;
    }
    Ok(())
}

/// ISO dates first, then a datetime prefix, then US-style slashes.
fn parse_entry_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Some(prefix) = raw.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Some(date);
        }
    }
    NaiveDate::parse_from_str(raw, "%m/%d/%Y").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::entry::{add_entry, get_filtered_entries, NewEntry};
    use crate::entities::user::create_user;

    fn test_conn() -> (Connection, i64) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let user = create_user(&conn, "csv@example.com", "pw").unwrap();
        let user_id = user.id;
        (conn, user_id)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(pairs: &[(&str, &str)]) -> CsvRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_clean_field() {
        assert_eq!(clean_field("  hello  "), Some("hello".to_string()));
        assert_eq!(clean_field("\u{feff}Date"), Some("Date".to_string()));
        assert_eq!(clean_field("\"quoted\""), Some("quoted".to_string()));
        assert_eq!(clean_field("'single'"), Some("single".to_string()));
        assert_eq!(clean_field("say \"\"hi\"\""), Some("say \"hi\"".to_string()));
        assert_eq!(clean_field("value,,"), Some("value".to_string()));
        assert_eq!(clean_field(""), None);
        assert_eq!(clean_field("\"\""), None);
        assert_eq!(clean_field("   "), None);
    }

    #[test]
    fn test_export_format() {
        let (conn, user_id) = test_conn();
        add_entry(
            &conn,
            &NewEntry {
                user_id,
                entry_type: EntryType::Expense,
                amount: 42.5,
                category_name: "Groceries".to_string(),
                place_name: Some("Walmart".to_string()),
                date: date(2024, 3, 1),
                description: Some("weekly".to_string()),
            },
        )
        .unwrap();
        add_entry(
            &conn,
            &NewEntry {
                user_id,
                entry_type: EntryType::Income,
                amount: 100.0,
                category_name: "Salary".to_string(),
                place_name: None,
                date: date(2024, 3, 5),
                description: None,
            },
        )
        .unwrap();

        let csv = export_entries_to_csv(&conn, user_id, &EntryFilter::default(), date(2024, 6, 1))
            .unwrap();
        assert_eq!(
            csv,
            "Date,Type,Amount,Category,Place,Description\n\
             \"2024-03-05\",\"INCOME\",100,\"Salary\",\"\",\"\"\n\
             \"2024-03-01\",\"EXPENSE\",42.5,\"Groceries\",\"Walmart\",\"weekly\""
        );
    }

    #[test]
    fn test_import_creates_category_once() {
        let (conn, user_id) = test_conn();
        let rows = vec![row(&[
            ("Date", "2024-03-01"),
            ("Type", "EXPENSE"),
            ("Amount", "42.50"),
            ("Category", "Groceries"),
        ])];

        let outcome = import_entries(&conn, user_id, &rows);
        assert!(outcome.success);

        let outcome = import_entries(&conn, user_id, &rows);
        assert!(outcome.success);

        let categories: i64 = conn
            .query_row("SELECT COUNT(*) FROM categories", [], |r| r.get(0))
            .unwrap();
        let entries: i64 = conn
            .query_row("SELECT COUNT(*) FROM entries", [], |r| r.get(0))
            .unwrap();
        assert_eq!(categories, 1);
        assert_eq!(entries, 2);
    }

    #[test]
    fn test_import_skips_row_missing_amount() {
        let (conn, user_id) = test_conn();
        let rows = vec![
            row(&[
                ("Date", "2024-03-01"),
                ("Type", "EXPENSE"),
                ("Category", "Groceries"),
            ]),
            row(&[
                ("Date", "2024-03-02"),
                ("Type", "EXPENSE"),
                ("Amount", "5"),
                ("Category", "Groceries"),
            ]),
        ];

        let outcome = import_entries(&conn, user_id, &rows);
        assert!(outcome.success);

        let entries: i64 = conn
            .query_row("SELECT COUNT(*) FROM entries", [], |r| r.get(0))
            .unwrap();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_import_skips_unrecognized_type() {
        let (conn, user_id) = test_conn();
        let rows = vec![row(&[
            ("Date", "2024-03-01"),
            ("Type", "TRANSFER"),
            ("Amount", "10"),
            ("Category", "Misc"),
        ])];

        let outcome = import_entries(&conn, user_id, &rows);
        assert!(outcome.success);

        let entries: i64 = conn
            .query_row("SELECT COUNT(*) FROM entries", [], |r| r.get(0))
            .unwrap();
        assert_eq!(entries, 0);
    }

    #[test]
    fn test_import_cleans_bom_and_quotes() {
        let (conn, user_id) = test_conn();
        let rows = vec![row(&[
            ("\u{feff}Date", "\"2024-03-01\""),
            ("Type", " EXPENSE "),
            ("Amount", "\"42.50\""),
            ("Category", "\"Groceries\""),
            ("Place", "Walmart,,"),
        ])];

        let outcome = import_entries(&conn, user_id, &rows);
        assert!(outcome.success);

        let entries =
            get_filtered_entries(&conn, user_id, &EntryFilter::default(), date(2024, 6, 1))
                .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, 42.5);
        assert_eq!(entries[0].category_name, "Groceries");
        assert_eq!(entries[0].place_name.as_deref(), Some("Walmart"));
    }

    #[test]
    fn test_parse_normal_csv() {
        let text = "Date,Type,Amount,Category,Place,Description\n\
                    \"2024-03-01\",\"EXPENSE\",42.5,\"Groceries\",\"Walmart\",\"weekly\"";
        let rows = parse_csv_rows(text).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Date"], "2024-03-01");
        assert_eq!(rows[0]["Amount"], "42.5");
        assert_eq!(rows[0]["Place"], "Walmart");
    }

    #[test]
    fn test_mangled_detection_triggers_on_single_comma_header() {
        // every line is one quoted cell holding the real row
        let text = "\"Date,Type,Amount,Category,Place,Description\"\n\
                    \"2024-03-01,EXPENSE,42.5,Groceries,Walmart,weekly\"";
        let rows = parse_csv_rows(text).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Date"], "2024-03-01");
        assert_eq!(rows[0]["Type"], "EXPENSE");
        assert_eq!(rows[0]["Category"], "Groceries");
    }

    #[test]
    fn test_mangled_detection_not_triggered_by_normal_header() {
        let text = "Date,Type,Amount,Category,Place,Description\n\
                    2024-03-01,EXPENSE,42.5,Groceries,,";
        let rows = parse_csv_rows(text).unwrap();
        assert_eq!(rows.len(), 1);
        // object mode kept all six keys
        assert_eq!(rows[0].len(), 6);
    }

    #[test]
    fn test_single_column_without_comma_does_not_trigger_fallback() {
        let text = "Name\nAlice\nBob";
        let rows = parse_csv_rows(text).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Name"], "Alice");
    }

    #[test]
    fn test_structural_parse_error_is_reported() {
        // record longer than the header is a structural error, not a skip
        let text = "Date,Type\na,b,c";
        assert!(parse_csv_rows(text).is_err());
    }

    #[test]
    fn test_round_trip_preserves_entry_tuples() {
        let (conn, user_id) = test_conn();
        add_entry(
            &conn,
            &NewEntry {
                user_id,
                entry_type: EntryType::Expense,
                amount: 42.5,
                category_name: "Groceries".to_string(),
                place_name: Some("Walmart".to_string()),
                date: date(2024, 3, 1),
                description: Some("weekly".to_string()),
            },
        )
        .unwrap();
        add_entry(
            &conn,
            &NewEntry {
                user_id,
                entry_type: EntryType::Income,
                amount: 1200.0,
                category_name: "Salary".to_string(),
                place_name: None,
                date: date(2024, 2, 28),
                description: None,
            },
        )
        .unwrap();

        let csv = export_entries_to_csv(&conn, user_id, &EntryFilter::default(), date(2024, 6, 1))
            .unwrap();

        let other = create_user(&conn, "copy@example.com", "pw").unwrap();
        let rows = parse_csv_rows(&csv).unwrap();
        let outcome = import_entries(&conn, other.id, &rows);
        assert!(outcome.success);

        let original =
            get_filtered_entries(&conn, user_id, &EntryFilter::default(), date(2024, 6, 1))
                .unwrap();
        let imported =
            get_filtered_entries(&conn, other.id, &EntryFilter::default(), date(2024, 6, 1))
                .unwrap();
        assert_eq!(original.len(), imported.len());
        for (a, b) in original.iter().zip(imported.iter()) {
            assert_eq!(a.entry_type, b.entry_type);
            assert_eq!(a.amount, b.amount);
            assert_eq!(a.category_name, b.category_name);
            assert_eq!(a.place_name, b.place_name);
            assert_eq!(a.description, b.description);
            assert_eq!(a.date, b.date);
        }
    }
}
