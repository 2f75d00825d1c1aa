// spendlog - Personal expense tracking
// Exposes all modules for use in the CLI, API server, and tests

pub mod csv_io;
pub mod db;
pub mod entities;
pub mod filter;
pub mod session;
pub mod stats;

// Re-export commonly used types
pub use csv_io::{
    export_entries_to_csv, import_entries, parse_csv_rows, CsvRow, ImportOutcome, CSV_HEADER,
};
pub use db::{database_path, open_database, setup_database, DEFAULT_DB_PATH};
pub use entities::{
    add_entry, create_user, delete_entry, edit_entry, find_or_create_category,
    find_or_create_place, find_user_by_email, get_entry, get_filtered_entries,
    get_paginated_entries, get_recent_entries, list_categories, list_places, verify_credentials,
    Category, Entry, EntryPage, EntryPatch, EntryType, NewEntry, Place, User,
};
pub use filter::EntryFilter;
pub use session::{create_session, delete_session, session_user};
pub use stats::{
    get_monthly_stats, get_summary, CashFlowBucket, CategoryTotal, MonthlyStats, Summary,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
