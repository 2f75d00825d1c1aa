use std::env;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::Local;

use spendlog::{
    create_user, database_path, export_entries_to_csv, find_user_by_email, get_monthly_stats,
    get_summary, import_entries, open_database, parse_csv_rows, EntryFilter, User,
};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("init") => run_init(),
        Some("adduser") => run_adduser(&args[2..]),
        Some("import") => run_import(&args[2..]),
        Some("export") => run_export(&args[2..]),
        Some("stats") => run_stats(&args[2..]),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("spendlog {}", spendlog::VERSION);
    println!();
    println!("Usage:");
    println!("  spendlog init");
    println!("  spendlog adduser <email> <password>");
    println!("  spendlog import <email> <file.csv>");
    println!("  spendlog export <email> [month] [year]");
    println!("  spendlog stats <email> [month] [year]");
    println!();
    println!("Database path comes from SPENDLOG_DB (default: spendlog.db).");
}

fn require_user(conn: &rusqlite::Connection, email: &str) -> Result<User> {
    find_user_by_email(conn, email)?
        .ok_or_else(|| anyhow!("No user with email '{}'. Run: spendlog adduser", email))
}

/// Filter built from optional [month] [year] positional arguments.
fn filter_from_args(args: &[String]) -> Result<EntryFilter> {
    let mut filter = EntryFilter::default();
    if let Some(month) = args.first() {
        let month: u32 = month
            .parse()
            .with_context(|| format!("Invalid month '{}'", month))?;
        if !(1..=12).contains(&month) {
            return Err(anyhow!("Month must be 1-12, got {}", month));
        }
        filter.month = Some(month);
    }
    if let Some(year) = args.get(1) {
        filter.year = Some(
            year.parse()
                .with_context(|| format!("Invalid year '{}'", year))?,
        );
    }
    Ok(filter)
}

fn run_init() -> Result<()> {
    let path = database_path();
    open_database(Path::new(&path))?;
    println!("✓ Database initialized at {}", path);
    Ok(())
}

fn run_adduser(args: &[String]) -> Result<()> {
    let (email, password) = match args {
        [email, password] => (email, password),
        _ => return Err(anyhow!("Usage: spendlog adduser <email> <password>")),
    };

    let conn = open_database(Path::new(&database_path()))?;
    let user = create_user(&conn, email, password)?;
    println!("✓ Created user {} (id {})", user.email, user.id);
    Ok(())
}

fn run_import(args: &[String]) -> Result<()> {
    let (email, file) = match args {
        [email, file] => (email, file),
        _ => return Err(anyhow!("Usage: spendlog import <email> <file.csv>")),
    };

    let conn = open_database(Path::new(&database_path()))?;
    let user = require_user(&conn, email)?;

    let text = fs::read_to_string(file).with_context(|| format!("Failed to read {}", file))?;
    let rows = parse_csv_rows(&text)?;
    println!("✓ Parsed {} rows from {}", rows.len(), file);

    let before: i64 = conn.query_row(
        "SELECT COUNT(*) FROM entries WHERE user_id = ?1",
        [user.id],
        |row| row.get(0),
    )?;

    let outcome = import_entries(&conn, user.id, &rows);

    let after: i64 = conn.query_row(
        "SELECT COUNT(*) FROM entries WHERE user_id = ?1",
        [user.id],
        |row| row.get(0),
    )?;

    if outcome.success {
        println!("✓ Imported {} entries ({} rows skipped)", after - before, rows.len() as i64 - (after - before));
    } else {
        println!("✗ Import failed after {} entries; remaining rows were not processed", after - before);
        std::process::exit(1);
    }
    Ok(())
}

fn run_export(args: &[String]) -> Result<()> {
    let email = args
        .first()
        .ok_or_else(|| anyhow!("Usage: spendlog export <email> [month] [year]"))?;
    let filter = filter_from_args(&args[1..])?;

    let conn = open_database(Path::new(&database_path()))?;
    let user = require_user(&conn, email)?;

    let today = Local::now().date_naive();
    let csv = export_entries_to_csv(&conn, user.id, &filter, today)?;
    println!("{}", csv);
    Ok(())
}

fn run_stats(args: &[String]) -> Result<()> {
    let email = args
        .first()
        .ok_or_else(|| anyhow!("Usage: spendlog stats <email> [month] [year]"))?;
    let filter = filter_from_args(&args[1..])?;

    let conn = open_database(Path::new(&database_path()))?;
    let user = require_user(&conn, email)?;

    let today = Local::now().date_naive();
    let summary = get_summary(&conn, user.id, &filter, today)?;
    let stats = get_monthly_stats(&conn, user.id, &filter, today)?;

    println!("Summary for {}", user.email);
    println!("  Income:  {:.2}", summary.total_income);
    println!("  Expense: {:.2}", summary.total_expense);
    println!("  Balance: {:.2}", summary.balance);
    println!();
    println!("  Spent this month: {:.2}", stats.total_outcome_this_month);
    println!("  Spent last month: {:.2}", stats.last_month_spending);

    if let Some(top) = &stats.highest_spending_all_time {
        println!(
            "  Biggest expense ever: {:.2} on {} ({})",
            top.amount, top.date, top.category_name
        );
    }

    if !stats.category_wise_spending.is_empty() {
        println!();
        println!("  By category:");
        for category in &stats.category_wise_spending {
            println!("    {:<20} {:.2}", category.category_name, category.total);
        }
    }

    if !stats.monthly_cash_flow.is_empty() {
        println!();
        println!("  Cash flow:");
        for bucket in &stats.monthly_cash_flow {
            println!(
                "    {:<10} +{:.2} / -{:.2}",
                bucket.month, bucket.income, bucket.expense
            );
        }
    }

    Ok(())
}
