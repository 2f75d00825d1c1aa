use anyhow::Result;
use chrono::{Datelike, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::entities::entry::{entry_from_row, Entry, EntryType, ENTRY_SELECT};
use crate::filter::{self, month_start, EntryFilter};

/// Income/expense totals over the filtered entry set. Date-bounded only
/// when the filter carries month/year.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_income: f64,
    pub total_expense: f64,
    pub balance: f64,
}

/// Expense total for one category, annotated with its resolved name.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTotal {
    pub category_id: i64,
    pub category_name: String,
    pub total: f64,
}

/// Income and expense sums for one calendar month, labeled "Mon YYYY".
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashFlowBucket {
    pub month: String,
    pub income: f64,
    pub expense: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyStats {
    pub last_month_spending: f64,
    pub total_outcome_this_month: f64,
    pub monthly_outcome_to_date: Vec<CategoryTotal>,
    pub highest_spending_this_month: Option<Entry>,
    pub highest_spending_all_time: Option<Entry>,
    pub category_wise_spending: Vec<CategoryTotal>,
    pub monthly_cash_flow: Vec<CashFlowBucket>,
}

/// Sum of one entry type over the filtered set. A missing aggregate is zero.
fn type_sum(
    conn: &Connection,
    user_id: i64,
    entry_filter: &EntryFilter,
    interval: Option<(NaiveDate, NaiveDate)>,
    entry_type: EntryType,
) -> Result<f64> {
    let mut sql_filter = filter::entry_where(user_id, entry_filter, interval);
    sql_filter.clause.push_str(" AND e.type = ?");
    sql_filter.params.push(Box::new(entry_type.as_str()));

    let refs = sql_filter.param_refs();
    let sum: f64 = conn.query_row(
        &format!(
            "SELECT COALESCE(SUM(e.amount), 0) FROM entries e WHERE {}",
            sql_filter.clause
        ),
        &refs[..],
        |row| row.get(0),
    )?;
    Ok(sum)
}

pub fn get_summary(
    conn: &Connection,
    user_id: i64,
    entry_filter: &EntryFilter,
    today: NaiveDate,
) -> Result<Summary> {
    let interval = entry_filter.resolved_interval(today);
    let total_income = type_sum(conn, user_id, entry_filter, interval, EntryType::Income)?;
    let total_expense = type_sum(conn, user_id, entry_filter, interval, EntryType::Expense)?;

    Ok(Summary {
        total_income,
        total_expense,
        balance: total_income - total_expense,
    })
}

/// Expense sum per category within the interval, largest first.
fn expense_by_category(
    conn: &Connection,
    user_id: i64,
    entry_filter: &EntryFilter,
    interval: Option<(NaiveDate, NaiveDate)>,
) -> Result<Vec<CategoryTotal>> {
    let sql_filter = filter::entry_where(user_id, entry_filter, interval);
    let sql = format!(
        "SELECT e.category_id, c.name, SUM(e.amount) AS total
         FROM entries e
         JOIN categories c ON c.id = e.category_id
         WHERE {} AND e.type = 'EXPENSE'
         GROUP BY e.category_id, c.name
         ORDER BY total DESC",
        sql_filter.clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let refs = sql_filter.param_refs();
    let totals = stmt
        .query_map(&refs[..], |row| {
            Ok(CategoryTotal {
                category_id: row.get(0)?,
                category_name: row.get(1)?,
                total: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(totals)
}

/// The single largest EXPENSE entry within the interval, if any. Ties go to
/// the first row encountered.
fn highest_expense(
    conn: &Connection,
    user_id: i64,
    entry_filter: &EntryFilter,
    interval: Option<(NaiveDate, NaiveDate)>,
) -> Result<Option<Entry>> {
    let sql_filter = filter::entry_where(user_id, entry_filter, interval);
    let sql = format!(
        "{} WHERE {} AND e.type = 'EXPENSE' ORDER BY e.amount DESC LIMIT 1",
        ENTRY_SELECT, sql_filter.clause
    );

    let refs = sql_filter.param_refs();
    let entry = conn.query_row(&sql, &refs[..], entry_from_row).optional()?;
    Ok(entry)
}

/// Income/expense per calendar month over `window`, chronologically
/// ascending. Buckets with the same "Mon YYYY" label always merge.
fn cash_flow_buckets(
    conn: &Connection,
    user_id: i64,
    entry_filter: &EntryFilter,
    window: (NaiveDate, NaiveDate),
) -> Result<Vec<CashFlowBucket>> {
    let sql_filter = filter::entry_where(user_id, entry_filter, Some(window));
    let sql = format!(
        "SELECT e.type, strftime('%Y-%m', e.date) AS ym, SUM(e.amount)
         FROM entries e
         WHERE {}
         GROUP BY e.type, ym
         ORDER BY ym ASC",
        sql_filter.clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let refs = sql_filter.param_refs();
    let rows = stmt
        .query_map(&refs[..], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut buckets: Vec<CashFlowBucket> = Vec::new();
    for (type_str, ym, sum) in rows {
        let label = match month_label(&ym) {
            Some(label) => label,
            None => continue,
        };
        let idx = match buckets.iter().position(|b| b.month == label) {
            Some(idx) => idx,
            None => {
                buckets.push(CashFlowBucket {
                    month: label,
                    income: 0.0,
                    expense: 0.0,
                });
                buckets.len() - 1
            }
        };
        match EntryType::parse(&type_str) {
            Some(EntryType::Income) => buckets[idx].income += sum,
            Some(EntryType::Expense) => buckets[idx].expense += sum,
            None => {}
        }
    }
    Ok(buckets)
}

/// "2024-03" -> "Mar 2024"
fn month_label(ym: &str) -> Option<String> {
    let first = format!("{}-01", ym);
    NaiveDate::parse_from_str(&first, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%b %Y").to_string())
}

/// The first day of the month `back` months before (year, month).
fn months_back(year: i32, month: u32, back: i32) -> Option<NaiveDate> {
    let total = year * 12 + month as i32 - 1 - back;
    month_start(total.div_euclid(12), (total.rem_euclid(12) + 1) as u32)
}

pub fn get_monthly_stats(
    conn: &Connection,
    user_id: i64,
    entry_filter: &EntryFilter,
    today: NaiveDate,
) -> Result<MonthlyStats> {
    let last_month = entry_filter.previous_month_interval(today);
    let last_month_spending = type_sum(
        conn,
        user_id,
        entry_filter,
        Some(last_month),
        EntryType::Expense,
    )?;

    let (month_start_date, month_end) = entry_filter.stats_interval(today);
    let interval = Some((month_start_date, month_end));

    let total_outcome_this_month =
        type_sum(conn, user_id, entry_filter, interval, EntryType::Expense)?;
    let monthly_outcome_to_date = expense_by_category(conn, user_id, entry_filter, interval)?;
    let highest_spending_this_month = highest_expense(conn, user_id, entry_filter, interval)?;
    let highest_spending_all_time = highest_expense(conn, user_id, entry_filter, None)?;
    let category_wise_spending = expense_by_category(conn, user_id, entry_filter, interval)?;

    // Cash flow covers just the filtered month when one is set, otherwise a
    // trailing six-month window ending at the interval's end.
    let window = if entry_filter.month.is_some() {
        (month_start_date, month_end)
    } else {
        let last_day = month_end.pred_opt().unwrap_or(month_end);
        let start =
            months_back(last_day.year(), last_day.month(), 5).unwrap_or(month_start_date);
        (start, month_end)
    };
    let monthly_cash_flow = cash_flow_buckets(conn, user_id, entry_filter, window)?;

    Ok(MonthlyStats {
        last_month_spending,
        total_outcome_this_month,
        monthly_outcome_to_date,
        highest_spending_this_month,
        highest_spending_all_time,
        category_wise_spending,
        monthly_cash_flow,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::entry::{add_entry, NewEntry};
    use crate::entities::user::create_user;

    fn test_conn() -> (Connection, i64) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let user = create_user(&conn, "stats@example.com", "pw").unwrap();
        let user_id = user.id;
        (conn, user_id)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn insert(
        conn: &Connection,
        user_id: i64,
        entry_type: EntryType,
        amount: f64,
        category: &str,
        day: NaiveDate,
    ) {
        add_entry(
            conn,
            &NewEntry {
                user_id,
                entry_type,
                amount,
                category_name: category.to_string(),
                place_name: None,
                date: day,
                description: None,
            },
        )
        .unwrap();
    }

    #[test]
    fn test_summary_balance_is_income_minus_expense() {
        let (conn, user_id) = test_conn();
        insert(&conn, user_id, EntryType::Income, 100.0, "Salary", date(2024, 3, 1));
        insert(&conn, user_id, EntryType::Expense, 30.0, "Food", date(2024, 3, 2));
        insert(&conn, user_id, EntryType::Expense, 20.0, "Food", date(2024, 3, 3));

        let summary =
            get_summary(&conn, user_id, &EntryFilter::default(), date(2024, 6, 1)).unwrap();
        assert_eq!(summary.total_income, 100.0);
        assert_eq!(summary.total_expense, 50.0);
        assert_eq!(summary.balance, 50.0);
    }

    #[test]
    fn test_summary_is_zero_for_empty_set() {
        let (conn, user_id) = test_conn();
        let summary =
            get_summary(&conn, user_id, &EntryFilter::default(), date(2024, 6, 1)).unwrap();
        assert_eq!(summary.total_income, 0.0);
        assert_eq!(summary.total_expense, 0.0);
        assert_eq!(summary.balance, 0.0);
    }

    #[test]
    fn test_cash_flow_buckets_sum_per_month() {
        let (conn, user_id) = test_conn();
        insert(&conn, user_id, EntryType::Expense, 10.0, "Food", date(2024, 3, 5));
        insert(&conn, user_id, EntryType::Expense, 15.0, "Rent", date(2024, 3, 20));
        insert(&conn, user_id, EntryType::Income, 50.0, "Salary", date(2024, 3, 10));

        let filter = EntryFilter {
            month: Some(3),
            year: Some(2024),
            ..Default::default()
        };
        let stats = get_monthly_stats(&conn, user_id, &filter, date(2024, 6, 15)).unwrap();

        assert_eq!(stats.monthly_cash_flow.len(), 1);
        let bucket = &stats.monthly_cash_flow[0];
        assert_eq!(bucket.month, "Mar 2024");
        assert_eq!(bucket.income, 50.0);
        assert_eq!(bucket.expense, 25.0);
    }

    #[test]
    fn test_cash_flow_trailing_window_is_chronological() {
        let (conn, user_id) = test_conn();
        insert(&conn, user_id, EntryType::Expense, 5.0, "Food", date(2024, 4, 10));
        insert(&conn, user_id, EntryType::Expense, 7.0, "Food", date(2024, 6, 2));
        // outside the six-month window ending in June 2024
        insert(&conn, user_id, EntryType::Expense, 99.0, "Food", date(2023, 11, 2));

        let stats =
            get_monthly_stats(&conn, user_id, &EntryFilter::default(), date(2024, 6, 15))
                .unwrap();

        let months: Vec<&str> = stats
            .monthly_cash_flow
            .iter()
            .map(|b| b.month.as_str())
            .collect();
        assert_eq!(months, vec!["Apr 2024", "Jun 2024"]);
    }

    #[test]
    fn test_last_month_spending_wraps_january() {
        let (conn, user_id) = test_conn();
        insert(&conn, user_id, EntryType::Expense, 40.0, "Food", date(2023, 12, 15));
        insert(&conn, user_id, EntryType::Expense, 5.0, "Food", date(2024, 1, 10));
        insert(&conn, user_id, EntryType::Income, 90.0, "Salary", date(2023, 12, 20));

        let filter = EntryFilter {
            month: Some(1),
            year: Some(2024),
            ..Default::default()
        };
        let stats = get_monthly_stats(&conn, user_id, &filter, date(2024, 6, 15)).unwrap();
        assert_eq!(stats.last_month_spending, 40.0);
    }

    #[test]
    fn test_outcome_by_category_sorted_descending() {
        let (conn, user_id) = test_conn();
        insert(&conn, user_id, EntryType::Expense, 10.0, "Food", date(2024, 3, 5));
        insert(&conn, user_id, EntryType::Expense, 30.0, "Rent", date(2024, 3, 6));
        insert(&conn, user_id, EntryType::Expense, 5.0, "Food", date(2024, 3, 7));

        let filter = EntryFilter {
            month: Some(3),
            year: Some(2024),
            ..Default::default()
        };
        let stats = get_monthly_stats(&conn, user_id, &filter, date(2024, 6, 15)).unwrap();

        assert_eq!(stats.monthly_outcome_to_date.len(), 2);
        assert_eq!(stats.monthly_outcome_to_date[0].category_name, "Rent");
        assert_eq!(stats.monthly_outcome_to_date[0].total, 30.0);
        assert_eq!(stats.monthly_outcome_to_date[1].category_name, "Food");
        assert_eq!(stats.monthly_outcome_to_date[1].total, 15.0);
        assert_eq!(stats.total_outcome_this_month, 45.0);
    }

    #[test]
    fn test_highest_spending_entries() {
        let (conn, user_id) = test_conn();
        insert(&conn, user_id, EntryType::Expense, 10.0, "Food", date(2024, 3, 5));
        insert(&conn, user_id, EntryType::Expense, 500.0, "Travel", date(2022, 8, 1));
        insert(&conn, user_id, EntryType::Income, 9999.0, "Salary", date(2024, 3, 1));

        let filter = EntryFilter {
            month: Some(3),
            year: Some(2024),
            ..Default::default()
        };
        let stats = get_monthly_stats(&conn, user_id, &filter, date(2024, 6, 15)).unwrap();

        let this_month = stats.highest_spending_this_month.unwrap();
        assert_eq!(this_month.amount, 10.0);
        assert_eq!(this_month.category_name, "Food");

        let all_time = stats.highest_spending_all_time.unwrap();
        assert_eq!(all_time.amount, 500.0);
        assert_eq!(all_time.category_name, "Travel");
    }

    #[test]
    fn test_stats_scope_by_user_and_category() {
        let (conn, user_id) = test_conn();
        let other = create_user(&conn, "other@example.com", "pw").unwrap();
        insert(&conn, user_id, EntryType::Expense, 10.0, "Food", date(2024, 3, 5));
        insert(&conn, other.id, EntryType::Expense, 999.0, "Food", date(2024, 3, 5));

        let summary =
            get_summary(&conn, user_id, &EntryFilter::default(), date(2024, 6, 1)).unwrap();
        assert_eq!(summary.total_expense, 10.0);

        // category filter narrows the aggregate
        insert(&conn, user_id, EntryType::Expense, 20.0, "Rent", date(2024, 3, 6));
        let food_id: i64 = conn
            .query_row(
                "SELECT id FROM categories WHERE name = 'Food'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        let filter = EntryFilter {
            category_id: Some(food_id),
            ..Default::default()
        };
        let summary = get_summary(&conn, user_id, &filter, date(2024, 6, 1)).unwrap();
        assert_eq!(summary.total_expense, 10.0);
    }
}
