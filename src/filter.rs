use chrono::{Datelike, NaiveDate};
use rusqlite::types::ToSql;
use serde::Deserialize;

/// Optional narrowing of an entry query. Month is 1-12, year is a 4-digit
/// calendar year. All date resolution produces half-open [start, end)
/// intervals so an entry dated exactly on `end` is excluded.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct EntryFilter {
    pub category_id: Option<i64>,
    pub place_id: Option<i64>,
    pub month: Option<u32>,
    pub year: Option<i32>,
}

impl EntryFilter {
    /// Date interval implied by the month/year fields, if any.
    ///
    /// - month + year: that calendar month
    /// - month only: that month of `today`'s year
    /// - year only: the full calendar year
    /// - neither: no date restriction
    pub fn resolved_interval(&self, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        match (self.month, self.year) {
            (Some(month), year) => {
                let year = year.unwrap_or_else(|| today.year());
                let start = month_start(year, month)?;
                Some((start, next_month_start(year, month)?))
            }
            (None, Some(year)) => {
                let start = month_start(year, 1)?;
                let end = month_start(year + 1, 1)?;
                Some((start, end))
            }
            (None, None) => None,
        }
    }

    /// The calendar month used for the "last month" statistic: the month
    /// before the filtered month when both month and year are set, otherwise
    /// the month before `today`. January rolls back to December of the
    /// previous year.
    pub fn previous_month_interval(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let (year, month) = match (self.month, self.year) {
            (Some(month @ 1..=12), Some(year)) => (year, month),
            _ => (today.year(), today.month()),
        };
        let (prev_year, prev_month) = if month == 1 {
            (year - 1, 12)
        } else {
            (year, month - 1)
        };
        // prev_month is always 1-12, so first-of-month construction cannot fail
        let start = month_start(prev_year, prev_month).expect("first of month");
        let end = next_month_start(prev_year, prev_month).expect("first of next month");
        (start, end)
    }

    /// The "this month" window the statistics run over: the filtered month
    /// when month is set, the filtered year when only year is set, and the
    /// current calendar month otherwise.
    pub fn stats_interval(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        if self.month.is_some() || self.year.is_some() {
            if let Some(interval) = self.resolved_interval(today) {
                return interval;
            }
        }
        let start = today.with_day(1).expect("first of month");
        let end = next_month_start(today.year(), today.month())
            .expect("first of next month");
        (start, end)
    }
}

/// First day of a calendar month. None for an out-of-range month.
pub fn month_start(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

/// First day of the month after (year, month), wrapping the year boundary.
pub fn next_month_start(year: i32, month: u32) -> Option<NaiveDate> {
    if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
}

/// WHERE fragment plus bound parameters shared by every entry query. The
/// clause always begins with the user scope; date bounds are added only when
/// an interval is supplied.
pub(crate) struct SqlFilter {
    pub clause: String,
    pub params: Vec<Box<dyn ToSql>>,
}

impl SqlFilter {
    pub(crate) fn param_refs(&self) -> Vec<&dyn ToSql> {
        self.params.iter().map(|p| p.as_ref()).collect()
    }
}

pub(crate) fn entry_where(
    user_id: i64,
    filter: &EntryFilter,
    interval: Option<(NaiveDate, NaiveDate)>,
) -> SqlFilter {
    let mut clause = String::from("e.user_id = ?");
    let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(user_id)];

    if let Some(category_id) = filter.category_id {
        clause.push_str(" AND e.category_id = ?");
        params.push(Box::new(category_id));
    }
    if let Some(place_id) = filter.place_id {
        clause.push_str(" AND e.place_id = ?");
        params.push(Box::new(place_id));
    }
    if let Some((start, end)) = interval {
        clause.push_str(" AND e.date >= ? AND e.date < ?");
        params.push(Box::new(start.format("%Y-%m-%d").to_string()));
        params.push(Box::new(end.format("%Y-%m-%d").to_string()));
    }

    SqlFilter { clause, params }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_no_filter_has_no_date_bound() {
        let filter = EntryFilter::default();
        assert!(filter.resolved_interval(date(2024, 6, 15)).is_none());
    }

    #[test]
    fn test_month_and_year_resolve_to_that_month() {
        let filter = EntryFilter {
            month: Some(3),
            year: Some(2024),
            ..Default::default()
        };
        let (start, end) = filter.resolved_interval(date(2025, 1, 1)).unwrap();
        assert_eq!(start, date(2024, 3, 1));
        assert_eq!(end, date(2024, 4, 1));
    }

    #[test]
    fn test_month_without_year_uses_current_year() {
        let filter = EntryFilter {
            month: Some(12),
            ..Default::default()
        };
        let (start, end) = filter.resolved_interval(date(2023, 5, 20)).unwrap();
        assert_eq!(start, date(2023, 12, 1));
        assert_eq!(end, date(2024, 1, 1));
    }

    #[test]
    fn test_year_only_resolves_to_full_year() {
        let filter = EntryFilter {
            year: Some(2022),
            ..Default::default()
        };
        let (start, end) = filter.resolved_interval(date(2024, 6, 15)).unwrap();
        assert_eq!(start, date(2022, 1, 1));
        assert_eq!(end, date(2023, 1, 1));
    }

    #[test]
    fn test_previous_month_of_january_wraps_to_december() {
        let filter = EntryFilter {
            month: Some(1),
            year: Some(2024),
            ..Default::default()
        };
        let (start, end) = filter.previous_month_interval(date(2024, 6, 1));
        assert_eq!(start, date(2023, 12, 1));
        assert_eq!(end, date(2024, 1, 1));
    }

    #[test]
    fn test_previous_month_without_filter_precedes_today() {
        let filter = EntryFilter::default();
        let (start, end) = filter.previous_month_interval(date(2024, 3, 15));
        assert_eq!(start, date(2024, 2, 1));
        assert_eq!(end, date(2024, 3, 1));
    }

    #[test]
    fn test_stats_interval_defaults_to_current_month() {
        let filter = EntryFilter::default();
        let (start, end) = filter.stats_interval(date(2024, 7, 9));
        assert_eq!(start, date(2024, 7, 1));
        assert_eq!(end, date(2024, 8, 1));
    }

    #[test]
    fn test_stats_interval_with_year_only_covers_year() {
        let filter = EntryFilter {
            year: Some(2021),
            ..Default::default()
        };
        let (start, end) = filter.stats_interval(date(2024, 7, 9));
        assert_eq!(start, date(2021, 1, 1));
        assert_eq!(end, date(2022, 1, 1));
    }

    #[test]
    fn test_where_clause_scopes_user_and_filters() {
        let filter = EntryFilter {
            category_id: Some(4),
            ..Default::default()
        };
        let sql = entry_where(7, &filter, Some((date(2024, 1, 1), date(2024, 2, 1))));
        assert_eq!(
            sql.clause,
            "e.user_id = ? AND e.category_id = ? AND e.date >= ? AND e.date < ?"
        );
        assert_eq!(sql.params.len(), 4);
    }
}
