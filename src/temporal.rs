// ⏰ Temporal Model
// Stable entities point at a timeline of identities. Each identity is valid
// over a right-open interval [effective_from, effective_to).
//
// effective_to = None means "still current".

use chrono::{NaiveDate, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CatalogError, CatalogResult};

/// ISO calendar date format used on every boundary (API, CSV, SQLite).
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// EFFECTIVE INTERVAL
// ============================================================================

/// Validity window of an identity or affiliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectiveInterval {
    /// First day this record is valid (inclusive)
    pub effective_from: NaiveDate,

    /// First day this record is no longer valid (exclusive). None = current
    pub effective_to: Option<NaiveDate>,
}

impl EffectiveInterval {
    /// Build an interval, rejecting empty or inverted windows.
    pub fn new(effective_from: NaiveDate, effective_to: Option<NaiveDate>) -> CatalogResult<Self> {
        if let Some(to) = effective_to {
            if to <= effective_from {
                return Err(CatalogError::InvalidInput(format!(
                    "effective_to ({}) must be after effective_from ({})",
                    to, effective_from
                )));
            }
        }
        Ok(EffectiveInterval {
            effective_from,
            effective_to,
        })
    }

    /// Open-ended interval starting at `effective_from`.
    pub fn open(effective_from: NaiveDate) -> Self {
        EffectiveInterval {
            effective_from,
            effective_to: None,
        }
    }

    /// Check if this interval is open-ended
    pub fn is_current(&self) -> bool {
        self.effective_to.is_none()
    }

    /// `from <= date AND (to IS NULL OR to > date)`
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.effective_from <= date && self.effective_to.map_or(true, |to| to > date)
    }

    /// True when both intervals share at least one day.
    pub fn overlaps(&self, other: &EffectiveInterval) -> bool {
        let self_ends_after_other_starts = self
            .effective_to
            .map_or(true, |to| to > other.effective_from);
        let other_ends_after_self_starts = other
            .effective_to
            .map_or(true, |to| to > self.effective_from);
        self_ends_after_other_starts && other_ends_after_self_starts
    }
}

impl fmt::Display for EffectiveInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.effective_to {
            Some(to) => write!(f, "{} - {}", self.effective_from, to),
            None => write!(f, "{} - present", self.effective_from),
        }
    }
}

// ============================================================================
// TEMPORAL RECORDS
// ============================================================================

/// A persisted record with a surrogate id and a validity window.
pub trait Temporal {
    fn record_id(&self) -> i64;
    fn interval(&self) -> &EffectiveInterval;
}

/// Ordering key for the tie-break: later start wins, then higher surrogate id.
fn precedence<T: Temporal>(record: &T) -> (NaiveDate, i64) {
    (record.interval().effective_from, record.record_id())
}

fn pick_latest<'a, T, I>(candidates: I, context: &str, what: &str) -> Option<&'a T>
where
    T: Temporal + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let matches: Vec<&'a T> = candidates.into_iter().collect();
    if matches.len() > 1 {
        let ids: Vec<i64> = matches.iter().map(|r| r.record_id()).collect();
        warn!(
            "event=temporal_ambiguity module=temporal context={} lookup={} candidates={:?}",
            context, what, ids
        );
    }
    matches.into_iter().max_by_key(|r| precedence(*r))
}

/// Record valid at `date`, or None.
///
/// Overlapping rows are tolerated: the one with the latest `effective_from`
/// is returned (highest surrogate id on equal starts), and the ambiguity is
/// logged.
pub fn select_at<'a, T, I>(records: I, date: NaiveDate, context: &str) -> Option<&'a T>
where
    T: Temporal + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let what = format!("at:{}", date);
    pick_latest(
        records.into_iter().filter(|r| r.interval().contains(date)),
        context,
        &what,
    )
}

/// Open-ended record, or None. Same tie-break as [`select_at`].
pub fn select_current<'a, T, I>(records: I, context: &str) -> Option<&'a T>
where
    T: Temporal + 'a,
    I: IntoIterator<Item = &'a T>,
{
    pick_latest(
        records.into_iter().filter(|r| r.interval().is_current()),
        context,
        "current",
    )
}

/// All records valid at `date`, without tie-break.
pub fn all_at<'a, T, I>(records: I, date: NaiveDate) -> Vec<&'a T>
where
    T: Temporal + 'a,
    I: IntoIterator<Item = &'a T>,
{
    records
        .into_iter()
        .filter(|r| r.interval().contains(date))
        .collect()
}

/// Sort a timeline by start date (then id), oldest first.
pub fn sort_timeline<T: Temporal>(records: &mut [T]) {
    records.sort_by_key(|r| precedence(r));
}

/// First existing record whose window overlaps `candidate`.
///
/// Two open-ended windows always overlap, so this also catches a second
/// "current" record.
pub fn find_collision<'a, T, I>(existing: I, candidate: &EffectiveInterval) -> Option<&'a T>
where
    T: Temporal + 'a,
    I: IntoIterator<Item = &'a T>,
{
    existing
        .into_iter()
        .find(|r| r.interval().overlaps(candidate))
}

// ============================================================================
// DATES
// ============================================================================

/// Today's date (UTC), the default target for "current" queries.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Parse a `YYYY-MM-DD` date, rejecting anything else.
pub fn parse_date(raw: &str) -> CatalogResult<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CatalogError::InvalidInput(
            "date parameter required (YYYY-MM-DD)".to_string(),
        ));
    }
    NaiveDate::parse_from_str(trimmed, DATE_FORMAT).map_err(|_| {
        CatalogError::InvalidInput(format!(
            "Invalid date format '{}', use YYYY-MM-DD",
            trimmed
        ))
    })
}

/// Parse an optional date argument; absent or "now" means today.
pub fn parse_date_or_today(raw: Option<&str>) -> CatalogResult<NaiveDate> {
    match raw {
        Some(value) if value.trim().eq_ignore_ascii_case("now") => Ok(today()),
        Some(value) => parse_date(value),
        None => Ok(today()),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Slice {
        id: i64,
        interval: EffectiveInterval,
        label: &'static str,
    }

    impl Temporal for Slice {
        fn record_id(&self) -> i64 {
            self.id
        }

        fn interval(&self) -> &EffectiveInterval {
            &self.interval
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn slice(id: i64, from: NaiveDate, to: Option<NaiveDate>, label: &'static str) -> Slice {
        Slice {
            id,
            interval: EffectiveInterval::new(from, to).unwrap(),
            label,
        }
    }

    #[test]
    fn test_interval_rejects_inverted_window() {
        assert!(EffectiveInterval::new(d(1870, 1, 1), Some(d(1860, 1, 1))).is_err());
        assert!(EffectiveInterval::new(d(1870, 1, 1), Some(d(1870, 1, 1))).is_err());
        assert!(EffectiveInterval::new(d(1860, 1, 1), Some(d(1870, 1, 1))).is_ok());
    }

    #[test]
    fn test_interval_is_right_open() {
        let interval = EffectiveInterval::new(d(1860, 1, 1), Some(d(1863, 6, 1))).unwrap();

        assert!(interval.contains(d(1860, 1, 1)));
        assert!(interval.contains(d(1863, 5, 31)));
        assert!(!interval.contains(d(1863, 6, 1)));
        assert!(!interval.contains(d(1859, 12, 31)));
    }

    #[test]
    fn test_open_interval_contains_future() {
        let interval = EffectiveInterval::open(d(1863, 6, 1));
        assert!(interval.is_current());
        assert!(interval.contains(d(2100, 1, 1)));
    }

    #[test]
    fn test_overlaps() {
        let a = EffectiveInterval::new(d(1860, 1, 1), Some(d(1863, 6, 1))).unwrap();
        let adjacent = EffectiveInterval::open(d(1863, 6, 1));
        let inside = EffectiveInterval::new(d(1861, 1, 1), Some(d(1862, 1, 1))).unwrap();

        assert!(!a.overlaps(&adjacent));
        assert!(!adjacent.overlaps(&a));
        assert!(a.overlaps(&inside));
        assert!(inside.overlaps(&a));
    }

    #[test]
    fn test_select_at_boundaries() {
        let rows = vec![
            slice(1, d(1860, 1, 1), Some(d(1863, 6, 1)), "A"),
            slice(2, d(1863, 6, 1), None, "B"),
        ];

        assert_eq!(select_at(&rows, d(1862, 1, 1), "test").unwrap().label, "A");
        assert_eq!(select_at(&rows, d(1863, 6, 1), "test").unwrap().label, "B");
        assert_eq!(select_at(&rows, d(1870, 1, 1), "test").unwrap().label, "B");
        assert!(select_at(&rows, d(1850, 1, 1), "test").is_none());
    }

    #[test]
    fn test_select_at_tie_break_ignores_order() {
        let older = slice(10, d(1860, 1, 1), None, "older");
        let newer = slice(3, d(1865, 1, 1), None, "newer");

        let forward = vec![older.clone(), newer.clone()];
        let reversed = vec![newer, older];

        assert_eq!(select_at(&forward, d(1866, 1, 1), "test").unwrap().label, "newer");
        assert_eq!(select_at(&reversed, d(1866, 1, 1), "test").unwrap().label, "newer");
    }

    #[test]
    fn test_select_current_tie_break_equal_start_uses_id() {
        let rows = vec![
            slice(7, d(1900, 1, 1), None, "seven"),
            slice(9, d(1900, 1, 1), None, "nine"),
        ];
        assert_eq!(select_current(&rows, "test").unwrap().label, "nine");
    }

    #[test]
    fn test_find_collision_second_open() {
        let rows = vec![slice(1, d(1860, 1, 1), None, "A")];
        let closed_before = EffectiveInterval::new(d(1850, 1, 1), Some(d(1855, 1, 1))).unwrap();
        let open_later = EffectiveInterval::open(d(1870, 1, 1));

        assert!(find_collision(&rows, &closed_before).is_none());
        assert!(find_collision(&rows, &open_later).is_some());
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("1863-06-01").unwrap(), d(1863, 6, 1));
        assert!(matches!(parse_date(""), Err(CatalogError::InvalidInput(_))));
        assert!(matches!(parse_date("06/01/1863"), Err(CatalogError::InvalidInput(_))));
        assert!(parse_date_or_today(None).is_ok());
    }

    #[test]
    fn test_sort_timeline() {
        let mut rows = vec![
            slice(2, d(1863, 6, 1), None, "B"),
            slice(1, d(1860, 1, 1), Some(d(1863, 6, 1)), "A"),
        ];
        sort_timeline(&mut rows);
        assert_eq!(rows[0].label, "A");
        assert_eq!(rows[1].label, "B");
    }
}
