use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::archive::{ArchiveState, ArchivedAt};
use crate::error::{Error, Result};

/// Format of the `since:`/`until:` search filters.
///
/// The search backend only filters by calendar day (UTC), so planned
/// boundaries have day granularity.
pub const QUERY_DATE_FORMAT: &str = "%Y-%m-%d";

/// How the query window of each account is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    /// Walk backwards from the oldest archived file.
    Decremental,
    /// Walk forwards from the newest archived file.
    Incremental,
    /// Use the bounds given on the command line verbatim; `None` is unbounded.
    Explicit {
        since: Option<String>,
        until: Option<String>,
    },
}

impl RunMode {
    /// Validate command line flags. Runs before any filesystem access.
    pub fn from_flags(decremental: bool, incremental: bool, since: &str, until: &str) -> Result<Self> {
        match (decremental, incremental) {
            (true, true) => Err(Error::ConflictingMode),
            (true, false) => Ok(RunMode::Decremental),
            (false, true) => Ok(RunMode::Incremental),
            (false, false) => Ok(RunMode::Explicit {
                since: explicit_bound("since", since),
                until: explicit_bound("until", until),
            }),
        }
    }

    /// Whether planning depends on the archive directory contents.
    pub fn needs_scan(&self) -> bool {
        !matches!(self, RunMode::Explicit { .. })
    }
}

/// Empty means unbounded; anything else goes to the search backend as given.
fn explicit_bound(flag: &str, value: &str) -> Option<String> {
    if value.is_empty() {
        return None;
    }
    if query_day(value).is_none() {
        tracing::warn!("--{flag} `{value}` does not start with a YYYY-MM-DD date, passing it on unchanged");
    }
    Some(value.to_string())
}

/// Calendar day of a `since:`/`until:` value, e.g. `2023-05-10` or
/// `2023-05-10_12:00:00_UTC`.
pub fn query_day(value: &str) -> Option<NaiveDate> {
    let day = value.split('_').next()?;
    NaiveDate::parse_from_str(day, QUERY_DATE_FORMAT).ok()
}

fn format_day(day: NaiveDate) -> String {
    day.format(QUERY_DATE_FORMAT).to_string()
}

/// Bounds handed to the search backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBoundary {
    pub since: Option<String>,
    pub until: Option<String>,
}

/// Choose the query window for one account.
///
/// Decremental rounds `until` up by a day so the oldest archived day is not
/// fetched again on every run. Incremental keeps the newest day in range to
/// pick up media posted later that same day.
pub fn plan(mode: &RunMode, state: &ArchiveState) -> WindowBoundary {
    match mode {
        RunMode::Decremental => WindowBoundary {
            since: None,
            until: state
                .oldest
                .and_then(|t| t.day().checked_add_days(Days::new(1)))
                .map(format_day),
        },
        RunMode::Incremental => WindowBoundary {
            since: state.newest.as_ref().map(ArchivedAt::day).map(format_day),
            until: None,
        },
        RunMode::Explicit { since, until } => WindowBoundary {
            since: since.clone(),
            until: until.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{scan, ArchivedAt};
    use chrono::{TimeZone, Utc};
    use std::fs::File;
    use tempfile::tempdir;

    fn state_with_file(ts: chrono::DateTime<Utc>) -> (tempfile::TempDir, ArchiveState) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1.jpg");
        File::create(&path).unwrap();
        ArchivedAt::new(ts).stamp(&path).unwrap();
        let state = scan(dir.path()).unwrap();
        (dir, state)
    }

    #[test]
    fn test_decremental_first_run_unbounded() {
        let dir = tempdir().unwrap();
        let state = scan(dir.path()).unwrap();
        let b = plan(&RunMode::Decremental, &state);
        assert_eq!(b.until, None);
        assert_eq!(b.since, None);
    }

    #[test]
    fn test_decremental_rounds_up_one_day() {
        let (_dir, state) = state_with_file(Utc.with_ymd_and_hms(2023, 5, 10, 0, 0, 0).unwrap());
        let b = plan(&RunMode::Decremental, &state);
        assert_eq!(b.until.as_deref(), Some("2023-05-11"));
        assert_eq!(b.since, None);
    }

    #[test]
    fn test_decremental_crosses_month_end() {
        let (_dir, state) = state_with_file(Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap());
        let b = plan(&RunMode::Decremental, &state);
        assert_eq!(b.until.as_deref(), Some("2024-03-01"));
    }

    #[test]
    fn test_incremental_keeps_boundary_day() {
        let (_dir, state) = state_with_file(Utc.with_ymd_and_hms(2023, 5, 10, 0, 0, 0).unwrap());
        let b = plan(&RunMode::Incremental, &state);
        assert_eq!(b.since.as_deref(), Some("2023-05-10"));
        assert_eq!(b.until, None);
    }

    #[test]
    fn test_incremental_empty_directory() {
        let b = plan(&RunMode::Incremental, &ArchiveState::default());
        assert_eq!(b, WindowBoundary::default());
    }

    #[test]
    fn test_explicit_passthrough() {
        let mode = RunMode::from_flags(false, false, "2020-01-02", "").unwrap();
        assert!(!mode.needs_scan());
        let b = plan(&mode, &ArchiveState::default());
        assert_eq!(b.since.as_deref(), Some("2020-01-02"));
        assert_eq!(b.until, None);
    }

    #[test]
    fn test_conflicting_modes() {
        assert!(matches!(
            RunMode::from_flags(true, true, "", ""),
            Err(Error::ConflictingMode)
        ));
    }

    #[test]
    fn test_explicit_bounds_kept_verbatim() {
        let mode = RunMode::from_flags(false, false, "2023-05-10_12:00:00_UTC", "2023-5-1").unwrap();
        let b = plan(&mode, &ArchiveState::default());
        assert_eq!(b.since.as_deref(), Some("2023-05-10_12:00:00_UTC"));
        assert_eq!(b.until.as_deref(), Some("2023-5-1"));
    }

    #[test]
    fn test_explicit_unparseable_bound_still_passed() {
        let mode = RunMode::from_flags(false, false, "", "yesterday").unwrap();
        let b = plan(&mode, &ArchiveState::default());
        assert_eq!(b.since, None);
        assert_eq!(b.until.as_deref(), Some("yesterday"));
    }

    #[test]
    fn test_query_day() {
        assert_eq!(query_day("2023-05-10"), NaiveDate::from_ymd_opt(2023, 5, 10));
        assert_eq!(query_day("2023-05-10_12:00:00_UTC"), NaiveDate::from_ymd_opt(2023, 5, 10));
        assert_eq!(query_day("yesterday"), None);
    }
}
