//! Decides which remote files belong to a target calendar date.
//!
//! Remote metadata timestamps are unreliable (zero when absent, or the
//! transfer time instead of the recording time), so the date embedded in the
//! file name is used as a fallback. A name carrying a `20YYMMDD` token for the
//! target day is accepted even when its content covers another day.

use std::sync::OnceLock;

use chrono::{DateTime, Local, NaiveDate, Utc};
use regex::Regex;
use serde::Deserialize;

use crate::contract::RemoteFileRecord;

fn digit_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[0-9]{8,}").expect("static regex"))
}

/// Timezone in which epoch timestamps are turned into calendar dates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateBasis {
    #[default]
    Utc,
    Local,
}

impl DateBasis {
    /// Calendar date of `epoch_secs`, or `None` for zero or out-of-range values.
    pub fn date_of(self, epoch_secs: i64) -> Option<NaiveDate> {
        if epoch_secs == 0 {
            return None;
        }
        let utc = DateTime::<Utc>::from_timestamp(epoch_secs, 0)?;
        Some(match self {
            DateBasis::Utc => utc.date_naive(),
            DateBasis::Local => utc.with_timezone(&Local).date_naive(),
        })
    }

    pub fn today(self) -> NaiveDate {
        match self {
            DateBasis::Utc => Utc::now().date_naive(),
            DateBasis::Local => Local::now().date_naive(),
        }
    }

    pub fn yesterday(self) -> NaiveDate {
        let today = self.today();
        today.pred_opt().unwrap_or(today)
    }
}

/// Dates encoded as `20YYMMDD` tokens in a file name. Invalid dates are skipped.
///
/// Every 8-digit window of a longer digit run is tried, so `2020250514`
/// yields 2025-05-14 even though `20202505` comes first.
pub fn name_dates(name: &str) -> impl Iterator<Item = NaiveDate> + '_ {
    digit_run_re().find_iter(name).flat_map(|run| {
        let digits = run.as_str();
        (0..=digits.len() - 8).filter_map(move |i| {
            let window = &digits[i..i + 8];
            if !window.starts_with("20") {
                return None;
            }
            NaiveDate::parse_from_str(window, "%Y%m%d").ok()
        })
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DateMatcher {
    basis: DateBasis,
}

impl DateMatcher {
    pub fn new(basis: DateBasis) -> Self {
        Self { basis }
    }

    pub fn basis(&self) -> DateBasis {
        self.basis
    }

    /// Created date, then modified date, then any date token in the name.
    pub fn matches(&self, file: &RemoteFileRecord, target: NaiveDate) -> bool {
        let on_target = |ts: Option<i64>| ts.and_then(|t| self.basis.date_of(t)) == Some(target);
        on_target(file.created)
            || on_target(file.modified)
            || name_dates(&file.name).any(|d| d == target)
    }

    /// Files accepted for `target`, newest first.
    pub fn select(&self, files: &[RemoteFileRecord], target: NaiveDate) -> Vec<RemoteFileRecord> {
        let mut out: Vec<RemoteFileRecord> = files
            .iter()
            .filter(|f| self.matches(f, target))
            .cloned()
            .collect();
        out.sort_by_key(|f| std::cmp::Reverse(f.recency()));
        out
    }
}

/// UTC matcher; see [`DateMatcher::matches`].
pub fn matches(file: &RemoteFileRecord, target: NaiveDate) -> bool {
    DateMatcher::default().matches(file, target)
}

/// The `limit` most recent files regardless of date.
pub fn most_recent(files: &[RemoteFileRecord], limit: usize) -> Vec<RemoteFileRecord> {
    let mut out = files.to_vec();
    out.sort_by_key(|f| std::cmp::Reverse(f.recency()));
    out.truncate(limit);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn name_dates_skips_impossible_calendar_days() {
        let found: Vec<_> = name_dates("x_20251399_20250514.ddd").collect();
        assert_eq!(found, vec![d(2025, 5, 14)]);
    }

    #[test]
    fn name_dates_tries_every_window_of_a_digit_run() {
        let found: Vec<_> = name_dates("D2020250514.ddd").collect();
        assert_eq!(found, vec![d(2025, 5, 14)]);
    }

    #[test]
    fn zero_timestamp_has_no_date() {
        assert_eq!(DateBasis::Utc.date_of(0), None);
    }

    #[test]
    fn utc_basis_ignores_late_evening_offsets() {
        // 2025-05-14T23:30:00Z
        assert_eq!(DateBasis::Utc.date_of(1_747_265_400), Some(d(2025, 5, 14)));
    }
}
