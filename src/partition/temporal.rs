//! Temporal partitioning of consolidated archives.
//!
//! Consolidated files are grouped and named by time period; the period
//! prefix (`2021`, `2021_3`, `2021_7_15`) is the leading component of
//! every consolidated file name inside a spatial partition.

use chrono::{Datelike, Months, NaiveDate, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::error::{BucketError, Result};

/// Granularity of the temporal grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporalPartitioning {
    Year,
    Quarter,
    Month,
    Day,
}

/// One temporal group: half-open period and its file-name prefix
#[derive(Debug, Clone, PartialEq)]
pub struct TimePeriod {
    pub prefix: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TemporalPartitioning {
    /// File-name prefix for the period containing a timestamp.
    ///
    /// Months and days are not zero padded, matching the consolidated
    /// file naming of existing archives.
    #[must_use]
    pub fn prefix(&self, t: NaiveDateTime) -> String {
        match self {
            Self::Year => format!("{}", t.year()),
            Self::Quarter => format!("{}_{}", t.year(), (t.month() - 1) / 3 + 1),
            Self::Month => format!("{}_{}", t.year(), t.month()),
            Self::Day => format!("{}_{}_{}", t.year(), t.month(), t.day()),
        }
    }

    fn align_down(&self, t: NaiveDateTime) -> Result<NaiveDateTime> {
        let date = match self {
            Self::Year => NaiveDate::from_ymd_opt(t.year(), 1, 1),
            Self::Quarter => {
                let quarter_start_month = 3 * ((t.month() - 1) / 3) + 1;
                NaiveDate::from_ymd_opt(t.year(), quarter_start_month, 1)
            }
            Self::Month => NaiveDate::from_ymd_opt(t.year(), t.month(), 1),
            Self::Day => Some(t.date()),
        };
        date.and_then(|d| d.and_hms_opt(0, 0, 0)).ok_or_else(|| {
            BucketError::Partitioning(format!("Cannot align timestamp {t} to {self:?}"))
        })
    }

    fn next_boundary(&self, aligned: NaiveDateTime) -> Result<NaiveDateTime> {
        let next = match self {
            Self::Year => aligned.checked_add_months(Months::new(12)),
            Self::Quarter => aligned.checked_add_months(Months::new(3)),
            Self::Month => aligned.checked_add_months(Months::new(1)),
            Self::Day => aligned.checked_add_signed(TimeDelta::days(1)),
        };
        next.ok_or_else(|| {
            BucketError::Partitioning(format!("Timestamp overflow past {aligned}"))
        })
    }

    /// Half-open, boundary-aligned, clamped periods covering `[start, end)`.
    ///
    /// Periods are pairwise disjoint, sorted and non-empty; the first and
    /// last are clamped to the requested window.
    pub fn periods(&self, start: NaiveDateTime, end: NaiveDateTime) -> Result<Vec<TimePeriod>> {
        if start >= end {
            return Err(BucketError::Partitioning(format!(
                "Invalid time window: start {start} is not before end {end}"
            )));
        }
        let mut periods = Vec::new();
        let mut cursor = self.align_down(start)?;
        while cursor < end {
            let boundary = self.next_boundary(cursor)?;
            let group_start = cursor.max(start);
            let group_end = boundary.min(end);
            if group_start < group_end {
                periods.push(TimePeriod {
                    prefix: self.prefix(group_start),
                    start: group_start,
                    end: group_end,
                });
            }
            cursor = boundary;
        }
        Ok(periods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, mo: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn prefixes_are_not_zero_padded() {
        let t = dt(2021, 7, 5, 1);
        assert_eq!(TemporalPartitioning::Year.prefix(t), "2021");
        assert_eq!(TemporalPartitioning::Quarter.prefix(t), "2021_3");
        assert_eq!(TemporalPartitioning::Month.prefix(t), "2021_7");
        assert_eq!(TemporalPartitioning::Day.prefix(t), "2021_7_5");
    }

    #[test]
    fn yearly_periods_cover_and_clamp() {
        let periods = TemporalPartitioning::Year
            .periods(dt(2020, 6, 1, 0), dt(2022, 3, 1, 0))
            .unwrap();
        assert_eq!(periods.len(), 3);
        assert_eq!(periods[0].prefix, "2020");
        assert_eq!(periods[0].start, dt(2020, 6, 1, 0));
        assert_eq!(periods[0].end, dt(2021, 1, 1, 0));
        assert_eq!(periods[1].prefix, "2021");
        assert_eq!(periods[2].start, dt(2022, 1, 1, 0));
        assert_eq!(periods[2].end, dt(2022, 3, 1, 0));
    }

    #[test]
    fn quarterly_periods_align_to_quarter_starts() {
        let periods = TemporalPartitioning::Quarter
            .periods(dt(2021, 2, 15, 0), dt(2021, 8, 1, 0))
            .unwrap();
        let prefixes: Vec<_> = periods.iter().map(|p| p.prefix.clone()).collect();
        assert_eq!(prefixes, vec!["2021_1", "2021_2", "2021_3"]);
        assert_eq!(periods[1].start, dt(2021, 4, 1, 0));
        assert_eq!(periods[1].end, dt(2021, 7, 1, 0));
    }

    #[test]
    fn periods_are_disjoint_and_sorted() {
        let periods = TemporalPartitioning::Month
            .periods(dt(2021, 11, 20, 12), dt(2022, 2, 2, 0))
            .unwrap();
        assert_eq!(periods.len(), 4);
        for pair in periods.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(periods[0].prefix, "2021_11");
        assert_eq!(periods[3].prefix, "2022_2");
    }

    #[test]
    fn empty_window_is_rejected() {
        let t = dt(2021, 1, 1, 0);
        assert!(TemporalPartitioning::Year.periods(t, t).is_err());
    }

    #[test]
    fn daily_periods() {
        let periods = TemporalPartitioning::Day
            .periods(dt(2024, 5, 1, 23), dt(2024, 5, 3, 1))
            .unwrap();
        assert_eq!(periods.len(), 3);
        assert_eq!(periods[0].prefix, "2024_5_1");
        assert_eq!(periods[0].start, dt(2024, 5, 1, 23));
        assert_eq!(periods[2].end, dt(2024, 5, 3, 1));
    }
}
