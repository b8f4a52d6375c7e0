//! Day-count conventions and schedule generation.

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rule for turning a pair of dates into an accrual year fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DayCount {
    /// Actual days / 360 (money market).
    Act360,
    /// Actual days / 365.
    Act365Fixed,
    /// Actual/Actual ISDA: days in leap years over 366, others over 365.
    ActActIsda,
    /// 30/360 US bond basis.
    Thirty360,
}

impl DayCount {
    /// Year fraction between `start` and `end`. Negative when `end < start`.
    pub fn year_fraction(&self, start: NaiveDate, end: NaiveDate) -> f64 {
        if end < start {
            return -self.year_fraction(end, start);
        }
        match self {
            DayCount::Act360 => (end - start).num_days() as f64 / 360.0,
            DayCount::Act365Fixed => (end - start).num_days() as f64 / 365.0,
            DayCount::ActActIsda => act_act_isda(start, end),
            DayCount::Thirty360 => thirty_360_days(start, end) as f64 / 360.0,
        }
    }
}

impl Default for DayCount {
    fn default() -> Self {
        DayCount::Act365Fixed
    }
}

impl fmt::Display for DayCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DayCount::Act360 => "ACT/360",
            DayCount::Act365Fixed => "ACT/365F",
            DayCount::ActActIsda => "ACT/ACT ISDA",
            DayCount::Thirty360 => "30/360",
        };
        write!(f, "{}", s)
    }
}

fn days_in_year(year: i32) -> f64 {
    if NaiveDate::from_ymd_opt(year, 2, 29).is_some() {
        366.0
    } else {
        365.0
    }
}

fn act_act_isda(start: NaiveDate, end: NaiveDate) -> f64 {
    if start.year() == end.year() {
        return (end - start).num_days() as f64 / days_in_year(start.year());
    }

    let mut total = 0.0;
    let mut cursor = start;
    while cursor.year() < end.year() {
        let Some(next_year) = NaiveDate::from_ymd_opt(cursor.year() + 1, 1, 1) else {
            break;
        };
        total += (next_year - cursor).num_days() as f64 / days_in_year(cursor.year());
        cursor = next_year;
    }
    total + (end - cursor).num_days() as f64 / days_in_year(end.year())
}

fn thirty_360_days(start: NaiveDate, end: NaiveDate) -> i64 {
    let mut d1 = start.day() as i64;
    let mut d2 = end.day() as i64;
    if d1 == 31 {
        d1 = 30;
    }
    if d2 == 31 && d1 >= 30 {
        d2 = 30;
    }
    360 * (end.year() as i64 - start.year() as i64)
        + 30 * (end.month() as i64 - start.month() as i64)
        + (d2 - d1)
}

/// Payment frequency of a coupon or swap leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    Annual,
    SemiAnnual,
    Quarterly,
    Monthly,
}

impl Frequency {
    pub fn months(&self) -> u32 {
        match self {
            Frequency::Annual => 12,
            Frequency::SemiAnnual => 6,
            Frequency::Quarterly => 3,
            Frequency::Monthly => 1,
        }
    }

    pub fn per_year(&self) -> u32 {
        12 / self.months()
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Frequency::Annual => "1Y",
            Frequency::SemiAnnual => "6M",
            Frequency::Quarterly => "3M",
            Frequency::Monthly => "1M",
        };
        write!(f, "{}", s)
    }
}

/// Coupon dates strictly after `after`, generated backward from `maturity`,
/// together with the last coupon date on or before `after` (the accrual start).
///
/// Each date is computed as an offset from maturity rather than by repeated
/// stepping, so month-end maturities stay on month ends.
pub fn coupon_schedule(
    maturity: NaiveDate,
    frequency: Frequency,
    after: NaiveDate,
) -> (Vec<NaiveDate>, NaiveDate) {
    let step = frequency.months();
    let mut dates = Vec::new();
    let mut k: u32 = 0;
    let previous = loop {
        let date = match maturity.checked_sub_months(Months::new(step * k)) {
            Some(d) => d,
            None => break after,
        };
        if date <= after {
            break date;
        }
        dates.push(date);
        k += 1;
    };
    dates.reverse();
    (dates, previous)
}

/// Dates `start + k * frequency` for `k = 1..=periods`.
pub fn forward_schedule(start: NaiveDate, frequency: Frequency, periods: u32) -> Vec<NaiveDate> {
    (1..=periods)
        .filter_map(|k| start.checked_add_months(Months::new(frequency.months() * k)))
        .collect()
}
