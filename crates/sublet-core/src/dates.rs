//! Date representations found in listings and the post-date anchoring rules.
//!
//! Listings carry dates in several shapes: `MM` and `DD.MM` from the extraction
//! service, `DD.MM.YYYY` once resolved, and ISO-8601 timestamps (with or
//! without offset) for post times. All of them go through [`DateRepr::parse`].

use std::{fmt, sync::OnceLock};

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

/// Output format of resolved rental dates.
pub const RENTAL_DATE_FORMAT: &str = "%d.%m.%Y";

/// Month lengths used when a month-only end date is expanded.
///
/// February is always 28: leap years are not considered here.
const MONTH_LENGTHS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Which side of a rental window a date belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateRole {
    Start,
    End,
}

/// A parsed date in any of the shapes listings use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateRepr {
    /// `MM`
    MonthOnly { month: u32 },
    /// `DD.MM`
    DayMonth { day: u32, month: u32 },
    /// `DD.MM.YYYY`
    Full(NaiveDate),
    /// ISO-8601 with offset.
    Instant(DateTime<FixedOffset>),
    /// ISO-8601 without offset.
    Local(NaiveDateTime),
}

fn month_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2})$").expect("static regex"))
}

fn day_month_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2})\.(\d{1,2})\.?$").expect("static regex"))
}

fn full_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2})\.(\d{1,2})\.(\d{4})$").expect("static regex"))
}

impl DateRepr {
    /// Parse any supported shape. Returns `None` for anything else, including
    /// out-of-range months/days and impossible calendar dates.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }

        if let Some(c) = month_re().captures(s) {
            let month: u32 = c[1].parse().ok()?;
            return valid_month(month).then_some(DateRepr::MonthOnly { month });
        }

        if let Some(c) = day_month_re().captures(s) {
            let day: u32 = c[1].parse().ok()?;
            let month: u32 = c[2].parse().ok()?;
            if !valid_month(month) || day == 0 || day > 31 {
                return None;
            }
            return Some(DateRepr::DayMonth { day, month });
        }

        if let Some(c) = full_re().captures(s) {
            let day: u32 = c[1].parse().ok()?;
            let month: u32 = c[2].parse().ok()?;
            let year: i32 = c[3].parse().ok()?;
            return NaiveDate::from_ymd_opt(year, month, day).map(DateRepr::Full);
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(DateRepr::Instant(dt));
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
            if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
                return Some(DateRepr::Instant(dt));
            }
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
                return Some(DateRepr::Local(dt));
            }
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return d.and_hms_opt(0, 0, 0).map(DateRepr::Local);
        }

        None
    }

    /// Turn a month-only value into a concrete day for the given role.
    pub fn expand(self, role: DateRole) -> Self {
        match self {
            DateRepr::MonthOnly { month } => DateRepr::DayMonth {
                day: match role {
                    DateRole::Start => 1,
                    DateRole::End => last_day_of_month(month),
                },
                month,
            },
            other => other,
        }
    }

    /// Calendar date, when the representation carries a year.
    pub fn calendar_date(&self) -> Option<NaiveDate> {
        match self {
            DateRepr::Full(d) => Some(*d),
            DateRepr::Instant(dt) => Some(dt.date_naive()),
            DateRepr::Local(dt) => Some(dt.date()),
            DateRepr::MonthOnly { .. } | DateRepr::DayMonth { .. } => None,
        }
    }

    /// Point in time, when the representation is a timestamp. Naive
    /// timestamps are read as UTC.
    pub fn instant(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            DateRepr::Instant(dt) => Some(*dt),
            DateRepr::Local(dt) => Some(Utc.from_utc_datetime(dt).fixed_offset()),
            _ => None,
        }
    }
}

impl fmt::Display for DateRepr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateRepr::MonthOnly { month } => write!(f, "{month:02}"),
            DateRepr::DayMonth { day, month } => write!(f, "{day:02}.{month:02}"),
            DateRepr::Full(d) => write!(f, "{}", d.format(RENTAL_DATE_FORMAT)),
            DateRepr::Instant(dt) => write!(f, "{}", dt.to_rfc3339()),
            DateRepr::Local(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
        }
    }
}

fn valid_month(month: u32) -> bool {
    (1..=12).contains(&month)
}

/// Last day of `month` per the fixed table (February = 28).
pub fn last_day_of_month(month: u32) -> u32 {
    MONTH_LENGTHS
        .get(month.saturating_sub(1) as usize)
        .copied()
        .unwrap_or(31)
}

/// Expand an extracted `MM`/`DD.MM` value into `DD.MM` form for its role.
///
/// Values that are already `DD.MM` or `DD.MM.YYYY` come back normalized;
/// anything unparseable yields `None`.
pub fn expand_partial(value: &str, role: DateRole) -> Option<String> {
    match DateRepr::parse(value)?.expand(role) {
        r @ (DateRepr::DayMonth { .. } | DateRepr::Full(_)) => Some(r.to_string()),
        _ => None,
    }
}

/// Parse an ISO-8601 post timestamp.
pub fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    DateRepr::parse(s)?.instant()
}

/// Parse a resolved `DD.MM.YYYY` rental date.
pub fn parse_rental_date(s: &str) -> Option<NaiveDate> {
    match DateRepr::parse(s)? {
        DateRepr::Full(d) => Some(d),
        _ => None,
    }
}

pub fn format_rental_date(d: NaiveDate) -> String {
    d.format(RENTAL_DATE_FORMAT).to_string()
}

/// Year/month reference taken from a listing's post date.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Anchor {
    pub year: i32,
    pub month: u32,
}

impl Anchor {
    /// Anchor on the post's own calendar date (in the post's offset).
    pub fn from_post_date(date: &str) -> Option<Self> {
        let dt = parse_timestamp(date)?;
        Some(Self {
            year: dt.year(),
            month: dt.month(),
        })
    }

    pub fn from_date(d: NaiveDate) -> Self {
        Self {
            year: d.year(),
            month: d.month(),
        }
    }

    /// Post year, or the next one when `month` is earlier than the post month.
    fn year_for(&self, month: u32) -> i32 {
        if month < self.month {
            self.year + 1
        } else {
            self.year
        }
    }
}

/// Resolve an extracted start date against the post date.
pub fn resolve_start(value: &str, anchor: Anchor) -> Option<NaiveDate> {
    match DateRepr::parse(value)?.expand(DateRole::Start) {
        DateRepr::DayMonth { day, month } => {
            NaiveDate::from_ymd_opt(anchor.year_for(month), month, day)
        }
        other => other.calendar_date(),
    }
}

/// Resolve an extracted end date. With a start date the end is placed on or
/// after it; without one the post-month rule applies on its own.
pub fn resolve_end(value: &str, start: Option<NaiveDate>, anchor: Anchor) -> Option<NaiveDate> {
    match DateRepr::parse(value)?.expand(DateRole::End) {
        DateRepr::DayMonth { day, month } => match start {
            Some(start) => {
                let same_year = NaiveDate::from_ymd_opt(start.year(), month, day);
                match same_year {
                    Some(end) if end >= start => Some(end),
                    _ => NaiveDate::from_ymd_opt(start.year() + 1, month, day),
                }
            }
            None => NaiveDate::from_ymd_opt(anchor.year_for(month), month, day),
        },
        other => other.calendar_date(),
    }
}

/// Resolve both sides of a rental window into `DD.MM.YYYY` strings.
pub fn anchor_rental_window(
    start: Option<&str>,
    end: Option<&str>,
    anchor: Anchor,
) -> (Option<String>, Option<String>) {
    let start = start.and_then(|s| resolve_start(s, anchor));
    let end = end.and_then(|e| resolve_end(e, start, anchor));
    (start.map(format_rental_date), end.map(format_rental_date))
}
