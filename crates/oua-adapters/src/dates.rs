//! Admission-date normalization.
//!
//! Resolution order: a full calendar date, a day and month with the year
//! taken from the academic year, a month and year, an explicit "Round N",
//! then any month name found anywhere in the text.

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use oua_core::DateFields;
use regex::Regex;

/// Full dates whose year is earlier than this are treated as misparses.
const MIN_PLAUSIBLE_YEAR: i32 = 2000;

/// Tried in order; the first parse with a plausible year wins.
const FULL_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%m/%d/%y",
    "%m-%d-%Y",
    "%d %b %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%B %d %Y",
    "%B %d, %Y",
    "%d %B, %Y",
    "%b %d, %Y",
];

/// Day and month only. Parsed against a leap placeholder year so Feb 29 survives.
const DAY_MONTH_FORMATS: &[&str] = &["%m/%d", "%d %b", "%b %d", "%d %B", "%B %d"];
const PLACEHOLDER_YEAR: i32 = 2000;

/// Month and year only. No day is fabricated for these.
const MONTH_YEAR_FORMATS: &[&str] = &["%B %Y", "%b %Y", "%Y-%m"];

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const MONTHS_FULL: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

static WEEKDAY_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(mon|tue|wed|thu|fri|sat|sun)[a-z]*[,.\s]+").expect("valid weekday regex")
});
static ORDINAL_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)(?:st|nd|rd|th)\b").expect("valid ordinal regex"));
static ROUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)round\s*(\d+)").expect("valid round regex"));

pub fn normalize_date_fields(raw: &str, academic_year: &str) -> DateFields {
    let raw = raw.trim();
    if raw.is_empty() {
        return DateFields::default();
    }
    let cleaned = preprocess(raw);

    if let Some(date) = parse_full_date(&cleaned) {
        return full_date_fields(date);
    }
    if let Some(date) = parse_day_month(&cleaned, academic_year) {
        return full_date_fields(date);
    }
    if let Some(date) = parse_month_year(&cleaned) {
        return month_fields(date.month0() as usize, Some(date.year()));
    }
    if let Some(caps) = ROUND.captures(raw) {
        if let Ok(order) = caps[1].parse::<u32>() {
            return DateFields {
                round_label: Some(format!("Round {order}")),
                round_order: Some(order),
                ..DateFields::default()
            };
        }
    }
    if let Some(month0) = extract_month(raw) {
        return month_fields(month0, infer_year(month0, academic_year));
    }
    DateFields::default()
}

/// Drop a leading weekday ("Tue, ") and ordinal suffixes ("16th" -> "16").
fn preprocess(raw: &str) -> String {
    let s = WEEKDAY_PREFIX.replace(raw, "");
    ORDINAL_SUFFIX.replace_all(&s, "${1}").trim().to_string()
}

fn parse_full_date(s: &str) -> Option<NaiveDate> {
    FULL_DATE_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .find(|date| date.year() >= MIN_PLAUSIBLE_YEAR)
}

fn parse_day_month(s: &str, academic_year: &str) -> Option<NaiveDate> {
    let probe = format!("{s} {PLACEHOLDER_YEAR}");
    let parsed = DAY_MONTH_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&probe, &format!("{fmt} %Y")).ok())?;
    let year = infer_year(parsed.month0() as usize, academic_year)?;
    NaiveDate::from_ymd_opt(year, parsed.month(), parsed.day())
}

fn parse_month_year(s: &str) -> Option<NaiveDate> {
    let probe = format!("{s} 1");
    MONTH_YEAR_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDate::parse_from_str(&probe, &format!("{fmt} %d")).ok())
        .find(|date| date.year() >= MIN_PLAUSIBLE_YEAR)
}

fn full_date_fields(date: NaiveDate) -> DateFields {
    DateFields {
        admission_date_iso: Some(date.format("%Y-%m-%d").to_string()),
        admission_month_iso: Some(date.format("%Y-%m").to_string()),
        admission_month_label: Some(date.format("%b").to_string()),
        admission_year: Some(date.year()),
        round_label: None,
        round_order: None,
    }
}

fn month_fields(month0: usize, year: Option<i32>) -> DateFields {
    DateFields {
        admission_month_iso: year.map(|y| format!("{y}-{:02}", month0 + 1)),
        admission_month_label: Some(month_label(month0)),
        admission_year: year,
        ..DateFields::default()
    }
}

fn month_label(month0: usize) -> String {
    let abbr = MONTHS[month0];
    let mut label = abbr[..1].to_ascii_uppercase();
    label.push_str(&abbr[1..]);
    label
}

/// First month named anywhere in `raw`; full names are checked before abbreviations.
fn extract_month(raw: &str) -> Option<usize> {
    let lower = raw.to_lowercase();
    MONTHS_FULL
        .iter()
        .position(|name| lower.contains(name))
        .or_else(|| MONTHS.iter().position(|abbr| lower.contains(abbr)))
}

/// Sep-Dec fall in the label's first year, Jan-Aug in its second.
fn infer_year(month0: usize, academic_year: &str) -> Option<i32> {
    let (start, end) = academic_year.split_once('-')?;
    let start: i32 = start.trim().parse().ok()?;
    let end: i32 = end.trim().parse().ok()?;
    if start == 0 || end == 0 {
        return None;
    }
    Some(if month0 >= 8 { start } else { end })
}
