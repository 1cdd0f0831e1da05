use anyhow::{Context, Result, bail};
use chrono::{Datelike, Local, NaiveDate, NaiveTime};
use serde::Serialize;
use std::io::{self, BufRead, Write};

use medtrack_core::metrics::DayStatus;

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// Parse a time of day: 12-hour with AM/PM ("8:00 AM", "8:30pm") or 24-hour ("20:30").
pub(crate) fn parse_time(s: &str) -> Result<NaiveTime> {
    let compact: String = s.split_whitespace().collect::<String>().to_uppercase();
    if compact.ends_with("AM") || compact.ends_with("PM") {
        return NaiveTime::parse_from_str(&compact, "%I:%M%p")
            .with_context(|| format!("Invalid time '{s}'. Use e.g. '8:00 AM' or '20:30'"));
    }
    NaiveTime::parse_from_str(&compact, "%H:%M")
        .with_context(|| format!("Invalid time '{s}'. Use e.g. '8:00 AM' or '20:30'"))
}

/// Parse "YYYY-MM" into (year, month), defaulting to the current month.
pub(crate) fn parse_month(month: Option<String>) -> Result<(i32, u32)> {
    let Some(s) = month else {
        let today = Local::now().date_naive();
        return Ok((today.year(), today.month()));
    };
    let first = NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d")
        .with_context(|| format!("Invalid month '{s}'. Use YYYY-MM"))?;
    Ok((first.year(), first.month()))
}

pub(crate) fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt} [y/N]: ");
    io::stderr().flush()?;
    let stdin = io::stdin();
    let line = stdin.lock().lines().next().context("No input")??;
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn status_symbol(status: DayStatus) -> &'static str {
    match status {
        DayStatus::Taken => "✓",
        DayStatus::Missed => "✗",
        DayStatus::Today => "•",
        DayStatus::None => "",
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s
            .char_indices()
            .nth(max.saturating_sub(3))
            .map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

pub(crate) fn or_dash(s: &str) -> String {
    if s.trim().is_empty() {
        "-".to_string()
    } else {
        s.to_string()
    }
}
