use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;

use crate::models::{IntakeLog, Medication};

/// Longest streak reported; older history is not scanned.
pub const STREAK_CAP: u32 = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayPartition<'a> {
    pub date: NaiveDate,
    pub scheduled: Vec<&'a Medication>,
    pub completed: Vec<&'a Medication>,
    pub pending: Vec<&'a Medication>,
}

impl DayPartition<'_> {
    #[must_use]
    pub fn adherence(&self) -> u8 {
        adherence_percentage(self.completed.len(), self.scheduled.len())
    }
}

/// Split the medications scheduled on `day` into completed and pending.
///
/// A medication is scheduled on a day when it is active on it: its start day
/// is on or before that day and its end date, if any, is not before it.
#[must_use]
pub fn partition_day<'a>(
    medications: &'a [Medication],
    logs: &[IntakeLog],
    day: NaiveDate,
) -> DayPartition<'a> {
    let taken: HashSet<&str> = logs
        .iter()
        .filter(|l| l.date == day)
        .map(|l| l.medication_id.as_str())
        .collect();
    let scheduled: Vec<&Medication> = medications.iter().filter(|m| m.is_active_on(day)).collect();
    let (completed, pending): (Vec<&Medication>, Vec<&Medication>) = scheduled
        .iter()
        .copied()
        .partition(|m| taken.contains(m.id.as_str()));
    DayPartition {
        date: day,
        scheduled,
        completed,
        pending,
    }
}

/// `round(100 * completed / scheduled)`, 0 when nothing is scheduled.
#[must_use]
pub fn adherence_percentage(completed: usize, scheduled: usize) -> u8 {
    if scheduled == 0 {
        return 0;
    }
    let completed = completed.min(scheduled);
    let pct = (200 * completed + scheduled) / (2 * scheduled);
    u8::try_from(pct).unwrap_or(100)
}

/// Consecutive days ending today with at least one log, capped at [`STREAK_CAP`].
#[must_use]
pub fn streak(logs: &[IntakeLog], today: NaiveDate) -> u32 {
    let days: HashSet<NaiveDate> = logs.iter().map(|l| l.date).collect();
    let mut count = 0;
    let mut day = today;
    while count < STREAK_CAP && days.contains(&day) {
        count += 1;
        day -= Duration::days(1);
    }
    count
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DayStatus {
    Taken,
    Missed,
    Today,
    None,
}

impl DayStatus {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            DayStatus::Taken => "taken",
            DayStatus::Missed => "missed",
            DayStatus::Today => "today",
            DayStatus::None => "none",
        }
    }
}

/// Classify `day`. Precedence: taken, missed, today, none.
///
/// A log on a day with nothing scheduled does not count as taken.
#[must_use]
pub fn classify_day(
    medications: &[Medication],
    logs: &[IntakeLog],
    day: NaiveDate,
    today: NaiveDate,
) -> DayStatus {
    let scheduled = medications.iter().any(|m| m.is_active_on(day));
    let logged = logs.iter().any(|l| l.date == day);
    status_for(scheduled, logged, day, today)
}

fn status_for(scheduled: bool, logged: bool, day: NaiveDate, today: NaiveDate) -> DayStatus {
    if scheduled && logged {
        DayStatus::Taken
    } else if scheduled && day < today {
        DayStatus::Missed
    } else if day == today {
        DayStatus::Today
    } else {
        DayStatus::None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub status: DayStatus,
}

/// Every day of `year`-`month`, classified.
#[must_use]
pub fn month_calendar(
    medications: &[Medication],
    logs: &[IntakeLog],
    year: i32,
    month: u32,
    today: NaiveDate,
) -> Vec<CalendarDay> {
    let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
        return Vec::new();
    };
    let logged: HashSet<NaiveDate> = logs.iter().map(|l| l.date).collect();
    first
        .iter_days()
        .take_while(|d| d.month() == month)
        .map(|date| {
            let scheduled = medications.iter().any(|m| m.is_active_on(date));
            CalendarDay {
                date,
                status: status_for(scheduled, logged.contains(&date), date, today),
            }
        })
        .collect()
}

/// Everything derived about one calendar date. Recomputed, never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DerivedDaySnapshot {
    pub date: NaiveDate,
    pub medications: Vec<Medication>,
    pub completed_ids: BTreeSet<String>,
    /// Photo URL per completed medication id, where one was attached.
    pub photos: BTreeMap<String, String>,
}

impl DerivedDaySnapshot {
    #[must_use]
    pub fn is_completed(&self, medication_id: &str) -> bool {
        self.completed_ids.contains(medication_id)
    }
}

#[must_use]
pub fn day_snapshot(
    medications: &[Medication],
    logs: &[IntakeLog],
    date: NaiveDate,
) -> DerivedDaySnapshot {
    let scheduled: Vec<Medication> = medications
        .iter()
        .filter(|m| m.is_active_on(date))
        .cloned()
        .collect();
    let ids: HashSet<&str> = scheduled.iter().map(|m| m.id.as_str()).collect();

    let mut completed_ids = BTreeSet::new();
    let mut photos = BTreeMap::new();
    for log in logs.iter().filter(|l| l.date == date && ids.contains(l.medication_id.as_str())) {
        completed_ids.insert(log.medication_id.clone());
        if let Some(url) = &log.photo_url {
            photos.insert(log.medication_id.clone(), url.clone());
        }
    }

    DerivedDaySnapshot {
        date,
        medications: scheduled,
        completed_ids,
        photos,
    }
}
