use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;

use crate::cache::{CachedQuery, Freshness};
use crate::metrics::{
    self, CalendarDay, DerivedDaySnapshot, adherence_percentage, day_snapshot, month_calendar,
    partition_day,
};
use crate::models::{IntakeLog, Medication};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Greeting {
    Morning,
    Afternoon,
    Evening,
}

impl Greeting {
    #[must_use]
    pub fn at(time: NaiveTime) -> Self {
        match time.hour() {
            0..12 => Greeting::Morning,
            12..18 => Greeting::Afternoon,
            _ => Greeting::Evening,
        }
    }
}

impl fmt::Display for Greeting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Greeting::Morning => write!(f, "Good morning"),
            Greeting::Afternoon => write!(f, "Good afternoon"),
            Greeting::Evening => write!(f, "Good evening"),
        }
    }
}

/// A medication together with whether it was taken on the day in question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoseStatus {
    pub medication: Medication,
    pub taken: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

fn dose_statuses(snapshot: &DerivedDaySnapshot) -> Vec<DoseStatus> {
    snapshot
        .medications
        .iter()
        .map(|m| DoseStatus {
            medication: m.clone(),
            taken: snapshot.is_completed(&m.id),
            photo_url: snapshot.photos.get(&m.id).cloned(),
        })
        .collect()
}

/// How current the data behind a view model is.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncState {
    /// At least one query is being refetched; what is shown may be stale.
    pub refreshing: bool,
    /// Messages of failed fetches whose last good value is being shown.
    pub errors: Vec<String>,
}

impl SyncState {
    fn observe<T>(&mut self, query: &CachedQuery<T>) {
        match &query.freshness {
            Freshness::Loading | Freshness::StaleRefetching => self.refreshing = true,
            Freshness::Error(e) => self.errors.push(format!("{}: {e}", query.key)),
            Freshness::Absent | Freshness::Fresh => {}
        }
    }
}

fn slice_of<T>(query: &CachedQuery<Arc<Vec<T>>>) -> &[T] {
    query.data.as_ref().map_or(&[][..], |v| v.as_slice())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientDashboard {
    pub greeting: Greeting,
    pub today: NaiveDate,
    pub selected_date: NaiveDate,
    /// Medications active on the selected date and whether each was taken.
    pub doses: Vec<DoseStatus>,
    /// Every medication scheduled today has a log today.
    pub taken_today: bool,
    pub streak: u32,
    /// The selected date's month.
    pub calendar: Vec<CalendarDay>,
    pub sync: SyncState,
}

/// Inputs of the patient dashboard, as read from the cache.
pub struct PatientQueries {
    /// Medications started on or before the selected date.
    pub medications_on_selected: CachedQuery<Arc<Vec<Medication>>>,
    pub medications: CachedQuery<Arc<Vec<Medication>>>,
    pub logs: CachedQuery<Arc<Vec<IntakeLog>>>,
}

impl PatientDashboard {
    #[must_use]
    pub fn compose(now: NaiveDateTime, selected_date: NaiveDate, queries: &PatientQueries) -> Self {
        let today = now.date();
        let mut sync = SyncState::default();
        sync.observe(&queries.medications_on_selected);
        sync.observe(&queries.medications);
        sync.observe(&queries.logs);

        let medications = slice_of(&queries.medications);
        let logs = slice_of(&queries.logs);

        let selected = day_snapshot(
            slice_of(&queries.medications_on_selected),
            logs,
            selected_date,
        );
        let today_partition = partition_day(medications, logs, today);
        let taken_today =
            !today_partition.scheduled.is_empty() && today_partition.pending.is_empty();

        PatientDashboard {
            greeting: Greeting::at(now.time()),
            today,
            selected_date,
            doses: dose_statuses(&selected),
            taken_today,
            streak: metrics::streak(logs, today),
            calendar: month_calendar(
                medications,
                logs,
                selected_date.year(),
                selected_date.month(),
                today,
            ),
            sync,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEntry {
    pub medication_id: String,
    /// `None` when the medication has since been deleted.
    pub medication_name: Option<String>,
    pub date: NaiveDate,
    pub taken_at: NaiveDateTime,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaretakerDashboard {
    pub today: NaiveDate,
    pub selected_date: NaiveDate,
    /// Medications scheduled today with completed / pending status.
    pub doses_today: Vec<DoseStatus>,
    pub adherence: u8,
    pub taken_count: usize,
    pub missed_count: usize,
    pub total_count: usize,
    /// Today's logs, newest first.
    pub recent_activity: Vec<ActivityEntry>,
    pub calendar: Vec<CalendarDay>,
    /// Medications scheduled on the selected date and their status that day.
    pub selected_day: Vec<DoseStatus>,
    pub sync: SyncState,
}

pub struct CaretakerQueries {
    pub medications: CachedQuery<Arc<Vec<Medication>>>,
    pub logs: CachedQuery<Arc<Vec<IntakeLog>>>,
    pub logs_today: CachedQuery<Arc<Vec<IntakeLog>>>,
}

impl CaretakerDashboard {
    #[must_use]
    pub fn compose(today: NaiveDate, selected_date: NaiveDate, queries: &CaretakerQueries) -> Self {
        let mut sync = SyncState::default();
        sync.observe(&queries.medications);
        sync.observe(&queries.logs);
        sync.observe(&queries.logs_today);

        let medications = slice_of(&queries.medications);
        let logs = slice_of(&queries.logs);

        let partition = partition_day(medications, logs, today);
        let taken_count = partition.completed.len();
        let total_count = partition.scheduled.len();
        let today_snapshot = day_snapshot(medications, logs, today);
        let selected_snapshot = day_snapshot(medications, logs, selected_date);

        let names: HashMap<&str, &str> = medications
            .iter()
            .map(|m| (m.id.as_str(), m.name.as_str()))
            .collect();
        let mut todays_logs: Vec<&IntakeLog> = slice_of(&queries.logs_today)
            .iter()
            .filter(|l| l.date == today)
            .collect();
        todays_logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let recent_activity = todays_logs
            .into_iter()
            .map(|l| ActivityEntry {
                medication_id: l.medication_id.clone(),
                medication_name: names.get(l.medication_id.as_str()).map(|n| (*n).to_string()),
                date: l.date,
                taken_at: l.created_at,
                photo_url: l.photo_url.clone(),
            })
            .collect();

        CaretakerDashboard {
            today,
            selected_date,
            doses_today: dose_statuses(&today_snapshot),
            adherence: adherence_percentage(taken_count, total_count),
            taken_count,
            missed_count: total_count - taken_count,
            total_count,
            recent_activity,
            calendar: month_calendar(
                medications,
                logs,
                selected_date.year(),
                selected_date.month(),
                today,
            ),
            selected_day: dose_statuses(&selected_snapshot),
            sync,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QueryKey;
    use crate::error::TrackerError;
    use crate::metrics::DayStatus;
    use crate::models::parse_wall_time;
    use crate::testing::{day, noon};

    fn med(id: &str, name: &str, start: &str) -> Medication {
        Medication {
            id: id.to_string(),
            user_id: "u1".to_string(),
            name: name.to_string(),
            dosage: "5mg".to_string(),
            frequency: "daily".to_string(),
            start_date: parse_wall_time(start).unwrap(),
            end_date: None,
            created_at: None,
        }
    }

    fn log(med_id: &str, date: &str, hour: u32) -> IntakeLog {
        IntakeLog {
            medication_id: med_id.to_string(),
            user_id: "u1".to_string(),
            date: day(date),
            photo_url: None,
            created_at: day(date).and_hms_opt(hour, 0, 0).unwrap(),
        }
    }

    fn fresh<T>(key: QueryKey, data: T) -> CachedQuery<Arc<T>> {
        CachedQuery {
            key,
            data: Some(Arc::new(data)),
            freshness: Freshness::Fresh,
        }
    }

    #[test]
    fn test_greeting_boundaries() {
        let t = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap();
        assert_eq!(Greeting::at(t(0)), Greeting::Morning);
        assert_eq!(Greeting::at(t(11)), Greeting::Morning);
        assert_eq!(Greeting::at(t(12)), Greeting::Afternoon);
        assert_eq!(Greeting::at(t(17)), Greeting::Afternoon);
        assert_eq!(Greeting::at(t(18)), Greeting::Evening);
        assert_eq!(Greeting::Evening.to_string(), "Good evening");
    }

    #[test]
    fn test_patient_dashboard() {
        let meds = vec![
            med("m1", "Aspirin", "2024-01-01T08:00"),
            med("m2", "Statin", "2024-01-05T20:00"),
        ];
        let logs = vec![log("m1", "2024-01-05", 9), log("m1", "2024-01-04", 9)];
        let queries = PatientQueries {
            medications_on_selected: fresh(
                QueryKey::medications_on("u1", day("2024-01-05")),
                meds.clone(),
            ),
            medications: fresh(QueryKey::medications("u1"), meds),
            logs: fresh(QueryKey::logs("u1"), logs),
        };
        let now = parse_wall_time("2024-01-05T14:00").unwrap();
        let dash = PatientDashboard::compose(now, day("2024-01-05"), &queries);

        assert_eq!(dash.greeting, Greeting::Afternoon);
        assert_eq!(dash.doses.len(), 2);
        assert!(dash.doses.iter().any(|d| d.medication.id == "m1" && d.taken));
        assert!(dash.doses.iter().any(|d| d.medication.id == "m2" && !d.taken));
        assert!(!dash.taken_today);
        assert_eq!(dash.streak, 2);
        assert_eq!(dash.calendar.len(), 31);
        assert_eq!(dash.calendar[2].status, DayStatus::Missed);
        assert_eq!(dash.calendar[3].status, DayStatus::Taken);
        assert_eq!(dash.sync, SyncState::default());
    }

    #[test]
    fn test_patient_dashboard_shows_stale_data_with_error() {
        let meds = vec![med("m1", "Aspirin", "2024-01-01T08:00")];
        let mut logs_query = fresh(QueryKey::logs("u1"), vec![log("m1", "2024-01-05", 9)]);
        logs_query.freshness = Freshness::Error(TrackerError::transport("offline"));
        let queries = PatientQueries {
            medications_on_selected: fresh(
                QueryKey::medications_on("u1", day("2024-01-05")),
                meds.clone(),
            ),
            medications: fresh(QueryKey::medications("u1"), meds),
            logs: logs_query,
        };
        let dash = PatientDashboard::compose(noon(day("2024-01-05")), day("2024-01-05"), &queries);
        assert!(dash.taken_today);
        assert_eq!(dash.sync.errors.len(), 1);
        assert!(dash.sync.errors[0].contains("offline"));
    }

    #[test]
    fn test_caretaker_dashboard() {
        let meds = vec![
            med("m1", "Aspirin", "2024-01-01T08:00"),
            med("m2", "Statin", "2024-01-02T20:00"),
            med("m3", "Future", "2024-01-09T08:00"),
        ];
        let logs = vec![
            log("m1", "2024-01-05", 8),
            log("m2", "2024-01-05", 10),
            log("m1", "2024-01-03", 8),
        ];
        let today_logs: Vec<IntakeLog> = logs
            .iter()
            .filter(|l| l.date == day("2024-01-05"))
            .cloned()
            .collect();
        let queries = CaretakerQueries {
            medications: fresh(QueryKey::medications("u1"), meds),
            logs: fresh(QueryKey::logs("u1"), logs),
            logs_today: fresh(QueryKey::logs_on("u1", day("2024-01-05")), today_logs),
        };
        let dash = CaretakerDashboard::compose(day("2024-01-05"), day("2024-01-03"), &queries);

        assert_eq!(dash.total_count, 2);
        assert_eq!(dash.taken_count, 2);
        assert_eq!(dash.missed_count, 0);
        assert_eq!(dash.adherence, 100);
        assert_eq!(dash.recent_activity.len(), 2);
        assert_eq!(dash.recent_activity[0].medication_name.as_deref(), Some("Statin"));
        assert_eq!(dash.recent_activity[1].medication_name.as_deref(), Some("Aspirin"));

        assert_eq!(dash.selected_day.len(), 2);
        assert!(dash.selected_day.iter().any(|d| d.medication.id == "m1" && d.taken));
        assert!(dash.selected_day.iter().any(|d| d.medication.id == "m2" && !d.taken));
    }

    #[test]
    fn test_caretaker_dashboard_nothing_scheduled() {
        let queries = CaretakerQueries {
            medications: fresh(QueryKey::medications("u1"), Vec::new()),
            logs: fresh(QueryKey::logs("u1"), vec![log("m9", "2024-01-05", 8)]),
            logs_today: fresh(
                QueryKey::logs_on("u1", day("2024-01-05")),
                vec![log("m9", "2024-01-05", 8)],
            ),
        };
        let dash = CaretakerDashboard::compose(day("2024-01-05"), day("2024-01-05"), &queries);
        assert_eq!(dash.adherence, 0);
        assert_eq!(dash.total_count, 0);
        assert_eq!(dash.recent_activity.len(), 1);
        assert!(dash.recent_activity[0].medication_name.is_none());
    }
}
