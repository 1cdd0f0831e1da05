use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, TrackerError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub dosage: String,
    #[serde(default)]
    pub frequency: String,
    #[serde(deserialize_with = "wall_time")]
    pub start_date: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(
        default,
        deserialize_with = "optional_wall_time",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<NaiveDateTime>,
}

impl Medication {
    /// Whether the regimen is running on `date`: started on or before it and not yet ended.
    #[must_use]
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.start_date.date() <= date && self.end_date.is_none_or(|end| date <= end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMedication {
    pub user_id: String,
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    pub start_date: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[allow(clippy::option_option)]
pub struct MedicationChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dosage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<Option<NaiveDate>>,
}

impl MedicationChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.dosage.is_none()
            && self.frequency.is_none()
            && self.end_date.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeLog {
    pub medication_id: String,
    pub user_id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(deserialize_with = "wall_time")]
    pub created_at: NaiveDateTime,
}

impl IntakeLog {
    #[must_use]
    pub fn key(&self) -> LogKey {
        LogKey {
            medication_id: self.medication_id.clone(),
            user_id: self.user_id.clone(),
            date: self.date,
        }
    }
}

/// Natural key of an intake log and the conflict target of its upsert.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LogKey {
    pub medication_id: String,
    pub user_id: String,
    pub date: NaiveDate,
}

impl LogKey {
    /// Column names of the unique constraint, in declaration order.
    pub const COLUMNS: [&'static str; 3] = ["medication_id", "user_id", "date"];

    #[must_use]
    pub fn matches(&self, log: &IntakeLog) -> bool {
        self.medication_id == log.medication_id
            && self.user_id == log.user_id
            && self.date == log.date
    }
}

/// Raw photo bytes selected by the user, not yet uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoAttachment {
    /// Upload these bytes first, then record the returned URL.
    Upload(PhotoUpload),
    /// A URL that already points into object storage.
    Existing(String),
}

/// A "mark as taken" request. Becomes an [`IntakeLog`] once the photo (if any) is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIntakeLog {
    pub medication_id: String,
    pub user_id: String,
    pub date: NaiveDate,
    pub photo: Option<PhotoAttachment>,
}

impl NewIntakeLog {
    #[must_use]
    pub fn conflict_key(&self) -> LogKey {
        LogKey {
            medication_id: self.medication_id.clone(),
            user_id: self.user_id.clone(),
            date: self.date,
        }
    }
}

/// Whether marking a dose as taken needs photographic proof.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoPolicy {
    #[default]
    Optional,
    Required,
}

impl std::str::FromStr for PhotoPolicy {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "optional" => Ok(Self::Optional),
            "required" => Ok(Self::Required),
            other => Err(TrackerError::validation(format!(
                "Invalid photo policy '{other}'. Must be one of: optional, required"
            ))),
        }
    }
}

pub fn validate_new_medication(med: &NewMedication) -> Result<NaiveDateTime> {
    if med.user_id.trim().is_empty() {
        return Err(TrackerError::validation("user_id must not be empty"));
    }
    if med.name.trim().is_empty() {
        return Err(TrackerError::validation("Medication name is required"));
    }
    let start = med
        .start_date
        .ok_or_else(|| TrackerError::validation("Medication start date is required"))?;
    if let Some(end) = med.end_date {
        if end < start.date() {
            return Err(TrackerError::validation(format!(
                "End date {end} is before start date {}",
                start.date()
            )));
        }
    }
    Ok(start)
}

pub fn validate_changes(changes: &MedicationChanges) -> Result<()> {
    if changes.is_empty() {
        return Err(TrackerError::validation("At least one field must be provided"));
    }
    if changes.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(TrackerError::validation("Medication name must not be empty"));
    }
    Ok(())
}

/// Object-storage path for a proof photo: `<user>/<medication>-<millis>-<file name>`.
///
/// Whitespace runs in the file name become `-`; anything outside `[A-Za-z0-9-.]` is dropped.
#[must_use]
pub fn photo_path(
    user_id: &str,
    medication_id: &str,
    taken_at: NaiveDateTime,
    file_name: &str,
) -> String {
    let mut clean = String::with_capacity(file_name.len());
    let mut in_space = false;
    for c in file_name.chars() {
        if c.is_whitespace() {
            if !in_space {
                clean.push('-');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
            clean.push(c);
        }
    }
    let millis = taken_at.and_utc().timestamp_millis();
    format!("{user_id}/{medication_id}-{millis}-{clean}")
}

/// Parse a timestamp from the store as local wall time.
///
/// Naive forms are taken as-is; offset-bearing RFC 3339 values are converted to local time.
pub fn parse_wall_time(s: &str) -> Option<NaiveDateTime> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Local).naive_local());
    }
    // Postgres emits "+00" offsets without minutes.
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Local).naive_local());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn wall_time<'de, D>(deserializer: D) -> std::result::Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_wall_time(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{s}'")))
}

fn optional_wall_time<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(s) => parse_wall_time(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{s}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn new_med() -> NewMedication {
        NewMedication {
            user_id: "u1".to_string(),
            name: "Metformin".to_string(),
            dosage: "500mg".to_string(),
            frequency: "twice daily".to_string(),
            start_date: parse_wall_time("2024-01-01T08:00"),
            end_date: None,
        }
    }

    #[test]
    fn test_validate_new_medication_valid() {
        let start = validate_new_medication(&new_med()).unwrap();
        assert_eq!(start, parse_wall_time("2024-01-01T08:00:00").unwrap());
    }

    #[test]
    fn test_validate_new_medication_requires_name() {
        let mut med = new_med();
        med.name = "   ".to_string();
        let err = validate_new_medication(&med).unwrap_err();
        assert!(matches!(err, TrackerError::Validation(_)));
    }

    #[test]
    fn test_validate_new_medication_requires_start_date() {
        let mut med = new_med();
        med.start_date = None;
        assert!(matches!(
            validate_new_medication(&med),
            Err(TrackerError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_new_medication_end_before_start() {
        let mut med = new_med();
        med.end_date = Some(date("2023-12-31"));
        assert!(validate_new_medication(&med).is_err());
    }

    #[test]
    fn test_validate_changes() {
        assert!(validate_changes(&MedicationChanges::default()).is_err());
        let blank_name = MedicationChanges {
            name: Some(String::new()),
            ..Default::default()
        };
        assert!(validate_changes(&blank_name).is_err());
        let dosage = MedicationChanges {
            dosage: Some("1g".to_string()),
            ..Default::default()
        };
        assert!(validate_changes(&dosage).is_ok());
    }

    #[test]
    fn test_is_active_on() {
        let med = Medication {
            id: "m1".to_string(),
            user_id: "u1".to_string(),
            name: "Metformin".to_string(),
            dosage: String::new(),
            frequency: String::new(),
            start_date: parse_wall_time("2024-01-03T21:30").unwrap(),
            end_date: Some(date("2024-01-05")),
            created_at: None,
        };
        assert!(!med.is_active_on(date("2024-01-02")));
        assert!(med.is_active_on(date("2024-01-03")));
        assert!(med.is_active_on(date("2024-01-05")));
        assert!(!med.is_active_on(date("2024-01-06")));
    }

    #[test]
    fn test_photo_path_sanitizes_file_name() {
        let at = parse_wall_time("2024-01-05T09:00:00").unwrap();
        let path = photo_path("u1", "m1", at, "my  pill (1).JPG");
        let millis = at.and_utc().timestamp_millis();
        assert_eq!(path, format!("u1/m1-{millis}-my-pill-1.JPG"));
    }

    #[test]
    fn test_parse_wall_time_forms() {
        let expected = parse_wall_time("2024-01-01T08:00:00").unwrap();
        assert_eq!(parse_wall_time("2024-01-01T08:00"), Some(expected));
        assert_eq!(parse_wall_time("2024-01-01 08:00:00"), Some(expected));
        assert_eq!(
            parse_wall_time("2024-01-01"),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0)
        );
        assert!(parse_wall_time("2024-01-01T08:00:00+00:00").is_some());
        assert!(parse_wall_time("2024-01-01T08:00:00.123456+00").is_some());
        assert!(parse_wall_time("yesterday").is_none());
    }

    #[test]
    fn test_deserialize_store_rows() {
        let med: Medication = serde_json::from_value(serde_json::json!({
            "id": "m1",
            "user_id": "u1",
            "name": "Metformin",
            "dosage": "500mg",
            "frequency": "daily",
            "start_date": "2024-01-01T08:00:00",
            "end_date": null,
            "created_at": "2024-01-01T07:59:00"
        }))
        .unwrap();
        assert_eq!(med.start_date.date(), date("2024-01-01"));
        assert!(med.end_date.is_none());
        assert!(med.created_at.is_some());

        let log: IntakeLog = serde_json::from_value(serde_json::json!({
            "medication_id": "m1",
            "user_id": "u1",
            "date": "2024-01-05",
            "photo_url": null,
            "created_at": "2024-01-05T09:15:00"
        }))
        .unwrap();
        assert_eq!(log.date, date("2024-01-05"));
        assert!(log.key().matches(&log));
    }

    #[test]
    fn test_photo_policy_from_str() {
        assert_eq!("Required".parse::<PhotoPolicy>().unwrap(), PhotoPolicy::Required);
        assert_eq!("optional".parse::<PhotoPolicy>().unwrap(), PhotoPolicy::Optional);
        assert!("sometimes".parse::<PhotoPolicy>().is_err());
    }
}
