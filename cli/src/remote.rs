use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::TimeDelta;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use medtrack_core::error::{Result, TrackerError};
use medtrack_core::models::{IntakeLog, LogKey, Medication};
use medtrack_core::store::{LogFilter, MedicationFilter, MedicationWrite, RemoteStore};

use crate::config::RemoteConfig;

/// Client for a hosted PostgREST-style store with object storage for photos.
pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
}

impl RestStore {
    pub fn new(config: &RemoteConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.api_key)
            .map_err(|_| anyhow::anyhow!("MEDTRACK_STORE_KEY contains invalid characters"))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| anyhow::anyhow!("MEDTRACK_STORE_KEY contains invalid characters"))?;
        headers.insert("apikey", key);
        headers.insert(reqwest::header::AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .user_agent(format!(
                "medtrack-cli/{} (medication tracker)",
                env!("CARGO_PKG_VERSION")
            ))
            .default_headers(headers)
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn medications_request(&self, filter: &MedicationFilter) -> RequestBuilder {
        let mut query = vec![
            ("select", "*".to_string()),
            ("user_id", format!("eq.{}", filter.user_id)),
            ("order", "created_at.desc".to_string()),
        ];
        if let Some(date) = filter.started_on_or_before {
            let next_day = date + TimeDelta::days(1);
            query.push(("start_date", format!("lt.{next_day}")));
        }
        self.client.get(self.table_url("medications")).query(&query)
    }

    fn logs_request(&self, filter: &LogFilter) -> RequestBuilder {
        let mut query = vec![
            ("select", "*".to_string()),
            ("user_id", format!("eq.{}", filter.user_id)),
            ("order", "created_at.desc".to_string()),
        ];
        if let Some(date) = filter.date {
            query.push(("date", format!("eq.{date}")));
        }
        self.client.get(self.table_url("medication_logs")).query(&query)
    }

    fn write_request(&self, op: &MedicationWrite) -> RequestBuilder {
        let url = self.table_url("medications");
        let builder = match op {
            MedicationWrite::Insert(med) => self.client.post(url).json(med),
            MedicationWrite::Update {
                id,
                user_id,
                changes,
            } => self
                .client
                .patch(url)
                .query(&[("id", format!("eq.{id}")), ("user_id", format!("eq.{user_id}"))])
                .json(changes),
            MedicationWrite::Delete { id, user_id } => self
                .client
                .delete(url)
                .query(&[("id", format!("eq.{id}")), ("user_id", format!("eq.{user_id}"))]),
        };
        builder.header("Prefer", "return=representation")
    }

    fn upsert_request(&self, log: &IntakeLog) -> RequestBuilder {
        self.client
            .post(self.table_url("medication_logs"))
            .query(&[("on_conflict", LogKey::COLUMNS.join(","))])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(log)
    }

    fn upload_request(&self, bytes: &[u8], path: &str) -> RequestBuilder {
        self.client
            .post(format!(
                "{}/storage/v1/object/{}/{path}",
                self.base_url, self.bucket
            ))
            .header(CONTENT_TYPE, content_type_for(path))
            .header("x-upsert", "false")
            .body(bytes.to_vec())
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{path}",
            self.base_url, self.bucket
        )
    }
}

async fn send(request: RequestBuilder) -> Result<reqwest::Response> {
    let resp = request
        .send()
        .await
        .map_err(|e| TrackerError::transport(format!("Failed to reach store: {e}")))?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
    send(request)
        .await?
        .json()
        .await
        .map_err(|e| TrackerError::transport(format!("Failed to parse store response: {e}")))
}

/// Map an unsuccessful HTTP status onto the error taxonomy.
fn status_error(status: StatusCode, body: &str) -> TrackerError {
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.trim())
    };
    match status {
        StatusCode::CONFLICT => TrackerError::Conflict(detail),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            TrackerError::Validation(detail)
        }
        _ => TrackerError::Transport(detail),
    }
}

fn content_type_for(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl RemoteStore for RestStore {
    async fn query_medications(&self, filter: &MedicationFilter) -> Result<Vec<Medication>> {
        send_json(self.medications_request(filter)).await
    }

    async fn query_logs(&self, filter: &LogFilter) -> Result<Vec<IntakeLog>> {
        send_json(self.logs_request(filter)).await
    }

    async fn write_medication(&self, op: &MedicationWrite) -> Result<Option<Medication>> {
        let rows: Vec<Medication> = send_json(self.write_request(op)).await?;
        match op {
            MedicationWrite::Insert(_) => rows
                .into_iter()
                .next()
                .map(Some)
                .ok_or_else(|| TrackerError::transport("store returned no row for insert")),
            MedicationWrite::Update { id, .. } => rows
                .into_iter()
                .next()
                .map(Some)
                .ok_or_else(|| TrackerError::NotFound(format!("medication {id}"))),
            MedicationWrite::Delete { id, .. } => {
                if rows.is_empty() {
                    return Err(TrackerError::NotFound(format!("medication {id}")));
                }
                Ok(None)
            }
        }
    }

    async fn upsert_log(&self, log: &IntakeLog, conflict: &LogKey) -> Result<IntakeLog> {
        if !conflict.matches(log) {
            return Err(TrackerError::Conflict(
                "intake log does not match its conflict key".to_string(),
            ));
        }
        let rows: Vec<IntakeLog> = send_json(self.upsert_request(log)).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| TrackerError::transport("store returned no row for upsert"))
    }

    async fn upload_photo(&self, bytes: &[u8], path: &str) -> Result<String> {
        send(self.upload_request(bytes, path))
            .await
            .map_err(|e| TrackerError::Upload(e.to_string()))?;
        Ok(self.public_url(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn store() -> RestStore {
        RestStore::new(&RemoteConfig {
            url: "https://db.example.com/".to_string(),
            api_key: "anon".to_string(),
            bucket: "medication-photos".to_string(),
        })
        .unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_medications_request_url() {
        let s = store();
        let req = s
            .medications_request(&MedicationFilter {
                user_id: "u1".to_string(),
                started_on_or_before: Some(date("2024-01-05")),
            })
            .build()
            .unwrap();
        assert_eq!(req.method(), reqwest::Method::GET);
        let url = req.url().as_str();
        assert!(url.starts_with("https://db.example.com/rest/v1/medications?"));
        assert!(url.contains("user_id=eq.u1"));
        assert!(url.contains("order=created_at.desc"));
        assert!(url.contains("start_date=lt.2024-01-06"));
        assert_eq!(req.headers().get("apikey").unwrap(), "anon");
    }

    #[test]
    fn test_logs_request_url() {
        let s = store();
        let req = s.logs_request(&LogFilter::for_user("u1")).build().unwrap();
        assert!(!req.url().as_str().contains("date=eq"));

        let req = s
            .logs_request(&LogFilter {
                user_id: "u1".to_string(),
                date: Some(date("2024-01-05")),
            })
            .build()
            .unwrap();
        assert!(req.url().as_str().contains("date=eq.2024-01-05"));
    }

    #[test]
    fn test_upsert_targets_conflict_triple() {
        let s = store();
        let log = IntakeLog {
            medication_id: "m1".to_string(),
            user_id: "u1".to_string(),
            date: date("2024-01-05"),
            photo_url: None,
            created_at: date("2024-01-05").and_hms_opt(9, 0, 0).unwrap(),
        };
        let req = s.upsert_request(&log).build().unwrap();
        assert_eq!(req.method(), reqwest::Method::POST);
        let (_, on_conflict) = req
            .url()
            .query_pairs()
            .find(|(k, _)| k == "on_conflict")
            .unwrap();
        assert_eq!(on_conflict, "medication_id,user_id,date");
        let prefer = req.headers().get("prefer").unwrap().to_str().unwrap();
        assert!(prefer.contains("resolution=merge-duplicates"));
    }

    #[test]
    fn test_delete_is_scoped_to_owner() {
        let s = store();
        let req = s
            .write_request(&MedicationWrite::Delete {
                id: "m1".to_string(),
                user_id: "u1".to_string(),
            })
            .build()
            .unwrap();
        assert_eq!(req.method(), reqwest::Method::DELETE);
        let url = req.url().as_str();
        assert!(url.contains("id=eq.m1"));
        assert!(url.contains("user_id=eq.u1"));
    }

    #[test]
    fn test_photo_urls() {
        let s = store();
        let req = s.upload_request(b"x", "u1/m1-1-pill.jpg").build().unwrap();
        assert_eq!(
            req.url().as_str(),
            "https://db.example.com/storage/v1/object/medication-photos/u1/m1-1-pill.jpg"
        );
        assert_eq!(req.headers().get(CONTENT_TYPE).unwrap(), "image/jpeg");
        assert_eq!(
            s.public_url("u1/m1-1-pill.jpg"),
            "https://db.example.com/storage/v1/object/public/medication-photos/u1/m1-1-pill.jpg"
        );
    }

    #[test]
    fn test_status_error_mapping() {
        assert!(matches!(
            status_error(StatusCode::CONFLICT, "duplicate key"),
            TrackerError::Conflict(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, ""),
            TrackerError::Validation(_)
        ));
        assert!(matches!(
            status_error(StatusCode::UNPROCESSABLE_ENTITY, "null value in column"),
            TrackerError::Validation(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, ""),
            TrackerError::Transport(_)
        ));
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("a/b.PNG"), "image/png");
        assert_eq!(content_type_for("a/b"), "application/octet-stream");
    }

    // --- Integration tests (hit a live store configured through the environment) ---

    fn live_store() -> RestStore {
        let url = std::env::var("MEDTRACK_STORE_URL").expect("MEDTRACK_STORE_URL must be set");
        let api_key = std::env::var("MEDTRACK_STORE_KEY").expect("MEDTRACK_STORE_KEY must be set");
        RestStore::new(&RemoteConfig {
            url,
            api_key,
            bucket: crate::config::DEFAULT_PHOTO_BUCKET.to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    #[ignore = "hits a live store"]
    async fn test_live_query_medications() {
        let s = live_store();
        let meds = s
            .query_medications(&MedicationFilter::for_user("00000000-0000-0000-0000-000000000000"))
            .await
            .unwrap();
        assert!(meds.is_empty());
    }

    #[tokio::test]
    #[ignore = "hits a live store"]
    async fn test_live_query_logs_for_date() {
        let s = live_store();
        let logs = s
            .query_logs(&LogFilter {
                user_id: "00000000-0000-0000-0000-000000000000".to_string(),
                date: Some(date("2024-01-05")),
            })
            .await
            .unwrap();
        assert!(logs.is_empty());
    }
}
