use log::{debug, error, info, warn};

use evaluation_sheet::*;
use snafu::{prelude::*, Snafu};

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map as JSMap;
use serde_json::Value as JSValue;

use crate::intake::config_reader::*;
use crate::intake::gateway::*;
use crate::intake::notify::*;

pub mod config_reader;
pub mod gateway;
pub mod notify;
mod store_csv;
mod store_memory;

pub use store_csv::CsvWorkbook;
pub use store_memory::MemoryWorkbook;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum IntakeError {
    #[snafu(display("Malformed request: {source}"))]
    MalformedRequest { source: serde_json::Error },
    #[snafu(display("Missing required fields: {}", fields.join(", ")))]
    Validation { fields: Vec<&'static str> },
    #[snafu(display("Could not write to table {table}: {source}"))]
    StoreWrite { table: String, source: StoreError },
    #[snafu(display("Could not read table {table}: {source}"))]
    StoreRead { table: String, source: StoreError },
    #[snafu(display("Table {table} does not have the expected layout: {source}"))]
    LayoutMismatch { table: String, source: LayoutError },
    #[snafu(display("The store task did not complete: {source}"))]
    StoreTask { source: tokio::task::JoinError },
}

pub type IntakeResult<T> = Result<T, IntakeError>;

/// A submission as it arrives on the wire, before the required fields are checked.
#[derive(PartialEq, Debug, Clone, Default, Deserialize)]
pub struct RawSubmission {
    pub reviewer_name: Option<String>,
    pub reviewer_role: Option<String>,
    pub review_date: Option<String>,
    pub ratings: Option<JSMap<String, JSValue>>,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// The body returned for every submission, successful or not.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub status: ResponseStatus,
    pub message: String,
    pub timestamp: String,
}

impl SubmissionResponse {
    fn new(status: ResponseStatus, message: String) -> SubmissionResponse {
        SubmissionResponse {
            status,
            message,
            timestamp: iso_timestamp(Utc::now()),
        }
    }
}

pub fn iso_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Checks the identity fields. The ratings must be present but may be empty.
pub fn validate(raw: RawSubmission) -> IntakeResult<EvaluationSubmission> {
    let mut missing: Vec<&'static str> = Vec::new();
    let mut required = |name: &'static str, value: Option<String>| -> String {
        match value {
            Some(s) if !s.is_empty() => s,
            _ => {
                missing.push(name);
                String::new()
            }
        }
    };
    let reviewer_name = required("reviewer_name", raw.reviewer_name);
    let reviewer_role = required("reviewer_role", raw.reviewer_role);
    let review_date = required("review_date", raw.review_date);
    if raw.ratings.is_none() {
        missing.push("ratings");
    }
    ensure!(missing.is_empty(), ValidationSnafu { fields: missing });
    Ok(EvaluationSubmission {
        reviewer_name,
        reviewer_role,
        review_date,
        ratings: raw.ratings.unwrap_or_default(),
    })
}

/// Handles the submissions: parsing, validation, persistence and notification.
///
/// The service holds no state of its own between requests.
#[derive(Clone)]
pub struct IntakeService {
    config: Arc<ServiceConfig>,
    gateway: SheetGateway,
    notifier: Option<Arc<Notifier>>,
}

impl IntakeService {
    pub fn new(
        config: Arc<ServiceConfig>,
        backend: Arc<dyn TableBackend>,
        channel: Option<Arc<dyn NotificationChannel>>,
    ) -> IntakeService {
        let gateway = SheetGateway::new(backend, &config.table_name);
        let notifier = match (config.notifications.enabled, channel) {
            (true, _) if config.notifications.recipient.is_empty() => {
                warn!("Notifications are enabled without a recipient, none will be sent");
                None
            }
            (true, Some(channel)) => Some(Arc::new(Notifier::new(
                channel,
                config.notifications.recipient.clone(),
                gateway.reference(),
            ))),
            _ => None,
        };
        IntakeService {
            config,
            gateway,
            notifier,
        }
    }

    /// Builds the store and the notification channel described by the configuration.
    pub fn from_config(config: Arc<ServiceConfig>) -> IntakeService {
        let backend: Arc<dyn TableBackend> = match &config.store {
            StoreLocation::Directory(dir) => Arc::new(CsvWorkbook::new(dir.clone())),
            StoreLocation::Memory => Arc::new(MemoryWorkbook::new()),
        };
        let channel: Arc<dyn NotificationChannel> = match &config.notifications.webhook_url {
            Some(url) => Arc::new(WebhookChannel::new(url)),
            None => Arc::new(LogChannel {}),
        };
        IntakeService::new(config, backend, Some(channel))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn gateway(&self) -> &SheetGateway {
        &self.gateway
    }

    /// Processes one request body. Failures are reported in the response, never raised.
    pub async fn submit(&self, body: &[u8]) -> SubmissionResponse {
        self.respond(body, true).await
    }

    /// Same as `submit`, but returns only once the notification has been sent.
    ///
    /// For one-shot callers whose runtime stops right after the response.
    pub async fn submit_and_notify(&self, body: &[u8]) -> SubmissionResponse {
        self.respond(body, false).await
    }

    async fn respond(&self, body: &[u8], detach: bool) -> SubmissionResponse {
        info!("Received submission ({} bytes)", body.len());
        match self.process(body, detach).await {
            Ok(totals) => {
                info!("Submission saved, grand total {}", totals.grand);
                SubmissionResponse::new(
                    ResponseStatus::Success,
                    "Evaluation saved successfully".to_string(),
                )
            }
            Err(e) => {
                match &e {
                    IntakeError::MalformedRequest { .. } | IntakeError::Validation { .. } => {
                        warn!("Rejected submission: {}", e)
                    }
                    _ => error!("Failed to save submission: {}", e),
                }
                SubmissionResponse::new(ResponseStatus::Error, e.to_string())
            }
        }
    }

    async fn process(&self, body: &[u8], detach: bool) -> IntakeResult<MachineTotals> {
        let raw: RawSubmission = serde_json::from_slice(body).context(MalformedRequestSnafu {})?;
        debug!("process: parsed submission {:?}", raw);
        let submission = validate(raw)?;
        let totals = self.persist(submission.clone()).await?;
        match &self.notifier {
            Some(notifier) if detach => {
                let notifier = Arc::clone(notifier);
                // The response does not wait for the notification.
                tokio::spawn(async move {
                    notifier.notify(&submission).await;
                });
            }
            Some(notifier) => notifier.notify(&submission).await,
            None => {}
        }
        Ok(totals)
    }

    /// Appends the submission to the sheet, on the blocking pool.
    pub async fn persist(&self, submission: EvaluationSubmission) -> IntakeResult<MachineTotals> {
        let gateway = self.gateway.clone();
        tokio::task::spawn_blocking(move || persist_submission(&gateway, &submission))
            .await
            .context(StoreTaskSnafu {})?
    }

    pub fn status_page(&self, now: DateTime<Utc>) -> String {
        let notifications = if self.notifier.is_some() {
            "Enabled"
        } else {
            "Disabled"
        };
        format!(
            r#"<!DOCTYPE html>
<html>
<head><title>X-ray Form Backend</title></head>
<body>
  <h1>X-ray Evaluation Form Backend</h1>
  <p><strong>Status:</strong> Running</p>
  <p><strong>Store:</strong> {}</p>
  <p><strong>Target table:</strong> {}</p>
  <p><strong>Notifications:</strong> {}</p>
  <p>This endpoint accepts POST requests from the evaluation form.</p>
  <p>Server time: {}</p>
</body>
</html>
"#,
            html_escape(&self.gateway.reference()),
            html_escape(&self.config.table_name),
            notifications,
            iso_timestamp(now)
        )
    }
}

/// Opens the table, stamps the row and appends it.
pub fn persist_submission(
    gateway: &SheetGateway,
    submission: &EvaluationSubmission,
) -> IntakeResult<MachineTotals> {
    let handle = gateway.open_or_create_table()?;
    let timestamp = iso_timestamp(Utc::now());
    let (row, totals) = build_row(submission, &timestamp);
    gateway.append_row(&handle, &row)?;
    Ok(totals)
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// The evaluation used to check an installation end to end: every rating is 3.
pub fn sample_submission() -> JSValue {
    let mut ratings: JSMap<String, JSValue> = JSMap::new();
    for k in rating_keys() {
        ratings.insert(k.to_string(), serde_json::json!(3));
    }
    serde_json::json!({
        "reviewer_name": "Test User",
        "reviewer_role": "Test Hospital",
        "review_date": "2025-11-05",
        "ratings": ratings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    fn config(notify: bool) -> Arc<ServiceConfig> {
        let mut c = ServiceConfig::default();
        c.store = StoreLocation::Memory;
        c.notifications.enabled = notify;
        if notify {
            c.notifications.recipient = "it@example.org".to_string();
        }
        Arc::new(c)
    }

    fn service() -> (IntakeService, Arc<MemoryWorkbook>) {
        let backend = Arc::new(MemoryWorkbook::new());
        let s = IntakeService::new(config(false), backend.clone(), None);
        (s, backend)
    }

    fn body(js: JSValue) -> Vec<u8> {
        serde_json::to_vec(&js).unwrap()
    }

    /// A service whose table already holds one response.
    async fn seeded_service() -> (IntakeService, Arc<MemoryWorkbook>) {
        let (s, backend) = service();
        let resp = s.submit(&body(sample_submission())).await;
        assert_eq!(resp.status, ResponseStatus::Success);
        assert_eq!(data_rows(&backend), 1);
        (s, backend)
    }

    fn data_rows(backend: &MemoryWorkbook) -> usize {
        backend
            .read_rows("Responses")
            .map(|rows| rows.len().saturating_sub(1))
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn partial_submission_is_saved() {
        let (s, backend) = service();
        let resp = s
            .submit(&body(json!({
                "reviewer_name": "Dr. Smith",
                "reviewer_role": "City Hospital",
                "review_date": "2025-11-05",
                "ratings": {"q1_bullseye": 4, "q1_aimed": 3, "q1_ge": 5}
            })))
            .await;
        assert_eq!(resp.status, ResponseStatus::Success);
        assert_eq!(resp.message, "Evaluation saved successfully");
        assert!(DateTime::parse_from_rfc3339(&resp.timestamp).is_ok());

        let handle = s.gateway().open_or_create_table().unwrap();
        let records = s.gateway().read_all_records(&handle).unwrap();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.reviewer_name, "Dr. Smith");
        assert_eq!(&rec.ratings[..3], &[4.0, 3.0, 5.0]);
        assert!(rec.ratings[3..].iter().all(|v| *v == 0.0));
        assert_eq!(
            rec.totals,
            MachineTotals {
                bullseye: 4.0,
                aimed: 3.0,
                ge: 5.0,
                grand: 12.0
            }
        );
        assert!(DateTime::parse_from_rfc3339(&rec.timestamp).is_ok());
        assert_eq!(data_rows(&backend), 1);
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let (s, backend) = seeded_service().await;
        let resp = s
            .submit(&body(json!({
                "reviewer_name": "",
                "reviewer_role": "City Hospital",
                "review_date": "2025-11-05",
                "ratings": {}
            })))
            .await;
        assert_eq!(resp.status, ResponseStatus::Error);
        assert!(resp.message.contains("reviewer_name"));
        assert_eq!(data_rows(&backend), 1);
    }

    #[tokio::test]
    async fn missing_ratings_are_rejected() {
        let (s, backend) = seeded_service().await;
        let resp = s
            .submit(&body(json!({
                "reviewer_name": "A",
                "reviewer_role": "B",
                "review_date": "2025-11-05"
            })))
            .await;
        assert_eq!(resp.status, ResponseStatus::Error);
        assert_eq!(resp.message, "Missing required fields: ratings");
        assert_eq!(data_rows(&backend), 1);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let (s, backend) = seeded_service().await;
        let resp = s.submit(b"{not json").await;
        assert_eq!(resp.status, ResponseStatus::Error);
        assert!(resp.message.starts_with("Malformed request"));
        let resp = s.submit(b"[1, 2]").await;
        assert_eq!(resp.status, ResponseStatus::Error);
        assert_eq!(data_rows(&backend), 1);
    }

    #[tokio::test]
    async fn sample_submission_totals() {
        let (s, _) = service();
        let resp = s.submit(&body(sample_submission())).await;
        assert_eq!(resp.status, ResponseStatus::Success);
        let handle = s.gateway().open_or_create_table().unwrap();
        let records = s.gateway().read_all_records(&handle).unwrap();
        assert_eq!(records[0].totals.bullseye, 84.0);
        assert_eq!(records[0].totals.aimed, 84.0);
        assert_eq!(records[0].totals.ge, 84.0);
        assert_eq!(records[0].totals.grand, 252.0);
    }

    #[test]
    fn validation_lists_all_missing_fields() {
        let err = validate(RawSubmission::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing required fields: reviewer_name, reviewer_role, review_date, ratings"
        );
        let ok = validate(RawSubmission {
            reviewer_name: Some("A".to_string()),
            reviewer_role: Some("B".to_string()),
            review_date: Some("2025-11-05".to_string()),
            ratings: Some(JSMap::new()),
        })
        .unwrap();
        assert!(ok.ratings.is_empty());
    }

    struct ReadOnlyBackend(MemoryWorkbook);

    impl TableBackend for ReadOnlyBackend {
        fn reference(&self) -> String {
            "read-only:".to_string()
        }
        fn has_table(&self, table: &str) -> Result<bool, StoreError> {
            self.0.has_table(table)
        }
        fn create_table(&self, table: &str, header: &[String]) -> Result<bool, StoreError> {
            self.0.create_table(table, header)
        }
        fn append_row(&self, table: &str, _row: &[String]) -> Result<(), StoreError> {
            Err(StoreError::Rejected {
                table: table.to_string(),
                reason: "permission denied".to_string(),
            })
        }
        fn read_rows(&self, table: &str) -> Result<Vec<Vec<String>>, StoreError> {
            self.0.read_rows(table)
        }
        fn truncate_data_rows(&self, table: &str) -> Result<usize, StoreError> {
            self.0.truncate_data_rows(table)
        }
    }

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn store_failure_is_reported() {
        let channel = Arc::new(RecordingChannel::default());
        let s = IntakeService::new(
            config(true),
            Arc::new(ReadOnlyBackend(MemoryWorkbook::new())),
            Some(channel.clone()),
        );
        let resp = s.submit(&body(sample_submission())).await;
        assert_eq!(resp.status, ResponseStatus::Error);
        assert!(resp.message.contains("permission denied"));
        tokio::task::yield_now().await;
        assert!(channel.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn notification_after_save() {
        let channel = Arc::new(RecordingChannel::default());
        let s = IntakeService::new(
            config(true),
            Arc::new(MemoryWorkbook::new()),
            Some(channel.clone()),
        );
        let resp = s.submit(&body(sample_submission())).await;
        assert_eq!(resp.status, ResponseStatus::Success);
        for _ in 0..100 {
            if !channel.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].2.contains("Test User"));
    }

    #[tokio::test]
    async fn submit_and_notify_waits_for_the_notification() {
        let channel = Arc::new(RecordingChannel::default());
        let s = IntakeService::new(
            config(true),
            Arc::new(MemoryWorkbook::new()),
            Some(channel.clone()),
        );
        let resp = s.submit_and_notify(&body(sample_submission())).await;
        assert_eq!(resp.status, ResponseStatus::Success);
        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "it@example.org");
        assert_eq!(sent[0].1, SUBJECT);
    }

    #[tokio::test]
    async fn notifications_need_a_recipient() {
        let mut c = ServiceConfig::default();
        c.store = StoreLocation::Memory;
        c.notifications.enabled = true;
        let channel = Arc::new(RecordingChannel::default());
        let s = IntakeService::new(
            Arc::new(c),
            Arc::new(MemoryWorkbook::new()),
            Some(channel.clone()),
        );
        let resp = s.submit_and_notify(&body(sample_submission())).await;
        assert_eq!(resp.status, ResponseStatus::Success);
        assert!(channel.sent.lock().unwrap().is_empty());
        assert!(s.status_page(Utc::now()).contains("Disabled"));
    }

    #[test]
    fn status_page_mentions_table() {
        let (s, _) = service();
        let page = s.status_page(Utc::now());
        assert!(page.contains("Responses"));
        assert!(page.contains("Disabled"));
    }
}
