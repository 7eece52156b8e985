use async_trait::async_trait;
use log::{info, warn};
use snafu::{prelude::*, Snafu};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use evaluation_sheet::EvaluationSubmission;

#[derive(Debug, Snafu)]
pub enum NotifyError {
    #[snafu(display("Webhook request to {url} failed: {source}"))]
    WebhookRequest { url: String, source: reqwest::Error },
    #[snafu(display("Webhook {url} answered with status {status}"))]
    WebhookStatus { url: String, status: u16 },
}

/// Somewhere a short message can be sent. No delivery guarantee is expected.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// Writes the notifications to the log.
pub struct LogChannel {}

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        info!("Notification for {:?}: {}\n{}", to, subject, body);
        Ok(())
    }
}

/// Posts the notifications as JSON (`to`, `subject`, `body`) to a URL.
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: &str) -> WebhookChannel {
        WebhookChannel {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&json!({"to": to, "subject": subject, "body": body}))
            .send()
            .await
            .context(WebhookRequestSnafu { url: &self.url })?;
        let status = resp.status();
        ensure!(
            status.is_success(),
            WebhookStatusSnafu {
                url: &self.url,
                status: status.as_u16()
            }
        );
        Ok(())
    }
}

pub const SUBJECT: &str = "New X-ray Machine Evaluation Submitted";

pub struct Notifier {
    channel: Arc<dyn NotificationChannel>,
    recipient: String,
    store_reference: String,
}

impl Notifier {
    pub fn new(
        channel: Arc<dyn NotificationChannel>,
        recipient: String,
        store_reference: String,
    ) -> Notifier {
        Notifier {
            channel,
            recipient,
            store_reference,
        }
    }

    pub fn summary(
        &self,
        submission: &EvaluationSubmission,
        submitted_at: DateTime<Utc>,
    ) -> String {
        format!(
            "A new X-ray machine evaluation has been submitted.

Reviewer Information:
Name: {}
Role/Position: {}
Review Date: {}
Submission Time: {}

Total Ratings Submitted: {}

View the full response in the response sheet:
{}
",
            submission.reviewer_name,
            submission.reviewer_role,
            submission.review_date,
            submitted_at.format("%Y-%m-%d %H:%M:%S UTC"),
            submission.ratings.len(),
            self.store_reference
        )
    }

    /// Sends the summary of a saved submission. Failures are logged and dropped.
    pub async fn notify(&self, submission: &EvaluationSubmission) {
        let body = self.summary(submission, Utc::now());
        match self.channel.send(&self.recipient, SUBJECT, &body).await {
            Ok(()) => info!("Notification sent to {:?}", self.recipient),
            Err(e) => warn!("Error sending notification: {}", e),
        }
    }
}
