use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusoto_sns::{PublishInput, Sns, SnsClient};
use serde::Serialize;
use tracing::{info, warn};

use crate::definition::Profile;
use crate::error::ReconcilerError;

/// Subjects longer than this are rejected by SNS.
const MAX_SUBJECT_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub subject: String,
    pub reason: String,
}

/// Problems an operator should look at; the invocation itself carried on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReport {
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub failures: Vec<Failure>,
    pub reported_at: DateTime<Utc>,
}

impl FailureReport {
    pub fn new(context: impl Into<String>) -> Self {
        FailureReport {
            context: context.into(),
            profile: None,
            instance_id: None,
            failures: vec![],
            reported_at: Utc::now(),
        }
    }

    pub fn with_profile(mut self, profile: &Profile) -> Self {
        self.profile = Some(profile.clone());
        self
    }

    pub fn with_instance(mut self, instance_id: &str) -> Self {
        self.instance_id = Some(instance_id.to_string());
        self
    }

    pub fn push(&mut self, subject: impl Into<String>, reason: impl ToString) {
        self.failures.push(Failure {
            subject: subject.into(),
            reason: reason.to_string(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    fn subject(&self) -> String {
        let mut subject = format!(
            "Alarm reconciliation: {} failure(s) in {}",
            self.failures.len(),
            self.context
        );
        if subject.len() > MAX_SUBJECT_LEN {
            let mut end = MAX_SUBJECT_LEN;
            while !subject.is_char_boundary(end) {
                end -= 1;
            }
            subject.truncate(end);
        }
        subject
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, report: &FailureReport) -> Result<(), ReconcilerError>;
}

pub struct SnsNotifier {
    client: SnsClient,
    topic_arn: Option<String>,
}

impl SnsNotifier {
    pub fn new_with_client(client: SnsClient, topic_arn: Option<String>) -> Self {
        SnsNotifier { client, topic_arn }
    }
}

#[async_trait]
impl Notifier for SnsNotifier {
    async fn publish(&self, report: &FailureReport) -> Result<(), ReconcilerError> {
        let message = serde_json::to_string(report)?;
        let topic_arn = match &self.topic_arn {
            Some(topic_arn) => topic_arn,
            None => {
                warn!(%message, "no notification topic configured");
                return Ok(());
            }
        };
        self.client
            .publish(PublishInput {
                topic_arn: Some(topic_arn.clone()),
                subject: Some(report.subject()),
                message,
                ..Default::default()
            })
            .await?;
        info!(
            topic_arn = %topic_arn,
            failures = report.failures.len(),
            "published failure report"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rusoto_core::signature::{SignedRequest, SignedRequestPayload};
    use rusoto_mock::{MockCredentialsProvider, MockRequestDispatcher};

    fn form_body(request: &SignedRequest) -> String {
        match &request.payload {
            Some(SignedRequestPayload::Buffer(body)) => String::from_utf8(body.to_vec()).unwrap(),
            _ => panic!("request has no buffered payload"),
        }
    }

    fn report() -> FailureReport {
        let mut report = FailureReport::new("launch")
            .with_profile(&Profile::new("app", "dev"))
            .with_instance("i-abc123");
        report.reported_at = Utc.with_ymd_and_hms(2020, 12, 1, 0, 0, 0).unwrap();
        report.push("app-dev-i-abc123-CPUUtilization", "throttled");
        report
    }

    #[test]
    fn test_report_json() {
        assert_eq!(
            serde_json::to_value(&report()).unwrap(),
            serde_json::json!({
                "context": "launch",
                "profile": {"name": "app", "type": "dev"},
                "instance_id": "i-abc123",
                "failures": [{
                    "subject": "app-dev-i-abc123-CPUUtilization",
                    "reason": "throttled"
                }],
                "reported_at": "2020-12-01T00:00:00Z"
            })
        );
    }

    #[test]
    fn test_subject_is_bounded() {
        let report = FailureReport::new("x".repeat(300));
        assert_eq!(report.subject().len(), MAX_SUBJECT_LEN);
    }

    #[tokio::test]
    async fn test_publish() {
        let mock = SnsClient::new_with(
            MockRequestDispatcher::default()
                .with_body(
                    "<PublishResponse><PublishResult><MessageId>94f20ce6-13c5-43a0-9a9e-ca52d816e90b</MessageId></PublishResult></PublishResponse>",
                )
                .with_request_checker(|request| {
                    let body = form_body(request);
                    assert!(body.contains("Action=Publish"));
                    assert!(body.contains(
                        "TopicArn=arn%3Aaws%3Asns%3Aap-northeast-1%3A123456789012%3Aalarms"
                    ));
                    assert!(body.contains("Subject=Alarm+reconciliation"));
                }),
            MockCredentialsProvider,
            Default::default(),
        );

        let notifier = SnsNotifier::new_with_client(
            mock,
            Some("arn:aws:sns:ap-northeast-1:123456789012:alarms".to_string()),
        );
        assert!(notifier.publish(&report()).await.is_ok());
    }

    #[tokio::test]
    async fn test_publish_without_topic_only_logs() {
        let mock = SnsClient::new_with(
            MockRequestDispatcher::with_status(500),
            MockCredentialsProvider,
            Default::default(),
        );

        let notifier = SnsNotifier::new_with_client(mock, None);
        assert!(notifier.publish(&report()).await.is_ok());
    }
}
