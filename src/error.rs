use std::time::Duration;

use rusoto_autoscaling::CompleteLifecycleActionError;
use rusoto_cloudwatch::{DeleteAlarmsError, DescribeAlarmsError, PutMetricAlarmError};
use rusoto_core::RusotoError;
use rusoto_dynamodb::{GetItemError, PutItemError};
use rusoto_ec2::DescribeInstancesError;
use rusoto_sns::PublishError;

#[derive(Debug, thiserror::Error)]
pub enum ReconcilerError {
    #[error("failed to read alarm definitions: {0}")]
    GetDefinitions(#[from] RusotoError<GetItemError>),

    #[error("failed to write alarm definitions: {0}")]
    PutDefinitions(#[from] RusotoError<PutItemError>),

    #[error("failed to put alarm: {0}")]
    PutAlarm(#[from] RusotoError<PutMetricAlarmError>),

    #[error("failed to delete alarms: {0}")]
    DeleteAlarms(#[from] RusotoError<DeleteAlarmsError>),

    #[error("failed to describe alarms: {0}")]
    DescribeAlarms(#[from] RusotoError<DescribeAlarmsError>),

    #[error("failed to describe instance: {0}")]
    DescribeInstances(#[from] RusotoError<DescribeInstancesError>),

    #[error("failed to complete lifecycle action: {0}")]
    CompleteLifecycleAction(#[from] RusotoError<CompleteLifecycleActionError>),

    #[error("failed to publish notification: {0}")]
    Publish(#[from] RusotoError<PublishError>),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ReconcilerError {
    /// Whether retrying the same call later can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ReconcilerError::GetDefinitions(RusotoError::Service(error)) => matches!(
                error,
                GetItemError::InternalServerError(_)
                    | GetItemError::ProvisionedThroughputExceeded(_)
                    | GetItemError::RequestLimitExceeded(_)
            ),
            ReconcilerError::PutDefinitions(RusotoError::Service(error)) => matches!(
                error,
                PutItemError::InternalServerError(_)
                    | PutItemError::ProvisionedThroughputExceeded(_)
                    | PutItemError::RequestLimitExceeded(_)
                    | PutItemError::TransactionConflict(_)
            ),
            ReconcilerError::GetDefinitions(error) => is_transient_rusoto(error),
            ReconcilerError::PutDefinitions(error) => is_transient_rusoto(error),
            ReconcilerError::PutAlarm(error) => is_transient_rusoto(error),
            ReconcilerError::DeleteAlarms(error) => is_transient_rusoto(error),
            ReconcilerError::DescribeAlarms(error) => is_transient_rusoto(error),
            ReconcilerError::DescribeInstances(error) => is_transient_rusoto(error),
            ReconcilerError::CompleteLifecycleAction(RusotoError::Service(
                CompleteLifecycleActionError::ResourceContentionFault(_),
            )) => true,
            ReconcilerError::CompleteLifecycleAction(error) => is_transient_rusoto(error),
            ReconcilerError::Publish(error) => is_transient_rusoto(error),
            ReconcilerError::Timeout { .. } => true,
            ReconcilerError::Config(_) | ReconcilerError::Json(_) => false,
        }
    }
}

fn is_transient_rusoto<E>(error: &RusotoError<E>) -> bool {
    match error {
        RusotoError::HttpDispatch(_) => true,
        RusotoError::Unknown(response) => {
            response.status.is_server_error()
                || String::from_utf8_lossy(&response.body).contains("Throttling")
        }
        _ => false,
    }
}

/// Text of an unmodelled AWS error: the raw body, or the validation message.
pub fn unmodelled_error_text<E>(error: &RusotoError<E>) -> Option<String> {
    match error {
        RusotoError::Unknown(response) => {
            Some(String::from_utf8_lossy(&response.body).into_owned())
        }
        RusotoError::Validation(message) => Some(message.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusoto_core::request::{BufferedHttpResponse, HttpDispatchError};

    fn unknown(status: u16, body: &str) -> BufferedHttpResponse {
        BufferedHttpResponse {
            status: http::StatusCode::from_u16(status).unwrap(),
            body: body.to_owned().into(),
            headers: http::HeaderMap::default(),
        }
    }

    #[test]
    fn test_throttled_store_read_is_transient() {
        let error = ReconcilerError::GetDefinitions(RusotoError::Service(
            GetItemError::ProvisionedThroughputExceeded("slow down".to_string()),
        ));
        assert!(error.is_transient());
    }

    #[test]
    fn test_missing_table_is_not_transient() {
        let error = ReconcilerError::GetDefinitions(RusotoError::Service(
            GetItemError::ResourceNotFound("no table".to_string()),
        ));
        assert!(!error.is_transient());
    }

    #[test]
    fn test_query_protocol_throttling_is_transient() {
        let error = ReconcilerError::PutAlarm(RusotoError::Unknown(unknown(
            400,
            "<ErrorResponse><Error><Code>Throttling</Code></Error></ErrorResponse>",
        )));
        assert!(error.is_transient());
    }

    #[test]
    fn test_server_error_and_dispatch_are_transient() {
        let error = ReconcilerError::DescribeAlarms(RusotoError::Unknown(unknown(503, "")));
        assert!(error.is_transient());

        let error = ReconcilerError::DescribeInstances(RusotoError::HttpDispatch(
            HttpDispatchError::new("connection reset".to_string()),
        ));
        assert!(error.is_transient());
    }

    #[test]
    fn test_lifecycle_contention_is_transient() {
        let error = ReconcilerError::CompleteLifecycleAction(RusotoError::Service(
            CompleteLifecycleActionError::ResourceContentionFault("busy".to_string()),
        ));
        assert!(error.is_transient());
    }

    #[test]
    fn test_timeout_is_transient() {
        let error = ReconcilerError::Timeout {
            operation: "GetItem",
            after: Duration::from_secs(10),
        };
        assert!(error.is_transient());
        assert_eq!(error.to_string(), "GetItem timed out after 10s");
    }

    #[test]
    fn test_validation_is_not_transient() {
        let error = ReconcilerError::CompleteLifecycleAction(RusotoError::Unknown(unknown(
            400,
            "<Code>ValidationError</Code>",
        )));
        assert!(!error.is_transient());
        assert!(!ReconcilerError::Config("x".to_string()).is_transient());
    }
}
