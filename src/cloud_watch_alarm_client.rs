use crate::error::ReconcilerError;
use crate::plan::AlarmSpec;
use async_trait::async_trait;

use rusoto_cloudwatch::{
    CloudWatch, CloudWatchClient, DeleteAlarmsError, DeleteAlarmsInput, DescribeAlarmsInput,
    Dimension, PutMetricAlarmInput,
};
use rusoto_core::RusotoError;
use tracing::{debug, info};

/// DeleteAlarms accepts at most this many names per call.
const DELETE_BATCH_SIZE: usize = 100;
const DESCRIBE_PAGE_SIZE: i64 = 100;

#[async_trait]
pub trait AlarmClient: Send + Sync {
    /// Creates the alarm, or overwrites it when the name already exists.
    async fn put_alarm(&self, spec: &AlarmSpec) -> Result<(), ReconcilerError>;

    /// Deletes the named alarms; names that no longer exist are ignored.
    async fn delete_alarms(&self, names: &[String]) -> Result<(), ReconcilerError>;

    /// Names of every metric alarm starting with `prefix`.
    async fn describe_alarms(&self, prefix: &str) -> Result<Vec<String>, ReconcilerError>;
}

pub struct CloudWatchAlarmClient {
    client: CloudWatchClient,
}

impl CloudWatchAlarmClient {
    pub fn new_with_client(client: CloudWatchClient) -> Self {
        CloudWatchAlarmClient { client }
    }

    async fn delete_one_by_one(&self, names: &[String]) -> Result<(), ReconcilerError> {
        for name in names {
            let result = self
                .client
                .delete_alarms(DeleteAlarmsInput {
                    alarm_names: vec![name.clone()],
                })
                .await;
            match result {
                Ok(()) => {}
                Err(RusotoError::Service(DeleteAlarmsError::ResourceNotFound(_))) => {
                    debug!(alarm = %name, "alarm already deleted");
                }
                Err(error) => return Err(error.into()),
            }
        }
        Ok(())
    }
}

fn put_metric_alarm_input(spec: &AlarmSpec) -> PutMetricAlarmInput {
    PutMetricAlarmInput {
        alarm_name: spec.alarm_name.clone(),
        alarm_description: spec.description.clone(),
        metric_name: Some(spec.metric_name.clone()),
        namespace: Some(spec.namespace.clone()),
        dimensions: Some(vec![Dimension {
            name: "InstanceId".to_string(),
            value: spec.instance_id.clone(),
        }]),
        period: Some(spec.period),
        evaluation_periods: spec.evaluation_periods,
        threshold: Some(spec.threshold),
        comparison_operator: spec.comparison_operator.as_str().to_string(),
        statistic: Some(spec.statistic.as_str().to_string()),
        actions_enabled: Some(spec.actions_enabled),
        alarm_actions: if spec.alarm_actions.is_empty() {
            None
        } else {
            Some(spec.alarm_actions.clone())
        },
        ..Default::default()
    }
}

#[async_trait]
impl AlarmClient for CloudWatchAlarmClient {
    async fn put_alarm(&self, spec: &AlarmSpec) -> Result<(), ReconcilerError> {
        self.client
            .put_metric_alarm(put_metric_alarm_input(spec))
            .await?;
        info!(alarm = %spec.alarm_name, "put alarm");
        Ok(())
    }

    async fn delete_alarms(&self, names: &[String]) -> Result<(), ReconcilerError> {
        for chunk in names.chunks(DELETE_BATCH_SIZE) {
            let result = self
                .client
                .delete_alarms(DeleteAlarmsInput {
                    alarm_names: chunk.to_vec(),
                })
                .await;
            match result {
                Ok(()) => {}
                // A missing name fails the whole batch, so retry the names singly.
                Err(RusotoError::Service(DeleteAlarmsError::ResourceNotFound(_))) => {
                    self.delete_one_by_one(chunk).await?
                }
                Err(error) => return Err(error.into()),
            }
            info!(alarms = ?chunk, "deleted alarms");
        }
        Ok(())
    }

    async fn describe_alarms(&self, prefix: &str) -> Result<Vec<String>, ReconcilerError> {
        let mut names = Vec::new();
        let mut next_token = None;
        loop {
            let output = self
                .client
                .describe_alarms(DescribeAlarmsInput {
                    alarm_name_prefix: Some(prefix.to_string()),
                    max_records: Some(DESCRIBE_PAGE_SIZE),
                    next_token,
                    ..Default::default()
                })
                .await?;
            names.extend(
                output
                    .metric_alarms
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|alarm| alarm.alarm_name),
            );
            match output.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }
        debug!(prefix, count = names.len(), "described alarms");
        Ok(names)
    }
}
