mod cloud_watch_alarm_client;
mod config;
mod definition;
mod dynamo_definition_store;
mod ec2_instance_client;
mod error;
mod event;
mod lifecycle_client;
mod plan;
mod reconciler;
mod retry;
mod seed;
mod sns_notifier;

use std::sync::Arc;

use anyhow::Context as _;
use lambda_runtime::{handler_fn, Context, Error};
use rusoto_autoscaling::AutoscalingClient;
use rusoto_cloudwatch::CloudWatchClient;
use rusoto_core::Region;
use rusoto_dynamodb::DynamoDbClient;
use rusoto_ec2::Ec2Client;
use rusoto_sns::SnsClient;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cloud_watch_alarm_client::CloudWatchAlarmClient;
use crate::config::Config;
use crate::dynamo_definition_store::DynamoDefinitionStore;
use crate::ec2_instance_client::Ec2InstanceClient;
use crate::lifecycle_client::AutoscalingLifecycleClient;
use crate::reconciler::Reconciler;
use crate::sns_notifier::SnsNotifier;

type AwsReconciler = Reconciler<
    DynamoDefinitionStore,
    CloudWatchAlarmClient,
    Ec2InstanceClient,
    AutoscalingLifecycleClient,
    SnsNotifier,
>;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::from_env().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_level))
        .with_target(false)
        .without_time()
        .init();

    info!(
        table = %config.table_name,
        topic = ?config.topic_arn,
        marker = %config.marker_tag,
        "starting alarm reconciler"
    );

    let reconciler = Arc::new(build_reconciler(config));
    lambda_runtime::run(handler_fn(move |event: Value, _: Context| {
        let reconciler = Arc::clone(&reconciler);
        async move { reconcile_handler(&reconciler, event).await }
    }))
    .await?;
    Ok(())
}

fn build_reconciler(config: Config) -> AwsReconciler {
    let region = Region::default();
    Reconciler::new(
        DynamoDefinitionStore::new_with_client(
            DynamoDbClient::new(region.clone()),
            config.table_name.clone(),
        ),
        CloudWatchAlarmClient::new_with_client(CloudWatchClient::new(region.clone())),
        Ec2InstanceClient::new_with_client(Ec2Client::new(region.clone())),
        AutoscalingLifecycleClient::new_with_client(AutoscalingClient::new(region.clone())),
        SnsNotifier::new_with_client(SnsClient::new(region), config.topic_arn.clone()),
        config,
    )
}

async fn reconcile_handler(reconciler: &AwsReconciler, event: Value) -> Result<Value, Error> {
    let output = reconciler.handle(event).await?;
    info!(message = %output.message, "invocation finished");
    Ok(serde_json::to_value(output)?)
}
