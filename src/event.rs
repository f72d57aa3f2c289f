//! Payloads the reconciler is invoked with.
//!
//! One Lambda function receives three differently shaped events: EventBridge
//! lifecycle actions from Auto Scaling, DynamoDB stream batches from the
//! definition table, and CloudFormation custom-resource requests for seeding.

use std::collections::HashMap;

use rusoto_dynamodb::AttributeValue;
use serde::{Deserialize, Serialize};

pub const AUTOSCALING_SOURCE: &str = "aws.autoscaling";

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ReconcilerEvent {
    Lifecycle(LifecycleEvent),
    DefinitionChange(StreamEvent),
    Bootstrap(CustomResourceEvent),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LifecycleEvent {
    pub source: String,
    #[serde(rename = "detail-type")]
    pub detail_type: String,
    pub detail: LifecycleDetail,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleDetail {
    #[serde(rename = "EC2InstanceId")]
    pub instance_id: String,
    pub lifecycle_hook_name: String,
    pub auto_scaling_group_name: String,
    #[serde(default)]
    pub lifecycle_action_token: Option<String>,
    pub lifecycle_transition: LifecycleTransition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum LifecycleTransition {
    #[serde(rename = "autoscaling:EC2_INSTANCE_LAUNCHING")]
    Launching,
    #[serde(rename = "autoscaling:EC2_INSTANCE_TERMINATING")]
    Terminating,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "Records")]
    pub records: Vec<StreamRecord>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    #[serde(rename = "eventID", default)]
    pub event_id: Option<String>,
    pub event_name: ChangeKind,
    pub dynamodb: StreamChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Modify,
    Remove,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamChange {
    #[serde(default)]
    pub keys: HashMap<String, AttributeValue>,
    #[serde(default)]
    pub new_image: Option<HashMap<String, AttributeValue>>,
    #[serde(default)]
    pub old_image: Option<HashMap<String, AttributeValue>>,
    #[serde(default)]
    pub sequence_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceEvent {
    pub request_type: RequestType,
    #[serde(default)]
    pub resource_properties: ResourceProperties,
    #[serde(default)]
    pub physical_resource_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

/// Optional overrides of the seeded profile.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceProperties {
    #[serde(default)]
    pub application_name: Option<String>,
    #[serde(default)]
    pub application_type: Option<String>,
}

/// What the function returns to its invoker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileOutput {
    pub message: String,
    #[serde(rename = "PhysicalResourceId", skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
}

impl ReconcileOutput {
    pub fn message(message: impl Into<String>) -> Self {
        ReconcileOutput {
            message: message.into(),
            physical_resource_id: None,
        }
    }
}
