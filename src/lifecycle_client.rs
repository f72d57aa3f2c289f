use async_trait::async_trait;
use rusoto_autoscaling::{Autoscaling, AutoscalingClient, CompleteLifecycleActionType};
use tracing::{info, warn};

use crate::error::{unmodelled_error_text, ReconcilerError};
use crate::event::LifecycleDetail;

/// Returned by Auto Scaling when the action was already completed or expired.
const NO_ACTIVE_ACTION: &str = "No active Lifecycle Action found";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleActionResult {
    Continue,
    Abandon,
}

impl LifecycleActionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleActionResult::Continue => "CONTINUE",
            LifecycleActionResult::Abandon => "ABANDON",
        }
    }
}

#[async_trait]
pub trait LifecycleActions: Send + Sync {
    async fn complete(
        &self,
        detail: &LifecycleDetail,
        result: LifecycleActionResult,
    ) -> Result<(), ReconcilerError>;
}

pub struct AutoscalingLifecycleClient {
    client: AutoscalingClient,
}

impl AutoscalingLifecycleClient {
    pub fn new_with_client(client: AutoscalingClient) -> Self {
        AutoscalingLifecycleClient { client }
    }
}

fn complete_lifecycle_action_input(
    detail: &LifecycleDetail,
    result: LifecycleActionResult,
) -> CompleteLifecycleActionType {
    CompleteLifecycleActionType {
        auto_scaling_group_name: detail.auto_scaling_group_name.clone(),
        lifecycle_hook_name: detail.lifecycle_hook_name.clone(),
        lifecycle_action_token: detail.lifecycle_action_token.clone(),
        instance_id: Some(detail.instance_id.clone()),
        lifecycle_action_result: result.as_str().to_string(),
    }
}

#[async_trait]
impl LifecycleActions for AutoscalingLifecycleClient {
    async fn complete(
        &self,
        detail: &LifecycleDetail,
        result: LifecycleActionResult,
    ) -> Result<(), ReconcilerError> {
        match self
            .client
            .complete_lifecycle_action(complete_lifecycle_action_input(detail, result))
            .await
        {
            Ok(_) => {
                info!(
                    instance_id = %detail.instance_id,
                    result = result.as_str(),
                    "completed lifecycle action"
                );
                Ok(())
            }
            Err(error) => {
                let already_completed = unmodelled_error_text(&error)
                    .map_or(false, |text| text.contains(NO_ACTIVE_ACTION));
                if already_completed {
                    warn!(
                        instance_id = %detail.instance_id,
                        "lifecycle action already completed"
                    );
                    return Ok(());
                }
                Err(error.into())
            }
        }
    }
}
