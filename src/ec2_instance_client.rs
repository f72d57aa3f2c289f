use std::collections::HashMap;

use async_trait::async_trait;
use rusoto_ec2::{DescribeInstancesRequest, Ec2, Ec2Client};
use tracing::warn;

use crate::error::{unmodelled_error_text, ReconcilerError};

const INSTANCE_NOT_FOUND: &str = "InvalidInstanceID.NotFound";

pub struct Ec2InstanceClient {
    client: Ec2Client,
}

#[async_trait]
pub trait DescribeTags: Send + Sync {
    /// Tags of the instance; empty when EC2 no longer knows the instance.
    async fn instance_tags(&self, instance_id: &str)
        -> Result<HashMap<String, String>, ReconcilerError>;
}

#[async_trait]
impl DescribeTags for Ec2InstanceClient {
    async fn instance_tags(
        &self,
        instance_id: &str,
    ) -> Result<HashMap<String, String>, ReconcilerError> {
        let request = DescribeInstancesRequest {
            instance_ids: Some(vec![instance_id.to_string()]),
            ..DescribeInstancesRequest::default()
        };

        let result = match self.client.describe_instances(request).await {
            Ok(result) => result,
            Err(error) => {
                let not_found = unmodelled_error_text(&error)
                    .map_or(false, |text| text.contains(INSTANCE_NOT_FOUND));
                if not_found {
                    warn!(instance_id, "instance not found");
                    return Ok(HashMap::new());
                }
                return Err(error.into());
            }
        };

        let mut tags = HashMap::new();
        for reservation in result.reservations.unwrap_or_default() {
            for instance in reservation.instances.unwrap_or_default() {
                if instance.instance_id.as_deref() != Some(instance_id) {
                    continue;
                }
                for tag in instance.tags.unwrap_or_default() {
                    if let Some(key) = tag.key {
                        tags.insert(key, tag.value.unwrap_or_default());
                    }
                }
            }
        }
        Ok(tags)
    }
}

impl Ec2InstanceClient {
    pub fn new_with_client(client: Ec2Client) -> Self {
        Ec2InstanceClient { client }
    }
}
