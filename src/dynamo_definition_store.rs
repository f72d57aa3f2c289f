use std::collections::HashMap;

use async_trait::async_trait;
use rusoto_core::RusotoError;
use rusoto_dynamodb::{
    AttributeValue, DynamoDb, DynamoDbClient, GetItemInput, PutItemError, PutItemInput,
};
use tracing::{debug, info};

use crate::definition::{Profile, ALARMS_KEY, NAME_KEY};
use crate::error::ReconcilerError;

pub type Item = HashMap<String, AttributeValue>;

#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// The profile's item, read consistently; `None` if the profile has none.
    async fn get_definitions(&self, profile: &Profile) -> Result<Option<Item>, ReconcilerError>;

    /// Writes the profile's item unless the profile already has one.
    ///
    /// Returns `false` when an item was already present and left unchanged.
    async fn insert_definitions(&self, item: Item) -> Result<bool, ReconcilerError>;
}

pub struct DynamoDefinitionStore {
    client: DynamoDbClient,
    table_name: String,
}

impl DynamoDefinitionStore {
    pub fn new_with_client(client: DynamoDbClient, table_name: impl Into<String>) -> Self {
        DynamoDefinitionStore {
            client,
            table_name: table_name.into(),
        }
    }
}

#[async_trait]
impl DefinitionStore for DynamoDefinitionStore {
    async fn get_definitions(&self, profile: &Profile) -> Result<Option<Item>, ReconcilerError> {
        let output = self
            .client
            .get_item(GetItemInput {
                table_name: self.table_name.clone(),
                key: profile.key(),
                consistent_read: Some(true),
                ..Default::default()
            })
            .await?;
        debug!(%profile, found = output.item.is_some(), "read definitions");
        Ok(output.item)
    }

    async fn insert_definitions(&self, item: Item) -> Result<bool, ReconcilerError> {
        let alarms = item
            .get(ALARMS_KEY)
            .and_then(|alarms| alarms.m.as_ref())
            .map_or(0, HashMap::len);
        let result = self
            .client
            .put_item(PutItemInput {
                table_name: self.table_name.clone(),
                item,
                condition_expression: Some("attribute_not_exists(#name)".to_string()),
                expression_attribute_names: Some(
                    vec![("#name".to_string(), NAME_KEY.to_string())]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            })
            .await;
        match result {
            Ok(_) => {
                info!(table = %self.table_name, alarms, "wrote definitions");
                Ok(true)
            }
            Err(RusotoError::Service(PutItemError::ConditionalCheckFailed(_))) => {
                info!(table = %self.table_name, "definitions already present, left unchanged");
                Ok(false)
            }
            Err(error) => Err(error.into()),
        }
    }
}
