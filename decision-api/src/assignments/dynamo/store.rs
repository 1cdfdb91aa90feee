use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as AwsDynamoSdkClient;
use tracing::warn;

use crate::assignments::AssignmentsError;

/// The attribute value kinds assignments use: strings for variation groups, a number for the
/// expiry date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    S(String),
    N(String),
}

pub type Item = HashMap<String, AttrValue>;

/// A single `UpdateItem` call. Attribute names and values are always bound through
/// placeholders, so group IDs never end up inside the expression text.
#[derive(Debug, Clone, Default)]
pub struct ItemUpdate {
    pub key: String,
    pub update_expression: String,
    pub names: HashMap<String, String>,
    pub values: HashMap<String, AttrValue>,
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    /// The item stored under `key`, without its primary key attribute. `Ok(None)` when absent.
    async fn get_item(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<Item>, AssignmentsError>;

    async fn update_item(&self, update: ItemUpdate) -> Result<(), AssignmentsError>;
}

pub struct DynamoItemStore {
    client: AwsDynamoSdkClient,
    table_name: String,
    pk_field: String,
}

impl DynamoItemStore {
    pub fn new(client: AwsDynamoSdkClient, table_name: &str, pk_field: &str) -> Self {
        Self {
            client,
            table_name: table_name.to_string(),
            pk_field: pk_field.to_string(),
        }
    }

    /// Builds a client from the default AWS credential chain. `endpoint` points the client at a
    /// local DynamoDB instead of the regional service.
    pub async fn from_env(table_name: &str, pk_field: &str, endpoint: Option<&str>) -> Self {
        let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest());
        if let Some(endpoint) = endpoint {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }
        let aws_config = aws_config_builder.load().await;

        Self::new(AwsDynamoSdkClient::new(&aws_config), table_name, pk_field)
    }
}

fn to_sdk_value(value: AttrValue) -> AttributeValue {
    match value {
        AttrValue::S(s) => AttributeValue::S(s),
        AttrValue::N(n) => AttributeValue::N(n),
    }
}

#[async_trait]
impl ItemStore for DynamoItemStore {
    async fn get_item(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<Item>, AssignmentsError> {
        let request = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(&self.pk_field, AttributeValue::S(key.to_string()))
            .send();

        let output = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| AssignmentsError::Timeout)?
            .map_err(|e| AssignmentsError::Dynamo(format!("failed to get item: {e}")))?;

        let Some(raw) = output.item() else {
            return Ok(None);
        };

        let mut item = Item::with_capacity(raw.len());
        for (name, value) in raw {
            if name == &self.pk_field {
                continue;
            }
            match value {
                AttributeValue::S(s) => {
                    item.insert(name.clone(), AttrValue::S(s.clone()));
                }
                AttributeValue::N(n) => {
                    item.insert(name.clone(), AttrValue::N(n.clone()));
                }
                _ => warn!(attribute = %name, "ignoring attribute of unexpected type"),
            }
        }

        Ok(Some(item))
    }

    async fn update_item(&self, update: ItemUpdate) -> Result<(), AssignmentsError> {
        let values = update
            .values
            .into_iter()
            .map(|(placeholder, value)| (placeholder, to_sdk_value(value)))
            .collect();

        self.client
            .update_item()
            .table_name(&self.table_name)
            .key(&self.pk_field, AttributeValue::S(update.key))
            .update_expression(update.update_expression)
            .set_expression_attribute_names(Some(update.names))
            .set_expression_attribute_values(Some(values))
            .send()
            .await
            .map_err(|e| AssignmentsError::Dynamo(format!("failed to update item: {e}")))?;

        Ok(())
    }
}
