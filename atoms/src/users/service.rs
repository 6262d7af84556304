use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;

use super::model::{ClientState, User};
use crate::error::{StoreError, StoreResult};

/// Durable per-user client state (logged-in user, last selected dataset).
#[async_trait]
pub trait ClientStateStore: Send + Sync {
    async fn load(&self, email: &str) -> StoreResult<Option<ClientState>>;

    async fn save(&self, state: &ClientState) -> StoreResult<()>;

    async fn clear(&self, email: &str) -> StoreResult<()>;
}

/// Stored with PK=USER#{email}, SK=CLIENT_STATE
pub struct DynamoClientStateStore {
    client: DynamoClient,
    table_name: String,
}

impl DynamoClientStateStore {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

const STATE_SK: &str = "CLIENT_STATE";

fn user_pk(email: &str) -> String {
    format!("USER#{}", email.to_lowercase())
}

#[async_trait]
impl ClientStateStore for DynamoClientStateStore {
    async fn load(&self, email: &str) -> StoreResult<Option<ClientState>> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(user_pk(email)))
            .key("SK", AttributeValue::S(STATE_SK.to_string()))
            .send()
            .await
            .map_err(|e| StoreError::backend("DynamoDB get_item", DisplayErrorContext(e)))?;

        Ok(result.item().map(|item| {
            let user_email = item
                .get("user_email")
                .and_then(|v| v.as_s().ok())
                .map(|s| s.to_string())
                .unwrap_or_else(|| email.to_string());
            let mut user_name = item
                .get("user_name")
                .and_then(|v| v.as_s().ok())
                .map(|s| s.to_string())
                .unwrap_or_default();
            if user_name.trim().is_empty() {
                user_name = user_email.split('@').next().unwrap_or("User").to_string();
            }

            ClientState {
                user: User {
                    name: user_name,
                    email: user_email,
                },
                selected_dataset: item
                    .get("selected_dataset")
                    .and_then(|v| v.as_s().ok())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string()),
            }
        }))
    }

    async fn save(&self, state: &ClientState) -> StoreResult<()> {
        let mut put_request = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .item("PK", AttributeValue::S(user_pk(&state.user.email)))
            .item("SK", AttributeValue::S(STATE_SK.to_string()))
            .item("user_name", AttributeValue::S(state.user.name.clone()))
            .item("user_email", AttributeValue::S(state.user.email.clone()))
            .item("updated_at", AttributeValue::S(chrono::Utc::now().to_rfc3339()));

        if let Some(dataset) = &state.selected_dataset {
            put_request = put_request.item("selected_dataset", AttributeValue::S(dataset.clone()));
        }

        put_request
            .send()
            .await
            .map_err(|e| StoreError::backend("DynamoDB put_item", DisplayErrorContext(e)))?;

        Ok(())
    }

    async fn clear(&self, email: &str) -> StoreResult<()> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(user_pk(email)))
            .key("SK", AttributeValue::S(STATE_SK.to_string()))
            .send()
            .await
            .map_err(|e| StoreError::backend("DynamoDB delete_item", DisplayErrorContext(e)))?;

        Ok(())
    }
}
