pub mod auth;
pub mod config;

use std::sync::Arc;

use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::Client as S3Client;
use labeling_block::{LabelingContext, RetryPolicy, StoreLayout};
use labelme_atoms::labels::{DynamoRecordStore, RecordStore};
use labelme_atoms::media::{ObjectStore, S3ObjectStore};
use labelme_atoms::memory::{MemoryClientStateStore, MemoryObjectStore, MemoryRecordStore};
use labelme_atoms::users::{ClientStateStore, DynamoClientStateStore};

pub use config::{Config, ConfigError};

/// Stores and settings shared by every request of a Lambda instance.
pub struct AppState {
    pub objects: Arc<dyn ObjectStore>,
    pub records: Arc<dyn RecordStore>,
    pub client_state: Arc<dyn ClientStateStore>,
    pub layout: StoreLayout,
    pub retry: RetryPolicy,
    pub config: Config,
}

impl AppState {
    /// Builds S3 and DynamoDB backed stores from the ambient AWS configuration.
    pub async fn from_config(config: Config) -> Self {
        let aws = aws_config::load_from_env().await;
        let s3 = S3Client::new(&aws);
        let dynamo = DynamoClient::new(&aws);

        tracing::info!(
            "⚙️ Using bucket {} and table {}",
            config.bucket_name,
            config.table_name
        );

        Self {
            objects: Arc::new(S3ObjectStore::new(
                s3,
                config.bucket_name.clone(),
                config.public_base_url.clone(),
                config.url_expiry,
            )),
            records: Arc::new(DynamoRecordStore::new(dynamo.clone(), config.table_name.clone())),
            client_state: Arc::new(DynamoClientStateStore::new(dynamo, config.table_name.clone())),
            layout: config.layout(),
            retry: config.retry(),
            config,
        }
    }

    /// Same wiring over in-memory stores, for local runs and tests.
    pub fn in_memory(config: Config) -> Self {
        Self {
            objects: Arc::new(MemoryObjectStore::new()),
            records: Arc::new(MemoryRecordStore::new()),
            client_state: Arc::new(MemoryClientStateStore::new()),
            layout: config.layout(),
            retry: config.retry(),
            config,
        }
    }

    pub fn context(&self) -> LabelingContext<'_> {
        LabelingContext::new(
            self.objects.as_ref(),
            self.records.as_ref(),
            &self.layout,
            self.retry,
        )
    }
}
