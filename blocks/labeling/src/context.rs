use labelme_atoms::labels::RecordStore;
use labelme_atoms::media::ObjectStore;
use labelme_atoms::StoreError;
use std::time::Duration;
use tokio::time::sleep;

use crate::layout::StoreLayout;

/// How label document writes are retried after the blob is already stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub document_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            document_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Everything a labeling operation needs: the two stores and where things live.
#[derive(Clone, Copy)]
pub struct LabelingContext<'a> {
    pub objects: &'a dyn ObjectStore,
    pub records: &'a dyn RecordStore,
    pub layout: &'a StoreLayout,
    pub retry: RetryPolicy,
}

impl<'a> LabelingContext<'a> {
    pub fn new(
        objects: &'a dyn ObjectStore,
        records: &'a dyn RecordStore,
        layout: &'a StoreLayout,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            objects,
            records,
            layout,
            retry,
        }
    }

    /// Writes a label document, retrying transient failures against the same id.
    pub async fn write_record(
        &self,
        dataset: &str,
        record: &labelme_atoms::labels::LabelRecord,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError> {
        let attempts = self.retry.document_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.records.put(dataset, record, expected_version).await {
                Ok(version) => return Ok(version),
                Err(e) if e.is_transient() && attempt < attempts => {
                    tracing::warn!(
                        "⚠️ Label document write failed for {} (attempt {}/{}): {}",
                        record.name,
                        attempt,
                        attempts,
                        e
                    );
                    sleep(self.retry.backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
