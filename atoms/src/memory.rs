//! In-memory stores for local runs and tests.
//!
//! They follow the same contracts as the S3/DynamoDB implementations and can be
//! told to fail specific calls so partial-failure paths can be exercised.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::labels::model::LabelRecord;
use crate::labels::service::RecordStore;
use crate::media::model::{file_name, Listing, ObjectInfo, ObjectMetadata, ObjectSummary, PrefixEntry};
use crate::media::service::{folder_prefix, ObjectStore};
use crate::users::model::ClientState;
use crate::users::service::ClientStateStore;

/// Object store call that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOp {
    Put,
    Get,
    Delete,
    List,
    Metadata,
    UpdateMetadata,
}

#[derive(Debug, Clone)]
struct FailRule {
    op: FailOp,
    path_contains: String,
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    metadata: ObjectMetadata,
    last_modified: DateTime<Utc>,
}

#[derive(Default)]
struct ObjectsState {
    objects: BTreeMap<String, StoredObject>,
    last_tick: Option<DateTime<Utc>>,
    rules: Vec<FailRule>,
}

impl ObjectsState {
    // Strictly increasing so "last modified" ordering is deterministic.
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.last_tick {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last_tick = Some(next);
        next
    }

    fn check(&self, op: FailOp, path: &str) -> StoreResult<()> {
        if self
            .rules
            .iter()
            .any(|r| r.op == op && path.contains(&r.path_contains))
        {
            return Err(StoreError::Backend(format!("injected {:?} failure for {}", op, path)));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryObjectStore {
    state: RwLock<ObjectsState>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `op` call whose path contains `path_contains` fail.
    pub async fn fail_when(&self, op: FailOp, path_contains: &str) {
        self.state.write().await.rules.push(FailRule {
            op,
            path_contains: path_contains.to_string(),
        });
    }

    pub async fn clear_failures(&self) {
        self.state.write().await.rules.clear();
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.state.read().await.objects.contains_key(path)
    }

    pub async fn paths(&self) -> Vec<String> {
        self.state.read().await.objects.keys().cloned().collect()
    }

    /// Overrides the last-modified time of an existing object.
    pub async fn touch(&self, path: &str, when: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let object = state
            .objects
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        object.last_modified = when;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, path: &str, bytes: Vec<u8>, metadata: ObjectMetadata) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.check(FailOp::Put, path)?;
        let last_modified = state.tick();
        state.objects.insert(
            path.to_string(),
            StoredObject {
                bytes,
                metadata,
                last_modified,
            },
        );
        Ok(())
    }

    async fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        let state = self.state.read().await;
        state.check(FailOp::Get, path)?;
        state
            .objects
            .get(path)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn url(&self, path: &str) -> StoreResult<String> {
        Ok(format!("memory://{}", path))
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.check(FailOp::Delete, path)?;
        state.objects.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StoreResult<Listing> {
        let state = self.state.read().await;
        let folder = folder_prefix(prefix);
        state.check(FailOp::List, &folder)?;

        let mut listing = Listing::default();
        let mut seen = BTreeSet::new();

        for (path, object) in state.objects.range(folder.clone()..) {
            let Some(rest) = path.strip_prefix(&folder) else {
                break;
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    if seen.insert(child.to_string()) {
                        listing.prefixes.push(PrefixEntry {
                            name: child.to_string(),
                            path: format!("{}{}", folder, child),
                        });
                    }
                }
                None => listing.objects.push(ObjectSummary {
                    path: path.clone(),
                    name: rest.to_string(),
                    last_modified: Some(object.last_modified),
                }),
            }
        }

        Ok(listing)
    }

    async fn metadata(&self, path: &str) -> StoreResult<ObjectInfo> {
        let state = self.state.read().await;
        state.check(FailOp::Metadata, path)?;
        let object = state
            .objects
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;

        Ok(ObjectInfo {
            path: path.to_string(),
            name: file_name(path).to_string(),
            content_type: object.metadata.content_type.clone(),
            custom: object.metadata.custom.clone(),
            last_modified: object.last_modified,
        })
    }

    async fn update_metadata(&self, path: &str, metadata: ObjectMetadata) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.check(FailOp::UpdateMetadata, path)?;
        let last_modified = state.tick();
        let object = state
            .objects
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        object.metadata = metadata;
        object.last_modified = last_modified;
        Ok(())
    }
}

#[derive(Default)]
struct RecordsState {
    records: BTreeMap<(String, String), LabelRecord>,
    failing_puts: u32,
}

#[derive(Default)]
pub struct MemoryRecordStore {
    state: RwLock<RecordsState>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` puts fail with a backend error.
    pub async fn fail_next_puts(&self, count: u32) {
        self.state.write().await.failing_puts = count;
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put(
        &self,
        dataset: &str,
        record: &LabelRecord,
        expected_version: Option<u64>,
    ) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        if state.failing_puts > 0 {
            state.failing_puts -= 1;
            return Err(StoreError::Backend(format!("injected put failure for {}", record.name)));
        }

        let key = (dataset.to_string(), record.name.clone());
        let current = state.records.get(&key).map(|r| r.version).unwrap_or(0);
        if let Some(expected) = expected_version {
            if expected != current {
                return Err(StoreError::Conflict {
                    id: record.name.clone(),
                    expected,
                    found: current,
                });
            }
        }

        let mut stored = record.clone();
        stored.dataset = dataset.to_string();
        stored.version = current + 1;
        state.records.insert(key, stored);
        Ok(current + 1)
    }

    async fn get(&self, dataset: &str, name: &str) -> StoreResult<Option<LabelRecord>> {
        let state = self.state.read().await;
        Ok(state
            .records
            .get(&(dataset.to_string(), name.to_string()))
            .cloned())
    }

    async fn list(&self, dataset: &str) -> StoreResult<Vec<LabelRecord>> {
        let state = self.state.read().await;
        Ok(state
            .records
            .iter()
            .filter(|((ds, _), _)| ds == dataset)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn delete(&self, dataset: &str, name: &str) -> StoreResult<()> {
        self.state
            .write()
            .await
            .records
            .remove(&(dataset.to_string(), name.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryClientStateStore {
    states: RwLock<HashMap<String, ClientState>>,
}

impl MemoryClientStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClientStateStore for MemoryClientStateStore {
    async fn load(&self, email: &str) -> StoreResult<Option<ClientState>> {
        Ok(self.states.read().await.get(&email.to_lowercase()).cloned())
    }

    async fn save(&self, state: &ClientState) -> StoreResult<()> {
        self.states
            .write()
            .await
            .insert(state.user.email.to_lowercase(), state.clone());
        Ok(())
    }

    async fn clear(&self, email: &str) -> StoreResult<()> {
        self.states.write().await.remove(&email.to_lowercase());
        Ok(())
    }
}
