
use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client as DynamoClient;
use std::collections::HashMap;

use super::model::{CropRegion, LabelRecord, LabelStatus};
use crate::error::{StoreError, StoreResult};

/// Label documents, one collection per dataset, keyed by labeled image name.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Upserts `record`. With `expected_version` the write only succeeds when the
    /// stored version matches (a missing document counts as version 0).
    /// Returns the version now stored.
    async fn put(
        &self,
        dataset: &str,
        record: &LabelRecord,
        expected_version: Option<u64>,
    ) -> StoreResult<u64>;

    async fn get(&self, dataset: &str, name: &str) -> StoreResult<Option<LabelRecord>>;

    async fn list(&self, dataset: &str) -> StoreResult<Vec<LabelRecord>>;

    async fn delete(&self, dataset: &str, name: &str) -> StoreResult<()>;
}

/// DynamoDB-backed record store:
/// PK = "DATASET#{dataset}"
/// SK = "LABEL#{name}"
pub struct DynamoRecordStore {
    client: DynamoClient,
    table_name: String,
}

impl DynamoRecordStore {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

fn dataset_pk(dataset: &str) -> String {
    format!("DATASET#{}", dataset)
}

fn label_sk(name: &str) -> String {
    format!("LABEL#{}", name)
}

fn region_to_attr(region: Option<&CropRegion>) -> AttributeValue {
    match region {
        Some(r) => AttributeValue::M(HashMap::from([
            ("x".to_string(), AttributeValue::N(r.x.to_string())),
            ("y".to_string(), AttributeValue::N(r.y.to_string())),
            ("width".to_string(), AttributeValue::N(r.width.to_string())),
            ("height".to_string(), AttributeValue::N(r.height.to_string())),
        ])),
        None => AttributeValue::Null(true),
    }
}

fn region_from_attr(value: Option<&AttributeValue>) -> Option<CropRegion> {
    let map = value?.as_m().ok()?;
    let num = |key: &str| -> Option<f64> {
        map.get(key)
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse().ok())
    };
    Some(CropRegion::rounded(num("x")?, num("y")?, num("width")?, num("height")?))
}

fn record_from_item(dataset: &str, item: &HashMap<String, AttributeValue>) -> Option<LabelRecord> {
    let name = item
        .get("SK")
        .and_then(|v| v.as_s().ok())
        .and_then(|sk| sk.strip_prefix("LABEL#"))?
        .to_string();
    let string = |key: &str| {
        item.get(key)
            .and_then(|v| v.as_s().ok())
            .map(|s| s.to_string())
            .unwrap_or_default()
    };

    Some(LabelRecord {
        name,
        url: string("url"),
        label: string("label"),
        coordinates: region_from_attr(item.get("coordinates")),
        dataset: item
            .get("dataset")
            .and_then(|v| v.as_s().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| dataset.to_string()),
        status: LabelStatus::parse(&string("status")),
        timestamp: string("timestamp"),
        labeled_by: string("labeled_by"),
        image_path: string("image_path"),
        source_id: item
            .get("source_id")
            .and_then(|v| v.as_s().ok())
            .map(|s| s.to_string()),
        version: item
            .get("version")
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse().ok())
            .unwrap_or(0),
    })
}

#[async_trait]
impl RecordStore for DynamoRecordStore {
    async fn put(
        &self,
        dataset: &str,
        record: &LabelRecord,
        expected_version: Option<u64>,
    ) -> StoreResult<u64> {
        let mut update_expr = vec![];
        let mut expr_names = HashMap::new();
        let mut expr_values = HashMap::new();

        let mut set = |attr: &str, value: AttributeValue| {
            update_expr.push(format!("#{attr} = :{attr}"));
            expr_names.insert(format!("#{attr}"), attr.to_string());
            expr_values.insert(format!(":{attr}"), value);
        };

        set("url", AttributeValue::S(record.url.clone()));
        set("label", AttributeValue::S(record.label.clone()));
        set("coordinates", region_to_attr(record.coordinates.as_ref()));
        set("dataset", AttributeValue::S(dataset.to_string()));
        set("status", AttributeValue::S(record.status.as_str().to_string()));
        set("timestamp", AttributeValue::S(record.timestamp.clone()));
        set("labeled_by", AttributeValue::S(record.labeled_by.clone()));
        set("image_path", AttributeValue::S(record.image_path.clone()));
        if let Some(source_id) = &record.source_id {
            set("source_id", AttributeValue::S(source_id.clone()));
        }

        expr_names.insert("#version".to_string(), "version".to_string());
        expr_values.insert(":one".to_string(), AttributeValue::N("1".to_string()));

        let mut builder = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(dataset_pk(dataset)))
            .key("SK", AttributeValue::S(label_sk(&record.name)))
            .update_expression(format!("SET {} ADD #version :one", update_expr.join(", ")))
            .return_values(ReturnValue::UpdatedNew);

        if let Some(expected) = expected_version {
            // A document that was never written has no version attribute.
            let condition = if expected == 0 {
                "attribute_not_exists(#version) OR #version = :expected"
            } else {
                "#version = :expected"
            };
            builder = builder.condition_expression(condition);
            expr_values.insert(":expected".to_string(), AttributeValue::N(expected.to_string()));
        }

        for (k, v) in expr_names {
            builder = builder.expression_attribute_names(k, v);
        }

        for (k, v) in expr_values {
            builder = builder.expression_attribute_values(k, v);
        }

        match builder.send().await {
            Ok(output) => Ok(output
                .attributes()
                .and_then(|attrs| attrs.get("version"))
                .and_then(|v| v.as_n().ok())
                .and_then(|n| n.parse().ok())
                .unwrap_or(1)),
            Err(e) => {
                let conditional = e
                    .as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false);
                if conditional {
                    let found = self
                        .get(dataset, &record.name)
                        .await?
                        .map(|r| r.version)
                        .unwrap_or(0);
                    tracing::warn!(
                        "⚠️ Version conflict on label {} in {}: expected {:?}, found {}",
                        record.name,
                        dataset,
                        expected_version,
                        found
                    );
                    Err(StoreError::Conflict {
                        id: record.name.clone(),
                        expected: expected_version.unwrap_or(0),
                        found,
                    })
                } else {
                    Err(StoreError::backend("DynamoDB update_item", DisplayErrorContext(e)))
                }
            }
        }
    }

    async fn get(&self, dataset: &str, name: &str) -> StoreResult<Option<LabelRecord>> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(dataset_pk(dataset)))
            .key("SK", AttributeValue::S(label_sk(name)))
            .send()
            .await
            .map_err(|e| StoreError::backend("DynamoDB get_item", DisplayErrorContext(e)))?;

        Ok(result.item().and_then(|item| record_from_item(dataset, item)))
    }

    async fn list(&self, dataset: &str) -> StoreResult<Vec<LabelRecord>> {
        let mut records = Vec::new();
        let mut start_key: Option<HashMap<String, AttributeValue>> = None;

        loop {
            let result = self
                .client
                .query()
                .table_name(&self.table_name)
                .key_condition_expression("PK = :pk AND begins_with(SK, :sk_prefix)")
                .expression_attribute_values(":pk", AttributeValue::S(dataset_pk(dataset)))
                .expression_attribute_values(":sk_prefix", AttributeValue::S("LABEL#".to_string()))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| StoreError::backend("DynamoDB query", DisplayErrorContext(e)))?;

            for item in result.items() {
                if let Some(record) = record_from_item(dataset, item) {
                    records.push(record);
                }
            }

            match result.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        Ok(records)
    }

    async fn delete(&self, dataset: &str, name: &str) -> StoreResult<()> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(dataset_pk(dataset)))
            .key("SK", AttributeValue::S(label_sk(name)))
            .send()
            .await
            .map_err(|e| StoreError::backend("DynamoDB delete_item", DisplayErrorContext(e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn item_maps_to_record() {
        let item = HashMap::from([
            ("PK".to_string(), AttributeValue::S("DATASET#cats".to_string())),
            ("SK".to_string(), AttributeValue::S("LABEL#abc_tabby.jpg".to_string())),
            ("url".to_string(), AttributeValue::S("https://cdn/x".to_string())),
            ("label".to_string(), AttributeValue::S("tabby".to_string())),
            ("status".to_string(), AttributeValue::S("labeled".to_string())),
            ("labeled_by".to_string(), AttributeValue::S("ann@example.com".to_string())),
            ("coordinates".to_string(), region_to_attr(Some(&CropRegion::new(1, 2, 3, 4)))),
            ("version".to_string(), AttributeValue::N("3".to_string())),
        ]);

        let record = record_from_item("cats", &item).expect("record");
        assert_eq!(record.name, "abc_tabby.jpg");
        assert_eq!(record.dataset, "cats");
        assert_eq!(record.status, LabelStatus::Labeled);
        assert_eq!(record.coordinates, Some(CropRegion::new(1, 2, 3, 4)));
        assert_eq!(record.version, 3);
        assert_eq!(record.source_id, None);
    }

    #[test]
    fn null_coordinates_read_as_none() {
        assert_eq!(region_from_attr(Some(&region_to_attr(None))), None);
        assert_eq!(region_from_attr(None), None);
    }

    #[test]
    fn items_without_label_sort_key_are_skipped() {
        let item = HashMap::from([("SK".to_string(), AttributeValue::S("CLIENT_STATE".to_string()))]);
        assert!(record_from_item("cats", &item).is_none());
    }
}
