use labelme_atoms::labels::LabelRecord;
use std::collections::HashMap;

use crate::layout::name_suffix;
use crate::types::RawImage;

/// Maps raw images to the label record produced from them.
///
/// Records carrying a `source_id` are matched on it exactly. Older records
/// without one fall back to comparing the part of the name after the first `_`.
#[derive(Debug, Default, Clone)]
pub struct LabelIndex {
    by_source: HashMap<String, LabelRecord>,
    by_suffix: HashMap<String, LabelRecord>,
}

impl LabelIndex {
    pub fn from_records(records: impl IntoIterator<Item = LabelRecord>) -> Self {
        let mut index = Self::default();
        for record in records {
            index.insert(record);
        }
        index
    }

    pub fn insert(&mut self, record: LabelRecord) {
        if record.label.trim().is_empty() {
            return;
        }
        match record.source_id.clone() {
            Some(id) => {
                self.by_source.insert(id, record);
            }
            None => {
                let suffix = name_suffix(&record.name).to_string();
                self.by_suffix.insert(suffix, record);
            }
        }
    }

    /// Drops the record with the given labeled-image name, if indexed.
    pub fn remove(&mut self, name: &str) -> Option<LabelRecord> {
        let source_key = self
            .by_source
            .iter()
            .find(|(_, r)| r.name == name)
            .map(|(k, _)| k.clone());
        if let Some(key) = source_key {
            return self.by_source.remove(&key);
        }
        let suffix_key = self
            .by_suffix
            .iter()
            .find(|(_, r)| r.name == name)
            .map(|(k, _)| k.clone());
        suffix_key.and_then(|key| self.by_suffix.remove(&key))
    }

    pub fn lookup(&self, image: &RawImage) -> Option<&LabelRecord> {
        self.by_source
            .get(&image.source_id)
            .or_else(|| self.by_suffix.get(image.original_name()))
    }

    pub fn len(&self) -> usize {
        self.by_source.len() + self.by_suffix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
