use std::collections::HashMap;

use crate::metadata::EntityMetadata;

/// Access to entity metadata. Lookups are by exact lowercased logical
/// name; the provider owns its own caching and concurrency.
pub trait MetadataProvider {
    fn entity(&self, logical_name: &str) -> Option<&EntityMetadata>;
}

/// In-memory provider used by tests and embedders that preload metadata.
#[derive(Debug, Default)]
pub struct StaticMetadata {
    by_name: HashMap<String, EntityMetadata>,
}

impl StaticMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, meta: EntityMetadata) -> Self {
        self.by_name.insert(meta.logical_name.to_lowercase(), meta);
        self
    }
}

impl MetadataProvider for StaticMetadata {
    fn entity(&self, logical_name: &str) -> Option<&EntityMetadata> {
        self.by_name.get(&logical_name.to_lowercase())
    }
}
