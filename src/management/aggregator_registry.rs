//! Registry of aggregation processor definitions
//!
//! Keyed by (extracted type, message key). [`AggregationProcessorDefinitionRegistry::get`]
//! matches the extracted type exactly, [`AggregationProcessorDefinitionRegistry::definitions_for`]
//! also returns aggregators declared on supertypes of the asked type.

use super::ChangeTracker;
use crate::components::{AggregationProcessorDefinition, AggregationProcessorDefinitionDto};
use crate::types::TypeTag;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

type AggregatorKey = (TypeTag, Arc<str>);

/// Registered aggregation processor definitions
#[derive(Debug, Default)]
pub struct AggregationProcessorDefinitionRegistry {
    definitions: RwLock<Arc<HashMap<AggregatorKey, AggregationProcessorDefinition>>>,
    changes: ChangeTracker,
}

fn key_of(definition: &AggregationProcessorDefinition) -> AggregatorKey {
    (
        definition.extracted_type().clone(),
        Arc::from(definition.message_key()),
    )
}

impl AggregationProcessorDefinitionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in aggregators
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for definition in AggregationProcessorDefinition::builtins() {
            registry.register(definition);
        }
        registry
    }

    /// Register a definition; returns whether the registry changed
    ///
    /// A different definition under an already registered key replaces it.
    pub fn register(&self, definition: AggregationProcessorDefinition) -> bool {
        let mut guard = self.definitions.write();
        let key = key_of(&definition);
        if guard.get(&key) == Some(&definition) {
            return false;
        }
        let mut definitions = HashMap::clone(&guard);
        definitions.insert(key, definition);
        *guard = Arc::new(definitions);
        self.changes.touch_if(true)
    }

    /// Unregister a definition; returns whether the registry changed
    pub fn unregister(&self, definition: &AggregationProcessorDefinition) -> bool {
        let mut guard = self.definitions.write();
        let key = key_of(definition);
        if guard.get(&key) != Some(definition) {
            return false;
        }
        let mut definitions = HashMap::clone(&guard);
        definitions.remove(&key);
        *guard = Arc::new(definitions);
        self.changes.touch_if(true)
    }

    /// Definition for exactly `extracted_type` and `message_key`
    pub fn get(
        &self,
        extracted_type: &TypeTag,
        message_key: &str,
    ) -> Option<AggregationProcessorDefinition> {
        let key = (extracted_type.clone(), Arc::from(message_key));
        self.definitions.read().get(&key).cloned()
    }

    /// Definitions that accept values of `extracted_type`
    pub fn definitions_for(&self, extracted_type: &TypeTag) -> Vec<AggregationProcessorDefinition> {
        let snapshot = Arc::clone(&self.definitions.read());
        let mut definitions: Vec<_> = snapshot
            .values()
            .filter(|d| extracted_type.is_assignable_to(d.extracted_type()))
            .cloned()
            .collect();
        definitions.sort_by(|a, b| a.message_key().cmp(b.message_key()));
        definitions
    }

    /// Resolve a wire-level identity
    pub fn get_for_dto(
        &self,
        dto: &AggregationProcessorDefinitionDto,
    ) -> Option<AggregationProcessorDefinition> {
        let snapshot = Arc::clone(&self.definitions.read());
        snapshot
            .values()
            .find(|d| {
                d.message_key() == dto.message_key
                    && d.extracted_type().name() == dto.extracted_type
                    && d.aggregated_type().name() == dto.aggregated_type
            })
            .cloned()
    }

    /// Timestamp of the last effective change
    pub fn components_changed_at(&self) -> DateTime<Utc> {
        self.changes.changed_at()
    }
}
