//! Registry of retriever chain definitions

use super::ChangeTracker;
use crate::components::{DataRetrieverChainDefinition, DataRetrieverChainDefinitionDto};
use crate::types::TypeTag;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Registered retriever chains, keyed by id
///
/// Lookups by type compare type names exactly.
#[derive(Debug, Default)]
pub struct DataRetrieverChainDefinitionRegistry {
    chains: RwLock<Arc<HashMap<Uuid, DataRetrieverChainDefinition>>>,
    changes: ChangeTracker,
}

impl DataRetrieverChainDefinitionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a chain; returns whether the registry changed
    pub fn register(&self, chain: DataRetrieverChainDefinition) -> bool {
        let mut guard = self.chains.write();
        if guard.contains_key(&chain.id()) {
            return false;
        }
        let mut chains = HashMap::clone(&guard);
        chains.insert(chain.id(), chain);
        *guard = Arc::new(chains);
        self.changes.touch_if(true)
    }

    /// Unregister a chain; returns whether the registry changed
    pub fn unregister(&self, chain: &DataRetrieverChainDefinition) -> bool {
        let mut guard = self.chains.write();
        if !guard.contains_key(&chain.id()) {
            return false;
        }
        let mut chains = HashMap::clone(&guard);
        chains.remove(&chain.id());
        *guard = Arc::new(chains);
        self.changes.touch_if(true)
    }

    /// Chain with the given id
    pub fn get(&self, id: Uuid) -> Option<DataRetrieverChainDefinition> {
        self.chains.read().get(&id).cloned()
    }

    /// Resolve a wire-level description by its id
    pub fn get_for_dto(
        &self,
        dto: &DataRetrieverChainDefinitionDto,
    ) -> Option<DataRetrieverChainDefinition> {
        self.get(dto.id)
    }

    /// Chains starting from `data_source_type`
    pub fn chains_for(&self, data_source_type: &TypeTag) -> Vec<DataRetrieverChainDefinition> {
        self.filtered(|chain| chain.data_source_type() == data_source_type)
    }

    /// Chains starting from `data_source_type` and retrieving `retrieved_data_type`
    pub fn chains_for_types(
        &self,
        data_source_type: &TypeTag,
        retrieved_data_type: &TypeTag,
    ) -> Vec<DataRetrieverChainDefinition> {
        self.filtered(|chain| {
            chain.data_source_type() == data_source_type
                && chain.retrieved_data_type() == retrieved_data_type
        })
    }

    /// All registered chains
    pub fn all(&self) -> Vec<DataRetrieverChainDefinition> {
        self.filtered(|_| true)
    }

    /// Timestamp of the last effective change
    pub fn components_changed_at(&self) -> DateTime<Utc> {
        self.changes.changed_at()
    }

    fn filtered(
        &self,
        predicate: impl Fn(&DataRetrieverChainDefinition) -> bool,
    ) -> Vec<DataRetrieverChainDefinition> {
        let snapshot = Arc::clone(&self.chains.read());
        let mut chains: Vec<_> = snapshot.values().filter(|c| predicate(c)).cloned().collect();
        chains.sort_by(|a, b| a.name().cmp(b.name()));
        chains
    }
}
