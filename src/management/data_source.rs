//! Data source providers
//!
//! A provider supplies the root object a retriever chain runs against. The
//! server keeps one provider per data source type.

use super::ChangeTracker;
use crate::types::{Element, TypeTag};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Supplies the data source of one type
pub trait DataSourceProvider: Send + Sync {
    /// Type of the supplied data source
    fn data_source_type(&self) -> TypeTag;

    /// Current data source
    fn data_source(&self) -> Element;
}

/// Provider returning the same element on every call
pub struct FixedDataSourceProvider {
    data_source: Element,
}

impl FixedDataSourceProvider {
    /// Create a provider for `data_source`
    pub fn new(data_source: Element) -> Self {
        Self { data_source }
    }
}

impl DataSourceProvider for FixedDataSourceProvider {
    fn data_source_type(&self) -> TypeTag {
        self.data_source.type_tag().clone()
    }

    fn data_source(&self) -> Element {
        self.data_source.clone()
    }
}

/// Registered data source providers, one per type
#[derive(Default)]
pub struct DataSourceProviderRegistry {
    providers: RwLock<Arc<HashMap<TypeTag, Arc<dyn DataSourceProvider>>>>,
    changes: ChangeTracker,
}

impl DataSourceProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for its data source type
    ///
    /// Replaces a different provider of the same type. Registering the same
    /// provider again does not change the registry.
    pub fn register(&self, provider: Arc<dyn DataSourceProvider>) -> bool {
        let mut guard = self.providers.write();
        let data_source_type = provider.data_source_type();
        if let Some(existing) = guard.get(&data_source_type) {
            if Arc::ptr_eq(existing, &provider) {
                return false;
            }
        }
        let mut providers = HashMap::clone(&guard);
        providers.insert(data_source_type, provider);
        *guard = Arc::new(providers);
        self.changes.touch_if(true)
    }

    /// Unregister a provider; returns whether the registry changed
    pub fn unregister(&self, provider: &Arc<dyn DataSourceProvider>) -> bool {
        let mut guard = self.providers.write();
        let data_source_type = provider.data_source_type();
        match guard.get(&data_source_type) {
            Some(existing) if Arc::ptr_eq(existing, provider) => {},
            _ => return false,
        }
        let mut providers = HashMap::clone(&guard);
        providers.remove(&data_source_type);
        *guard = Arc::new(providers);
        self.changes.touch_if(true)
    }

    /// Provider for exactly `data_source_type`
    pub fn get(&self, data_source_type: &TypeTag) -> Option<Arc<dyn DataSourceProvider>> {
        self.providers.read().get(data_source_type).cloned()
    }

    /// Types for which a provider is registered
    pub fn data_source_types(&self) -> Vec<TypeTag> {
        let mut types: Vec<_> = self.providers.read().keys().cloned().collect();
        types.sort_by(|a, b| a.name().cmp(b.name()));
        types
    }

    /// Timestamp of the last effective change
    pub fn components_changed_at(&self) -> DateTime<Utc> {
        self.changes.changed_at()
    }
}

impl fmt::Debug for DataSourceProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSourceProviderRegistry")
            .field("data_source_types", &self.data_source_types())
            .finish()
    }
}
