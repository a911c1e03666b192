//! Registry of predefined queries

use super::ChangeTracker;
use crate::query::StatisticQueryDefinitionDto;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Name under which a predefined query is offered
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PredefinedQueryIdentifier {
    identifier: String,
    description: String,
}

impl PredefinedQueryIdentifier {
    /// Create an identifier
    pub fn new(identifier: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            description: description.into(),
        }
    }

    /// Unique identifier
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Human readable description
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Display for PredefinedQueryIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier)
    }
}

/// Predefined statistic queries in wire form
#[derive(Debug, Default)]
pub struct QueryDefinitionDtoRegistry {
    definitions: RwLock<Arc<HashMap<PredefinedQueryIdentifier, StatisticQueryDefinitionDto>>>,
    changes: ChangeTracker,
}

impl QueryDefinitionDtoRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition; an equal definition under the same identifier
    /// leaves the registry unchanged
    pub fn register(&self, identifier: PredefinedQueryIdentifier, definition: StatisticQueryDefinitionDto) -> bool {
        let mut guard = self.definitions.write();
        if guard.get(&identifier) == Some(&definition) {
            return false;
        }
        let mut definitions = HashMap::clone(&guard);
        definitions.insert(identifier, definition);
        *guard = Arc::new(definitions);
        self.changes.touch_if(true)
    }

    /// Unregister a definition; returns whether the registry changed
    pub fn unregister(&self, identifier: &PredefinedQueryIdentifier) -> bool {
        let mut guard = self.definitions.write();
        if !guard.contains_key(identifier) {
            return false;
        }
        let mut definitions = HashMap::clone(&guard);
        definitions.remove(identifier);
        *guard = Arc::new(definitions);
        self.changes.touch_if(true)
    }

    /// Definition registered under `identifier`
    pub fn get(&self, identifier: &PredefinedQueryIdentifier) -> Option<StatisticQueryDefinitionDto> {
        self.definitions.read().get(identifier).cloned()
    }

    /// Definition registered under the identifier string
    pub fn get_by_name(&self, identifier: &str) -> Option<StatisticQueryDefinitionDto> {
        self.definitions
            .read()
            .iter()
            .find(|(id, _)| id.identifier() == identifier)
            .map(|(_, definition)| definition.clone())
    }

    /// All identifiers, sorted
    pub fn identifiers(&self) -> Vec<PredefinedQueryIdentifier> {
        let mut identifiers: Vec<_> = self.definitions.read().keys().cloned().collect();
        identifiers.sort();
        identifiers
    }

    /// Timestamp of the last effective change
    pub fn components_changed_at(&self) -> DateTime<Utc> {
        self.changes.changed_at()
    }
}
