//! Function registry
//!
//! Holds the registered functions indexed by declaring type. Lookups by
//! declaring type are exact; [`FunctionRegistry::functions_applicable_to`] is the
//! variant that also returns functions declared on supertypes.

use super::{Function, FunctionDto, FunctionKind};
use crate::management::ChangeTracker;
use crate::types::TypeTag;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable view of the registered functions
#[derive(Debug, Clone, Default)]
pub struct FunctionCatalog {
    by_declaring_type: HashMap<TypeTag, Vec<Function>>,
}

impl FunctionCatalog {
    /// Functions declared exactly on `declaring_type`
    pub fn functions_of(&self, declaring_type: &TypeTag) -> Vec<Function> {
        let mut functions = self
            .by_declaring_type
            .get(declaring_type)
            .cloned()
            .unwrap_or_default();
        functions.sort_by_key(|f| f.ordinal());
        functions
    }

    /// Resolve a wire-level identity
    pub fn get_for_dto(&self, dto: &FunctionDto) -> Option<Function> {
        self.by_declaring_type
            .iter()
            .find(|(declaring_type, _)| declaring_type.name() == dto.declaring_type)
            .and_then(|(_, functions)| functions.iter().find(|f| f.matches_dto(dto)).cloned())
    }

    /// Number of registered functions
    pub fn len(&self) -> usize {
        self.by_declaring_type.values().map(Vec::len).sum()
    }

    /// Whether no function is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&mut self, function: Function) -> bool {
        let functions = self
            .by_declaring_type
            .entry(function.declaring_type().clone())
            .or_default();
        if functions.contains(&function) {
            return false;
        }
        functions.push(function);
        true
    }

    fn remove(&mut self, function: &Function) -> bool {
        let Some(functions) = self.by_declaring_type.get_mut(function.declaring_type()) else {
            return false;
        };
        let before = functions.len();
        functions.retain(|f| f != function);
        let removed = functions.len() != before;
        if functions.is_empty() {
            self.by_declaring_type.remove(function.declaring_type());
        }
        removed
    }
}

/// Registry of dimensions, statistics and external functions
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    catalog: RwLock<Arc<FunctionCatalog>>,
    changes: ChangeTracker,
}

impl FunctionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Consistent snapshot of the registered functions
    pub fn snapshot(&self) -> Arc<FunctionCatalog> {
        Arc::clone(&self.catalog.read())
    }

    /// Register a function; returns whether the registry changed
    pub fn register(&self, function: Function) -> bool {
        self.register_all(std::iter::once(function))
    }

    /// Register several functions; returns whether the registry changed
    pub fn register_all(&self, functions: impl IntoIterator<Item = Function>) -> bool {
        let mut guard = self.catalog.write();
        let mut catalog = FunctionCatalog::clone(&guard);
        let mut changed = false;
        for function in functions {
            changed |= catalog.insert(function);
        }
        if changed {
            *guard = Arc::new(catalog);
        }
        self.changes.touch_if(changed)
    }

    /// Unregister a function; returns whether the registry changed
    pub fn unregister(&self, function: &Function) -> bool {
        let mut guard = self.catalog.write();
        let mut catalog = FunctionCatalog::clone(&guard);
        let changed = catalog.remove(function);
        if changed {
            *guard = Arc::new(catalog);
        }
        self.changes.touch_if(changed)
    }

    /// Unregister every function declared on the given type
    pub fn unregister_all_of(&self, declaring_type: &TypeTag) -> bool {
        let mut guard = self.catalog.write();
        if !guard.by_declaring_type.contains_key(declaring_type) {
            return false;
        }
        let mut catalog = FunctionCatalog::clone(&guard);
        catalog.by_declaring_type.remove(declaring_type);
        *guard = Arc::new(catalog);
        self.changes.touch_if(true)
    }

    /// Functions declared exactly on `declaring_type`
    pub fn functions_of(&self, declaring_type: &TypeTag) -> Vec<Function> {
        self.snapshot().functions_of(declaring_type)
    }

    /// Dimensions declared exactly on `declaring_type`
    pub fn dimensions_of(&self, declaring_type: &TypeTag) -> Vec<Function> {
        self.of_kind(declaring_type, FunctionKind::Dimension)
    }

    /// Statistics declared exactly on `declaring_type`
    pub fn statistics_of(&self, declaring_type: &TypeTag) -> Vec<Function> {
        self.of_kind(declaring_type, FunctionKind::Statistic)
    }

    /// External functions declared exactly on `declaring_type`
    pub fn external_functions_of(&self, declaring_type: &TypeTag) -> Vec<Function> {
        self.of_kind(declaring_type, FunctionKind::External)
    }

    /// Functions declared on `data_type` or any of its supertypes
    pub fn functions_applicable_to(&self, data_type: &TypeTag) -> Vec<Function> {
        let catalog = self.snapshot();
        let mut functions: Vec<Function> = catalog
            .by_declaring_type
            .iter()
            .filter(|(declaring_type, _)| data_type.is_assignable_to(declaring_type))
            .flat_map(|(_, functions)| functions.iter().cloned())
            .collect();
        functions.sort_by(|a, b| {
            a.ordinal()
                .cmp(&b.ordinal())
                .then_with(|| a.qualified_name().cmp(&b.qualified_name()))
        });
        functions
    }

    /// All registered statistics
    pub fn all_statistics(&self) -> Vec<Function> {
        self.snapshot()
            .by_declaring_type
            .values()
            .flatten()
            .filter(|f| f.kind() == FunctionKind::Statistic)
            .cloned()
            .collect()
    }

    /// Resolve a wire-level identity
    pub fn get_for_dto(&self, dto: &FunctionDto) -> Option<Function> {
        self.snapshot().get_for_dto(dto)
    }

    /// Timestamp of the last effective change
    pub fn components_changed_at(&self) -> DateTime<Utc> {
        self.changes.changed_at()
    }

    fn of_kind(&self, declaring_type: &TypeTag, kind: FunctionKind) -> Vec<Function> {
        self.functions_of(declaring_type)
            .into_iter()
            .filter(|f| f.kind() == kind)
            .collect()
    }
}
