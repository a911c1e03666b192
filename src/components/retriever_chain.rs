//! Data retriever chain definitions
//!
//! A chain narrows a data source down to the data a query analyzes, one level
//! at a time (e.g. Regatta -> Race -> Competitor). Chains are built once with
//! [`DataRetrieverChainBuilder`] and immutable afterwards.

use crate::error::{Error, ProcessingFailure, Result};
use crate::types::{Element, Settings, TypeTag};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use uuid::Uuid;

/// Retrieval callback of a level: one input element to many retrieved elements
pub type RetrieverFn = Arc<
    dyn Fn(&Element, Option<&Settings>) -> std::result::Result<Vec<Element>, ProcessingFailure>
        + Send
        + Sync,
>;

// ============================================================================
// Levels
// ============================================================================

/// One stage of a retriever chain
#[derive(Clone)]
pub struct DataRetrieverLevel {
    index: usize,
    name: Arc<str>,
    input_type: TypeTag,
    retrieved_type: TypeTag,
    default_settings: Option<Settings>,
    retriever: RetrieverFn,
}

impl DataRetrieverLevel {
    /// Position in the chain, starting at 0
    pub fn index(&self) -> usize {
        self.index
    }

    /// Level name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type consumed by this level
    pub fn input_type(&self) -> &TypeTag {
        &self.input_type
    }

    /// Type produced by this level
    pub fn retrieved_type(&self) -> &TypeTag {
        &self.retrieved_type
    }

    /// Settings used when a query does not provide any for this level
    pub fn default_settings(&self) -> Option<&Settings> {
        self.default_settings.as_ref()
    }

    /// Retrieve the children of `element`
    ///
    /// A panicking retriever yields a fatal failure.
    pub fn retrieve(
        &self,
        element: &Element,
        settings: Option<&Settings>,
    ) -> std::result::Result<Vec<Element>, ProcessingFailure> {
        if !element.is_instance_of(&self.input_type) {
            return Err(ProcessingFailure::element(format!(
                "level '{}' expects {}, got {}",
                self.name,
                self.input_type,
                element.type_tag()
            )));
        }
        let settings = settings.or(self.default_settings.as_ref());
        panic::catch_unwind(AssertUnwindSafe(|| (self.retriever)(element, settings)))
            .unwrap_or_else(|payload| Err(ProcessingFailure::from_panic(payload)))
    }

    /// Wire-level description
    pub fn to_dto(&self) -> DataRetrieverLevelDto {
        DataRetrieverLevelDto {
            index: self.index,
            name: self.name.to_string(),
            retrieved_type: self.retrieved_type.name().to_string(),
            default_settings: self.default_settings.clone(),
        }
    }
}

impl fmt::Debug for DataRetrieverLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataRetrieverLevel")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("input_type", &self.input_type)
            .field("retrieved_type", &self.retrieved_type)
            .finish()
    }
}

/// Wire-level description of a level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRetrieverLevelDto {
    /// Position in the chain
    pub index: usize,
    /// Level name
    pub name: String,
    /// Name of the produced type
    pub retrieved_type: String,
    /// Default settings of the level
    pub default_settings: Option<Settings>,
}

// ============================================================================
// Chain Definition
// ============================================================================

/// An ordered list of retriever levels from a data source to the analyzed data
///
/// Two definitions are equal when they have the same id.
#[derive(Clone)]
pub struct DataRetrieverChainDefinition {
    id: Uuid,
    name: Arc<str>,
    data_source_type: TypeTag,
    retrieved_data_type: TypeTag,
    levels: Arc<[DataRetrieverLevel]>,
}

impl DataRetrieverChainDefinition {
    /// Start building a chain
    pub fn builder(
        data_source_type: TypeTag,
        retrieved_data_type: TypeTag,
        name: impl Into<Arc<str>>,
    ) -> DataRetrieverChainBuilder {
        DataRetrieverChainBuilder {
            name: name.into(),
            data_source_type,
            retrieved_data_type,
            levels: Vec::new(),
        }
    }

    /// Start building a chain that continues after the levels of `base`
    pub fn extend(
        base: &DataRetrieverChainDefinition,
        retrieved_data_type: TypeTag,
        name: impl Into<Arc<str>>,
    ) -> DataRetrieverChainBuilder {
        DataRetrieverChainBuilder {
            name: name.into(),
            data_source_type: base.data_source_type.clone(),
            retrieved_data_type,
            levels: base.levels.to_vec(),
        }
    }

    /// Unique id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Name of the chain
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type of the data source the chain starts from
    pub fn data_source_type(&self) -> &TypeTag {
        &self.data_source_type
    }

    /// Type produced by the last level
    pub fn retrieved_data_type(&self) -> &TypeTag {
        &self.retrieved_data_type
    }

    /// Levels in chain order
    pub fn levels(&self) -> &[DataRetrieverLevel] {
        &self.levels
    }

    /// Level at `index`
    pub fn level(&self, index: usize) -> Option<&DataRetrieverLevel> {
        self.levels.get(index)
    }

    /// The last level
    pub fn last_level(&self) -> &DataRetrieverLevel {
        // Building guarantees at least one level
        &self.levels[self.levels.len() - 1]
    }

    /// Wire-level description
    pub fn to_dto(&self) -> DataRetrieverChainDefinitionDto {
        DataRetrieverChainDefinitionDto {
            id: self.id,
            name: self.name.to_string(),
            data_source_type: self.data_source_type.name().to_string(),
            retrieved_data_type: self.retrieved_data_type.name().to_string(),
            levels: self.levels.iter().map(DataRetrieverLevel::to_dto).collect(),
        }
    }
}

impl PartialEq for DataRetrieverChainDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DataRetrieverChainDefinition {}

impl Hash for DataRetrieverChainDefinition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for DataRetrieverChainDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataRetrieverChainDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("data_source_type", &self.data_source_type)
            .field("retrieved_data_type", &self.retrieved_data_type)
            .field("levels", &self.levels.len())
            .finish()
    }
}

/// Wire-level description of a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRetrieverChainDefinitionDto {
    /// Chain id
    pub id: Uuid,
    /// Chain name
    pub name: String,
    /// Name of the data source type
    pub data_source_type: String,
    /// Name of the retrieved data type
    pub retrieved_data_type: String,
    /// Levels in chain order
    pub levels: Vec<DataRetrieverLevelDto>,
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`DataRetrieverChainDefinition`]
pub struct DataRetrieverChainBuilder {
    name: Arc<str>,
    data_source_type: TypeTag,
    retrieved_data_type: TypeTag,
    levels: Vec<DataRetrieverLevel>,
}

impl DataRetrieverChainBuilder {
    /// Add the first level, consuming the data source
    pub fn start_with<F>(
        mut self,
        name: impl Into<Arc<str>>,
        retrieved_type: TypeTag,
        retriever: F,
    ) -> Self
    where
        F: Fn(&Element, Option<&Settings>) -> std::result::Result<Vec<Element>, ProcessingFailure>
            + Send
            + Sync
            + 'static,
    {
        self.levels.clear();
        self.push(name.into(), retrieved_type, Arc::new(retriever));
        self
    }

    /// Add a level consuming the output of the previous one
    pub fn add_after<F>(
        mut self,
        name: impl Into<Arc<str>>,
        retrieved_type: TypeTag,
        retriever: F,
    ) -> Self
    where
        F: Fn(&Element, Option<&Settings>) -> std::result::Result<Vec<Element>, ProcessingFailure>
            + Send
            + Sync
            + 'static,
    {
        self.push(name.into(), retrieved_type, Arc::new(retriever));
        self
    }

    /// Set the default settings of the most recently added level
    pub fn with_default_settings(mut self, settings: Settings) -> Self {
        if let Some(level) = self.levels.last_mut() {
            level.default_settings = Some(settings);
        }
        self
    }

    /// Add the last level and build the chain
    pub fn end_with<F>(
        self,
        name: impl Into<Arc<str>>,
        retrieved_type: TypeTag,
        retriever: F,
    ) -> Result<DataRetrieverChainDefinition>
    where
        F: Fn(&Element, Option<&Settings>) -> std::result::Result<Vec<Element>, ProcessingFailure>
            + Send
            + Sync
            + 'static,
    {
        self.add_after(name, retrieved_type, retriever).build()
    }

    /// Validate the levels and build the chain
    pub fn build(self) -> Result<DataRetrieverChainDefinition> {
        let Some(last) = self.levels.last() else {
            return Err(Error::InvalidRetrieverChain(format!(
                "chain '{}' has no levels",
                self.name
            )));
        };

        let mut expected_input = &self.data_source_type;
        for level in &self.levels {
            if !expected_input.is_assignable_to(&level.input_type) {
                return Err(Error::InvalidRetrieverChain(format!(
                    "level '{}' of chain '{}' consumes {} but receives {}",
                    level.name, self.name, level.input_type, expected_input
                )));
            }
            expected_input = &level.retrieved_type;
        }

        if !last.retrieved_type.is_assignable_to(&self.retrieved_data_type) {
            return Err(Error::InvalidRetrieverChain(format!(
                "chain '{}' declares {} but its last level retrieves {}",
                self.name, self.retrieved_data_type, last.retrieved_type
            )));
        }

        Ok(DataRetrieverChainDefinition {
            id: Uuid::new_v4(),
            name: self.name,
            data_source_type: self.data_source_type,
            retrieved_data_type: self.retrieved_data_type,
            levels: self.levels.into(),
        })
    }

    fn push(&mut self, name: Arc<str>, retrieved_type: TypeTag, retriever: RetrieverFn) {
        let input_type = self
            .levels
            .last()
            .map(|l| l.retrieved_type.clone())
            .unwrap_or_else(|| self.data_source_type.clone());
        self.levels.push(DataRetrieverLevel {
            index: self.levels.len(),
            name,
            input_type,
            retrieved_type,
            default_settings: None,
            retriever,
        });
    }
}
