//! Declarative query definitions
//!
//! [`StatisticQueryDefinition`] holds resolved components and is what the
//! query factory builds a chain from. [`StatisticQueryDefinitionDto`] is the
//! wire form referring to components by identity; the server resolves it.

use crate::components::{
    AggregationProcessorDefinition, AggregationProcessorDefinitionDto,
    DataRetrieverChainDefinition, DataRetrieverChainDefinitionDto,
};
use crate::error::Result;
use crate::functions::{Function, FunctionDto};
use crate::messages::Locale;
use crate::types::{Settings, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Accepted values of one dimension, per retriever level
pub type FilterSelection = HashMap<usize, HashMap<Function, HashSet<Value>>>;

// ============================================================================
// Statistic Query
// ============================================================================

/// Resolved definition of a statistic query
#[derive(Debug, Clone)]
pub struct StatisticQueryDefinition {
    locale: Locale,
    retriever_chain: DataRetrieverChainDefinition,
    statistic: Function,
    aggregator: AggregationProcessorDefinition,
    retriever_settings: HashMap<usize, Settings>,
    filter_selection: FilterSelection,
    dimensions_to_group_by: Vec<Function>,
}

impl StatisticQueryDefinition {
    /// Definition without settings, filters or grouping
    pub fn new(
        locale: Locale,
        retriever_chain: DataRetrieverChainDefinition,
        statistic: Function,
        aggregator: AggregationProcessorDefinition,
    ) -> Self {
        Self {
            locale,
            retriever_chain,
            statistic,
            aggregator,
            retriever_settings: HashMap::new(),
            filter_selection: HashMap::new(),
            dimensions_to_group_by: Vec::new(),
        }
    }

    /// Settings for the retriever level at `level`
    pub fn with_retriever_settings(mut self, level: usize, settings: Settings) -> Self {
        self.retriever_settings.insert(level, settings);
        self
    }

    /// Only keep elements of `level` whose `dimension` is one of `values`
    pub fn with_filter(
        mut self,
        level: usize,
        dimension: Function,
        values: impl IntoIterator<Item = Value>,
    ) -> Self {
        self.filter_selection
            .entry(level)
            .or_default()
            .insert(dimension, values.into_iter().collect());
        self
    }

    /// Group results by `dimension`, after the dimensions already added
    pub fn with_group_by(mut self, dimension: Function) -> Self {
        if !self.dimensions_to_group_by.contains(&dimension) {
            self.dimensions_to_group_by.push(dimension);
        }
        self
    }

    /// Locale of the result texts
    pub fn locale(&self) -> &Locale {
        &self.locale
    }

    /// Chain retrieving the analyzed data
    pub fn retriever_chain(&self) -> &DataRetrieverChainDefinition {
        &self.retriever_chain
    }

    /// Statistic extracted from the retrieved data
    pub fn statistic(&self) -> &Function {
        &self.statistic
    }

    /// Aggregator applied per group
    pub fn aggregator(&self) -> &AggregationProcessorDefinition {
        &self.aggregator
    }

    /// Settings per retriever level
    pub fn retriever_settings(&self) -> &HashMap<usize, Settings> {
        &self.retriever_settings
    }

    /// Filters per retriever level
    pub fn filter_selection(&self) -> &FilterSelection {
        &self.filter_selection
    }

    /// Grouping dimensions in grouping order
    pub fn dimensions_to_group_by(&self) -> &[Function] {
        &self.dimensions_to_group_by
    }

    /// Wire form
    pub fn to_dto(&self) -> StatisticQueryDefinitionDto {
        let mut filters: Vec<FilterDto> = self
            .filter_selection
            .iter()
            .flat_map(|(level, dimensions)| {
                dimensions.iter().map(move |(dimension, values)| {
                    let mut values: Vec<Value> = values.iter().cloned().collect();
                    values.sort();
                    FilterDto {
                        level: *level,
                        dimension: dimension.to_dto(),
                        values,
                    }
                })
            })
            .collect();
        filters.sort_by(|a, b| {
            a.level
                .cmp(&b.level)
                .then_with(|| a.dimension.name.cmp(&b.dimension.name))
        });

        StatisticQueryDefinitionDto {
            locale: self.locale.clone(),
            retriever_chain: self.retriever_chain.to_dto(),
            statistic: self.statistic.to_dto(),
            aggregator: self.aggregator.to_dto(),
            retriever_settings: self
                .retriever_settings
                .iter()
                .map(|(level, settings)| (*level, settings.clone()))
                .collect(),
            filters,
            dimensions_to_group_by: self.dimensions_to_group_by.iter().map(Function::to_dto).collect(),
        }
    }
}

/// Wire form of a filter on one dimension of one level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterDto {
    /// Retriever level the filter applies to
    pub level: usize,
    /// Filtered dimension
    pub dimension: FunctionDto,
    /// Accepted values
    pub values: Vec<Value>,
}

/// Wire form of a statistic query definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticQueryDefinitionDto {
    /// Locale of the result texts
    pub locale: Locale,
    /// Retriever chain
    pub retriever_chain: DataRetrieverChainDefinitionDto,
    /// Statistic to calculate
    pub statistic: FunctionDto,
    /// Aggregator to apply
    pub aggregator: AggregationProcessorDefinitionDto,
    /// Settings per retriever level
    #[serde(default)]
    pub retriever_settings: BTreeMap<usize, Settings>,
    /// Filters
    #[serde(default)]
    pub filters: Vec<FilterDto>,
    /// Grouping dimensions in grouping order
    #[serde(default)]
    pub dimensions_to_group_by: Vec<FunctionDto>,
}

impl StatisticQueryDefinitionDto {
    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// ============================================================================
// Dimension Values Query
// ============================================================================

/// Resolved definition of a dimension values query
#[derive(Debug, Clone)]
pub struct DimensionValuesQueryDefinition {
    locale: Locale,
    retriever_chain: DataRetrieverChainDefinition,
    level: usize,
    dimensions: Vec<Function>,
    retriever_settings: HashMap<usize, Settings>,
    filter_selection: FilterSelection,
}

impl DimensionValuesQueryDefinition {
    /// Collect the values of `dimensions` on the elements retrieved at `level`
    pub fn new(
        locale: Locale,
        retriever_chain: DataRetrieverChainDefinition,
        level: usize,
        dimensions: Vec<Function>,
    ) -> Self {
        Self {
            locale,
            retriever_chain,
            level,
            dimensions,
            retriever_settings: HashMap::new(),
            filter_selection: HashMap::new(),
        }
    }

    /// Settings for the retriever level at `level`
    pub fn with_retriever_settings(mut self, level: usize, settings: Settings) -> Self {
        self.retriever_settings.insert(level, settings);
        self
    }

    /// Only keep elements of `level` whose `dimension` is one of `values`
    pub fn with_filter(
        mut self,
        level: usize,
        dimension: Function,
        values: impl IntoIterator<Item = Value>,
    ) -> Self {
        self.filter_selection
            .entry(level)
            .or_default()
            .insert(dimension, values.into_iter().collect());
        self
    }

    /// Locale of the result texts
    pub fn locale(&self) -> &Locale {
        &self.locale
    }

    /// Chain retrieving the elements
    pub fn retriever_chain(&self) -> &DataRetrieverChainDefinition {
        &self.retriever_chain
    }

    /// Level whose elements are inspected
    pub fn level(&self) -> usize {
        self.level
    }

    /// Dimensions whose values are collected
    pub fn dimensions(&self) -> &[Function] {
        &self.dimensions
    }

    /// Settings per retriever level
    pub fn retriever_settings(&self) -> &HashMap<usize, Settings> {
        &self.retriever_settings
    }

    /// Filters per retriever level
    pub fn filter_selection(&self) -> &FilterSelection {
        &self.filter_selection
    }
}

// ============================================================================
// Additional Query Data
// ============================================================================

/// Descriptor of what a query computes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AdditionalQueryData {
    /// A statistic query
    Statistic {
        /// The extracted statistic
        statistic: FunctionDto,
        /// The applied aggregator
        aggregator: AggregationProcessorDefinitionDto,
    },
    /// A dimension values query
    DimensionValues {
        /// The inspected dimensions
        dimensions: Vec<FunctionDto>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Element, TypeTag};

    fn definition() -> StatisticQueryDefinition {
        let race = TypeTag::new("Race");
        let tag = race.clone();
        let chain = DataRetrieverChainDefinition::builder(TypeTag::new("Regattas"), race.clone(), "Races")
            .start_with("Race", race.clone(), move |_, _| Ok(vec![Element::new(tag.clone(), ())]))
            .build()
            .unwrap();
        let statistic = Function::statistic(race.clone(), "duration", TypeTag::float(), |_| {
            Ok(Value::Float(1.0))
        });
        let boat_class = Function::dimension(race, "boatClass", TypeTag::text(), |_| {
            Ok(Value::from("49er"))
        });
        StatisticQueryDefinition::new(
            Locale::english(),
            chain,
            statistic,
            AggregationProcessorDefinition::average(),
        )
        .with_filter(0, boat_class.clone(), [Value::from("49er"), Value::from("470")])
        .with_group_by(boat_class.clone())
        .with_group_by(boat_class)
        .with_retriever_settings(0, serde_json::json!({ "includeDiscarded": false }))
    }

    #[test]
    fn test_group_by_ignores_duplicates() {
        assert_eq!(definition().dimensions_to_group_by().len(), 1);
    }

    #[test]
    fn test_dto_json_roundtrip() {
        let dto = definition().to_dto();
        assert_eq!(dto.filters.len(), 1);
        assert_eq!(dto.filters[0].values, vec![Value::from("470"), Value::from("49er")]);

        let json = dto.to_json().unwrap();
        let parsed = StatisticQueryDefinitionDto::from_json(&json).unwrap();
        assert_eq!(parsed, dto);
    }

    #[test]
    fn test_dto_rejects_invalid_locale() {
        let mut json: serde_json::Value =
            serde_json::from_str(&definition().to_dto().to_json().unwrap()).unwrap();
        json["locale"] = serde_json::json!("");
        assert!(StatisticQueryDefinitionDto::from_json(&json.to_string()).is_err());
    }
}
