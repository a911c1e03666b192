//! Query results

use super::QueryResultState;
use crate::processing::{AdditionalResultData, ResultMap};
use crate::types::{GroupKey, Value};
use serde::{Deserialize, Serialize};

/// The outcome of one query execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    state: QueryResultState,
    result_type: String,
    #[serde(with = "result_entries")]
    results: ResultMap,
    additional_data: Option<AdditionalResultData>,
}

impl QueryResult {
    /// Create a result
    pub fn new(
        state: QueryResultState,
        result_type: impl Into<String>,
        results: ResultMap,
        additional_data: Option<AdditionalResultData>,
    ) -> Self {
        Self {
            state,
            result_type: result_type.into(),
            results,
            additional_data,
        }
    }

    /// Empty result of an aborted query
    pub fn aborted(result_type: impl Into<String>) -> Self {
        Self::new(QueryResultState::Aborted, result_type, ResultMap::new(), None)
    }

    /// State the query ended in
    pub fn state(&self) -> QueryResultState {
        self.state
    }

    /// Name of the type of the result values
    pub fn result_type(&self) -> &str {
        &self.result_type
    }

    /// Result values by group
    pub fn results(&self) -> &ResultMap {
        &self.results
    }

    /// Result value of one group
    pub fn get(&self, key: &GroupKey) -> Option<&Value> {
        self.results.get(key)
    }

    /// Whether there are no result values
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Results sorted by group key
    pub fn sorted_results(&self) -> Vec<(&GroupKey, &Value)> {
        let mut entries: Vec<_> = self.results.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// Descriptive data contributed by the processor chain
    pub fn additional_data(&self) -> Option<&AdditionalResultData> {
        self.additional_data.as_ref()
    }
}

/// JSON object keys must be strings, so results travel as an entry list
mod result_entries {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(results: &ResultMap, serializer: S) -> Result<S::Ok, S::Error> {
        let mut entries: Vec<(&GroupKey, &Value)> = results.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ResultMap, D::Error> {
        let entries: Vec<(GroupKey, Value)> = Vec::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}
