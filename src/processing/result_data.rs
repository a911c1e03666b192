//! Descriptive data attached to query results
//!
//! Stages contribute to an [`OverwritingResultDataBuilder`] in chain order.
//! A later stage setting the same field replaces the earlier value.

use crate::messages::{Locale, StringMessages};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Collects the contributions of the stages of a chain
#[derive(Debug, Default, Clone)]
pub struct OverwritingResultDataBuilder {
    retrieved_data_amount: Option<u64>,
    statistic_name: Option<String>,
    unit: Option<String>,
    value_decimals: Option<u32>,
    aggregator_key: Option<String>,
}

impl OverwritingResultDataBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of elements retrieved
    pub fn set_retrieved_data_amount(&mut self, amount: u64) -> &mut Self {
        self.retrieved_data_amount = Some(amount);
        self
    }

    /// Message key of the extracted statistic
    pub fn set_statistic_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.statistic_name = Some(name.into());
        self
    }

    /// Unit of the result values
    pub fn set_unit(&mut self, unit: Option<String>) -> &mut Self {
        self.unit = unit;
        self
    }

    /// Display decimals of the result values
    pub fn set_value_decimals(&mut self, decimals: u32) -> &mut Self {
        self.value_decimals = Some(decimals);
        self
    }

    /// Message key of the aggregator
    pub fn set_aggregator_key(&mut self, key: impl Into<String>) -> &mut Self {
        self.aggregator_key = Some(key.into());
        self
    }

    /// Number of elements retrieved, if any stage reported it
    pub fn retrieved_data_amount(&self) -> Option<u64> {
        self.retrieved_data_amount
    }

    /// Render the collected data
    pub fn build(
        &self,
        locale: &Locale,
        messages: &dyn StringMessages,
        calculation_time: Duration,
    ) -> AdditionalResultData {
        let statistic = self
            .statistic_name
            .as_deref()
            .map(|key| messages.get_or_key(locale, key));
        let aggregator = self
            .aggregator_key
            .as_deref()
            .map(|key| messages.get_or_key(locale, key));
        let result_signifier = match (statistic, aggregator) {
            (Some(statistic), Some(aggregator)) => format!("{} ({})", statistic, aggregator),
            (Some(only), None) | (None, Some(only)) => only,
            (None, None) => String::new(),
        };

        AdditionalResultData {
            retrieved_data_amount: self.retrieved_data_amount.unwrap_or(0),
            result_signifier,
            unit: self.unit.clone(),
            value_decimals: self.value_decimals.unwrap_or(0),
            calculation_time_secs: calculation_time.as_secs_f64(),
        }
    }
}

/// Descriptive data of a query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdditionalResultData {
    /// Number of elements the last retrieval level delivered
    pub retrieved_data_amount: u64,
    /// Human readable name of the result, e.g. `Distance (Average)`
    pub result_signifier: String,
    /// Unit of the result values
    pub unit: Option<String>,
    /// Display decimals of the result values
    pub value_decimals: u32,
    /// Wall clock time of the calculation in seconds
    pub calculation_time_secs: f64,
}
