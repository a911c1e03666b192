//! Aggregation processor definitions and the built-in aggregators
//!
//! An [`AggregationProcessorDefinition`] names a reduction over extracted
//! values and creates a fresh [`Aggregator`] per result group.

use crate::error::ProcessingFailure;
use crate::types::{TypeTag, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Reduction of a stream of values of one group into one value
pub trait Aggregator: Send {
    /// Add a value to the reduction
    fn add(&mut self, value: &Value) -> Result<(), ProcessingFailure>;

    /// Current result; `None` while no value has been added
    fn result(&self) -> Option<Value>;
}

/// Creates a fresh aggregator
pub type AggregatorFactory = Arc<dyn Fn() -> Box<dyn Aggregator> + Send + Sync>;

// ============================================================================
// Definition
// ============================================================================

/// A named reduction from an extracted type to an aggregated type
#[derive(Clone)]
pub struct AggregationProcessorDefinition {
    extracted_type: TypeTag,
    aggregated_type: TypeTag,
    message_key: Arc<str>,
    factory: AggregatorFactory,
}

impl AggregationProcessorDefinition {
    /// Create a definition
    pub fn new<F>(
        extracted_type: TypeTag,
        aggregated_type: TypeTag,
        message_key: impl Into<Arc<str>>,
        factory: F,
    ) -> Self
    where
        F: Fn() -> Box<dyn Aggregator> + Send + Sync + 'static,
    {
        Self {
            extracted_type,
            aggregated_type,
            message_key: message_key.into(),
            factory: Arc::new(factory),
        }
    }

    /// Type of the values consumed
    pub fn extracted_type(&self) -> &TypeTag {
        &self.extracted_type
    }

    /// Type of the produced result
    pub fn aggregated_type(&self) -> &TypeTag {
        &self.aggregated_type
    }

    /// Message key naming the aggregator
    pub fn message_key(&self) -> &str {
        &self.message_key
    }

    /// Create a fresh aggregator
    pub fn create_aggregator(&self) -> Box<dyn Aggregator> {
        (self.factory)()
    }

    /// Wire-level identity
    pub fn to_dto(&self) -> AggregationProcessorDefinitionDto {
        AggregationProcessorDefinitionDto {
            message_key: self.message_key.to_string(),
            extracted_type: self.extracted_type.name().to_string(),
            aggregated_type: self.aggregated_type.name().to_string(),
        }
    }

    /// Sum of numbers, Kahan compensated
    pub fn sum() -> Self {
        Self::new(TypeTag::number(), TypeTag::float(), "Sum", || {
            Box::new(SumAggregator::default())
        })
    }

    /// Running mean of numbers
    pub fn average() -> Self {
        Self::new(TypeTag::number(), TypeTag::float(), "Average", || {
            Box::new(AverageAggregator::default())
        })
    }

    /// Median of numbers
    pub fn median() -> Self {
        Self::new(TypeTag::number(), TypeTag::float(), "Median", || {
            Box::new(MedianAggregator::default())
        })
    }

    /// Number of values
    pub fn count() -> Self {
        Self::new(TypeTag::any(), TypeTag::int(), "Count", || {
            Box::new(CountAggregator::default())
        })
    }

    /// Smallest value, first one wins on ties
    pub fn minimum() -> Self {
        Self::new(TypeTag::any(), TypeTag::any(), "Minimum", || {
            Box::new(BestValueAggregator::new(ComparisonStrategy::LowestIsBest))
        })
    }

    /// Largest value, first one wins on ties
    pub fn maximum() -> Self {
        Self::new(TypeTag::any(), TypeTag::any(), "Maximum", || {
            Box::new(BestValueAggregator::new(ComparisonStrategy::HighestIsBest))
        })
    }

    /// All built-in definitions
    pub fn builtins() -> Vec<Self> {
        vec![
            Self::sum(),
            Self::average(),
            Self::median(),
            Self::count(),
            Self::minimum(),
            Self::maximum(),
        ]
    }
}

impl PartialEq for AggregationProcessorDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.extracted_type == other.extracted_type
            && self.aggregated_type == other.aggregated_type
            && self.message_key == other.message_key
    }
}

impl Eq for AggregationProcessorDefinition {}

impl Hash for AggregationProcessorDefinition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.extracted_type.hash(state);
        self.aggregated_type.hash(state);
        self.message_key.hash(state);
    }
}

impl fmt::Debug for AggregationProcessorDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationProcessorDefinition")
            .field("message_key", &self.message_key)
            .field("extracted_type", &self.extracted_type)
            .field("aggregated_type", &self.aggregated_type)
            .finish()
    }
}

/// Wire-level identity of an aggregator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregationProcessorDefinitionDto {
    /// Message key naming the aggregator
    pub message_key: String,
    /// Name of the extracted type
    pub extracted_type: String,
    /// Name of the aggregated type
    pub aggregated_type: String,
}

// ============================================================================
// Built-in Aggregators
// ============================================================================

fn numeric(value: &Value) -> Result<f64, ProcessingFailure> {
    value
        .as_f64()
        .ok_or_else(|| ProcessingFailure::element(format!("'{}' is not a number", value)))
}

/// Kahan compensated summation
#[derive(Debug, Default, Clone, Copy)]
pub struct KahanSum {
    sum: f64,
    compensation: f64,
}

impl KahanSum {
    /// Add a value to the sum
    #[inline]
    pub fn add(&mut self, value: f64) {
        let y = value - self.compensation;
        let t = self.sum + y;
        self.compensation = (t - self.sum) - y;
        self.sum = t;
    }

    /// Current sum
    #[inline]
    pub fn sum(&self) -> f64 {
        self.sum
    }
}

#[derive(Debug, Default)]
struct SumAggregator {
    sum: KahanSum,
    count: u64,
}

impl Aggregator for SumAggregator {
    fn add(&mut self, value: &Value) -> Result<(), ProcessingFailure> {
        self.sum.add(numeric(value)?);
        self.count += 1;
        Ok(())
    }

    fn result(&self) -> Option<Value> {
        (self.count > 0).then(|| Value::Float(self.sum.sum()))
    }
}

/// Running mean: `avg = avg * (n - 1) / n + value / n`
#[derive(Debug, Default)]
pub struct AverageAggregator {
    average: f64,
    count: u64,
}

impl Aggregator for AverageAggregator {
    fn add(&mut self, value: &Value) -> Result<(), ProcessingFailure> {
        let value = numeric(value)?;
        self.count += 1;
        let n = self.count as f64;
        self.average = self.average * (n - 1.0) / n + value / n;
        Ok(())
    }

    fn result(&self) -> Option<Value> {
        (self.count > 0).then_some(Value::Float(self.average))
    }
}

#[derive(Debug, Default)]
struct MedianAggregator {
    values: Vec<f64>,
}

impl Aggregator for MedianAggregator {
    fn add(&mut self, value: &Value) -> Result<(), ProcessingFailure> {
        self.values.push(numeric(value)?);
        Ok(())
    }

    fn result(&self) -> Option<Value> {
        if self.values.is_empty() {
            return None;
        }
        let mut sorted = self.values.clone();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };
        Some(Value::Float(median))
    }
}

#[derive(Debug, Default)]
struct CountAggregator {
    count: i64,
}

impl Aggregator for CountAggregator {
    fn add(&mut self, _value: &Value) -> Result<(), ProcessingFailure> {
        self.count += 1;
        Ok(())
    }

    fn result(&self) -> Option<Value> {
        (self.count > 0).then_some(Value::Int(self.count))
    }
}

/// Which end of the ordering a best-value aggregator keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonStrategy {
    /// Keep the maximum
    HighestIsBest,
    /// Keep the minimum
    LowestIsBest,
}

/// Keeps the best value seen so far
///
/// Replacement needs a strictly better value, so among equal values the first
/// one encountered is the result.
#[derive(Debug)]
pub struct BestValueAggregator {
    strategy: ComparisonStrategy,
    best: Option<Value>,
}

impl BestValueAggregator {
    /// Create an aggregator with the given strategy
    pub fn new(strategy: ComparisonStrategy) -> Self {
        Self {
            strategy,
            best: None,
        }
    }
}

impl Aggregator for BestValueAggregator {
    fn add(&mut self, value: &Value) -> Result<(), ProcessingFailure> {
        let Some(best) = &self.best else {
            self.best = Some(value.clone());
            return Ok(());
        };
        let ordering = value.compare_magnitude(best).ok_or_else(|| {
            ProcessingFailure::element(format!("cannot compare '{}' with '{}'", value, best))
        })?;
        let better = match self.strategy {
            ComparisonStrategy::HighestIsBest => ordering == Ordering::Greater,
            ComparisonStrategy::LowestIsBest => ordering == Ordering::Less,
        };
        if better {
            self.best = Some(value.clone());
        }
        Ok(())
    }

    fn result(&self) -> Option<Value> {
        self.best.clone()
    }
}
