//! Query Lifecycle Integration Tests
//!
//! Runs statistic and dimension values queries end to end over the regatta
//! test domain.
//!
//! # Test Coverage
//!
//! 1. **Aggregation** - Grouped sum, average, count and maximum
//! 2. **Filtering** - Filters on an upper retriever level
//! 3. **Failures** - Recoverable element failures, panics, rejected tasks
//! 4. **Timeout** - Deadline expiry leaves the query timed out
//! 5. **Abort** - External abort discards partial results
//! 6. **Dimension Values** - Distinct values per dimension

mod common;

use common::*;
use datamining_engine::components::{AggregationProcessorDefinition, Aggregator};
use datamining_engine::error::ProcessingFailure;
use datamining_engine::messages::{Locale, MapStringMessages};
use datamining_engine::processing::WorkerPool;
use datamining_engine::query::QueryFactory;
use datamining_engine::{
    DimensionValuesQueryDefinition, Error, Function, GroupKey, Query, QueryResultState, QueryState,
    StatisticQueryDefinition, TypeTag, Value,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// =============================================================================
// Helpers
// =============================================================================

fn factory() -> (Arc<WorkerPool>, QueryFactory) {
    init_tracing();
    let pool = Arc::new(WorkerPool::new(3, "lifecycle-test").unwrap());
    let messages = MapStringMessages::new()
        .with_message("en", "points", "Points")
        .with_message("en", "Sum", "Sum");
    let factory = QueryFactory::new(Arc::clone(&pool), Arc::new(messages));
    (pool, factory)
}

fn by_nationality(statistic: Function, aggregator: AggregationProcessorDefinition) -> StatisticQueryDefinition {
    StatisticQueryDefinition::new(Locale::english(), results_chain(), statistic, aggregator)
        .with_group_by(nationality())
}

fn nation(code: &str) -> GroupKey {
    GroupKey::single(code)
}

fn wait_until_running(query: &Arc<dyn Query>) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while query.state() != QueryState::Running {
        assert!(Instant::now() < deadline, "query never started");
        thread::sleep(Duration::from_millis(1));
    }
}

// =============================================================================
// Aggregation
// =============================================================================

#[test]
fn test_sum_by_nationality() {
    let (_pool, factory) = factory();
    let definition = by_nationality(points(), AggregationProcessorDefinition::sum());

    let query = factory.create_query(data_source(), &definition).unwrap();
    let result = query.run().unwrap();

    assert_eq!(query.state(), QueryState::Normal);
    assert_eq!(result.state(), QueryResultState::Normal);
    assert_eq!(result.results().len(), 3);
    assert_eq!(result.get(&nation("GER")), Some(&Value::Float(7.0)));
    assert_eq!(result.get(&nation("DEN")), Some(&Value::Float(3.0)));
    assert_eq!(result.get(&nation("NED")), Some(&Value::Float(5.0)));

    let data = result.additional_data().unwrap();
    assert_eq!(data.retrieved_data_amount, 8);
    assert_eq!(data.result_signifier, "Points (Sum)");
    assert_eq!(data.unit.as_deref(), Some("pt"));
    assert_eq!(data.value_decimals, 1);
}

#[test]
fn test_average_count_and_maximum() {
    let (_pool, factory) = factory();

    let average = factory
        .create_query(data_source(), &by_nationality(points(), AggregationProcessorDefinition::average()))
        .unwrap()
        .run()
        .unwrap();
    let ger = average.get(&nation("GER")).and_then(Value::as_f64).unwrap();
    assert!((ger - 1.75).abs() < 1e-12);

    let count = factory
        .create_query(data_source(), &by_nationality(points(), AggregationProcessorDefinition::count()))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(count.get(&nation("GER")), Some(&Value::Int(4)));
    assert_eq!(count.get(&nation("DEN")), Some(&Value::Int(2)));

    let maximum = factory
        .create_query(data_source(), &by_nationality(points(), AggregationProcessorDefinition::maximum()))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(maximum.get(&nation("NED")), Some(&Value::Float(3.0)));
}

#[test]
fn test_ungrouped_query_has_overall_key() {
    let (_pool, factory) = factory();
    let definition = StatisticQueryDefinition::new(
        Locale::english(),
        results_chain(),
        points(),
        AggregationProcessorDefinition::sum(),
    );

    let result = factory.create_query(data_source(), &definition).unwrap().run().unwrap();
    assert_eq!(result.results().len(), 1);
    assert_eq!(result.get(&GroupKey::overall()), Some(&Value::Float(15.0)));
}

#[test]
fn test_compound_group_keys() {
    let (_pool, factory) = factory();
    let definition = by_nationality(points(), AggregationProcessorDefinition::sum()).with_group_by(sail_number());

    let result = factory.create_query(data_source(), &definition).unwrap().run().unwrap();
    let key = GroupKey::compound(vec![Value::from("GER"), Value::from("GER 1")]);
    assert_eq!(result.get(&key), Some(&Value::Float(3.0)));
    assert_eq!(result.results().len(), 5);
}

// =============================================================================
// Filtering
// =============================================================================

#[test]
fn test_filter_on_regatta_level() {
    let (_pool, factory) = factory();
    let definition = by_nationality(points(), AggregationProcessorDefinition::sum())
        .with_filter(0, boat_class(), [Value::from("49er")]);

    let result = factory.create_query(data_source(), &definition).unwrap().run().unwrap();
    assert_eq!(result.get(&nation("GER")), Some(&Value::Float(3.0)));
    assert_eq!(result.get(&nation("NED")), Some(&Value::Float(5.0)));
    assert_eq!(result.additional_data().unwrap().retrieved_data_amount, 6);
}

#[test]
fn test_filter_excluding_everything_yields_empty_result() {
    let (_pool, factory) = factory();
    let definition = by_nationality(points(), AggregationProcessorDefinition::average())
        .with_filter(0, regatta_name(), [Value::from("Travemünder Woche")]);

    let result = factory.create_query(data_source(), &definition).unwrap().run().unwrap();
    assert_eq!(result.state(), QueryResultState::Normal);
    assert!(result.is_empty());
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_recoverable_failures_degrade_result() {
    let (_pool, factory) = factory();
    let definition = by_nationality(points_failing_for("DEN"), AggregationProcessorDefinition::sum());

    let query = factory.create_query(data_source(), &definition).unwrap();
    let result = query.run().unwrap();

    assert_eq!(query.state(), QueryState::Failure);
    assert_eq!(result.state(), QueryResultState::Failure);
    assert_eq!(result.get(&nation("GER")), Some(&Value::Float(7.0)));
    assert_eq!(result.get(&nation("DEN")), None);
}

#[test]
fn test_panicking_statistic_is_severe() {
    let (_pool, factory) = factory();
    let definition = by_nationality(points_panicking(), AggregationProcessorDefinition::sum());

    let query = factory.create_query(data_source(), &definition).unwrap();
    let err = query.run().unwrap_err();

    assert!(matches!(err, Error::SevereFailure(ProcessingFailure::Fatal(_))));
    assert_eq!(query.state(), QueryState::Error);
}

struct ExplodingAggregator;

impl Aggregator for ExplodingAggregator {
    fn add(&mut self, _value: &Value) -> Result<(), ProcessingFailure> {
        panic!("aggregator bug");
    }

    fn result(&self) -> Option<Value> {
        None
    }
}

#[test]
fn test_panicking_aggregator_is_severe() {
    let (_pool, factory) = factory();
    let exploding = AggregationProcessorDefinition::new(
        TypeTag::number(),
        TypeTag::float(),
        "Exploding",
        || Box::new(ExplodingAggregator),
    );
    let definition = by_nationality(points(), exploding);

    let query = factory.create_query(data_source(), &definition).unwrap();
    let err = query.run().unwrap_err();

    assert!(matches!(err, Error::SevereFailure(ProcessingFailure::Fatal(ref m)) if m == "aggregator bug"));
    assert_eq!(query.state(), QueryState::Error);
}

#[test]
fn test_rejected_task_is_severe() {
    let (pool, factory) = factory();
    pool.shutdown();
    let definition = by_nationality(points(), AggregationProcessorDefinition::sum());

    let query = factory.create_query(data_source(), &definition).unwrap();
    let err = query.run().unwrap_err();

    assert!(matches!(err, Error::SevereFailure(ProcessingFailure::Rejected(_))));
    assert_eq!(query.state(), QueryState::Error);
}

// =============================================================================
// Timeout and Abort
// =============================================================================

#[test]
fn test_timeout_leaves_query_timed_out() {
    let (_pool, factory) = factory();
    let gate = Gate::new();
    let definition = by_nationality(points_gated(Arc::clone(&gate)), AggregationProcessorDefinition::sum());
    let query = factory.create_query(data_source(), &definition).unwrap();

    let timeout = Duration::from_millis(100);
    let started = Instant::now();
    let err = query.run_with_timeout(timeout).unwrap_err();
    let elapsed = started.elapsed();
    gate.open();

    assert!(matches!(err, Error::Timeout(t) if t == timeout));
    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_secs(2));
    assert_eq!(query.state(), QueryState::TimedOut);
}

#[test]
fn test_abort_discards_partial_results() {
    let (_pool, factory) = factory();
    let gate = Gate::new();
    let definition = by_nationality(points_gated(Arc::clone(&gate)), AggregationProcessorDefinition::sum());
    let query = factory.create_query(data_source(), &definition).unwrap();

    let runner = {
        let query = Arc::clone(&query);
        thread::spawn(move || query.run())
    };
    wait_until_running(&query);
    query.abort();
    let result = runner.join().unwrap().unwrap();
    gate.open();

    assert_eq!(query.state(), QueryState::Aborted);
    assert_eq!(result.state(), QueryResultState::Aborted);
    assert!(result.is_empty());
}

#[test]
fn test_query_runs_only_once() {
    let (_pool, factory) = factory();
    let definition = by_nationality(points(), AggregationProcessorDefinition::sum());
    let query = factory.create_query(data_source(), &definition).unwrap();

    query.run().unwrap();
    assert!(matches!(query.run(), Err(Error::AlreadyStarted(id)) if id == query.id()));
}

// =============================================================================
// Dimension Values
// =============================================================================

#[test]
fn test_dimension_values_of_competitors() {
    let (_pool, factory) = factory();
    let definition =
        DimensionValuesQueryDefinition::new(Locale::english(), results_chain(), 2, vec![nationality()]);

    let query = factory.create_dimension_values_query(data_source(), &definition).unwrap();
    let result = query.run().unwrap();

    assert_eq!(
        result.get(&GroupKey::single("CompetitorResult.nationality")),
        Some(&Value::List(vec![Value::from("DEN"), Value::from("GER"), Value::from("NED")]))
    );
}

#[test]
fn test_dimension_values_of_regattas() {
    let (_pool, factory) = factory();
    let definition =
        DimensionValuesQueryDefinition::new(Locale::english(), results_chain(), 0, vec![boat_class()]);

    let result = factory
        .create_dimension_values_query(data_source(), &definition)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(
        result.get(&GroupKey::single("Regatta.boatClass")),
        Some(&Value::List(vec![Value::from("49er"), Value::from("Laser")]))
    );
}
