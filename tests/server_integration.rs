//! Data Mining Server Integration Tests
//!
//! Exercises the server façade the way a request handling layer uses it.
//!
//! # Test Coverage
//!
//! 1. **Server Configuration** - Load from a TOML file, validation
//! 2. **Query Execution** - Resolve a DTO, build and run the query
//! 3. **Sessions** - A new query aborts the previous query of its session
//! 4. **Async Façade** - Running queries from a tokio runtime
//! 5. **Dimension Values** - Built through the server
//! 6. **Metrics** - Query outcomes show up in the Prometheus output
//! 7. **Shutdown** - Running queries are aborted

mod common;

use common::*;
use datamining_engine::components::{AggregationProcessorDefinition, DataRetrieverChainDefinition};
use datamining_engine::config::Config;
use datamining_engine::management::{FixedDataSourceProvider, PredefinedQueryIdentifier};
use datamining_engine::messages::{Locale, MapStringMessages, StringMessages};
use datamining_engine::{
    metrics, DataMiningServer, DataMiningSession, DimensionValuesQueryDefinition, Error, GroupKey, Query,
    QueryResultState, QueryState, QueryType, StatisticQueryDefinition, Value,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// =============================================================================
// Test Server
// =============================================================================

struct TestServer {
    server: Arc<DataMiningServer>,
    chain: DataRetrieverChainDefinition,
}

impl TestServer {
    fn new(config: &Config) -> Self {
        init_tracing();
        let server = Arc::new(DataMiningServer::new(config).unwrap());
        let chain = results_chain();
        server.functions().register_all(functions());
        server.retriever_chains().register(chain.clone());
        server
            .data_source_providers()
            .register(Arc::new(FixedDataSourceProvider::new(data_source())));
        Self { server, chain }
    }

    fn with_defaults() -> Self {
        let mut config = Config::default();
        config.executor.worker_threads = 4;
        config.memory_monitor.enabled = false;
        Self::new(&config)
    }

    fn statistic(&self, statistic: datamining_engine::Function) -> StatisticQueryDefinition {
        StatisticQueryDefinition::new(
            Locale::english(),
            self.chain.clone(),
            statistic,
            AggregationProcessorDefinition::sum(),
        )
        .with_group_by(nationality())
    }

    fn start(&self, session: DataMiningSession, query: Arc<dyn Query>) -> thread::JoinHandle<datamining_engine::Result<QueryResultState>> {
        let server = Arc::clone(&self.server);
        let running = Arc::clone(&query);
        let handle = thread::spawn(move || {
            server
                .run_new_query_and_abort_previous(session, running)
                .map(|result| result.state())
        });
        let deadline = Instant::now() + Duration::from_secs(5);
        while query.state() != QueryState::Running {
            assert!(Instant::now() < deadline, "query never started");
            thread::sleep(Duration::from_millis(1));
        }
        handle
    }
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_server_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("datamining.toml");
    std::fs::write(
        &path,
        "[executor]\nworker_threads = 3\n\n[query]\ndefault_timeout_ms = 100\n\n[memory_monitor]\nenabled = false\n",
    )
    .unwrap();

    let config = Config::from_file(path.to_str().unwrap()).unwrap();
    assert_eq!(config.executor.worker_threads, 3);
    let test = TestServer::new(&config);

    let gate = Gate::new();
    let query = test.server.create_query(&test.statistic(points_gated(Arc::clone(&gate)))).unwrap();
    let err = test
        .server
        .run_new_query_and_abort_previous(DataMiningSession::new(), Arc::clone(&query))
        .unwrap_err();
    gate.open();

    assert!(matches!(err, Error::Timeout(t) if t == Duration::from_millis(100)));
    assert_eq!(query.state(), QueryState::TimedOut);
}

#[test]
fn test_invalid_thresholds_rejected() {
    let mut config = Config::default();
    config.memory_monitor.red_threshold = 0.5;
    assert!(matches!(DataMiningServer::new(&config), Err(Error::Configuration(_))));
}

// =============================================================================
// Query Execution
// =============================================================================

#[test]
fn test_run_predefined_query() {
    let test = TestServer::with_defaults();
    let dto = test.statistic(points()).to_dto();
    test.server
        .predefined_queries()
        .register(PredefinedQueryIdentifier::new("pointsPerNation", "Points per nation"), dto);

    let dto = test.server.predefined_query_definition("pointsPerNation").unwrap();
    let definition = test.server.query_definition_for_dto(&dto).unwrap();
    let query = test.server.create_query(&definition).unwrap();
    let result = test
        .server
        .run_new_query_and_abort_previous(DataMiningSession::new(), query)
        .unwrap();

    assert_eq!(result.state(), QueryResultState::Normal);
    assert_eq!(result.result_type(), "Float");
    assert_eq!(result.get(&GroupKey::single("GER")), Some(&Value::Float(7.0)));
    assert_eq!(test.server.number_of_running_queries(), 0);
}

#[test]
fn test_localized_result_signifier() {
    let test = TestServer::with_defaults();
    let german: Arc<dyn StringMessages> = Arc::new(
        MapStringMessages::new()
            .with_message("de", "points", "Punkte")
            .with_message("de", "Sum", "Summe"),
    );
    assert!(test.server.add_string_messages(Arc::clone(&german)));

    let definition = StatisticQueryDefinition::new(
        Locale::new("de").unwrap(),
        test.chain.clone(),
        points(),
        AggregationProcessorDefinition::sum(),
    );
    let result = test.server.create_query(&definition).unwrap().run().unwrap();
    assert_eq!(result.additional_data().unwrap().result_signifier, "Punkte (Summe)");

    assert!(test.server.remove_string_messages(&german));
    assert!(!test.server.remove_string_messages(&german));
}

#[test]
fn test_query_result_serializes_to_json() {
    let test = TestServer::with_defaults();
    let query = test.server.create_query(&test.statistic(points())).unwrap();
    let result = query.run().unwrap();

    let json = serde_json::to_string(&result).unwrap();
    let decoded: datamining_engine::QueryResult = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, result);
}

// =============================================================================
// Sessions
// =============================================================================

#[test]
fn test_new_query_aborts_previous_of_session() {
    let test = TestServer::with_defaults();
    let gate = Gate::new();
    let session = DataMiningSession::new();

    let first = test.server.create_query(&test.statistic(points_gated(Arc::clone(&gate)))).unwrap();
    let first_run = test.start(session, Arc::clone(&first));
    let second = test.server.create_query(&test.statistic(points_gated(Arc::clone(&gate)))).unwrap();
    let second_run = test.start(session, Arc::clone(&second));

    assert_eq!(first_run.join().unwrap().unwrap(), QueryResultState::Aborted);
    assert_eq!(first.state(), QueryState::Aborted);
    assert_eq!(test.server.number_of_running_queries_of_type(QueryType::Statistic), 1);

    gate.open();
    assert_eq!(second_run.join().unwrap().unwrap(), QueryResultState::Normal);
    assert_eq!(test.server.number_of_running_queries(), 0);
}

#[test]
fn test_statistic_and_dimension_values_queries_coexist_in_session() {
    let test = TestServer::with_defaults();
    let gate = Gate::new();
    let session = DataMiningSession::new();

    let statistic = test.server.create_query(&test.statistic(points_gated(Arc::clone(&gate)))).unwrap();
    let statistic_run = test.start(session, Arc::clone(&statistic));

    let definition =
        DimensionValuesQueryDefinition::new(Locale::english(), test.chain.clone(), 0, vec![regatta_name()]);
    let values = test.server.create_dimension_values_query(&definition).unwrap();
    let result = test
        .server
        .run_new_query_and_abort_previous(session, values)
        .unwrap();

    assert_eq!(
        result.get(&GroupKey::single("Regatta.name")),
        Some(&Value::List(vec![Value::from("Kieler Woche"), Value::from("Warnemünder Woche")]))
    );
    assert_eq!(statistic.state(), QueryState::Running);

    gate.open();
    assert_eq!(statistic_run.join().unwrap().unwrap(), QueryResultState::Normal);
}

// =============================================================================
// Async Façade
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_queries() {
    let test = TestServer::with_defaults();
    let session = DataMiningSession::new();

    let query = test.server.create_query(&test.statistic(points())).unwrap();
    let result = test
        .server
        .run_new_query_and_abort_previous_async(session, query)
        .await
        .unwrap();
    assert_eq!(result.get(&GroupKey::single("NED")), Some(&Value::Float(5.0)));

    let failing = test.server.create_query(&test.statistic(points_panicking())).unwrap();
    let err = test
        .server
        .run_new_query_and_abort_previous_async(session, failing)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SevereFailure(_)));
}

// =============================================================================
// Metrics and Shutdown
// =============================================================================

#[test]
fn test_metrics_record_queries() {
    let test = TestServer::with_defaults();
    test.server
        .create_query(&test.statistic(points()))
        .unwrap()
        .run()
        .unwrap();

    let output = metrics::gather_metrics().unwrap();
    assert!(output.contains("datamining_queries_total"));
    assert!(output.contains("datamining_query_duration_seconds"));
}

#[test]
fn test_shutdown_aborts_running_queries() {
    let test = TestServer::with_defaults();
    let gate = Gate::new();
    let query = test.server.create_query(&test.statistic(points_gated(Arc::clone(&gate)))).unwrap();
    let run = test.start(DataMiningSession::new(), Arc::clone(&query));

    test.server.shutdown();
    assert_eq!(run.join().unwrap().unwrap(), QueryResultState::Aborted);
    gate.open();

    let after = test.server.create_query(&test.statistic(points())).unwrap();
    assert!(matches!(after.run(), Err(Error::SevereFailure(_))));
}
