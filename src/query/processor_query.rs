//! Query backed by a processor chain
//!
//! The chain runs on one dedicated worker thread per query. The caller of
//! [`Query::run_with_timeout`] blocks on the query monitor until the result
//! receiver reports completion or a severe failure, until [`Query::abort`] is
//! called, or until the deadline passes.
//!
//! All transitions out of `Running` happen under the monitor lock; the first
//! one wins. A deadline only turns the query into `TimedOut` if it is still
//! `Running` when the waiting caller re-acquires the lock, so a completion
//! signalled before that is never reported as a timeout.

use super::{AdditionalQueryData, Query, QueryId, QueryResult, QueryResultState, QueryState, QueryType};
use crate::error::{Error, ProcessingFailure, Result};
use crate::messages::{Locale, MapStringMessages, StringMessages};
use crate::metrics;
use crate::processing::{OverwritingResultDataBuilder, Processor, ResultMap};
use crate::types::{Element, TypeTag};
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

// ============================================================================
// Query Monitor
// ============================================================================

#[derive(Debug)]
struct MonitorState {
    state: QueryState,
    results: ResultMap,
    failures: Vec<ProcessingFailure>,
    severe_failure: Option<ProcessingFailure>,
}

/// State shared between the query, its result receiver and the waiting caller
#[derive(Debug)]
struct QueryMonitor {
    inner: Mutex<MonitorState>,
    changed: Condvar,
}

impl QueryMonitor {
    fn new() -> Self {
        Self {
            inner: Mutex::new(MonitorState {
                state: QueryState::NotStarted,
                results: ResultMap::new(),
                failures: Vec::new(),
                severe_failure: None,
            }),
            changed: Condvar::new(),
        }
    }

    fn state(&self) -> QueryState {
        self.inner.lock().state
    }

    /// Block until the state leaves `Running` or the deadline passes
    fn await_terminal_state(&self, deadline: Option<Instant>) -> QueryState {
        let mut inner = self.inner.lock();
        while inner.state == QueryState::Running {
            match deadline {
                None => self.changed.wait(&mut inner),
                Some(deadline) => {
                    if self.changed.wait_until(&mut inner, deadline).timed_out() {
                        if inner.state == QueryState::Running {
                            inner.state = QueryState::TimedOut;
                            inner.results.clear();
                        }
                        break;
                    }
                },
            }
        }
        inner.state
    }
}

// ============================================================================
// Result Receiver
// ============================================================================

/// Terminal stage of every chain: merges partial results and classifies failures
struct ResultReceiver {
    query_id: QueryId,
    result_type: TypeTag,
    monitor: Arc<QueryMonitor>,
}

impl Processor<ResultMap> for ResultReceiver {
    fn process_element(&self, results: ResultMap) {
        let mut inner = self.monitor.inner.lock();
        if inner.state == QueryState::Running {
            inner.results.extend(results);
        }
    }

    fn on_failure(&self, failure: ProcessingFailure) {
        if failure == ProcessingFailure::Interrupted {
            return;
        }
        metrics::record_failure(failure.severity());
        let mut inner = self.monitor.inner.lock();
        if failure.is_severe() {
            error!(query_id = %self.query_id, error = %failure, "Severe failure during query processing");
            if inner.state == QueryState::Running {
                inner.state = QueryState::Error;
                inner.severe_failure = Some(failure);
                inner.results.clear();
                self.monitor.changed.notify_all();
            }
        } else {
            warn!(query_id = %self.query_id, error = %failure, "Element could not be processed");
            inner.failures.push(failure);
        }
    }

    fn finish(&self) -> std::result::Result<(), ProcessingFailure> {
        let mut inner = self.monitor.inner.lock();
        if inner.state == QueryState::Running {
            inner.state = if inner.failures.is_empty() {
                QueryState::Normal
            } else {
                QueryState::Failure
            };
            self.monitor.changed.notify_all();
        }
        Ok(())
    }

    fn abort(&self) {
        self.monitor.inner.lock().results.clear();
    }

    fn is_aborted(&self) -> bool {
        matches!(self.monitor.state(), QueryState::Aborted | QueryState::TimedOut)
    }

    fn input_type(&self) -> TypeTag {
        self.result_type.clone()
    }

    fn result_type(&self) -> TypeTag {
        self.result_type.clone()
    }
}

// ============================================================================
// Processor Query
// ============================================================================

/// A single-use query executing a processor chain against one data source
pub struct ProcessorQuery {
    id: QueryId,
    query_type: QueryType,
    result_type: TypeTag,
    data_source: Element,
    head: Arc<dyn Processor<Element>>,
    monitor: Arc<QueryMonitor>,
    locale: Locale,
    messages: Arc<dyn StringMessages>,
    additional_data: Option<AdditionalQueryData>,
}

impl ProcessorQuery {
    /// Start building a query of `query_type` producing values of `result_type`
    pub fn builder(data_source: Element, query_type: QueryType, result_type: TypeTag) -> ProcessorQueryBuilder {
        ProcessorQueryBuilder {
            data_source,
            query_type,
            result_type,
            locale: Locale::english(),
            messages: Arc::new(MapStringMessages::new()),
            additional_data: None,
        }
    }

    fn start(&self) -> Result<Option<QueryResult>> {
        let mut inner = self.monitor.inner.lock();
        match inner.state {
            QueryState::NotStarted => {
                inner.state = QueryState::Running;
                Ok(None)
            },
            QueryState::Aborted => Ok(Some(QueryResult::aborted(self.result_type.name()))),
            _ => Err(Error::AlreadyStarted(self.id)),
        }
    }

    fn spawn_worker(&self) -> Result<()> {
        let head = Arc::clone(&self.head);
        let data_source = self.data_source.clone();
        let query_id = self.id;
        let spawned = thread::Builder::new()
            .name(format!("datamining-query-{}", self.id))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    head.process_element(data_source);
                    head.finish()
                }));
                match outcome {
                    Ok(Ok(())) => debug!(query_id = %query_id, "Processor chain finished"),
                    Ok(Err(failure)) => head.on_failure(failure),
                    Err(payload) => head.on_failure(ProcessingFailure::from_panic(payload)),
                }
            });

        if let Err(e) = spawned {
            let mut inner = self.monitor.inner.lock();
            inner.state = QueryState::Error;
            return Err(Error::Io(e));
        }
        Ok(())
    }

    fn build_result(&self, state: QueryState, elapsed: Duration) -> QueryResult {
        let results = std::mem::take(&mut self.monitor.inner.lock().results);
        let mut builder = OverwritingResultDataBuilder::new();
        self.head.additional_result_data(&mut builder);
        let additional = builder.build(&self.locale, self.messages.as_ref(), elapsed);
        let result_state = if state == QueryState::Failure {
            QueryResultState::Failure
        } else {
            QueryResultState::Normal
        };
        QueryResult::new(result_state, self.result_type.name(), results, Some(additional))
    }
}

impl Query for ProcessorQuery {
    fn id(&self) -> QueryId {
        self.id
    }

    fn query_type(&self) -> QueryType {
        self.query_type
    }

    fn state(&self) -> QueryState {
        self.monitor.state()
    }

    fn result_type(&self) -> &TypeTag {
        &self.result_type
    }

    fn additional_data(&self) -> Option<&AdditionalQueryData> {
        self.additional_data.as_ref()
    }

    fn run_with_timeout(&self, timeout: Duration) -> Result<QueryResult> {
        if let Some(aborted) = self.start()? {
            debug!(query_id = %self.id, "Query aborted before it was run");
            return Ok(aborted);
        }

        let started = Instant::now();
        metrics::inc_running_queries();
        let outcome = self.spawn_worker().map(|()| {
            let deadline = if timeout.is_zero() {
                None
            } else {
                started.checked_add(timeout)
            };
            self.monitor.await_terminal_state(deadline)
        });
        metrics::dec_running_queries();
        let state = outcome?;

        let elapsed = started.elapsed();
        metrics::record_query(self.query_type.as_str(), state.as_str(), elapsed.as_secs_f64());

        match state {
            QueryState::Normal | QueryState::Failure => {
                info!(
                    query_id = %self.id,
                    state = %state,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Query finished"
                );
                Ok(self.build_result(state, elapsed))
            },
            QueryState::Error => {
                self.head.abort();
                let failure = self
                    .monitor
                    .inner
                    .lock()
                    .severe_failure
                    .clone()
                    .unwrap_or_else(|| ProcessingFailure::Fatal("unknown".to_string()));
                Err(Error::SevereFailure(failure))
            },
            QueryState::TimedOut => {
                warn!(query_id = %self.id, timeout_ms = timeout.as_millis() as u64, "Query timed out");
                self.head.abort();
                Err(Error::Timeout(timeout))
            },
            // Only terminal states leave the wait
            QueryState::Aborted | QueryState::NotStarted | QueryState::Running => {
                info!(query_id = %self.id, "Query aborted");
                Ok(QueryResult::aborted(self.result_type.name()))
            },
        }
    }

    fn abort(&self) {
        let aborted = {
            let mut inner = self.monitor.inner.lock();
            let running = matches!(inner.state, QueryState::NotStarted | QueryState::Running);
            if running {
                inner.state = QueryState::Aborted;
                inner.results.clear();
                self.monitor.changed.notify_all();
            }
            running
        };
        if aborted {
            debug!(query_id = %self.id, "Aborting processor chain");
            self.head.abort();
        }
    }
}

impl std::fmt::Debug for ProcessorQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorQuery")
            .field("id", &self.id)
            .field("query_type", &self.query_type)
            .field("result_type", &self.result_type)
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`ProcessorQuery`]
pub struct ProcessorQueryBuilder {
    data_source: Element,
    query_type: QueryType,
    result_type: TypeTag,
    locale: Locale,
    messages: Arc<dyn StringMessages>,
    additional_data: Option<AdditionalQueryData>,
}

impl ProcessorQueryBuilder {
    /// Locale used to render additional result data
    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    /// Messages used to render additional result data
    pub fn with_messages(mut self, messages: Arc<dyn StringMessages>) -> Self {
        self.messages = messages;
        self
    }

    /// Descriptor of what the query computes
    pub fn with_additional_data(mut self, data: AdditionalQueryData) -> Self {
        self.additional_data = Some(data);
        self
    }

    /// Build the query
    ///
    /// `chain` receives the result receiver and returns the head of the
    /// processor chain ending in it.
    pub fn build<F>(self, chain: F) -> Result<ProcessorQuery>
    where
        F: FnOnce(Arc<dyn Processor<ResultMap>>) -> Result<Arc<dyn Processor<Element>>>,
    {
        let id = QueryId::new();
        let monitor = Arc::new(QueryMonitor::new());
        let receiver: Arc<dyn Processor<ResultMap>> = Arc::new(ResultReceiver {
            query_id: id,
            result_type: self.result_type.clone(),
            monitor: Arc::clone(&monitor),
        });
        let head = chain(receiver)?;
        Ok(ProcessorQuery {
            id,
            query_type: self.query_type,
            result_type: self.result_type,
            data_source: self.data_source,
            head,
            monitor,
            locale: self.locale,
            messages: self.messages,
            additional_data: self.additional_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GroupKey, Value};
    use std::sync::atomic::{AtomicBool, Ordering};

    enum Script {
        Emit(ResultMap),
        EmitWithFailure(ResultMap, ProcessingFailure),
        Block,
        Panic,
    }

    /// Head stage that plays a script instead of retrieving anything
    struct ScriptedHead {
        script: Script,
        receiver: Arc<dyn Processor<ResultMap>>,
        aborted: AtomicBool,
    }

    impl Processor<Element> for ScriptedHead {
        fn process_element(&self, _element: Element) {
            match &self.script {
                Script::Emit(results) => self.receiver.process_element(results.clone()),
                Script::EmitWithFailure(results, failure) => {
                    self.receiver.process_element(results.clone());
                    self.receiver.on_failure(failure.clone());
                },
                Script::Block => {
                    while !self.is_aborted() {
                        thread::sleep(Duration::from_millis(5));
                    }
                },
                Script::Panic => panic!("broken retriever"),
            }
        }

        fn on_failure(&self, failure: ProcessingFailure) {
            self.receiver.on_failure(failure);
        }

        fn finish(&self) -> std::result::Result<(), ProcessingFailure> {
            if self.is_aborted() {
                return Err(ProcessingFailure::Interrupted);
            }
            self.receiver.finish()
        }

        fn abort(&self) {
            self.aborted.store(true, Ordering::SeqCst);
            self.receiver.abort();
        }

        fn is_aborted(&self) -> bool {
            self.aborted.load(Ordering::SeqCst)
        }

        fn input_type(&self) -> TypeTag {
            TypeTag::any()
        }

        fn result_type(&self) -> TypeTag {
            TypeTag::float()
        }

        fn additional_result_data(&self, builder: &mut OverwritingResultDataBuilder) {
            builder.set_retrieved_data_amount(3);
        }
    }

    fn query(script: Script) -> ProcessorQuery {
        ProcessorQuery::builder(Element::new(TypeTag::any(), ()), QueryType::Statistic, TypeTag::float())
            .build(|receiver| {
                Ok(Arc::new(ScriptedHead {
                    script,
                    receiver,
                    aborted: AtomicBool::new(false),
                }) as Arc<dyn Processor<Element>>)
            })
            .unwrap()
    }

    fn results() -> ResultMap {
        let mut results = ResultMap::new();
        results.insert(GroupKey::single("Kiel"), Value::Float(4.5));
        results
    }

    #[test]
    fn test_normal_completion() {
        let query = query(Script::Emit(results()));
        let result = query.run().unwrap();

        assert_eq!(query.state(), QueryState::Normal);
        assert_eq!(result.state(), QueryResultState::Normal);
        assert_eq!(result.get(&GroupKey::single("Kiel")), Some(&Value::Float(4.5)));
        assert_eq!(result.additional_data().unwrap().retrieved_data_amount, 3);
    }

    #[test]
    fn test_recoverable_failure_keeps_result() {
        let query = query(Script::EmitWithFailure(
            results(),
            ProcessingFailure::element("bad leg"),
        ));
        let result = query.run().unwrap();

        assert_eq!(query.state(), QueryState::Failure);
        assert_eq!(result.state(), QueryResultState::Failure);
        assert!(!result.is_empty());
    }

    #[test]
    fn test_severe_failure_raises() {
        let query = query(Script::EmitWithFailure(
            results(),
            ProcessingFailure::Rejected("pool shut down".into()),
        ));
        let err = query.run().unwrap_err();

        assert!(matches!(err, Error::SevereFailure(ProcessingFailure::Rejected(_))));
        assert_eq!(query.state(), QueryState::Error);
    }

    #[test]
    fn test_panic_is_severe() {
        let query = query(Script::Panic);
        let err = query.run().unwrap_err();
        assert!(matches!(err, Error::SevereFailure(ProcessingFailure::Fatal(_))));
        assert_eq!(query.state(), QueryState::Error);
    }

    #[test]
    fn test_timeout() {
        let query = query(Script::Block);
        let timeout = Duration::from_millis(50);
        let started = Instant::now();
        let err = query.run_with_timeout(timeout).unwrap_err();

        assert!(started.elapsed() >= timeout);
        assert!(matches!(err, Error::Timeout(t) if t == timeout));
        assert_eq!(query.state(), QueryState::TimedOut);
    }

    #[test]
    fn test_abort_while_running() {
        let query = Arc::new(query(Script::Block));
        let runner = {
            let query = Arc::clone(&query);
            thread::spawn(move || query.run())
        };
        while query.state() != QueryState::Running {
            thread::sleep(Duration::from_millis(1));
        }
        query.abort();

        let result = runner.join().unwrap().unwrap();
        assert_eq!(result.state(), QueryResultState::Aborted);
        assert!(result.is_empty());
        assert_eq!(query.state(), QueryState::Aborted);
    }

    #[test]
    fn test_abort_before_run() {
        let query = query(Script::Emit(results()));
        query.abort();
        let result = query.run().unwrap();
        assert_eq!(result.state(), QueryResultState::Aborted);
        assert!(result.is_empty());
    }

    #[test]
    fn test_query_is_single_use() {
        let query = query(Script::Emit(results()));
        query.run().unwrap();
        assert!(matches!(query.run(), Err(Error::AlreadyStarted(id)) if id == query.id()));
    }

    #[test]
    fn test_completion_before_deadline_check_wins() {
        let monitor = QueryMonitor::new();
        monitor.inner.lock().state = QueryState::Normal;
        let past = Instant::now() - Duration::from_millis(10);
        assert_eq!(monitor.await_terminal_state(Some(past)), QueryState::Normal);
    }

    #[test]
    fn test_expired_deadline_times_out_running_query() {
        let monitor = QueryMonitor::new();
        monitor.inner.lock().state = QueryState::Running;
        let past = Instant::now() - Duration::from_millis(10);
        assert_eq!(monitor.await_terminal_state(Some(past)), QueryState::TimedOut);
    }
}
