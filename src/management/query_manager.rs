//! Admission control for running queries
//!
//! Each session may run at most one query at a time: a new query of a session
//! aborts the query the session is still running before it is dispatched.

use crate::error::{Error, Result};
use crate::metrics;
use crate::query::{DataMiningSession, Query, QueryResult, QueryType};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Runs queries and keeps track of the running ones
pub trait QueryManager: Send + Sync {
    /// Abort the query `session` is still running, then run `query`
    ///
    /// Blocks until `query` ended.
    fn run_new_and_abort_previous(
        &self,
        session: DataMiningSession,
        query: Arc<dyn Query>,
    ) -> Result<QueryResult>;

    /// Number of running queries
    fn number_of_running_queries(&self) -> usize;

    /// Number of running queries of `query_type`
    fn number_of_running_queries_of_type(&self, query_type: QueryType) -> usize;

    /// Abort an arbitrary running query of `query_type`; returns whether one was aborted
    fn abort_random_query_of_type(&self, query_type: QueryType) -> bool;

    /// Abort every running query; returns how many were aborted
    fn abort_all_queries(&self) -> usize;
}

// ============================================================================
// Single Query Per Session
// ============================================================================

/// Keeps at most one running query per session
pub struct SingleQueryPerSessionManager {
    running: DashMap<DataMiningSession, Arc<dyn Query>>,
    timeout: Duration,
}

impl SingleQueryPerSessionManager {
    /// Create a manager running queries with `timeout` (zero means none)
    pub fn new(timeout: Duration) -> Self {
        Self {
            running: DashMap::new(),
            timeout,
        }
    }

    /// Timeout applied to every query
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn running_queries(&self, query_type: Option<QueryType>) -> Vec<Arc<dyn Query>> {
        self.running
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .filter(|query| !query.state().is_terminal())
            .filter(|query| query_type.map_or(true, |t| query.query_type() == t))
            .collect()
    }
}

impl QueryManager for SingleQueryPerSessionManager {
    fn run_new_and_abort_previous(
        &self,
        session: DataMiningSession,
        query: Arc<dyn Query>,
    ) -> Result<QueryResult> {
        let previous = match self.running.entry(session) {
            Entry::Occupied(entry) if entry.get().id() == query.id() => {
                drop(entry);
                return query.run_with_timeout(self.timeout);
            },
            Entry::Occupied(mut entry) => Some(entry.insert(Arc::clone(&query))),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&query));
                None
            },
        };
        if let Some(previous) = previous {
            if !previous.state().is_terminal() {
                info!(
                    session = %session,
                    previous = %previous.id(),
                    query_id = %query.id(),
                    "Aborting previous query of session"
                );
                metrics::record_aborted_query("superseded");
                previous.abort();
            }
        }

        debug!(session = %session, query_id = %query.id(), "Running query");
        let result = query.run_with_timeout(self.timeout);
        self.running
            .remove_if(&session, |_, running| running.id() == query.id());
        result
    }

    fn number_of_running_queries(&self) -> usize {
        self.running_queries(None).len()
    }

    fn number_of_running_queries_of_type(&self, query_type: QueryType) -> usize {
        self.running_queries(Some(query_type)).len()
    }

    fn abort_random_query_of_type(&self, query_type: QueryType) -> bool {
        let candidates = self.running_queries(Some(query_type));
        match candidates.choose(&mut rand::thread_rng()) {
            Some(victim) => {
                info!(query_id = %victim.id(), query_type = %query_type, "Aborting query");
                victim.abort();
                true
            },
            None => false,
        }
    }

    fn abort_all_queries(&self) -> usize {
        let queries = self.running_queries(None);
        for query in &queries {
            query.abort();
        }
        queries.len()
    }
}

// ============================================================================
// Strategy Per Query Type
// ============================================================================

/// Delegates to one manager per query type
///
/// A session may run one query of each type at the same time.
pub struct StrategyPerQueryTypeManager {
    managers: HashMap<QueryType, Arc<dyn QueryManager>>,
}

impl StrategyPerQueryTypeManager {
    /// Create from explicit per-type managers
    pub fn new(managers: HashMap<QueryType, Arc<dyn QueryManager>>) -> Self {
        Self { managers }
    }

    /// One [`SingleQueryPerSessionManager`] per query type
    pub fn for_all_types(timeout: Duration) -> Self {
        let managers = QueryType::ALL
            .iter()
            .map(|&query_type| {
                let manager: Arc<dyn QueryManager> = Arc::new(SingleQueryPerSessionManager::new(timeout));
                (query_type, manager)
            })
            .collect();
        Self::new(managers)
    }

    fn manager(&self, query_type: QueryType) -> Result<&Arc<dyn QueryManager>> {
        self.managers
            .get(&query_type)
            .ok_or_else(|| Error::Configuration(format!("no query manager for query type '{}'", query_type)))
    }
}

impl QueryManager for StrategyPerQueryTypeManager {
    fn run_new_and_abort_previous(
        &self,
        session: DataMiningSession,
        query: Arc<dyn Query>,
    ) -> Result<QueryResult> {
        self.manager(query.query_type())?
            .run_new_and_abort_previous(session, query)
    }

    fn number_of_running_queries(&self) -> usize {
        self.managers
            .values()
            .map(|manager| manager.number_of_running_queries())
            .sum()
    }

    fn number_of_running_queries_of_type(&self, query_type: QueryType) -> usize {
        self.managers
            .get(&query_type)
            .map_or(0, |manager| manager.number_of_running_queries_of_type(query_type))
    }

    fn abort_random_query_of_type(&self, query_type: QueryType) -> bool {
        self.managers
            .get(&query_type)
            .is_some_and(|manager| manager.abort_random_query_of_type(query_type))
    }

    fn abort_all_queries(&self) -> usize {
        self.managers
            .values()
            .map(|manager| manager.abort_all_queries())
            .sum()
    }
}
