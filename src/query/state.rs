//! Query identity and lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique id of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryId(Uuid);

impl QueryId {
    /// Generate a new id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying uuid
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque token identifying the caller session of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataMiningSession(Uuid);

impl DataMiningSession {
    /// Create a new session token
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Session for a known uuid
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for DataMiningSession {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DataMiningSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of work a query performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryType {
    /// Aggregates a statistic over grouped data
    Statistic,
    /// Collects the distinct values of dimensions
    DimensionValues,
}

impl QueryType {
    /// All query types
    pub const ALL: [QueryType; 2] = [QueryType::Statistic, QueryType::DimensionValues];

    /// Label used for metrics and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Statistic => "statistic",
            QueryType::DimensionValues => "dimension_values",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a query
///
/// `NotStarted -> Running -> {Normal, Failure, Error, TimedOut, Aborted}`. A
/// query that is aborted before it runs goes straight to `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryState {
    /// Not run yet
    NotStarted,
    /// Processing on the worker
    Running,
    /// Completed without failures
    Normal,
    /// Completed with recoverable failures
    Failure,
    /// Stopped by a severe failure
    Error,
    /// Did not complete within its timeout
    TimedOut,
    /// Stopped on request
    Aborted,
}

impl QueryState {
    /// Whether the state is final
    pub fn is_terminal(&self) -> bool {
        !matches!(self, QueryState::NotStarted | QueryState::Running)
    }

    /// Label used for metrics and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryState::NotStarted => "not_started",
            QueryState::Running => "running",
            QueryState::Normal => "normal",
            QueryState::Failure => "failure",
            QueryState::Error => "error",
            QueryState::TimedOut => "timed_out",
            QueryState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State reported in a [`QueryResult`](super::QueryResult)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryResultState {
    /// Complete result
    Normal,
    /// Best-effort result; some elements failed
    Failure,
    /// Empty result of an aborted query
    Aborted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!QueryState::NotStarted.is_terminal());
        assert!(!QueryState::Running.is_terminal());
        for state in [
            QueryState::Normal,
            QueryState::Failure,
            QueryState::Error,
            QueryState::TimedOut,
            QueryState::Aborted,
        ] {
            assert!(state.is_terminal(), "{}", state);
        }
    }

    #[test]
    fn test_query_ids_are_unique() {
        assert_ne!(QueryId::new(), QueryId::new());
        assert_ne!(DataMiningSession::new(), DataMiningSession::new());
    }
}
