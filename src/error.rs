//! Error types for the data-mining engine

use std::time::Duration;

use thiserror::Error;

use crate::query::QueryId;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No provider is registered for the data source type a chain starts from
    #[error("No data source provider found for '{0}'")]
    NoDataSourceProvider(String),

    /// A wire-level identifier could not be resolved against the registries
    #[error("Could not resolve {component}: {identifier}")]
    Unresolved {
        /// Kind of component that was looked up (retriever chain, statistic, ...)
        component: &'static str,
        /// The identifier that failed to resolve
        identifier: String,
    },

    /// A retriever chain definition whose levels do not compose
    #[error("Invalid retriever chain: {0}")]
    InvalidRetrieverChain(String),

    /// The parts of a query definition do not fit together
    #[error("Incompatible query definition: {0}")]
    IncompatibleDefinition(String),

    /// The query did not reach a terminal state within its timeout
    #[error("Query processing timed out after {0:?}")]
    Timeout(Duration),

    /// A severe failure forced the query into the error state
    #[error("Severe failure during query processing: {0}")]
    SevereFailure(#[source] ProcessingFailure),

    /// Queries are single use
    #[error("Query {0} has already been started")]
    AlreadyStarted(QueryId),

    /// A blocking query task could not be joined
    #[error("Query task failed: {0}")]
    TaskJoin(String),

    /// IO error (worker thread creation)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures reported through a processor chain
///
/// Recoverable failures are collected and degrade the result. Severe failures
/// force the owning query into the error state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessingFailure {
    /// Processing of a single element failed
    #[error("Element processing failed: {0}")]
    Element(String),

    /// The worker pool refused to accept a task
    #[error("Task rejected by worker pool: {0}")]
    Rejected(String),

    /// A domain callback panicked
    #[error("Fatal processing error: {0}")]
    Fatal(String),

    /// Processing stopped because the chain was aborted
    #[error("Processing interrupted")]
    Interrupted,
}

impl ProcessingFailure {
    /// Create a recoverable element failure
    pub fn element(message: impl Into<String>) -> Self {
        ProcessingFailure::Element(message.into())
    }

    /// Whether the failure must abort the whole query
    pub fn is_severe(&self) -> bool {
        matches!(self, ProcessingFailure::Rejected(_) | ProcessingFailure::Fatal(_))
    }

    /// Label used for metrics
    pub fn severity(&self) -> &'static str {
        match self {
            ProcessingFailure::Element(_) => "recoverable",
            ProcessingFailure::Rejected(_) | ProcessingFailure::Fatal(_) => "severe",
            ProcessingFailure::Interrupted => "interrupted",
        }
    }

    /// Convert a caught panic payload into a fatal failure
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        ProcessingFailure::Fatal(message)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
