//! Datamining Engine - Type-tagged data-mining queries over in-memory domain objects
//!
//! This library provides a query engine that:
//! - Registers dimensions and statistics as typed functions on domain types
//! - Walks retriever chains from a data source down to the analyzed objects
//! - Groups, extracts and aggregates values in parallel processor chains
//! - Runs queries with timeouts, abort and one running query per session
//! - Aborts queries when free memory runs low

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

/// Pluggable components: retriever chains and aggregators
pub mod components;

/// Dimensions, statistics and their registry
pub mod functions;

/// Locales and localized message bundles
pub mod messages;

/// Processor chains and the shared worker pool
pub mod processing;

/// Query definitions, execution and results
pub mod query;

/// Component registries, query manager and memory monitor
pub mod management;

/// Server façade tying registries and queries together
pub mod server;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

// Re-export main types
pub use components::{AggregationProcessorDefinition, DataRetrieverChainDefinition};
pub use config::Config;
pub use error::{Error, ProcessingFailure, Result};
pub use functions::{Function, FunctionRegistry};
pub use query::{
    DataMiningSession, DimensionValuesQueryDefinition, Query, QueryResult, QueryResultState,
    QueryState, QueryType, StatisticQueryDefinition, StatisticQueryDefinitionDto,
};
pub use server::DataMiningServer;
pub use types::{Element, GroupKey, TypeTag, Value};
