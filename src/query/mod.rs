//! Queries
//!
//! A query is a single-use execution of a processor chain against one data
//! source instance:
//!
//! ```text
//! StatisticQueryDefinition ──► QueryFactory ──► ProcessorQuery ──run──► QueryResult
//!                                                     │
//!                                   worker thread: retrieval ─► ... ─► result receiver
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let factory = QueryFactory::new(pool, messages);
//! let query = factory.create_query(data_source, &definition)?;
//! let result = query.run_with_timeout(Duration::from_secs(30))?;
//! for (group, value) in result.sorted_results() {
//!     println!("{group}: {value}");
//! }
//! ```

pub mod definition;
pub mod factory;
pub mod processor_query;
pub mod result;
pub mod state;

pub use definition::{
    AdditionalQueryData, DimensionValuesQueryDefinition, FilterDto, FilterSelection,
    StatisticQueryDefinition, StatisticQueryDefinitionDto,
};
pub use factory::QueryFactory;
pub use processor_query::{ProcessorQuery, ProcessorQueryBuilder};
pub use result::QueryResult;
pub use state::{DataMiningSession, QueryId, QueryResultState, QueryState, QueryType};

use crate::error::Result;
use crate::types::TypeTag;
use std::time::Duration;

/// An executable query
pub trait Query: Send + Sync {
    /// Unique id of this query
    fn id(&self) -> QueryId;

    /// Kind of the query, used by the query manager
    fn query_type(&self) -> QueryType;

    /// Current lifecycle state
    fn state(&self) -> QueryState;

    /// Type of the result values
    fn result_type(&self) -> &TypeTag;

    /// Descriptor of what the query computes
    fn additional_data(&self) -> Option<&AdditionalQueryData>;

    /// Run without a timeout, blocking the caller until the query ends
    fn run(&self) -> Result<QueryResult> {
        self.run_with_timeout(Duration::ZERO)
    }

    /// Run, blocking the caller for at most `timeout`
    ///
    /// A zero timeout means no timeout. Fails with
    /// [`Error::Timeout`](crate::Error::Timeout) if the deadline passes and
    /// with [`Error::SevereFailure`](crate::Error::SevereFailure) on a severe
    /// failure. An aborted query yields an empty result in state
    /// [`QueryResultState::Aborted`].
    fn run_with_timeout(&self, timeout: Duration) -> Result<QueryResult>;

    /// Stop the query; partial results are discarded
    ///
    /// Has no effect on a query that already ended.
    fn abort(&self);
}
