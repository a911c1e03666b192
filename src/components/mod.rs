//! Component definitions plugged into the engine
//!
//! - [`retriever_chain`]: how a data source is narrowed down to analyzed data
//! - [`aggregation`]: how extracted values collapse into one result per group

pub mod aggregation;
pub mod retriever_chain;

pub use aggregation::{
    AggregationProcessorDefinition, AggregationProcessorDefinitionDto, Aggregator,
    AggregatorFactory, AverageAggregator, BestValueAggregator, ComparisonStrategy, KahanSum,
};
pub use retriever_chain::{
    DataRetrieverChainBuilder, DataRetrieverChainDefinition, DataRetrieverChainDefinitionDto,
    DataRetrieverLevel, DataRetrieverLevelDto, RetrieverFn,
};
