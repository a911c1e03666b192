//! Builds executable queries from resolved definitions

use super::{
    AdditionalQueryData, DimensionValuesQueryDefinition, FilterSelection, ProcessorQuery, Query,
    QueryType, StatisticQueryDefinition,
};
use crate::components::DataRetrieverChainDefinition;
use crate::error::{Error, Result};
use crate::functions::Function;
use crate::messages::StringMessages;
use crate::processing::{
    AndFilterCriterion, DimensionValuesCollector, Downstream, ExtractionProcessor,
    GroupedAggregationProcessor, GroupingProcessor, Processor, RetrievalProcessor, WorkerPool,
};
use crate::types::{Element, GroupedDataEntry, Settings, TypeTag, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Creates processor queries sharing one worker pool
pub struct QueryFactory {
    pool: Arc<WorkerPool>,
    messages: Arc<dyn StringMessages>,
}

impl QueryFactory {
    /// Create a factory whose queries retrieve on `pool`
    pub fn new(pool: Arc<WorkerPool>, messages: Arc<dyn StringMessages>) -> Self {
        Self { pool, messages }
    }

    /// Build a statistic query
    ///
    /// The chain is `retrieval (all levels) -> grouping -> extraction ->
    /// aggregation -> result receiver`.
    pub fn create_query(
        &self,
        data_source: Element,
        definition: &StatisticQueryDefinition,
    ) -> Result<Arc<dyn Query>> {
        let chain = definition.retriever_chain();
        let retrieved_type = chain.retrieved_data_type();
        let statistic = definition.statistic();
        let aggregator = definition.aggregator();

        check_data_source(&data_source, chain)?;
        check_declaring_type(statistic, retrieved_type)?;
        for dimension in definition.dimensions_to_group_by() {
            check_declaring_type(dimension, retrieved_type)?;
        }
        check_filters(chain, definition.filter_selection(), chain.levels().len() - 1)?;
        if !statistic.return_type().is_assignable_to(aggregator.extracted_type()) {
            return Err(Error::IncompatibleDefinition(format!(
                "aggregator '{}' cannot aggregate values of type '{}'",
                aggregator.message_key(),
                statistic.return_type()
            )));
        }

        let query = ProcessorQuery::builder(data_source, QueryType::Statistic, aggregator.aggregated_type().clone())
            .with_locale(definition.locale().clone())
            .with_messages(Arc::clone(&self.messages))
            .with_additional_data(AdditionalQueryData::Statistic {
                statistic: statistic.to_dto(),
                aggregator: aggregator.to_dto(),
            })
            .build(|receiver| {
                let aggregation: Arc<dyn Processor<GroupedDataEntry<Value>>> = Arc::new(
                    GroupedAggregationProcessor::new(aggregator.clone(), Downstream::single(receiver)),
                );
                let extraction: Arc<dyn Processor<GroupedDataEntry<Element>>> = Arc::new(
                    ExtractionProcessor::new(statistic.clone(), Downstream::single(aggregation)),
                );
                let grouping: Arc<dyn Processor<Element>> = Arc::new(GroupingProcessor::new(
                    retrieved_type.clone(),
                    definition.dimensions_to_group_by().to_vec(),
                    Downstream::single(extraction),
                ));
                Ok(self.retrieval_chain(
                    chain,
                    chain.levels().len() - 1,
                    definition.retriever_settings(),
                    definition.filter_selection(),
                    grouping,
                ))
            })?;

        debug!(
            query_id = %query.id(),
            chain = chain.name(),
            statistic = statistic.name(),
            aggregator = aggregator.message_key(),
            "Created statistic query"
        );
        Ok(Arc::new(query))
    }

    /// Build a dimension values query
    ///
    /// The chain is `retrieval (levels up to the requested one) -> dimension
    /// values collector -> result receiver`.
    pub fn create_dimension_values_query(
        &self,
        data_source: Element,
        definition: &DimensionValuesQueryDefinition,
    ) -> Result<Arc<dyn Query>> {
        let chain = definition.retriever_chain();
        let level = chain.level(definition.level()).ok_or_else(|| {
            Error::IncompatibleDefinition(format!(
                "retriever chain '{}' has no level {}",
                chain.name(),
                definition.level()
            ))
        })?;

        check_data_source(&data_source, chain)?;
        for dimension in definition.dimensions() {
            check_declaring_type(dimension, level.retrieved_type())?;
        }
        check_filters(chain, definition.filter_selection(), level.index())?;

        let query = ProcessorQuery::builder(data_source, QueryType::DimensionValues, TypeTag::list())
            .with_locale(definition.locale().clone())
            .with_messages(Arc::clone(&self.messages))
            .with_additional_data(AdditionalQueryData::DimensionValues {
                dimensions: definition.dimensions().iter().map(Function::to_dto).collect(),
            })
            .build(|receiver| {
                let collector: Arc<dyn Processor<Element>> = Arc::new(DimensionValuesCollector::new(
                    level.retrieved_type().clone(),
                    definition.dimensions().to_vec(),
                    Downstream::single(receiver),
                ));
                Ok(self.retrieval_chain(
                    chain,
                    level.index(),
                    definition.retriever_settings(),
                    definition.filter_selection(),
                    collector,
                ))
            })?;

        debug!(query_id = %query.id(), chain = chain.name(), level = level.index(), "Created dimension values query");
        Ok(Arc::new(query))
    }

    /// Retrieval stages for levels `0..=last_level`, the last one feeding `tail`
    fn retrieval_chain(
        &self,
        chain: &DataRetrieverChainDefinition,
        last_level: usize,
        settings: &HashMap<usize, Settings>,
        filters: &FilterSelection,
        tail: Arc<dyn Processor<Element>>,
    ) -> Arc<dyn Processor<Element>> {
        let mut next = tail;
        for level in chain.levels()[..=last_level].iter().rev() {
            let filter = filters.get(&level.index()).and_then(AndFilterCriterion::for_selection);
            next = Arc::new(RetrievalProcessor::new(
                level.clone(),
                settings.get(&level.index()).cloned(),
                filter,
                Downstream::single(next),
                Arc::clone(&self.pool),
            ));
        }
        next
    }
}

fn check_data_source(data_source: &Element, chain: &DataRetrieverChainDefinition) -> Result<()> {
    if data_source.is_instance_of(chain.data_source_type()) {
        Ok(())
    } else {
        Err(Error::IncompatibleDefinition(format!(
            "retriever chain '{}' expects a data source of type '{}', got '{}'",
            chain.name(),
            chain.data_source_type(),
            data_source.type_tag()
        )))
    }
}

fn check_declaring_type(function: &Function, data_type: &TypeTag) -> Result<()> {
    if data_type.is_assignable_to(function.declaring_type()) {
        Ok(())
    } else {
        Err(Error::IncompatibleDefinition(format!(
            "function '{}' is not applicable to '{}'",
            function.qualified_name(),
            data_type
        )))
    }
}

fn check_filters(chain: &DataRetrieverChainDefinition, filters: &FilterSelection, last_level: usize) -> Result<()> {
    for (index, dimensions) in filters {
        let level = chain
            .level(*index)
            .filter(|level| level.index() <= last_level)
            .ok_or_else(|| {
                Error::IncompatibleDefinition(format!("filter on level {} outside the retrieved levels", index))
            })?;
        for dimension in dimensions.keys() {
            check_declaring_type(dimension, level.retrieved_type())?;
        }
    }
    Ok(())
}
