//! Data-mining server façade
//!
//! Owns the component registries, the worker pool, the query manager and the
//! memory monitor. Resolves wire-level query definitions against the
//! registries, builds queries for them and runs them under the
//! one-query-per-session rule.
//!
//! # Example
//!
//! ```rust,ignore
//! let server = DataMiningServer::new(&Config::default())?;
//! server.functions().register_all(race_functions());
//! server.retriever_chains().register(races_chain);
//! server.data_source_providers().register(Arc::new(FixedDataSourceProvider::new(regattas)));
//!
//! let definition = server.query_definition_for_dto(&dto)?;
//! let query = server.create_query(&definition)?;
//! let result = server.run_new_query_and_abort_previous(session, query)?;
//! ```

use crate::config::Config;
use crate::error::{Error, Result};
use crate::functions::{Function, FunctionCatalog, FunctionDto, FunctionRegistry};
use crate::management::{
    AggregationProcessorDefinitionRegistry, DataRetrieverChainDefinitionRegistry,
    DataSourceProviderRegistry, MemoryInfoProvider, MemoryMonitorHandle, QueryDefinitionDtoRegistry,
    QueryManager, QueryManagerMemoryMonitor, RuntimeMemoryInfoProvider, StrategyPerQueryTypeManager,
};
use crate::messages::{CompoundStringMessages, StringMessages};
use crate::metrics;
use crate::processing::WorkerPool;
use crate::query::{
    DataMiningSession, DimensionValuesQueryDefinition, Query, QueryFactory, QueryResult, QueryType,
    StatisticQueryDefinition, StatisticQueryDefinitionDto,
};
use crate::types::{Element, TypeTag};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Entry point of the data-mining engine
pub struct DataMiningServer {
    functions: Arc<FunctionRegistry>,
    retriever_chains: Arc<DataRetrieverChainDefinitionRegistry>,
    aggregators: Arc<AggregationProcessorDefinitionRegistry>,
    data_source_providers: Arc<DataSourceProviderRegistry>,
    predefined_queries: Arc<QueryDefinitionDtoRegistry>,
    messages: Arc<CompoundStringMessages>,
    pool: Arc<WorkerPool>,
    factory: QueryFactory,
    query_manager: Arc<dyn QueryManager>,
    memory_monitor: Option<MemoryMonitorHandle>,
}

impl DataMiningServer {
    /// Create a server monitoring the system memory
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_memory_info(config, Arc::new(RuntimeMemoryInfoProvider::new()))
    }

    /// Create a server whose memory monitor reads from `memory_info`
    pub fn with_memory_info(config: &Config, memory_info: Arc<dyn MemoryInfoProvider>) -> Result<Self> {
        config.validate().map_err(Error::Configuration)?;
        metrics::set_enabled(config.monitoring.metrics_enabled);

        let pool = Arc::new(WorkerPool::new(
            config.executor.worker_threads,
            &config.executor.thread_name_prefix,
        )?);
        let messages = Arc::new(CompoundStringMessages::new());
        let factory = QueryFactory::new(
            Arc::clone(&pool),
            Arc::clone(&messages) as Arc<dyn StringMessages>,
        );
        let query_manager: Arc<dyn QueryManager> = Arc::new(StrategyPerQueryTypeManager::for_all_types(
            config.query.default_timeout(),
        ));

        let memory_monitor = if config.memory_monitor.enabled {
            let monitor = Arc::new(QueryManagerMemoryMonitor::with_alerts(
                memory_info,
                Arc::clone(&query_manager),
                config.memory_monitor.yellow_threshold,
                config.memory_monitor.red_threshold,
                config.memory_monitor.check_period(),
            ));
            Some(monitor.start()?)
        } else {
            None
        };

        info!(
            worker_threads = pool.threads(),
            memory_monitor = config.memory_monitor.enabled,
            metrics = config.monitoring.metrics_enabled,
            default_timeout_ms = config.query.default_timeout_ms,
            "Data mining server started"
        );

        Ok(Self {
            functions: Arc::new(FunctionRegistry::new()),
            retriever_chains: Arc::new(DataRetrieverChainDefinitionRegistry::new()),
            aggregators: Arc::new(AggregationProcessorDefinitionRegistry::with_builtins()),
            data_source_providers: Arc::new(DataSourceProviderRegistry::new()),
            predefined_queries: Arc::new(QueryDefinitionDtoRegistry::new()),
            messages,
            pool,
            factory,
            query_manager,
            memory_monitor,
        })
    }

    // ========================================================================
    // Components
    // ========================================================================

    /// Registered functions
    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.functions
    }

    /// Registered retriever chains
    pub fn retriever_chains(&self) -> &Arc<DataRetrieverChainDefinitionRegistry> {
        &self.retriever_chains
    }

    /// Registered aggregators, initially the built-in ones
    pub fn aggregators(&self) -> &Arc<AggregationProcessorDefinitionRegistry> {
        &self.aggregators
    }

    /// Registered data source providers
    pub fn data_source_providers(&self) -> &Arc<DataSourceProviderRegistry> {
        &self.data_source_providers
    }

    /// Registered predefined queries
    pub fn predefined_queries(&self) -> &Arc<QueryDefinitionDtoRegistry> {
        &self.predefined_queries
    }

    /// Add a message bundle; returns whether it was new
    pub fn add_string_messages(&self, messages: Arc<dyn StringMessages>) -> bool {
        self.messages.add(messages)
    }

    /// Remove a message bundle; returns whether it was present
    pub fn remove_string_messages(&self, messages: &Arc<dyn StringMessages>) -> bool {
        self.messages.remove(messages)
    }

    /// The combined message bundles
    pub fn string_messages(&self) -> &Arc<CompoundStringMessages> {
        &self.messages
    }

    /// Latest change to any registry or message bundle
    ///
    /// Anything derived from the registries is stale if it is older.
    pub fn components_changed_at(&self) -> DateTime<Utc> {
        [
            self.functions.components_changed_at(),
            self.retriever_chains.components_changed_at(),
            self.aggregators.components_changed_at(),
            self.data_source_providers.components_changed_at(),
            self.predefined_queries.components_changed_at(),
            self.messages.components_changed_at(),
        ]
        .into_iter()
        .max()
        .unwrap_or_else(Utc::now)
    }

    /// Data source of `data_source_type` from its registered provider
    pub fn data_source(&self, data_source_type: &TypeTag) -> Result<Element> {
        self.data_source_providers
            .get(data_source_type)
            .map(|provider| provider.data_source())
            .ok_or_else(|| Error::NoDataSourceProvider(data_source_type.name().to_string()))
    }

    // ========================================================================
    // Query Definitions
    // ========================================================================

    /// Resolve a wire-level definition against the registries
    ///
    /// The retriever chain, statistic and aggregator must resolve. Filters and
    /// grouping dimensions that do not resolve are skipped. All functions are
    /// resolved from one snapshot of the function registry.
    pub fn query_definition_for_dto(&self, dto: &StatisticQueryDefinitionDto) -> Result<StatisticQueryDefinition> {
        let catalog = self.functions.snapshot();
        let chain = self
            .retriever_chains
            .get_for_dto(&dto.retriever_chain)
            .ok_or_else(|| Error::Unresolved {
                component: "retriever chain",
                identifier: dto.retriever_chain.id.to_string(),
            })?;
        let statistic = resolve_function(&catalog, "statistic", &dto.statistic)?;
        let aggregator = self
            .aggregators
            .get_for_dto(&dto.aggregator)
            .ok_or_else(|| Error::Unresolved {
                component: "aggregator",
                identifier: dto.aggregator.message_key.clone(),
            })?;

        let mut definition = StatisticQueryDefinition::new(dto.locale.clone(), chain, statistic, aggregator);
        for (level, settings) in &dto.retriever_settings {
            definition = definition.with_retriever_settings(*level, settings.clone());
        }
        for filter in &dto.filters {
            match resolve_function(&catalog, "filter dimension", &filter.dimension) {
                Ok(dimension) => {
                    definition = definition.with_filter(filter.level, dimension, filter.values.iter().cloned());
                },
                Err(e) => warn!(error = %e, level = filter.level, "Skipping unresolved filter"),
            }
        }
        for dto in &dto.dimensions_to_group_by {
            match resolve_function(&catalog, "grouping dimension", dto) {
                Ok(dimension) => definition = definition.with_group_by(dimension),
                Err(e) => warn!(error = %e, "Skipping unresolved grouping dimension"),
            }
        }
        Ok(definition)
    }

    /// Predefined query registered under `identifier`
    pub fn predefined_query_definition(&self, identifier: &str) -> Option<StatisticQueryDefinitionDto> {
        self.predefined_queries.get_by_name(identifier)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Build a statistic query against the registered data source
    pub fn create_query(&self, definition: &StatisticQueryDefinition) -> Result<Arc<dyn Query>> {
        let data_source = self.data_source(definition.retriever_chain().data_source_type())?;
        self.factory.create_query(data_source, definition)
    }

    /// Build a dimension values query against the registered data source
    pub fn create_dimension_values_query(
        &self,
        definition: &DimensionValuesQueryDefinition,
    ) -> Result<Arc<dyn Query>> {
        let data_source = self.data_source(definition.retriever_chain().data_source_type())?;
        self.factory.create_dimension_values_query(data_source, definition)
    }

    /// Abort the query `session` is still running of the same type, then run `query`
    pub fn run_new_query_and_abort_previous(
        &self,
        session: DataMiningSession,
        query: Arc<dyn Query>,
    ) -> Result<QueryResult> {
        self.query_manager.run_new_and_abort_previous(session, query)
    }

    /// Like [`Self::run_new_query_and_abort_previous`], on the blocking thread pool
    /// of the current tokio runtime
    pub async fn run_new_query_and_abort_previous_async(
        &self,
        session: DataMiningSession,
        query: Arc<dyn Query>,
    ) -> Result<QueryResult> {
        let manager = Arc::clone(&self.query_manager);
        tokio::task::spawn_blocking(move || manager.run_new_and_abort_previous(session, query))
            .await
            .map_err(|e| Error::TaskJoin(e.to_string()))?
    }

    /// Number of running queries
    pub fn number_of_running_queries(&self) -> usize {
        self.query_manager.number_of_running_queries()
    }

    /// Number of running queries of `query_type`
    pub fn number_of_running_queries_of_type(&self, query_type: QueryType) -> usize {
        self.query_manager.number_of_running_queries_of_type(query_type)
    }

    /// The query manager, e.g. to abort queries
    pub fn query_manager(&self) -> &Arc<dyn QueryManager> {
        &self.query_manager
    }

    /// Abort all queries and stop the background services
    pub fn shutdown(&self) {
        let aborted = self.query_manager.abort_all_queries();
        if let Some(monitor) = &self.memory_monitor {
            monitor.stop();
        }
        self.pool.shutdown();
        info!(aborted, "Data mining server stopped");
    }
}

fn resolve_function(catalog: &FunctionCatalog, component: &'static str, dto: &FunctionDto) -> Result<Function> {
    catalog.get_for_dto(dto).ok_or_else(|| Error::Unresolved {
        component,
        identifier: format!("{}.{}", dto.declaring_type, dto.name),
    })
}
