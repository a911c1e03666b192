//! Processor chains
//!
//! A query is executed by a linear pipeline of typed processors. Each stage
//! consumes elements of its input type and pushes zero or more elements of its
//! result type to the processors downstream of it:
//!
//! ```text
//! retrieval (level 0) -> ... -> retrieval (level n) -> grouping -> extraction -> aggregation -> receiver
//! retrieval (level 0) -> ... -> retrieval (level n) -> dimension values collector -> receiver
//! ```
//!
//! Retrieval stages fan their work out to the shared [`WorkerPool`]; the
//! other stages run synchronously on the thread that delivered the element.
//! `finish` travels down the chain once all upstream work is done, failures
//! travel down to the result receiver which classifies them.

pub mod aggregation;
pub mod collecting;
pub mod executor;
pub mod extraction;
pub mod filter;
pub mod grouping;
pub mod result_data;
pub mod retrieval;

pub use aggregation::GroupedAggregationProcessor;
pub use collecting::DimensionValuesCollector;
pub use executor::{TaskGuard, TaskTracker, WorkerPool};
pub use extraction::ExtractionProcessor;
pub use filter::{AndFilterCriterion, DimensionValuesFilterCriterion, FilterCriterion};
pub use grouping::GroupingProcessor;
pub use result_data::{AdditionalResultData, OverwritingResultDataBuilder};
pub use retrieval::RetrievalProcessor;

use crate::error::ProcessingFailure;
use crate::types::{GroupKey, Settings, TypeTag, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Aggregated results by group, the element type consumed by result receivers
pub type ResultMap = HashMap<GroupKey, Value>;

/// One stage of a processor chain
pub trait Processor<I>: Send + Sync {
    /// Process one element; may be called any number of times
    fn process_element(&self, element: I);

    /// Receive a failure from upstream or from this stage
    fn on_failure(&self, failure: ProcessingFailure);

    /// No more elements will arrive
    ///
    /// Flushes buffered state and finishes the downstream processors. Returns
    /// [`ProcessingFailure::Interrupted`] if the chain was aborted meanwhile.
    fn finish(&self) -> Result<(), ProcessingFailure>;

    /// Discard buffered state and stop processing
    fn abort(&self);

    /// Whether [`Processor::abort`] has been called
    fn is_aborted(&self) -> bool;

    /// Type of the consumed elements
    fn input_type(&self) -> TypeTag;

    /// Type of the produced elements
    fn result_type(&self) -> TypeTag;

    /// Contribute descriptive data of this stage and the stages after it
    fn additional_result_data(&self, builder: &mut OverwritingResultDataBuilder) {
        let _ = builder;
    }

    /// Current settings of this stage
    fn settings(&self) -> Option<Settings> {
        None
    }

    /// Replace the settings of this stage
    fn set_settings(&self, settings: Option<Settings>) {
        let _ = settings;
    }
}

/// The processors a stage pushes its results to
pub struct Downstream<O> {
    processors: Vec<Arc<dyn Processor<O>>>,
}

impl<O: Clone> Downstream<O> {
    /// Wrap the given processors
    pub fn new(processors: Vec<Arc<dyn Processor<O>>>) -> Self {
        Self { processors }
    }

    /// A single processor
    pub fn single(processor: Arc<dyn Processor<O>>) -> Self {
        Self::new(vec![processor])
    }

    /// Push an element to every processor
    pub fn forward(&self, element: O) {
        if let Some((last, rest)) = self.processors.split_last() {
            for processor in rest {
                processor.process_element(element.clone());
            }
            last.process_element(element);
        }
    }

    /// Report a failure to every processor
    pub fn on_failure(&self, failure: ProcessingFailure) {
        for processor in &self.processors {
            processor.on_failure(failure.clone());
        }
    }

    /// Finish every processor; the first failure is returned
    pub fn finish(&self) -> Result<(), ProcessingFailure> {
        let mut outcome = Ok(());
        for processor in &self.processors {
            if let Err(failure) = processor.finish() {
                if outcome.is_ok() {
                    outcome = Err(failure);
                }
            }
        }
        outcome
    }

    /// Abort every processor
    pub fn abort(&self) {
        for processor in &self.processors {
            processor.abort();
        }
    }

    /// Collect additional result data in chain order
    pub fn additional_result_data(&self, builder: &mut OverwritingResultDataBuilder) {
        for processor in &self.processors {
            processor.additional_result_data(builder);
        }
    }

    /// Result type of the first processor
    pub fn result_type(&self) -> Option<TypeTag> {
        self.processors.first().map(|p| p.result_type())
    }
}
