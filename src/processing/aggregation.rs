//! Aggregation stage: reduces the extracted values of each group

use super::{Downstream, OverwritingResultDataBuilder, Processor, ResultMap};
use crate::components::{AggregationProcessorDefinition, Aggregator};
use crate::error::ProcessingFailure;
use crate::types::{GroupKey, GroupedDataEntry, TypeTag, Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Keeps one aggregator per group and emits all group results on finish
pub struct GroupedAggregationProcessor {
    definition: AggregationProcessorDefinition,
    groups: Mutex<HashMap<GroupKey, Box<dyn Aggregator>>>,
    downstream: Downstream<ResultMap>,
    aborted: AtomicBool,
}

impl GroupedAggregationProcessor {
    /// Create a processor aggregating with `definition`
    pub fn new(definition: AggregationProcessorDefinition, downstream: Downstream<ResultMap>) -> Self {
        Self {
            definition,
            groups: Mutex::new(HashMap::new()),
            downstream,
            aborted: AtomicBool::new(false),
        }
    }
}

impl Processor<GroupedDataEntry<Value>> for GroupedAggregationProcessor {
    fn process_element(&self, entry: GroupedDataEntry<Value>) {
        if self.is_aborted() {
            return;
        }
        let outcome = {
            let mut groups = self.groups.lock();
            groups
                .entry(entry.key)
                .or_insert_with(|| self.definition.create_aggregator())
                .add(&entry.data)
        };
        if let Err(failure) = outcome {
            self.on_failure(failure);
        }
    }

    fn on_failure(&self, failure: ProcessingFailure) {
        self.downstream.on_failure(failure);
    }

    fn finish(&self) -> Result<(), ProcessingFailure> {
        if self.is_aborted() {
            return Err(ProcessingFailure::Interrupted);
        }
        let groups = std::mem::take(&mut *self.groups.lock());
        let results: ResultMap = groups
            .into_iter()
            .filter_map(|(key, aggregator)| aggregator.result().map(|value| (key, value)))
            .collect();
        if !results.is_empty() {
            self.downstream.forward(results);
        }
        self.downstream.finish()
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.groups.lock().clear();
        self.downstream.abort();
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn input_type(&self) -> TypeTag {
        self.definition.extracted_type().clone()
    }

    fn result_type(&self) -> TypeTag {
        self.definition.aggregated_type().clone()
    }

    fn additional_result_data(&self, builder: &mut OverwritingResultDataBuilder) {
        builder.set_aggregator_key(self.definition.message_key());
        self.downstream.additional_result_data(builder);
    }
}
