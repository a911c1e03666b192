//! Extraction stage: applies the statistic to grouped elements

use super::{Downstream, OverwritingResultDataBuilder, Processor};
use crate::error::ProcessingFailure;
use crate::functions::Function;
use crate::types::{Element, GroupedDataEntry, TypeTag, Value};
use std::sync::atomic::{AtomicBool, Ordering};

/// Replaces each element by the value of the statistic, keeping its group
///
/// Elements for which the statistic yields [`Value::Null`] are skipped.
pub struct ExtractionProcessor {
    statistic: Function,
    downstream: Downstream<GroupedDataEntry<Value>>,
    aborted: AtomicBool,
}

impl ExtractionProcessor {
    /// Create a processor extracting `statistic`
    pub fn new(statistic: Function, downstream: Downstream<GroupedDataEntry<Value>>) -> Self {
        Self {
            statistic,
            downstream,
            aborted: AtomicBool::new(false),
        }
    }
}

impl Processor<GroupedDataEntry<Element>> for ExtractionProcessor {
    fn process_element(&self, entry: GroupedDataEntry<Element>) {
        if self.is_aborted() {
            return;
        }
        match self.statistic.try_apply(&entry.data) {
            Ok(Value::Null) => {},
            Ok(value) => self.downstream.forward(GroupedDataEntry::new(entry.key, value)),
            Err(failure) => self.on_failure(failure),
        }
    }

    fn on_failure(&self, failure: ProcessingFailure) {
        self.downstream.on_failure(failure);
    }

    fn finish(&self) -> Result<(), ProcessingFailure> {
        if self.is_aborted() {
            return Err(ProcessingFailure::Interrupted);
        }
        self.downstream.finish()
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.downstream.abort();
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn input_type(&self) -> TypeTag {
        self.statistic.declaring_type().clone()
    }

    fn result_type(&self) -> TypeTag {
        self.statistic.return_type().clone()
    }

    fn additional_result_data(&self, builder: &mut OverwritingResultDataBuilder) {
        builder
            .set_statistic_name(self.statistic.name())
            .set_unit(self.statistic.unit().map(str::to_string))
            .set_value_decimals(self.statistic.result_decimals());
        self.downstream.additional_result_data(builder);
    }
}
