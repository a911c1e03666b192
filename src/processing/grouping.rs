//! Grouping stage: tags each element with the group it belongs to

use super::{Downstream, OverwritingResultDataBuilder, Processor};
use crate::error::ProcessingFailure;
use crate::functions::Function;
use crate::types::{Element, GroupKey, GroupedDataEntry, TypeTag};
use std::sync::atomic::{AtomicBool, Ordering};

/// Builds the group key from the values of the grouping dimensions
///
/// Without grouping dimensions every element falls into the overall group.
pub struct GroupingProcessor {
    input_type: TypeTag,
    dimensions: Vec<Function>,
    downstream: Downstream<GroupedDataEntry<Element>>,
    aborted: AtomicBool,
}

impl GroupingProcessor {
    /// Create a processor grouping elements of `input_type` by `dimensions`
    pub fn new(
        input_type: TypeTag,
        dimensions: Vec<Function>,
        downstream: Downstream<GroupedDataEntry<Element>>,
    ) -> Self {
        Self {
            input_type,
            dimensions,
            downstream,
            aborted: AtomicBool::new(false),
        }
    }

    fn group_key(&self, element: &Element) -> Result<GroupKey, ProcessingFailure> {
        if self.dimensions.is_empty() {
            return Ok(GroupKey::overall());
        }
        let values = self
            .dimensions
            .iter()
            .map(|dimension| dimension.try_apply(element))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(GroupKey::compound(values))
    }
}

impl Processor<Element> for GroupingProcessor {
    fn process_element(&self, element: Element) {
        if self.is_aborted() {
            return;
        }
        match self.group_key(&element) {
            Ok(key) => self.downstream.forward(GroupedDataEntry::new(key, element)),
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
        self.input_type.clone()
    }

    fn result_type(&self) -> TypeTag {
        self.input_type.clone()
    }

    fn additional_result_data(&self, builder: &mut OverwritingResultDataBuilder) {
        self.downstream.additional_result_data(builder);
    }
}
