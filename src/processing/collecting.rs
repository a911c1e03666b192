//! Dimension values stage: collects the distinct values of dimensions

use super::{Downstream, OverwritingResultDataBuilder, Processor, ResultMap};
use crate::error::ProcessingFailure;
use crate::functions::Function;
use crate::types::{Element, GroupKey, TypeTag, Value};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// Collects the distinct values of each dimension
///
/// On finish emits one entry per dimension, keyed by the dimension's
/// qualified name, holding the sorted values as a [`Value::List`].
pub struct DimensionValuesCollector {
    input_type: TypeTag,
    dimensions: Vec<Function>,
    values: Mutex<Vec<BTreeSet<Value>>>,
    downstream: Downstream<ResultMap>,
    aborted: AtomicBool,
}

impl DimensionValuesCollector {
    /// Create a collector for `dimensions` of elements of `input_type`
    pub fn new(input_type: TypeTag, dimensions: Vec<Function>, downstream: Downstream<ResultMap>) -> Self {
        let values = Mutex::new(vec![BTreeSet::new(); dimensions.len()]);
        Self {
            input_type,
            dimensions,
            values,
            downstream,
            aborted: AtomicBool::new(false),
        }
    }
}

impl Processor<Element> for DimensionValuesCollector {
    fn process_element(&self, element: Element) {
        if self.is_aborted() {
            return;
        }
        for (index, dimension) in self.dimensions.iter().enumerate() {
            match dimension.try_apply(&element) {
                Ok(Value::Null) => {},
                Ok(value) => {
                    let mut values = self.values.lock();
                    if self.is_aborted() {
                        return;
                    }
                    if let Some(set) = values.get_mut(index) {
                        set.insert(value);
                    }
                },
                Err(failure) => self.on_failure(failure),
            }
        }
    }

    fn on_failure(&self, failure: ProcessingFailure) {
        self.downstream.on_failure(failure);
    }

    fn finish(&self) -> Result<(), ProcessingFailure> {
        if self.is_aborted() {
            return Err(ProcessingFailure::Interrupted);
        }
        let values: Vec<BTreeSet<Value>> = self.values.lock().iter_mut().map(std::mem::take).collect();
        let results: ResultMap = self
            .dimensions
            .iter()
            .zip(values)
            .map(|(dimension, values)| {
                (
                    GroupKey::single(dimension.qualified_name()),
                    Value::List(values.into_iter().collect()),
                )
            })
            .collect();
        self.downstream.forward(results);
        self.downstream.finish()
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        for set in self.values.lock().iter_mut() {
            set.clear();
        }
        self.downstream.abort();
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn input_type(&self) -> TypeTag {
        self.input_type.clone()
    }

    fn result_type(&self) -> TypeTag {
        TypeTag::list()
    }

    fn additional_result_data(&self, builder: &mut OverwritingResultDataBuilder) {
        let names: Vec<&str> = self.dimensions.iter().map(Function::name).collect();
        builder.set_statistic_name(names.join(", "));
        self.downstream.additional_result_data(builder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::test_support::{downstream_of, RecordingProcessor};
    use std::sync::{mpsc, Arc};
    use std::thread;

    struct Competitor {
        nationality: &'static str,
        sail_number: Option<i64>,
    }

    fn competitor() -> TypeTag {
        TypeTag::new("Competitor")
    }

    fn nationality() -> Function {
        Function::dimension(competitor(), "nationality", TypeTag::text(), |e| {
            Ok(e.downcast_ref::<Competitor>().map(|c| c.nationality).into())
        })
    }

    fn sail_number() -> Function {
        Function::dimension(competitor(), "sailNumber", TypeTag::int(), |e| {
            Ok(e.downcast_ref::<Competitor>().and_then(|c| c.sail_number).into())
        })
    }

    fn element(nationality: &'static str, sail_number: Option<i64>) -> Element {
        Element::new(
            competitor(),
            Competitor {
                nationality,
                sail_number,
            },
        )
    }

    #[test]
    fn test_collects_sorted_distinct_values() {
        let sink = RecordingProcessor::new();
        let collector = DimensionValuesCollector::new(
            competitor(),
            vec![nationality(), sail_number()],
            downstream_of(&sink),
        );
        collector.process_element(element("GER", Some(12)));
        collector.process_element(element("DEN", None));
        collector.process_element(element("GER", Some(3)));
        collector.finish().unwrap();

        let emitted = sink.elements.lock();
        let results = &emitted[0];
        assert_eq!(
            results[&GroupKey::single("Competitor.nationality")],
            Value::List(vec![Value::from("DEN"), Value::from("GER")])
        );
        assert_eq!(
            results[&GroupKey::single("Competitor.sailNumber")],
            Value::List(vec![Value::Int(3), Value::Int(12)])
        );
    }

    #[test]
    fn test_abort_during_dimension_evaluation() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let blocking = Function::dimension(competitor(), "nationality", TypeTag::text(), move |e| {
            let _ = entered_tx.send(());
            let _ = release_rx.lock().recv();
            Ok(e.downcast_ref::<Competitor>().map(|c| c.nationality).into())
        });

        let sink = RecordingProcessor::new();
        let collector = Arc::new(DimensionValuesCollector::new(
            competitor(),
            vec![blocking],
            downstream_of(&sink),
        ));
        let worker = {
            let collector = Arc::clone(&collector);
            thread::spawn(move || collector.process_element(element("GER", Some(1))))
        };

        entered_rx.recv().unwrap();
        collector.abort();
        release_tx.send(()).unwrap();

        assert!(worker.join().is_ok());
        assert!(sink.is_aborted());
        assert_eq!(collector.finish(), Err(ProcessingFailure::Interrupted));
        assert!(collector.values.lock().iter().all(BTreeSet::is_empty));
    }

    #[test]
    fn test_dimension_without_values_yields_empty_list() {
        let sink = RecordingProcessor::new();
        let collector = DimensionValuesCollector::new(competitor(), vec![sail_number()], downstream_of(&sink));
        collector.process_element(element("GER", None));
        collector.finish().unwrap();
        assert_eq!(
            sink.elements.lock()[0][&GroupKey::single("Competitor.sailNumber")],
            Value::List(Vec::new())
        );
    }
}
