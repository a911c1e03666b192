//! Retrieval stage: one retriever level of a chain
//!
//! Every received element is retrieved on the worker pool. Retrieved elements
//! passing the level's filter are pushed downstream from the worker thread.

use super::executor::{TaskTracker, WorkerPool};
use super::filter::FilterCriterion;
use super::{Downstream, OverwritingResultDataBuilder, Processor};
use crate::components::DataRetrieverLevel;
use crate::error::ProcessingFailure;
use crate::metrics;
use crate::types::{Element, Settings, TypeTag};
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

struct RetrievalStage {
    level: DataRetrieverLevel,
    settings: RwLock<Option<Settings>>,
    filter: Option<Arc<dyn FilterCriterion>>,
    downstream: Downstream<Element>,
    aborted: AtomicBool,
    retrieved: AtomicU64,
}

impl RetrievalStage {
    fn retrieve_and_forward(&self, element: &Element) {
        if self.aborted.load(Ordering::SeqCst) {
            return;
        }
        let settings = self.settings.read().clone();
        let children = match self.level.retrieve(element, settings.as_ref()) {
            Ok(children) => children,
            Err(failure) => {
                self.downstream.on_failure(failure);
                return;
            },
        };

        for child in children {
            if self.aborted.load(Ordering::SeqCst) {
                debug!(level = self.level.name(), "Retrieval stopped by abort");
                return;
            }
            let passes = match &self.filter {
                Some(filter) => filter.matches(&child),
                None => Ok(true),
            };
            match passes {
                Ok(true) => {
                    self.retrieved.fetch_add(1, Ordering::Relaxed);
                    self.downstream.forward(child);
                },
                Ok(false) => {},
                Err(failure) => self.downstream.on_failure(failure),
            }
        }
    }
}

/// Processor retrieving the elements of one retriever level
pub struct RetrievalProcessor {
    stage: Arc<RetrievalStage>,
    pool: Arc<WorkerPool>,
    tracker: Arc<TaskTracker>,
}

impl RetrievalProcessor {
    /// Create a processor for `level`
    ///
    /// `settings` replaces the level's default settings when given.
    pub fn new(
        level: DataRetrieverLevel,
        settings: Option<Settings>,
        filter: Option<Arc<dyn FilterCriterion>>,
        downstream: Downstream<Element>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            stage: Arc::new(RetrievalStage {
                level,
                settings: RwLock::new(settings),
                filter,
                downstream,
                aborted: AtomicBool::new(false),
                retrieved: AtomicU64::new(0),
            }),
            pool,
            tracker: TaskTracker::new(),
        }
    }

    /// Number of elements that passed the filter so far
    pub fn retrieved_count(&self) -> u64 {
        self.stage.retrieved.load(Ordering::Relaxed)
    }
}

impl Processor<Element> for RetrievalProcessor {
    fn process_element(&self, element: Element) {
        if self.is_aborted() {
            return;
        }
        let stage = Arc::clone(&self.stage);
        let guard = self.tracker.begin();
        let submitted = self.pool.spawn(move || {
            let _guard = guard;
            // Downstream stages run on this task too
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| stage.retrieve_and_forward(&element)));
            if let Err(payload) = outcome {
                stage.downstream.on_failure(ProcessingFailure::from_panic(payload));
            }
        });
        if let Err(failure) = submitted {
            metrics::record_rejected_task();
            self.on_failure(failure);
        }
    }

    fn on_failure(&self, failure: ProcessingFailure) {
        self.stage.downstream.on_failure(failure);
    }

    fn finish(&self) -> Result<(), ProcessingFailure> {
        self.tracker.wait_until_idle(&self.stage.aborted)?;
        self.stage.downstream.finish()
    }

    fn abort(&self) {
        self.stage.aborted.store(true, Ordering::SeqCst);
        self.tracker.wake_all();
        self.stage.downstream.abort();
    }

    fn is_aborted(&self) -> bool {
        self.stage.aborted.load(Ordering::SeqCst)
    }

    fn input_type(&self) -> TypeTag {
        self.stage.level.input_type().clone()
    }

    fn result_type(&self) -> TypeTag {
        self.stage.level.retrieved_type().clone()
    }

    fn additional_result_data(&self, builder: &mut OverwritingResultDataBuilder) {
        builder.set_retrieved_data_amount(self.retrieved_count());
        self.stage.downstream.additional_result_data(builder);
    }

    fn settings(&self) -> Option<Settings> {
        self.stage.settings.read().clone()
    }

    fn set_settings(&self, settings: Option<Settings>) {
        *self.stage.settings.write() = settings;
    }
}
