//! Component management
//!
//! Registries for the pluggable components (retriever chains, aggregators,
//! data source providers, predefined queries), the query manager enforcing
//! the one-running-query-per-session rule and the memory monitor protecting
//! the process under memory pressure.
//!
//! Every registry is copy-on-write: readers take an `Arc` snapshot of the
//! current catalog, writers clone it, modify the clone and swap it in. A query
//! build therefore never observes a registry mutating underneath it. Each
//! registry carries a [`ChangeTracker`] whose timestamp advances only when a
//! register/unregister call actually changed the catalog.

pub mod aggregator_registry;
pub mod chain_registry;
pub mod data_source;
pub mod memory_monitor;
pub mod query_definitions;
pub mod query_manager;

pub use aggregator_registry::AggregationProcessorDefinitionRegistry;
pub use chain_registry::DataRetrieverChainDefinitionRegistry;
pub use data_source::{DataSourceProvider, DataSourceProviderRegistry, FixedDataSourceProvider};
pub use memory_monitor::{
    MemoryInfoProvider, MemoryMonitorAction, MemoryMonitorHandle, QueryManagerMemoryMonitor,
    RedAlertAction, RuntimeMemoryInfoProvider, YellowAlertAction,
};
pub use query_definitions::{PredefinedQueryIdentifier, QueryDefinitionDtoRegistry};
pub use query_manager::{QueryManager, SingleQueryPerSessionManager, StrategyPerQueryTypeManager};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;

/// Timestamp of the last effective change to a set of components
///
/// The timestamp is strictly increasing: two changes in the same clock tick
/// still produce distinct, ordered timestamps.
#[derive(Debug)]
pub struct ChangeTracker {
    changed_at: Mutex<DateTime<Utc>>,
}

impl ChangeTracker {
    /// Create a tracker stamped with the current time
    pub fn new() -> Self {
        Self {
            changed_at: Mutex::new(Utc::now()),
        }
    }

    /// Record a change and return the new timestamp
    pub fn touch(&self) -> DateTime<Utc> {
        let mut changed_at = self.changed_at.lock();
        let now = Utc::now();
        *changed_at = if now > *changed_at {
            now
        } else {
            *changed_at + ChronoDuration::nanoseconds(1)
        };
        *changed_at
    }

    /// Record a change if `changed` is true, passing the flag through
    pub fn touch_if(&self, changed: bool) -> bool {
        if changed {
            self.touch();
        }
        changed
    }

    /// Timestamp of the last change
    pub fn changed_at(&self) -> DateTime<Utc> {
        *self.changed_at.lock()
    }
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_is_strictly_increasing() {
        let tracker = ChangeTracker::new();
        let mut last = tracker.changed_at();
        for _ in 0..1000 {
            let next = tracker.touch();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn test_touch_if_unchanged_keeps_timestamp() {
        let tracker = ChangeTracker::new();
        let before = tracker.changed_at();
        assert!(!tracker.touch_if(false));
        assert_eq!(tracker.changed_at(), before);
        assert!(tracker.touch_if(true));
        assert!(tracker.changed_at() > before);
    }
}
