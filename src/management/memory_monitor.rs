//! Memory pressure protection
//!
//! The monitor periodically reads the free memory ratio and performs the
//! actions whose threshold the ratio fell below. Actions are edge-triggered:
//! an action fires once when the ratio drops below its threshold and is
//! re-armed when the ratio climbs back to or above it.
//!
//! Two actions are provided:
//! - [`YellowAlertAction`] aborts one running statistic query
//! - [`RedAlertAction`] aborts every running query

use super::QueryManager;
use crate::metrics;
use crate::query::QueryType;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default free memory ratio below which the yellow alert fires
pub const DEFAULT_YELLOW_THRESHOLD: f64 = 0.10;

/// Default free memory ratio below which the red alert fires
pub const DEFAULT_RED_THRESHOLD: f64 = 0.05;

// ============================================================================
// Memory Info
// ============================================================================

/// Source of memory figures
pub trait MemoryInfoProvider: Send + Sync {
    /// Bytes available for new allocations
    fn free_memory(&self) -> u64;

    /// Total bytes
    fn total_memory(&self) -> u64;

    /// Free fraction of the total memory; 1.0 if the total is unknown
    fn free_memory_ratio(&self) -> f64 {
        let total = self.total_memory();
        if total == 0 {
            return 1.0;
        }
        self.free_memory() as f64 / total as f64
    }
}

/// Reads system memory from `/proc/meminfo`
///
/// On systems without it both figures are zero, so the ratio is 1.0 and no
/// alert ever fires.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuntimeMemoryInfoProvider;

impl RuntimeMemoryInfoProvider {
    /// Create a provider
    pub fn new() -> Self {
        Self
    }

    fn meminfo_kib(field: &str) -> Option<u64> {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        parse_meminfo_kib(&meminfo, field)
    }
}

impl MemoryInfoProvider for RuntimeMemoryInfoProvider {
    fn free_memory(&self) -> u64 {
        Self::meminfo_kib("MemAvailable").map_or(0, |kib| kib * 1024)
    }

    fn total_memory(&self) -> u64 {
        Self::meminfo_kib("MemTotal").map_or(0, |kib| kib * 1024)
    }
}

fn parse_meminfo_kib(meminfo: &str, field: &str) -> Option<u64> {
    meminfo.lines().find_map(|line| {
        let (name, rest) = line.split_once(':')?;
        if name.trim() != field {
            return None;
        }
        rest.split_whitespace().next()?.parse().ok()
    })
}

// ============================================================================
// Actions
// ============================================================================

/// Reaction to memory pressure
pub trait MemoryMonitorAction: Send + Sync {
    /// Alert level used in logs and metrics
    fn level(&self) -> &str;

    /// Free memory ratio below which the action fires
    fn threshold(&self) -> f64;

    /// React to the observed free memory ratio
    fn perform_action(&self, free_memory_ratio: f64);
}

/// Aborts one running statistic query, if there is one
pub struct YellowAlertAction {
    threshold: f64,
    query_manager: Arc<dyn QueryManager>,
}

impl YellowAlertAction {
    /// Create an action firing below `threshold`
    pub fn new(threshold: f64, query_manager: Arc<dyn QueryManager>) -> Self {
        Self {
            threshold,
            query_manager,
        }
    }
}

impl MemoryMonitorAction for YellowAlertAction {
    fn level(&self) -> &str {
        "yellow"
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn perform_action(&self, free_memory_ratio: f64) {
        if self.query_manager.number_of_running_queries_of_type(QueryType::Statistic) == 0 {
            warn!(
                free_memory_ratio,
                threshold = self.threshold,
                "Free memory is low; no statistic query to abort"
            );
            return;
        }
        warn!(
            free_memory_ratio,
            threshold = self.threshold,
            "Free memory is low; aborting a statistic query"
        );
        if self.query_manager.abort_random_query_of_type(QueryType::Statistic) {
            metrics::record_aborted_query("memory_yellow");
        }
    }
}

/// Aborts every running query
pub struct RedAlertAction {
    threshold: f64,
    query_manager: Arc<dyn QueryManager>,
}

impl RedAlertAction {
    /// Create an action firing below `threshold`
    pub fn new(threshold: f64, query_manager: Arc<dyn QueryManager>) -> Self {
        Self {
            threshold,
            query_manager,
        }
    }
}

impl MemoryMonitorAction for RedAlertAction {
    fn level(&self) -> &str {
        "red"
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn perform_action(&self, free_memory_ratio: f64) {
        error!(
            free_memory_ratio,
            threshold = self.threshold,
            "Free memory is critically low; aborting all queries"
        );
        let aborted = self.query_manager.abort_all_queries();
        for _ in 0..aborted {
            metrics::record_aborted_query("memory_red");
        }
        info!(aborted, "Aborted queries to free memory");
    }
}

// ============================================================================
// Monitor
// ============================================================================

struct ArmedAction {
    action: Arc<dyn MemoryMonitorAction>,
    armed: AtomicBool,
}

/// Periodically checks free memory and performs the triggered actions
pub struct QueryManagerMemoryMonitor {
    info: Arc<dyn MemoryInfoProvider>,
    actions: Vec<ArmedAction>,
    period: Duration,
}

impl QueryManagerMemoryMonitor {
    /// Create a monitor checking every `period`
    pub fn new(
        info: Arc<dyn MemoryInfoProvider>,
        actions: Vec<Arc<dyn MemoryMonitorAction>>,
        period: Duration,
    ) -> Self {
        let actions = actions
            .into_iter()
            .map(|action| ArmedAction {
                action,
                armed: AtomicBool::new(true),
            })
            .collect();
        Self {
            info,
            actions,
            period,
        }
    }

    /// Monitor with a yellow and a red alert on `query_manager`
    pub fn with_alerts(
        info: Arc<dyn MemoryInfoProvider>,
        query_manager: Arc<dyn QueryManager>,
        yellow_threshold: f64,
        red_threshold: f64,
        period: Duration,
    ) -> Self {
        let actions: Vec<Arc<dyn MemoryMonitorAction>> = vec![
            Arc::new(YellowAlertAction::new(yellow_threshold, Arc::clone(&query_manager))),
            Arc::new(RedAlertAction::new(red_threshold, query_manager)),
        ];
        Self::new(info, actions, period)
    }

    /// Interval between two checks
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Check memory once; returns the number of actions performed
    pub fn check_memory(&self) -> usize {
        let ratio = self.info.free_memory_ratio();
        metrics::set_free_memory_ratio(ratio);
        debug!(free_memory_ratio = ratio, "Checked free memory");

        let mut performed = 0;
        for entry in &self.actions {
            if ratio < entry.action.threshold() {
                if entry.armed.swap(false, Ordering::SeqCst) {
                    metrics::record_memory_alert(entry.action.level());
                    entry.action.perform_action(ratio);
                    performed += 1;
                }
            } else {
                entry.armed.store(true, Ordering::SeqCst);
            }
        }
        performed
    }

    /// Start checking in a background thread
    pub fn start(self: &Arc<Self>) -> std::io::Result<MemoryMonitorHandle> {
        let signal = Arc::new(StopSignal::default());
        let monitor = Arc::clone(self);
        let thread_signal = Arc::clone(&signal);

        let thread = std::thread::Builder::new()
            .name("datamining-memory-monitor".to_string())
            .spawn(move || {
                info!(period_ms = monitor.period.as_millis() as u64, "Memory monitor started");
                loop {
                    monitor.check_memory();
                    if thread_signal.wait_for_stop(monitor.period) {
                        break;
                    }
                }
                info!("Memory monitor stopped");
            })?;

        Ok(MemoryMonitorHandle {
            signal,
            thread: Mutex::new(Some(thread)),
        })
    }
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    changed: Condvar,
}

impl StopSignal {
    /// Wait up to `timeout`; returns whether stop was requested
    fn wait_for_stop(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            self.changed.wait_for(&mut stopped, timeout);
        }
        *stopped
    }

    fn stop(&self) {
        *self.stopped.lock() = true;
        self.changed.notify_all();
    }
}

/// Handle of a running memory monitor; stops the monitor when dropped
pub struct MemoryMonitorHandle {
    signal: Arc<StopSignal>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryMonitorHandle {
    /// Stop the monitor and wait for its thread
    pub fn stop(&self) {
        self.signal.stop();
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                error!("Memory monitor thread panicked");
            }
        }
    }

    /// Whether the monitor thread is still running
    pub fn is_running(&self) -> bool {
        !*self.signal.stopped.lock()
    }
}

impl Drop for MemoryMonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
