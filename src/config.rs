//! Configuration management for the data-mining engine
//!
//! TOML configuration files, environment variable overrides, and defaults.

use crate::management::memory_monitor::{DEFAULT_RED_THRESHOLD, DEFAULT_YELLOW_THRESHOLD};
use crate::processing::WorkerPool;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Shared worker pool
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Query execution
    #[serde(default)]
    pub query: QueryConfig,

    /// Memory pressure protection
    #[serde(default)]
    pub memory_monitor: MemoryMonitorConfig,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorConfig {
    /// Number of worker threads
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Name prefix of the worker threads
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

/// Query configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Timeout applied by the query manager in milliseconds (0 = unbounded)
    #[serde(default)]
    pub default_timeout_ms: u64,
}

/// Memory monitor configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemoryMonitorConfig {
    /// Run the memory monitor
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interval between two memory checks in milliseconds
    #[serde(default = "default_check_period_ms")]
    pub check_period_ms: u64,

    /// Free memory ratio below which one statistic query is aborted
    #[serde(default = "default_yellow_threshold")]
    pub yellow_threshold: f64,

    /// Free memory ratio below which all queries are aborted
    #[serde(default = "default_red_threshold")]
    pub red_threshold: f64,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Record Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

// Default value functions
fn default_worker_threads() -> usize { WorkerPool::default_size() }
fn default_thread_name_prefix() -> String { "datamining-worker".to_string() }
fn default_check_period_ms() -> u64 { 5_000 }
fn default_yellow_threshold() -> f64 { DEFAULT_YELLOW_THRESHOLD }
fn default_red_threshold() -> f64 { DEFAULT_RED_THRESHOLD }
fn default_true() -> bool { true }

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

impl QueryConfig {
    /// Default timeout as a duration; zero means unbounded
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Default for MemoryMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_period_ms: default_check_period_ms(),
            yellow_threshold: default_yellow_threshold(),
            red_threshold: default_red_threshold(),
        }
    }
}

impl MemoryMonitorConfig {
    /// Check period as a duration
    pub fn check_period(&self) -> Duration {
        Duration::from_millis(self.check_period_ms)
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

        toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file {}: {}", path, e))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self, String> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Executor
        if let Ok(threads) = std::env::var("DATAMINING_WORKER_THREADS") {
            if let Ok(t) = threads.parse() {
                self.executor.worker_threads = t;
            }
        }

        // Query
        if let Ok(timeout) = std::env::var("DATAMINING_QUERY_TIMEOUT_MS") {
            if let Ok(t) = timeout.parse() {
                self.query.default_timeout_ms = t;
            }
        }

        // Memory monitor
        if let Ok(period) = std::env::var("DATAMINING_MEMORY_CHECK_PERIOD_MS") {
            if let Ok(p) = period.parse() {
                self.memory_monitor.check_period_ms = p;
            }
        }
        if let Ok(enabled) = std::env::var("DATAMINING_MEMORY_MONITOR_ENABLED") {
            if let Ok(e) = enabled.parse() {
                self.memory_monitor.enabled = e;
            }
        }

        // Monitoring
        if let Ok(enabled) = std::env::var("DATAMINING_METRICS_ENABLED") {
            if let Ok(e) = enabled.parse() {
                self.monitoring.metrics_enabled = e;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.executor.worker_threads == 0 {
            return Err("Worker threads must be > 0".to_string());
        }

        let monitor = &self.memory_monitor;
        if monitor.check_period_ms == 0 {
            return Err("Memory check period must be > 0".to_string());
        }
        if !(monitor.red_threshold > 0.0 && monitor.red_threshold < monitor.yellow_threshold) {
            return Err(format!(
                "Red threshold {} must be > 0 and below the yellow threshold {}",
                monitor.red_threshold, monitor.yellow_threshold
            ));
        }
        if monitor.yellow_threshold >= 1.0 {
            return Err("Yellow threshold must be < 1".to_string());
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: &str) -> Result<(), String> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        std::fs::write(path, contents)
            .map_err(|e| format!("Failed to write config file {}: {}", path, e))
    }
}
