//! Resource Orchestrator Library
//!
//! AI-CORE multi-provider resource orchestration core.
//!
//! This library closes the loop between observing provider metrics and acting on them:
//! - Health-aware provider selection across interchangeable cloud providers
//! - Rule-based policy evaluation gating actions
//! - Autoscaling decisions under cooldown constraints
//! - Metric ingestion with alert rules, deduplication and notification dispatch
//!
//! # Features
//!
//! - **Selection strategies**: round-robin, weighted, health-based, least-used
//! - **Health tracking**: decaying/recovering health scores with consecutive failure gating
//! - **Policy engine**: prioritized rules with dotted-path conditions and cached results
//! - **Autoscaling**: periodic, cancellable decision loop with bounded history
//! - **Alerting**: per-rule deduplication and isolated per-channel dispatch
//!
//! # Quick Start
//!
//! ```no_run
//! use resource_orchestrator::{
//!     config::OrchestratorConfig,
//!     dry_run::{LoggingNotifier, LoggingProviderOps},
//!     models::SelectionStrategy,
//!     orchestrator::Orchestrator,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::new(
//!         OrchestratorConfig::default(),
//!         Arc::new(LoggingProviderOps),
//!         Arc::new(LoggingNotifier),
//!     )?;
//!
//!     orchestrator.start();
//!     let provider = orchestrator.select_provider(SelectionStrategy::Weighted)?;
//!     orchestrator.report_outcome(&provider, true)?;
//!     orchestrator.shutdown().await;
//!
//!     Ok(())
//! }
//! ```

use thiserror::Error;
use uuid::Uuid;

pub mod autoscaling;
pub mod config;
pub mod dry_run;
pub mod health;
pub mod load_balancer;
pub mod models;
pub mod monitoring;
pub mod orchestrator;
pub mod policy;
pub mod telemetry;

// Re-export commonly used types
pub use autoscaling::{AutoScaler, MetricsSource, ProviderOps};
pub use config::{Args, OrchestratorConfig, ScalingConfig};
pub use health::HealthRegistry;
pub use load_balancer::ProviderSelector;
pub use models::{
    Alert, AlertRule, EvaluationContext, HealthSummary, MonitoringMetric, PolicyResult,
    PolicyRule, ProviderId, ProviderState, ScalingAction, ScalingDecision, SelectionStrategy,
};
pub use monitoring::{InMemoryMetricStore, MetricStore, MonitoringService, Notifier};
pub use orchestrator::Orchestrator;
pub use policy::PolicyEngine;

/// Resource orchestrator library errors
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Policy rule not found: {0}")]
    RuleNotFound(Uuid),

    #[error("Alert rule not found: {0}")]
    AlertRuleNotFound(Uuid),

    #[error("Alert not found: {0}")]
    AlertNotFound(Uuid),

    #[error("Provider operation failed for {provider}: {message}")]
    ProviderOperation { provider: String, message: String },

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Notification error via {channel}: {message}")]
    Notification { channel: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<validator::ValidationErrors> for OrchestratorError {
    fn from(err: validator::ValidationErrors) -> Self {
        OrchestratorError::Validation(err.to_string())
    }
}

impl From<::config::ConfigError> for OrchestratorError {
    fn from(err: ::config::ConfigError) -> Self {
        OrchestratorError::Config(err.to_string())
    }
}

/// Result type alias for the resource orchestrator library
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Provider wildcard accepted by policy rules
pub const ALL_PROVIDERS: &str = "all";

/// Health registry default settings
pub mod health_defaults {
    pub const DEFAULT_WEIGHT: f64 = 1.0;
    pub const MAX_HEALTH_SCORE: f64 = 100.0;
    pub const MIN_HEALTH_SCORE: f64 = 0.0;
    pub const SUCCESS_RECOVERY_FACTOR: f64 = 1.05;
    pub const FAILURE_DECAY_FACTOR: f64 = 0.9;
    pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;
}

/// Policy engine default settings
pub mod policy_defaults {
    pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
    pub const DEFAULT_MONTHLY_COST_THRESHOLD: f64 = 1000.0;
}

/// Autoscaling default settings
pub mod scaling_defaults {
    pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;
    pub const DEFAULT_COOLDOWN_PERIOD_SECS: u64 = 300;
    pub const DEFAULT_EXECUTION_TIMEOUT_MS: u64 = 120_000;
    pub const MAX_HISTORY_ENTRIES: usize = 1000;
    pub const SCALE_UP_CONFIDENCE: f64 = 0.8;
    pub const SCALE_DOWN_CONFIDENCE: f64 = 0.7;
    pub const NO_ACTION_CONFIDENCE: f64 = 0.5;
    pub const MANUAL_CONFIDENCE: f64 = 1.0;
    pub const COOLDOWN_REASON: &str = "Cooldown period active";
}

/// Monitoring default settings
pub mod monitoring_defaults {
    pub const DEFAULT_FLUSH_BATCH_SIZE: usize = 100;
    pub const DEFAULT_MAX_BUFFER_SIZE: usize = 10_000;
    pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 30;
    pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;
    pub const DEFAULT_RETENTION_DAYS: i64 = 7;
    /// More active alerts than this marks the system unhealthy
    pub const UNHEALTHY_ALERT_THRESHOLD: usize = 5;
}

/// Metric names the autoscaler reads from the monitoring stream
pub mod metric_names {
    pub const CPU_USAGE: &str = "cpu_usage";
    pub const MEMORY_USAGE: &str = "memory_usage";
    pub const RESPONSE_TIME: &str = "response_time";
    pub const INSTANCE_COUNT: &str = "instance_count";
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        autoscaling::{AutoScaler, MetricsSource, ProviderOps},
        config::{OrchestratorConfig, ScalingConfig},
        health::HealthRegistry,
        load_balancer::ProviderSelector,
        models::*,
        monitoring::{InMemoryMetricStore, MetricStore, MonitoringService, Notifier},
        orchestrator::Orchestrator,
        policy::PolicyEngine,
        OrchestratorError, Result,
    };
}
