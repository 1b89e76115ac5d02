//! Resource Orchestrator Configuration Module
//!
//! Handles loading, validation, and management of orchestrator configuration
//! from configuration files, environment variables, and command-line arguments.

use crate::health_defaults::{DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_WEIGHT};
use crate::models::SelectionStrategy;
use crate::monitoring_defaults::{
    DEFAULT_FLUSH_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL_SECS, DEFAULT_MAX_BUFFER_SIZE,
    DEFAULT_RETENTION_DAYS, DEFAULT_SWEEP_INTERVAL_SECS,
};
use crate::policy_defaults::{DEFAULT_CACHE_TTL_SECS, DEFAULT_MONTHLY_COST_THRESHOLD};
use crate::scaling_defaults::{
    DEFAULT_CHECK_INTERVAL_SECS, DEFAULT_COOLDOWN_PERIOD_SECS, DEFAULT_EXECUTION_TIMEOUT_MS,
};
use crate::{OrchestratorError, Result};

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Main orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Known providers, in registry order
    pub providers: Vec<ProviderConfig>,

    /// Provider selection configuration
    pub load_balancer: LoadBalancerConfig,

    /// Policy engine configuration
    pub policy: PolicyConfig,

    /// Autoscaling configuration
    pub autoscaling: ScalingConfig,

    /// Monitoring and alerting configuration
    pub monitoring: MonitoringConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider identifier
    pub id: String,

    /// Selection weight
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    DEFAULT_WEIGHT
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            weight,
        }
    }
}

/// Provider selection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    /// Strategy used when callers do not pick one
    pub default_strategy: SelectionStrategy,

    /// Consecutive failures at which a provider stops being eligible
    pub max_consecutive_failures: u32,

    /// Fixed RNG seed for weighted selection
    pub seed: Option<u64>,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            default_strategy: SelectionStrategy::Weighted,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            seed: None,
        }
    }
}

/// Policy engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Evaluation cache TTL in seconds
    pub cache_ttl_secs: u64,

    /// Load the built-in rule set at startup
    pub load_default_rules: bool,

    /// Monthly cost above which the default cost rule fires
    pub monthly_cost_threshold: f64,
}

impl PolicyConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            load_default_rules: true,
            monthly_cost_threshold: DEFAULT_MONTHLY_COST_THRESHOLD,
        }
    }
}

/// Threshold triple for scaling decisions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalingThresholds {
    /// CPU utilization percentage
    pub cpu: f64,

    /// Memory utilization percentage
    pub memory: f64,

    /// Response latency in milliseconds
    pub latency_ms: f64,
}

/// Autoscaling tunables, mutable at runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    /// Decision loop interval in seconds
    pub check_interval_secs: u64,

    /// Minimum seconds between two executed actions for one provider
    pub cooldown_period_secs: u64,

    /// Any metric above these triggers a scale up
    pub scale_up: ScalingThresholds,

    /// All metrics below these allow a scale down
    pub scale_down: ScalingThresholds,

    pub scale_up_factor: f64,

    pub scale_down_factor: f64,

    pub min_instances: u32,

    pub max_instances: u32,

    /// Execute decisions instead of only recommending them
    pub auto_scaling: bool,

    /// Deadline for a single provider scale call in milliseconds
    pub execution_timeout_ms: u64,
}

impl ScalingConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn cooldown_period(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_period_secs as i64)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    /// Validate scaling settings
    pub fn validate(&self) -> Result<()> {
        if self.check_interval_secs == 0 {
            return Err(OrchestratorError::Config(
                "Scaling check interval must be greater than 0".to_string(),
            ));
        }

        if self.min_instances > self.max_instances {
            return Err(OrchestratorError::Config(format!(
                "min_instances ({}) cannot exceed max_instances ({})",
                self.min_instances, self.max_instances
            )));
        }

        if self.scale_up_factor < 1.0 {
            return Err(OrchestratorError::Config(
                "Scale up factor must be at least 1.0".to_string(),
            ));
        }

        if !(self.scale_down_factor > 0.0 && self.scale_down_factor <= 1.0) {
            return Err(OrchestratorError::Config(
                "Scale down factor must be in (0, 1]".to_string(),
            ));
        }

        if self.execution_timeout_ms == 0 {
            return Err(OrchestratorError::Config(
                "Scaling execution timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            cooldown_period_secs: DEFAULT_COOLDOWN_PERIOD_SECS,
            scale_up: ScalingThresholds {
                cpu: 70.0,
                memory: 80.0,
                latency_ms: 1000.0,
            },
            scale_down: ScalingThresholds {
                cpu: 30.0,
                memory: 40.0,
                latency_ms: 200.0,
            },
            scale_up_factor: 1.5,
            scale_down_factor: 0.75,
            min_instances: 1,
            max_instances: 10,
            auto_scaling: false,
            execution_timeout_ms: DEFAULT_EXECUTION_TIMEOUT_MS,
        }
    }
}

/// Monitoring and alerting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Buffered metrics that trigger a flush to the metric store
    pub flush_batch_size: usize,

    /// Upper bound on buffered metrics when the store is failing
    pub max_buffer_size: usize,

    /// Periodic flush interval in seconds
    pub flush_interval_secs: u64,

    /// Retention sweep interval in seconds
    pub sweep_interval_secs: u64,

    /// Metric and resolved alert retention in days
    pub retention_days: i64,
}

impl MonitoringConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            flush_batch_size: DEFAULT_FLUSH_BATCH_SIZE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or EnvFilter directive
    pub level: String,

    /// Output format ("json" or "pretty")
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(
    name = "resource-orchestrator",
    about = "AI-CORE multi-provider resource orchestrator",
    version
)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/orchestrator.yaml")]
    pub config: PathBuf,

    /// Environment (development, production)
    #[arg(short, long, default_value = "development")]
    pub environment: String,

    /// Log level (overrides config)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Default selection strategy (overrides config)
    #[arg(long)]
    pub strategy: Option<String>,

    /// Execute scaling decisions instead of only recommending them
    #[arg(long)]
    pub auto_scaling: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl OrchestratorConfig {
    /// Load configuration from file and environment variables
    pub fn load(args: &Args) -> anyhow::Result<Self> {
        let mut settings = config::Config::builder();

        // Load base configuration file
        if args.config.exists() {
            settings = settings.add_source(config::File::from(args.config.clone()).required(false));
        }

        // Add environment-specific overrides
        let env_file = format!("config/orchestrator-{}.yaml", args.environment);
        settings = settings.add_source(config::File::with_name(&env_file).required(false));

        // Add environment variables with prefix
        settings =
            settings.add_source(config::Environment::with_prefix("ORCHESTRATOR").separator("__"));

        let mut config: OrchestratorConfig = settings
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Apply command-line overrides
        if let Some(ref log_level) = args.log_level {
            config.logging.level = log_level.clone();
        }

        if let Some(ref strategy) = args.strategy {
            config.load_balancer.default_strategy = strategy.parse()?;
        }

        if args.auto_scaling {
            config.autoscaling.auto_scaling = true;
        }

        if args.debug {
            config.logging.level = "debug".to_string();
        }

        config
            .validate()
            .context("Configuration validation failed")?;

        Ok(config)
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            return Err(OrchestratorError::Config(
                "At least one provider must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.id.trim().is_empty() {
                return Err(OrchestratorError::Config(
                    "Provider id cannot be empty".to_string(),
                ));
            }
            if !seen.insert(provider.id.as_str()) {
                return Err(OrchestratorError::Config(format!(
                    "Duplicate provider id: {}",
                    provider.id
                )));
            }
            if !provider.weight.is_finite() || provider.weight < 0.0 {
                return Err(OrchestratorError::Config(format!(
                    "Provider {} has invalid weight {}",
                    provider.id, provider.weight
                )));
            }
        }

        if self.load_balancer.max_consecutive_failures == 0 {
            return Err(OrchestratorError::Config(
                "max_consecutive_failures must be greater than 0".to_string(),
            ));
        }

        self.autoscaling.validate()?;

        if self.monitoring.flush_batch_size == 0 {
            return Err(OrchestratorError::Config(
                "Metric flush batch size must be greater than 0".to_string(),
            ));
        }

        if self.monitoring.max_buffer_size < self.monitoring.flush_batch_size {
            return Err(OrchestratorError::Config(
                "Metric buffer size must be at least the flush batch size".to_string(),
            ));
        }

        if self.monitoring.flush_interval_secs == 0 || self.monitoring.sweep_interval_secs == 0 {
            return Err(OrchestratorError::Config(
                "Monitoring intervals must be greater than 0".to_string(),
            ));
        }

        if self.monitoring.retention_days <= 0 {
            return Err(OrchestratorError::Config(
                "Retention must be at least one day".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            providers: vec![
                ProviderConfig::new("aws", DEFAULT_WEIGHT),
                ProviderConfig::new("azure", DEFAULT_WEIGHT),
                ProviderConfig::new("gcp", DEFAULT_WEIGHT),
            ],
            load_balancer: LoadBalancerConfig::default(),
            policy: PolicyConfig::default(),
            autoscaling: ScalingConfig::default(),
            monitoring: MonitoringConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
