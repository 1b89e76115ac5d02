//! Resource Orchestrator Models
//!
//! Core data structures shared by the health registry, provider selector, policy engine,
//! autoscaler and monitoring service.

use crate::health_defaults::{MAX_HEALTH_SCORE, MIN_HEALTH_SCORE};
use crate::monitoring_defaults::UNHEALTHY_ALERT_THRESHOLD;
use crate::OrchestratorError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Provider identifier (e.g., "aws", "azure", "gcp")
pub type ProviderId = String;

/// Provider selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    /// Cycle through eligible providers
    RoundRobin,
    /// Random draw biased by weight and health score
    #[default]
    Weighted,
    /// Highest health score wins
    HealthBased,
    /// Oldest last-used timestamp wins
    LeastUsed,
}

impl SelectionStrategy {
    pub const ALL: [SelectionStrategy; 4] = [
        SelectionStrategy::RoundRobin,
        SelectionStrategy::Weighted,
        SelectionStrategy::HealthBased,
        SelectionStrategy::LeastUsed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionStrategy::RoundRobin => "round-robin",
            SelectionStrategy::Weighted => "weighted",
            SelectionStrategy::HealthBased => "health-based",
            SelectionStrategy::LeastUsed => "least-used",
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionStrategy {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SelectionStrategy::ALL
            .iter()
            .find(|strategy| strategy.as_str() == s.trim())
            .copied()
            .ok_or_else(|| {
                OrchestratorError::Validation(format!(
                    "Invalid selection strategy: {}. Valid strategies: round-robin, weighted, health-based, least-used",
                    s
                ))
            })
    }
}

/// Live health state for a single provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderState {
    /// Provider identifier
    pub id: ProviderId,

    /// Static selection weight
    pub weight: f64,

    /// Health score between 0 and 100
    pub health_score: f64,

    /// Failures reported since the last success
    pub consecutive_failures: u32,

    /// Last time this provider was selected
    pub last_used: Option<DateTime<Utc>>,
}

impl ProviderState {
    /// Create a fully healthy provider state
    pub fn new(id: impl Into<ProviderId>, weight: f64) -> Self {
        Self {
            id: id.into(),
            weight,
            health_score: MAX_HEALTH_SCORE,
            consecutive_failures: 0,
            last_used: None,
        }
    }

    /// Weight dampened by the current health score
    pub fn effective_weight(&self) -> f64 {
        (self.weight * self.health_score / MAX_HEALTH_SCORE).max(MIN_HEALTH_SCORE)
    }

    /// Whether the provider may be picked by a selection strategy
    pub fn is_eligible(&self, max_consecutive_failures: u32) -> bool {
        self.consecutive_failures < max_consecutive_failures
    }
}

/// Metric values attached to an evaluation context
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<f64>,
}

/// Input to a policy evaluation. Conditions address its fields by dotted camelCase path,
/// e.g. `metrics.cpu` or `metadata.userRole`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,

    pub provider: ProviderId,

    pub resource_type: String,

    pub action: String,

    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,

    #[serde(default)]
    pub metrics: ContextMetrics,
}

impl EvaluationContext {
    pub fn new(
        provider: impl Into<ProviderId>,
        resource_type: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            actor_id: None,
            provider: provider.into(),
            resource_type: resource_type.into(),
            action: action.into(),
            metadata: BTreeMap::new(),
            metrics: ContextMetrics::default(),
        }
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_metrics(mut self, metrics: ContextMetrics) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Policy rule category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    Cost,
    Security,
    Performance,
    Scaling,
    Compliance,
}

/// Condition comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    Contains,
    NotContains,
}

/// A single predicate over the evaluation context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyCondition {
    /// Dotted path into the evaluation context
    pub field: String,

    pub operator: ConditionOperator,

    pub value: Value,
}

impl PolicyCondition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

/// Policy action type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyActionType {
    Alert,
    Block,
    ScaleUp,
    ScaleDown,
    Notify,
    Log,
}

/// Action produced by a triggered rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyAction {
    #[serde(rename = "type")]
    pub action_type: PolicyActionType,

    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

impl PolicyAction {
    pub fn new(action_type: PolicyActionType) -> Self {
        Self {
            action_type,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// Named, prioritized condition → action mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    pub id: Uuid,

    pub name: String,

    pub description: Option<String>,

    #[serde(rename = "type")]
    pub policy_type: PolicyType,

    /// Provider id or "all"
    pub provider: String,

    /// Implicitly AND-ed
    pub conditions: Vec<PolicyCondition>,

    pub actions: Vec<PolicyAction>,

    pub enabled: bool,

    /// Higher values evaluate first
    pub priority: i32,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl PolicyRule {
    /// Whether this rule applies to the given provider
    pub fn applies_to(&self, provider: &str) -> bool {
        self.provider == crate::ALL_PROVIDERS || self.provider == provider
    }

    /// First block action carried by the rule, if any
    pub fn block_action(&self) -> Option<&PolicyAction> {
        self.actions
            .iter()
            .find(|action| action.action_type == PolicyActionType::Block)
    }
}

fn default_all_providers() -> String {
    crate::ALL_PROVIDERS.to_string()
}

fn default_true() -> bool {
    true
}

/// Request to create a policy rule
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePolicyRuleRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,

    #[validate(length(max = 500))]
    pub description: Option<String>,

    #[serde(rename = "type")]
    pub policy_type: PolicyType,

    #[serde(default = "default_all_providers")]
    #[validate(length(min = 1, max = 100))]
    pub provider: String,

    #[serde(default)]
    pub conditions: Vec<PolicyCondition>,

    #[validate(length(min = 1))]
    pub actions: Vec<PolicyAction>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    #[validate(range(min = 0, max = 1000))]
    pub priority: i32,
}

/// Partial update of a policy rule; absent fields keep their value
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePolicyRuleRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,

    #[validate(length(max = 500))]
    pub description: Option<String>,

    #[serde(rename = "type")]
    pub policy_type: Option<PolicyType>,

    #[validate(length(min = 1, max = 100))]
    pub provider: Option<String>,

    pub conditions: Option<Vec<PolicyCondition>>,

    #[validate(length(min = 1))]
    pub actions: Option<Vec<PolicyAction>>,

    pub enabled: Option<bool>,

    #[validate(range(min = 0, max = 1000))]
    pub priority: Option<i32>,
}

/// Outcome of a policy evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyResult {
    pub allowed: bool,

    pub triggered_rule_ids: Vec<Uuid>,

    pub actions: Vec<PolicyAction>,

    pub reason: Option<String>,

    pub evaluated_at: DateTime<Utc>,
}

impl PolicyResult {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            triggered_rule_ids: Vec::new(),
            actions: Vec::new(),
            reason: None,
            evaluated_at: Utc::now(),
        }
    }

    /// Whether any triggered rule produced an action of the given type
    pub fn has_action(&self, action_type: PolicyActionType) -> bool {
        self.actions
            .iter()
            .any(|action| action.action_type == action_type)
    }
}

/// Policy cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Scaling action enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
    NoAction,
}

impl fmt::Display for ScalingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalingAction::ScaleUp => f.write_str("scale_up"),
            ScalingAction::ScaleDown => f.write_str("scale_down"),
            ScalingAction::NoAction => f.write_str("no_action"),
        }
    }
}

/// Metric snapshot for one provider as seen by the autoscaler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetrics {
    pub provider: ProviderId,

    /// CPU utilization percentage
    pub cpu: f64,

    /// Memory utilization percentage
    pub memory: f64,

    /// Response latency in milliseconds
    pub latency: f64,

    /// Running instances, when known
    pub instances: Option<u32>,

    pub timestamp: DateTime<Utc>,
}

impl ProviderMetrics {
    pub fn new(provider: impl Into<ProviderId>, cpu: f64, memory: f64, latency: f64) -> Self {
        Self {
            provider: provider.into(),
            cpu,
            memory,
            latency,
            instances: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_instances(mut self, instances: u32) -> Self {
        self.instances = Some(instances);
        self
    }
}

/// Computed scaling decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingDecision {
    pub action: ScalingAction,

    pub provider: ProviderId,

    pub reason: String,

    /// Confidence between 0 and 1
    pub confidence: f64,

    pub metrics: ProviderMetrics,

    pub current_instances: u32,

    pub recommended_instances: u32,

    pub timestamp: DateTime<Utc>,
}

/// What initiated a scaling execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingTrigger {
    Automatic,
    Manual,
}

/// Append-only scaling history record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingHistoryEntry {
    pub id: Uuid,

    pub decision: ScalingDecision,

    pub executed: bool,

    pub execution_time_ms: Option<u64>,

    pub success: Option<bool>,

    pub error: Option<String>,

    pub trigger: ScalingTrigger,

    pub timestamp: DateTime<Utc>,
}

/// Aggregated scaling statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingStats {
    pub total_entries: usize,
    pub executed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub scale_ups: usize,
    pub scale_downs: usize,
    /// Succeeded over executed, 0.0 when nothing ran
    pub success_rate: f64,
    pub last_execution: Option<DateTime<Utc>>,
}

/// A single metric sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringMetric {
    pub id: Uuid,

    pub name: String,

    pub value: f64,

    pub unit: String,

    pub timestamp: DateTime<Utc>,

    pub provider: Option<ProviderId>,

    pub resource_id: Option<String>,

    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl MonitoringMetric {
    pub fn new(name: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            value,
            unit: unit.into(),
            timestamp: Utc::now(),
            provider: None,
            resource_id: None,
            tags: HashMap::new(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<ProviderId>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Metric query filter; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricFilter {
    pub name: Option<String>,
    pub provider: Option<ProviderId>,
    pub resource_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub limit: Option<usize>,
}

impl MetricFilter {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, metric: &MonitoringMetric) -> bool {
        if let Some(ref name) = self.name {
            if &metric.name != name {
                return false;
            }
        }
        if let Some(ref provider) = self.provider {
            if metric.provider.as_ref() != Some(provider) {
                return false;
            }
        }
        if let Some(ref resource_id) = self.resource_id {
            if metric.resource_id.as_ref() != Some(resource_id) {
                return false;
            }
        }
        if let Some(start) = self.start {
            if metric.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if metric.timestamp > end {
                return false;
            }
        }
        self.tags
            .iter()
            .all(|(key, value)| metric.tags.get(key) == Some(value))
    }
}

/// Aggregate over a filtered metric set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSummary {
    pub count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub latest: Option<f64>,
}

/// Alert comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCondition {
    Gt,
    Lt,
    Eq,
    Ne,
}

impl AlertCondition {
    /// Whether `value` breaches `threshold`
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            AlertCondition::Gt => value > threshold,
            AlertCondition::Lt => value < threshold,
            AlertCondition::Eq => (value - threshold).abs() < f64::EPSILON,
            AlertCondition::Ne => (value - threshold).abs() >= f64::EPSILON,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            AlertCondition::Gt => ">",
            AlertCondition::Lt => "<",
            AlertCondition::Eq => "==",
            AlertCondition::Ne => "!=",
        }
    }
}

/// Alert severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    #[default]
    Warning,
    Critical,
}

/// Notification channel for alert actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertChannel {
    Email,
    Webhook,
    Slack,
}

impl fmt::Display for AlertChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertChannel::Email => f.write_str("email"),
            AlertChannel::Webhook => f.write_str("webhook"),
            AlertChannel::Slack => f.write_str("slack"),
        }
    }
}

/// Notification dispatched when an alert opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertAction {
    #[serde(rename = "type")]
    pub channel: AlertChannel,

    /// Address, URL or channel name, depending on `channel`
    pub target: String,

    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

impl AlertAction {
    pub fn new(channel: AlertChannel, target: impl Into<String>) -> Self {
        Self {
            channel,
            target: target.into(),
            parameters: BTreeMap::new(),
        }
    }
}

/// Threshold rule over a named metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    pub id: Uuid,

    pub name: String,

    /// Metric name this rule watches
    pub metric: String,

    pub condition: AlertCondition,

    pub threshold: f64,

    /// Informational breach window in seconds
    pub duration_secs: u64,

    pub severity: AlertSeverity,

    pub enabled: bool,

    pub actions: Vec<AlertAction>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Request to create an alert rule
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAlertRuleRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,

    #[validate(length(min = 1, max = 100))]
    pub metric: String,

    pub condition: AlertCondition,

    pub threshold: f64,

    #[serde(default)]
    pub duration_secs: u64,

    #[serde(default)]
    pub severity: AlertSeverity,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub actions: Vec<AlertAction>,
}

/// Partial update of an alert rule
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAlertRuleRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,

    #[validate(length(min = 1, max = 100))]
    pub metric: Option<String>,

    pub condition: Option<AlertCondition>,

    pub threshold: Option<f64>,

    pub duration_secs: Option<u64>,

    pub severity: Option<AlertSeverity>,

    pub enabled: Option<bool>,

    pub actions: Option<Vec<AlertAction>>,
}

/// Alert lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Resolved,
}

/// An opened alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: Uuid,

    pub rule_id: Uuid,

    pub rule_name: String,

    /// Sample that triggered the alert
    pub metric: MonitoringMetric,

    pub triggered: DateTime<Utc>,

    pub resolved: Option<DateTime<Utc>>,

    pub status: AlertStatus,

    pub message: String,

    pub severity: AlertSeverity,
}

impl Alert {
    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }
}

/// Overall system status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl SystemStatus {
    pub fn from_active_alerts(active_alerts: usize) -> Self {
        match active_alerts {
            0 => SystemStatus::Healthy,
            n if n <= UNHEALTHY_ALERT_THRESHOLD => SystemStatus::Degraded,
            _ => SystemStatus::Unhealthy,
        }
    }
}

/// System health summary for dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub status: SystemStatus,
    pub providers: Vec<ProviderState>,
    pub active_alerts: usize,
    pub buffered_metrics: usize,
    pub timestamp: DateTime<Utc>,
}
