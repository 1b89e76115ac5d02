//! Policy Engine Module
//!
//! Evaluates prioritized rules against an evaluation context. Each rule carries AND-ed
//! conditions over dotted paths into the context and a list of actions; a triggered rule
//! with a `block` action stops evaluation and denies the request.
//!
//! Results are cached per `(provider, resourceType, action, metadata, metrics)` for a
//! fixed TTL. Any rule mutation clears the whole cache.

use crate::config::PolicyConfig;
use crate::models::{
    ConditionOperator, CreatePolicyRuleRequest, EvaluationContext, PolicyAction,
    PolicyActionType, PolicyCacheStats, PolicyCondition, PolicyResult, PolicyRule, PolicyType,
    UpdatePolicyRuleRequest,
};
use crate::{OrchestratorError, Result, ALL_PROVIDERS};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

/// Cached evaluation outcome
#[derive(Debug, Clone)]
struct CachedResult {
    result: PolicyResult,
    cached_at: Instant,
}

/// Rule-based policy engine
#[derive(Debug)]
pub struct PolicyEngine {
    /// Rule set in insertion order
    rules: RwLock<Vec<PolicyRule>>,

    /// Evaluation results keyed by request shape
    cache: DashMap<String, CachedResult>,

    /// Cache entry lifetime
    cache_ttl: Duration,

    cache_hits: AtomicU64,

    cache_misses: AtomicU64,
}

impl PolicyEngine {
    /// Create a policy engine, loading the default rule set if configured
    pub fn new(config: &PolicyConfig) -> Self {
        let engine = Self::empty(config.cache_ttl());
        if config.load_default_rules {
            *engine.rules.write() = Self::default_rules(config.monthly_cost_threshold);
        }

        info!(
            rules = engine.rules.read().len(),
            cache_ttl_secs = config.cache_ttl_secs,
            "Initialized policy engine"
        );
        engine
    }

    /// Create a policy engine without any rules
    pub fn empty(cache_ttl: Duration) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            cache: DashMap::new(),
            cache_ttl,
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Built-in rules shipped with the engine
    pub fn default_rules(monthly_cost_threshold: f64) -> Vec<PolicyRule> {
        let now = Utc::now();
        let rule = |name: &str,
                    description: &str,
                    policy_type: PolicyType,
                    conditions: Vec<PolicyCondition>,
                    actions: Vec<PolicyAction>,
                    priority: i32| PolicyRule {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: Some(description.to_string()),
            policy_type,
            provider: ALL_PROVIDERS.to_string(),
            conditions,
            actions,
            enabled: true,
            priority,
            created_at: now,
            updated_at: now,
        };

        vec![
            rule(
                "Admin Resource Access Control",
                "Only administrators may act on admin resources",
                PolicyType::Security,
                vec![
                    PolicyCondition::new("resourceType", ConditionOperator::Eq, "admin"),
                    PolicyCondition::new("metadata.userRole", ConditionOperator::Ne, "admin"),
                ],
                vec![PolicyAction::new(PolicyActionType::Block)
                    .with_parameter("reason", "Admin access required")],
                200,
            ),
            rule(
                "High CPU Usage",
                "Alert and scale up when CPU usage exceeds 80%",
                PolicyType::Performance,
                vec![PolicyCondition::new("metrics.cpu", ConditionOperator::Gt, 80)],
                vec![
                    PolicyAction::new(PolicyActionType::Alert).with_parameter("severity", "high"),
                    PolicyAction::new(PolicyActionType::ScaleUp).with_parameter("factor", 1.5),
                ],
                100,
            ),
            rule(
                "High Memory Usage",
                "Alert and scale up when memory usage exceeds 85%",
                PolicyType::Performance,
                vec![PolicyCondition::new("metrics.memory", ConditionOperator::Gt, 85)],
                vec![
                    PolicyAction::new(PolicyActionType::Alert).with_parameter("severity", "high"),
                    PolicyAction::new(PolicyActionType::ScaleUp).with_parameter("factor", 1.5),
                ],
                90,
            ),
            rule(
                "Monthly Cost Limit",
                "Alert and notify when monthly cost exceeds the configured threshold",
                PolicyType::Cost,
                vec![PolicyCondition::new(
                    "metrics.cost",
                    ConditionOperator::Gt,
                    monthly_cost_threshold,
                )],
                vec![
                    PolicyAction::new(PolicyActionType::Alert)
                        .with_parameter("severity", "medium"),
                    PolicyAction::new(PolicyActionType::Notify)
                        .with_parameter("channel", "email"),
                ],
                80,
            ),
        ]
    }

    /// Evaluate all applicable rules against the context
    pub fn evaluate(&self, context: &EvaluationContext) -> PolicyResult {
        let key = cache_key(context);

        if let Some(cached) = self.cached(&key) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("orchestrator_policy_cache_hits_total").increment(1);
            return cached;
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        // Held until the result is cached so a concurrent rule write cannot slip in between
        let rules = self.rules.read();
        let result = evaluate_rules(&rules, context);
        self.cache.insert(
            key,
            CachedResult {
                result: result.clone(),
                cached_at: Instant::now(),
            },
        );
        drop(rules);

        metrics::counter!("orchestrator_policy_evaluations_total", "allowed" => if result.allowed { "true" } else { "false" }).increment(1);
        if !result.allowed {
            warn!(
                provider = %context.provider,
                resource_type = %context.resource_type,
                action = %context.action,
                reason = result.reason.as_deref().unwrap_or_default(),
                "Policy denied request"
            );
        } else {
            debug!(
                provider = %context.provider,
                action = %context.action,
                triggered = result.triggered_rule_ids.len(),
                "Policy allowed request"
            );
        }

        result
    }

    /// Create a new rule
    pub fn create_rule(&self, request: CreatePolicyRuleRequest) -> Result<PolicyRule> {
        request.validate()?;

        let now = Utc::now();
        let rule = PolicyRule {
            id: Uuid::new_v4(),
            name: request.name,
            description: request.description,
            policy_type: request.policy_type,
            provider: request.provider,
            conditions: request.conditions,
            actions: request.actions,
            enabled: request.enabled,
            priority: request.priority,
            created_at: now,
            updated_at: now,
        };

        let mut rules = self.rules.write();
        rules.push(rule.clone());
        self.cache.clear();
        drop(rules);

        info!(rule_id = %rule.id, name = %rule.name, priority = rule.priority, "Created policy rule");
        Ok(rule)
    }

    /// Apply a partial update to a rule
    pub fn update_rule(&self, id: Uuid, request: UpdatePolicyRuleRequest) -> Result<PolicyRule> {
        request.validate()?;

        let mut rules = self.rules.write();
        let rule = rules
            .iter_mut()
            .find(|rule| rule.id == id)
            .ok_or(OrchestratorError::RuleNotFound(id))?;

        if let Some(name) = request.name {
            rule.name = name;
        }
        if let Some(description) = request.description {
            rule.description = Some(description);
        }
        if let Some(policy_type) = request.policy_type {
            rule.policy_type = policy_type;
        }
        if let Some(provider) = request.provider {
            rule.provider = provider;
        }
        if let Some(conditions) = request.conditions {
            rule.conditions = conditions;
        }
        if let Some(actions) = request.actions {
            rule.actions = actions;
        }
        if let Some(enabled) = request.enabled {
            rule.enabled = enabled;
        }
        if let Some(priority) = request.priority {
            rule.priority = priority;
        }
        rule.updated_at = Utc::now();

        let updated = rule.clone();
        self.cache.clear();
        drop(rules);

        info!(rule_id = %id, "Updated policy rule");
        Ok(updated)
    }

    /// Remove a rule
    pub fn delete_rule(&self, id: Uuid) -> Result<PolicyRule> {
        let mut rules = self.rules.write();
        let index = rules
            .iter()
            .position(|rule| rule.id == id)
            .ok_or(OrchestratorError::RuleNotFound(id))?;

        let removed = rules.remove(index);
        self.cache.clear();
        drop(rules);

        info!(rule_id = %id, name = %removed.name, "Deleted policy rule");
        Ok(removed)
    }

    pub fn get_rule(&self, id: Uuid) -> Option<PolicyRule> {
        self.rules.read().iter().find(|rule| rule.id == id).cloned()
    }

    /// All rules, highest priority first
    pub fn list_rules(&self) -> Vec<PolicyRule> {
        let mut rules = self.rules.read().clone();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        rules
    }

    pub fn cache_stats(&self) -> PolicyCacheStats {
        PolicyCacheStats {
            hits: self.cache_hits.load(Ordering::Relaxed),
            misses: self.cache_misses.load(Ordering::Relaxed),
            entries: self.cache.len(),
        }
    }

    pub fn invalidate_cache(&self) {
        self.cache.clear();
        debug!("Policy evaluation cache cleared");
    }

    fn cached(&self, key: &str) -> Option<PolicyResult> {
        let entry = self.cache.get(key)?;
        if entry.cached_at.elapsed() < self.cache_ttl {
            return Some(entry.result.clone());
        }
        drop(entry);
        self.cache.remove(key);
        None
    }
}

fn cache_key(context: &EvaluationContext) -> String {
    json!({
        "provider": context.provider,
        "resourceType": context.resource_type,
        "action": context.action,
        "metadata": context.metadata,
        "metrics": context.metrics,
    })
    .to_string()
}

/// Evaluate rules in descending priority; a triggered block stops evaluation
fn evaluate_rules(rules: &[PolicyRule], context: &EvaluationContext) -> PolicyResult {
    let mut applicable: Vec<&PolicyRule> = rules
        .iter()
        .filter(|rule| rule.enabled && rule.applies_to(&context.provider))
        .collect();
    applicable.sort_by(|a, b| b.priority.cmp(&a.priority));

    let document = match serde_json::to_value(context) {
        Ok(document) => document,
        Err(e) => {
            warn!(error = %e, "Failed to serialize evaluation context, allowing request");
            return PolicyResult::allow();
        }
    };

    let mut result = PolicyResult::allow();
    for rule in applicable {
        let triggered = rule
            .conditions
            .iter()
            .all(|condition| evaluate_condition(&document, condition));
        if !triggered {
            continue;
        }

        debug!(rule_id = %rule.id, name = %rule.name, "Policy rule triggered");
        result.triggered_rule_ids.push(rule.id);
        result.actions.extend(rule.actions.iter().cloned());

        if let Some(block) = rule.block_action() {
            result.allowed = false;
            result.reason = Some(
                block
                    .parameters
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Policy violation: {}", rule.name)),
            );
            break;
        }
    }

    result
}

/// Resolve a dotted path; null counts as missing
fn lookup_field<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let value = path
        .split('.')
        .try_fold(document, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })?;

    if value.is_null() {
        None
    } else {
        Some(value)
    }
}

fn evaluate_condition(document: &Value, condition: &PolicyCondition) -> bool {
    let Some(actual) = lookup_field(document, &condition.field) else {
        return false;
    };
    let expected = &condition.value;

    match condition.operator {
        ConditionOperator::Eq => values_equal(actual, expected),
        ConditionOperator::Ne => !values_equal(actual, expected),
        ConditionOperator::Gt => compare_numbers(actual, expected, |a, b| a > b),
        ConditionOperator::Lt => compare_numbers(actual, expected, |a, b| a < b),
        ConditionOperator::Gte => compare_numbers(actual, expected, |a, b| a >= b),
        ConditionOperator::Lte => compare_numbers(actual, expected, |a, b| a <= b),
        ConditionOperator::Contains => compare_strings(actual, expected, |a, b| a.contains(b)),
        ConditionOperator::NotContains => {
            compare_strings(actual, expected, |a, b| !a.contains(b))
        }
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => actual == expected,
    }
}

fn compare_numbers(actual: &Value, expected: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

fn compare_strings(actual: &Value, expected: &Value, op: impl Fn(&str, &str) -> bool) -> bool {
    match (actual.as_str(), expected.as_str()) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}
