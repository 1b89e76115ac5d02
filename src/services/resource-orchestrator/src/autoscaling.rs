//! Autoscaling Module
//!
//! Periodically turns provider metric snapshots into scaling decisions. A decision passes
//! through the cooldown check, then the policy engine, then the scale-up/scale-down
//! thresholds. With auto-scaling enabled, decisions other than `no_action` are executed
//! through the injected [`ProviderOps`] under a deadline; the outcome is fed back into the
//! health registry and appended to a bounded history.

use crate::config::ScalingConfig;
use crate::health::HealthRegistry;
use crate::models::{
    ContextMetrics, EvaluationContext, ProviderId, ProviderMetrics, ScalingAction,
    ScalingDecision, ScalingHistoryEntry, ScalingStats, ScalingTrigger,
};
use crate::policy::PolicyEngine;
use crate::scaling_defaults::{
    COOLDOWN_REASON, MANUAL_CONFIDENCE, MAX_HISTORY_ENTRIES, NO_ACTION_CONFIDENCE,
    SCALE_DOWN_CONFIDENCE, SCALE_UP_CONFIDENCE,
};
use crate::{OrchestratorError, Result};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Executes scaling operations against a cloud provider
#[async_trait::async_trait]
pub trait ProviderOps: Send + Sync {
    /// Scale `provider` to `target_instances`
    async fn scale(&self, provider: &str, action: ScalingAction, target_instances: u32)
        -> Result<()>;
}

/// Supplies the latest metric snapshot for every provider
#[async_trait::async_trait]
pub trait MetricsSource: Send + Sync {
    async fn current_metrics(&self) -> Result<Vec<ProviderMetrics>>;
}

/// Running ticker task
struct TickerTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Autoscaling decision engine
pub struct AutoScaler {
    /// Runtime-mutable tunables
    config: RwLock<ScalingConfig>,

    policy_engine: Arc<PolicyEngine>,

    registry: Arc<HealthRegistry>,

    metrics_source: Arc<dyn MetricsSource>,

    provider_ops: Arc<dyn ProviderOps>,

    /// Start time of the last executed action per provider
    last_scaling_action: Mutex<HashMap<ProviderId, DateTime<Utc>>>,

    /// Executed attempts, oldest first
    history: Mutex<VecDeque<ScalingHistoryEntry>>,

    ticker: Mutex<Option<TickerTask>>,
}

impl AutoScaler {
    pub fn new(
        config: ScalingConfig,
        policy_engine: Arc<PolicyEngine>,
        registry: Arc<HealthRegistry>,
        metrics_source: Arc<dyn MetricsSource>,
        provider_ops: Arc<dyn ProviderOps>,
    ) -> Result<Self> {
        config.validate()?;

        info!(
            check_interval_secs = config.check_interval_secs,
            cooldown_period_secs = config.cooldown_period_secs,
            auto_scaling = config.auto_scaling,
            "Initialized autoscaler"
        );

        Ok(Self {
            config: RwLock::new(config),
            policy_engine,
            registry,
            metrics_source,
            provider_ops,
            last_scaling_action: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            ticker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> ScalingConfig {
        self.config.read().clone()
    }

    /// Replace the tunables; a running ticker picks up a new interval on its next tick
    pub fn update_config(&self, config: ScalingConfig) -> Result<()> {
        config.validate()?;
        info!(
            check_interval_secs = config.check_interval_secs,
            cooldown_period_secs = config.cooldown_period_secs,
            auto_scaling = config.auto_scaling,
            "Updated autoscaling configuration"
        );
        *self.config.write() = config;
        Ok(())
    }

    /// Compute a decision for one provider without executing it
    pub fn decide(&self, metrics: &ProviderMetrics) -> ScalingDecision {
        let config = self.config();
        let current = metrics.instances.unwrap_or(config.min_instances);

        if self.in_cooldown(&metrics.provider, &config, Utc::now()) {
            return no_action(metrics, current, COOLDOWN_REASON.to_string());
        }

        let context = EvaluationContext::new(metrics.provider.clone(), "compute", "scale")
            .with_metrics(ContextMetrics {
                cpu: Some(metrics.cpu),
                memory: Some(metrics.memory),
                ..Default::default()
            });
        let policy = self.policy_engine.evaluate(&context);
        if !policy.allowed {
            let reason = policy
                .reason
                .unwrap_or_else(|| "Denied by policy".to_string());
            return no_action(metrics, current, reason);
        }

        threshold_decision(&config, metrics, current)
    }

    /// Run one decision pass over every provider with current metrics
    pub async fn run_cycle(&self) -> Vec<ScalingDecision> {
        let snapshots = match self.metrics_source.current_metrics().await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                warn!(error = %e, "Failed to fetch provider metrics, skipping scaling cycle");
                return Vec::new();
            }
        };

        let mut decisions = Vec::with_capacity(snapshots.len());
        for metrics in snapshots {
            let decision = self.decide(&metrics);
            debug!(
                provider = %decision.provider,
                action = %decision.action,
                confidence = decision.confidence,
                reason = %decision.reason,
                "Scaling decision"
            );

            if decision.action != ScalingAction::NoAction {
                let config = self.config();
                if !config.auto_scaling {
                    info!(
                        provider = %decision.provider,
                        action = %decision.action,
                        current_instances = decision.current_instances,
                        recommended_instances = decision.recommended_instances,
                        reason = %decision.reason,
                        "Scaling recommendation (auto-scaling disabled)"
                    );
                } else if decision.recommended_instances == decision.current_instances {
                    debug!(
                        provider = %decision.provider,
                        action = %decision.action,
                        instances = decision.current_instances,
                        "Provider already at instance limit, nothing to execute"
                    );
                } else if self.claim_cooldown_slot(&decision.provider, &config) {
                    self.execute(decision.clone(), ScalingTrigger::Automatic, &config)
                        .await;
                } else {
                    debug!(provider = %decision.provider, "Scaling slot already claimed, skipping");
                }
            }

            decisions.push(decision);
        }

        decisions
    }

    /// Execute a manual scaling action, bypassing thresholds and cooldown
    pub async fn trigger_scaling(
        &self,
        provider: &str,
        action: ScalingAction,
        target_instances: Option<u32>,
        reason: Option<String>,
    ) -> Result<ScalingHistoryEntry> {
        if action == ScalingAction::NoAction {
            return Err(OrchestratorError::Validation(
                "Manual scaling requires scale_up or scale_down".to_string(),
            ));
        }
        if !self.registry.contains(provider) {
            return Err(OrchestratorError::ProviderNotFound(provider.to_string()));
        }

        let config = self.config();
        let metrics = match self.metrics_source.current_metrics().await {
            Ok(snapshots) => snapshots.into_iter().find(|m| m.provider == provider),
            Err(e) => {
                warn!(provider = %provider, error = %e, "No metrics available for manual scaling");
                None
            }
        }
        .unwrap_or_else(|| ProviderMetrics::new(provider, 0.0, 0.0, 0.0));

        let current = metrics.instances.unwrap_or(config.min_instances);
        let recommended = match target_instances {
            Some(target) => target.clamp(config.min_instances, config.max_instances),
            None => recommended_instances(&config, action, current),
        };

        let decision = ScalingDecision {
            action,
            provider: provider.to_string(),
            reason: reason.unwrap_or_else(|| "Manual scaling trigger".to_string()),
            confidence: MANUAL_CONFIDENCE,
            metrics,
            current_instances: current,
            recommended_instances: recommended,
            timestamp: Utc::now(),
        };

        info!(
            provider = %provider,
            %action,
            recommended_instances = recommended,
            "Manual scaling triggered"
        );

        self.stamp_last_action(provider, Utc::now());
        Ok(self.execute(decision, ScalingTrigger::Manual, &config).await)
    }

    /// Most recent history entries, newest first
    pub fn history(&self, limit: usize) -> Vec<ScalingHistoryEntry> {
        self.history.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn stats(&self) -> ScalingStats {
        let history = self.history.lock();

        let mut stats = ScalingStats {
            total_entries: history.len(),
            ..Default::default()
        };
        for entry in history.iter() {
            if entry.executed {
                stats.executed += 1;
            }
            match entry.success {
                Some(true) => stats.succeeded += 1,
                Some(false) => stats.failed += 1,
                None => {}
            }
            match entry.decision.action {
                ScalingAction::ScaleUp => stats.scale_ups += 1,
                ScalingAction::ScaleDown => stats.scale_downs += 1,
                ScalingAction::NoAction => {}
            }
        }
        stats.success_rate = if stats.executed > 0 {
            stats.succeeded as f64 / stats.executed as f64
        } else {
            0.0
        };
        stats.last_execution = history.back().map(|entry| entry.timestamp);

        stats
    }

    pub fn last_scaling_action(&self, provider: &str) -> Option<DateTime<Utc>> {
        self.last_scaling_action.lock().get(provider).copied()
    }

    /// Start the periodic decision loop
    pub fn start(self: &Arc<Self>) {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            warn!("Autoscaler already running");
            return;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_ticker(Arc::clone(self), token.clone()));
        *ticker = Some(TickerTask { token, handle });

        info!("Autoscaler started");
    }

    /// Stop future ticks and wait for an in-flight tick to complete
    pub async fn stop(&self) {
        let task = self.ticker.lock().take();
        let Some(task) = task else {
            return;
        };

        task.token.cancel();
        if let Err(e) = task.handle.await {
            error!(error = %e, "Autoscaler task terminated abnormally");
        }

        info!("Autoscaler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.ticker.lock().is_some()
    }

    fn in_cooldown(&self, provider: &str, config: &ScalingConfig, now: DateTime<Utc>) -> bool {
        self.last_scaling_action
            .lock()
            .get(provider)
            .map(|last| now - *last < config.cooldown_period())
            .unwrap_or(false)
    }

    /// Atomically re-check cooldown and stamp the provider; false if another pass won
    fn claim_cooldown_slot(&self, provider: &str, config: &ScalingConfig) -> bool {
        let now = Utc::now();
        let mut last_actions = self.last_scaling_action.lock();
        if let Some(last) = last_actions.get(provider) {
            if now - *last < config.cooldown_period() {
                return false;
            }
        }
        last_actions.insert(provider.to_string(), now);
        true
    }

    fn stamp_last_action(&self, provider: &str, at: DateTime<Utc>) {
        self.last_scaling_action
            .lock()
            .insert(provider.to_string(), at);
    }

    async fn execute(
        &self,
        decision: ScalingDecision,
        trigger: ScalingTrigger,
        config: &ScalingConfig,
    ) -> ScalingHistoryEntry {
        let started = Instant::now();
        let timeout = config.execution_timeout();

        let outcome = match tokio::time::timeout(
            timeout,
            self.provider_ops.scale(
                &decision.provider,
                decision.action,
                decision.recommended_instances,
            ),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::Timeout(format!(
                "Scaling {} on {} exceeded {}ms",
                decision.action, decision.provider, config.execution_timeout_ms
            ))),
        };
        let execution_time_ms = started.elapsed().as_millis() as u64;

        let success = outcome.is_ok();
        match &outcome {
            Ok(()) => info!(
                provider = %decision.provider,
                action = %decision.action,
                from = decision.current_instances,
                to = decision.recommended_instances,
                execution_time_ms,
                "Scaling action executed"
            ),
            Err(e) => error!(
                provider = %decision.provider,
                action = %decision.action,
                target_instances = decision.recommended_instances,
                reason = %decision.reason,
                error = %e,
                "Scaling action failed"
            ),
        }

        if let Err(e) = self.registry.report_outcome(&decision.provider, success) {
            warn!(provider = %decision.provider, error = %e, "Could not report scaling outcome");
        }
        self.stamp_last_action(&decision.provider, Utc::now());

        metrics::counter!(
            "orchestrator_scaling_executions_total",
            "provider" => decision.provider.clone(),
            "action" => decision.action.to_string(),
            "outcome" => if success { "success" } else { "failure" }
        )
        .increment(1);
        metrics::histogram!("orchestrator_scaling_execution_ms").record(execution_time_ms as f64);

        let entry = ScalingHistoryEntry {
            id: Uuid::new_v4(),
            decision,
            executed: true,
            execution_time_ms: Some(execution_time_ms),
            success: Some(success),
            error: outcome.err().map(|e| e.to_string()),
            trigger,
            timestamp: Utc::now(),
        };

        let mut history = self.history.lock();
        history.push_back(entry.clone());
        while history.len() > MAX_HISTORY_ENTRIES {
            history.pop_front();
        }

        entry
    }
}

async fn run_ticker(scaler: Arc<AutoScaler>, token: CancellationToken) {
    let mut period = scaler.config().check_interval();
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let decisions = scaler.run_cycle().await;
                debug!(decisions = decisions.len(), "Scaling cycle complete");

                let configured = scaler.config().check_interval();
                if configured != period {
                    period = configured;
                    interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                    info!(check_interval_secs = period.as_secs(), "Scaling interval changed");
                }
            }
            _ = token.cancelled() => {
                info!("Autoscaler ticker shutting down");
                break;
            }
        }
    }
}

fn no_action(metrics: &ProviderMetrics, current: u32, reason: String) -> ScalingDecision {
    ScalingDecision {
        action: ScalingAction::NoAction,
        provider: metrics.provider.clone(),
        reason,
        confidence: NO_ACTION_CONFIDENCE,
        metrics: metrics.clone(),
        current_instances: current,
        recommended_instances: current,
        timestamp: Utc::now(),
    }
}

fn threshold_decision(
    config: &ScalingConfig,
    metrics: &ProviderMetrics,
    current: u32,
) -> ScalingDecision {
    let up = &config.scale_up;
    let mut breaches = Vec::new();
    if metrics.cpu > up.cpu {
        breaches.push(format!("CPU usage {:.1}% above {:.1}%", metrics.cpu, up.cpu));
    }
    if metrics.memory > up.memory {
        breaches.push(format!(
            "memory usage {:.1}% above {:.1}%",
            metrics.memory, up.memory
        ));
    }
    if metrics.latency > up.latency_ms {
        breaches.push(format!(
            "latency {:.0}ms above {:.0}ms",
            metrics.latency, up.latency_ms
        ));
    }

    let down = &config.scale_down;
    let (action, reason, confidence) = if !breaches.is_empty() {
        (
            ScalingAction::ScaleUp,
            breaches.join("; "),
            SCALE_UP_CONFIDENCE,
        )
    } else if metrics.cpu < down.cpu
        && metrics.memory < down.memory
        && metrics.latency < down.latency_ms
        && current > config.min_instances
    {
        (
            ScalingAction::ScaleDown,
            "All metrics below scale-down thresholds".to_string(),
            SCALE_DOWN_CONFIDENCE,
        )
    } else {
        return no_action(metrics, current, "Metrics within normal range".to_string());
    };

    let recommended = recommended_instances(config, action, current);

    ScalingDecision {
        action,
        provider: metrics.provider.clone(),
        reason,
        confidence,
        metrics: metrics.clone(),
        current_instances: current,
        recommended_instances: recommended,
        timestamp: Utc::now(),
    }
}

/// Target instance count for an action, clamped to the configured bounds
pub fn recommended_instances(config: &ScalingConfig, action: ScalingAction, current: u32) -> u32 {
    let target = match action {
        ScalingAction::ScaleUp => (current as f64 * config.scale_up_factor).ceil(),
        ScalingAction::ScaleDown => (current as f64 * config.scale_down_factor).floor(),
        ScalingAction::NoAction => return current,
    };

    (target.min(u32::MAX as f64) as u32).clamp(config.min_instances, config.max_instances)
}
