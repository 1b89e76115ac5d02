//! Orchestrator
//!
//! Owns the health registry, provider selector, policy engine, monitoring service and
//! autoscaler built from a single [`OrchestratorConfig`], and exposes the combined API.

use crate::autoscaling::{AutoScaler, MetricsSource, ProviderOps};
use crate::config::OrchestratorConfig;
use crate::health::HealthRegistry;
use crate::load_balancer::ProviderSelector;
use crate::models::{
    Alert, AlertRule, AlertStatus, CreateAlertRuleRequest, CreatePolicyRuleRequest,
    EvaluationContext, HealthSummary, MetricFilter, MetricSummary, MonitoringMetric,
    PolicyResult, PolicyRule, ProviderId, ProviderState, ScalingAction, ScalingHistoryEntry,
    SelectionStrategy, UpdateAlertRuleRequest, UpdatePolicyRuleRequest,
};
use crate::monitoring::{InMemoryMetricStore, MetricStore, MonitoringService, Notifier};
use crate::policy::PolicyEngine;
use crate::{OrchestratorError, Result};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Multi-provider resource orchestrator
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<HealthRegistry>,
    selector: Arc<ProviderSelector>,
    policy_engine: Arc<PolicyEngine>,
    monitoring: Arc<MonitoringService>,
    autoscaler: Arc<AutoScaler>,
}

impl Orchestrator {
    /// Create an orchestrator backed by the in-memory metric store
    pub fn new(
        config: OrchestratorConfig,
        provider_ops: Arc<dyn ProviderOps>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        Self::with_metric_store(
            config,
            provider_ops,
            notifier,
            Arc::new(InMemoryMetricStore::new()),
        )
    }

    pub fn with_metric_store(
        config: OrchestratorConfig,
        provider_ops: Arc<dyn ProviderOps>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn MetricStore>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(HealthRegistry::from_config(&config));
        let selector = Arc::new(match config.load_balancer.seed {
            Some(seed) => ProviderSelector::with_seed(registry.clone(), seed),
            None => ProviderSelector::new(registry.clone()),
        });
        let policy_engine = Arc::new(PolicyEngine::new(&config.policy));
        let monitoring = Arc::new(MonitoringService::new(
            config.monitoring.clone(),
            registry.clone(),
            store,
            notifier,
        ));
        let metrics_source: Arc<dyn MetricsSource> = monitoring.clone();
        let autoscaler = Arc::new(AutoScaler::new(
            config.autoscaling.clone(),
            policy_engine.clone(),
            registry.clone(),
            metrics_source,
            provider_ops,
        )?);

        info!(
            providers = config.providers.len(),
            default_strategy = %config.load_balancer.default_strategy,
            "Resource orchestrator initialized"
        );

        Ok(Self {
            config,
            registry,
            selector,
            policy_engine,
            monitoring,
            autoscaler,
        })
    }

    /// Launch the scaling ticker and the monitoring background tasks
    pub fn start(&self) {
        self.monitoring.start();
        self.autoscaler.start();
        info!("Resource orchestrator started");
    }

    /// Cancel background tasks and wait for them to finish
    pub async fn shutdown(&self) {
        info!("Shutting down resource orchestrator");
        self.autoscaler.stop().await;
        self.monitoring.stop().await;
        info!("Resource orchestrator shutdown complete");
    }

    pub fn select_provider(&self, strategy: SelectionStrategy) -> Result<ProviderId> {
        self.selector.select(strategy)
    }

    /// Select with the configured default strategy
    pub fn select_default_provider(&self) -> Result<ProviderId> {
        self.selector.select(self.config.load_balancer.default_strategy)
    }

    pub fn report_outcome(&self, provider: &str, success: bool) -> Result<ProviderState> {
        self.registry.report_outcome(provider, success)
    }

    /// Select a provider, run `op` against it under `deadline` and report the outcome
    pub async fn execute_with_provider<T, F, Fut>(
        &self,
        strategy: SelectionStrategy,
        deadline: Duration,
        op: F,
    ) -> Result<T>
    where
        F: FnOnce(ProviderId) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let provider = self.selector.select(strategy)?;

        let result = match tokio::time::timeout(deadline, op(provider.clone())).await {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::Timeout(format!(
                "Operation on {} exceeded {}ms",
                provider,
                deadline.as_millis()
            ))),
        };

        match &result {
            Ok(_) => debug!(provider = %provider, "Provider operation succeeded"),
            Err(e) => warn!(provider = %provider, error = %e, "Provider operation failed"),
        }
        self.registry.report_outcome(&provider, result.is_ok())?;

        result
    }

    pub fn evaluate(&self, context: &EvaluationContext) -> PolicyResult {
        self.policy_engine.evaluate(context)
    }

    pub fn create_policy_rule(&self, request: CreatePolicyRuleRequest) -> Result<PolicyRule> {
        self.policy_engine.create_rule(request)
    }

    pub fn update_policy_rule(
        &self,
        id: Uuid,
        request: UpdatePolicyRuleRequest,
    ) -> Result<PolicyRule> {
        self.policy_engine.update_rule(id, request)
    }

    pub fn delete_policy_rule(&self, id: Uuid) -> Result<PolicyRule> {
        self.policy_engine.delete_rule(id)
    }

    pub fn list_policy_rules(&self) -> Vec<PolicyRule> {
        self.policy_engine.list_rules()
    }

    pub async fn record_metric(&self, metric: MonitoringMetric) -> Result<Vec<Alert>> {
        self.monitoring.record_metric(metric).await
    }

    pub async fn get_metrics(&self, filter: &MetricFilter) -> Vec<MonitoringMetric> {
        self.monitoring.get_metrics(filter).await
    }

    pub async fn aggregate_metrics(&self, filter: &MetricFilter) -> MetricSummary {
        self.monitoring.aggregate_metrics(filter).await
    }

    pub fn create_alert_rule(&self, request: CreateAlertRuleRequest) -> Result<AlertRule> {
        self.monitoring.create_alert_rule(request)
    }

    pub fn update_alert_rule(
        &self,
        id: Uuid,
        request: UpdateAlertRuleRequest,
    ) -> Result<AlertRule> {
        self.monitoring.update_alert_rule(id, request)
    }

    pub fn delete_alert_rule(&self, id: Uuid) -> Result<AlertRule> {
        self.monitoring.delete_alert_rule(id)
    }

    pub fn resolve_alert(&self, id: Uuid) -> Result<Alert> {
        self.monitoring.resolve_alert(id)
    }

    pub fn get_alerts(&self, status: Option<AlertStatus>) -> Vec<Alert> {
        self.monitoring.get_alerts(status)
    }

    pub fn system_health(&self) -> HealthSummary {
        self.monitoring.get_system_health()
    }

    pub async fn trigger_scaling(
        &self,
        provider: &str,
        action: ScalingAction,
        target_instances: Option<u32>,
        reason: Option<String>,
    ) -> Result<ScalingHistoryEntry> {
        self.autoscaler
            .trigger_scaling(provider, action, target_instances, reason)
            .await
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<HealthRegistry> {
        &self.registry
    }

    pub fn policy_engine(&self) -> &Arc<PolicyEngine> {
        &self.policy_engine
    }

    pub fn monitoring(&self) -> &Arc<MonitoringService> {
        &self.monitoring
    }

    pub fn autoscaler(&self) -> &Arc<AutoScaler> {
        &self.autoscaler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dry_run::{LoggingNotifier, LoggingProviderOps};

    fn orchestrator() -> Orchestrator {
        let mut config = OrchestratorConfig::default();
        config.load_balancer.seed = Some(11);
        Orchestrator::new(
            config,
            Arc::new(LoggingProviderOps),
            Arc::new(LoggingNotifier),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = OrchestratorConfig {
            providers: vec![],
            ..Default::default()
        };
        assert!(Orchestrator::new(
            config,
            Arc::new(LoggingProviderOps),
            Arc::new(LoggingNotifier)
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_execute_with_provider_reports_success() {
        let orchestrator = orchestrator();

        let value = orchestrator
            .execute_with_provider(
                SelectionStrategy::RoundRobin,
                Duration::from_secs(1),
                |provider| async move { Ok(format!("deployed to {}", provider)) },
            )
            .await
            .unwrap();

        assert_eq!(value, "deployed to aws");
        assert!(orchestrator.registry().state("aws").unwrap().last_used.is_some());
    }

    #[tokio::test]
    async fn test_execute_with_provider_reports_failure() {
        let orchestrator = orchestrator();

        let result: Result<()> = orchestrator
            .execute_with_provider(
                SelectionStrategy::RoundRobin,
                Duration::from_secs(1),
                |provider| async move {
                    Err(OrchestratorError::ProviderOperation {
                        provider,
                        message: "throttled".to_string(),
                    })
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(
            orchestrator.registry().state("aws").unwrap().consecutive_failures,
            1
        );
    }

    #[tokio::test]
    async fn test_execute_with_provider_timeout_counts_as_failure() {
        let orchestrator = orchestrator();

        let result: Result<()> = orchestrator
            .execute_with_provider(
                SelectionStrategy::HealthBased,
                Duration::from_millis(10),
                |_| async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(())
                },
            )
            .await;

        assert!(matches!(result, Err(OrchestratorError::Timeout(_))));
        assert_eq!(
            orchestrator.registry().state("aws").unwrap().consecutive_failures,
            1
        );
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let orchestrator = orchestrator();
        orchestrator.start();
        assert!(orchestrator.autoscaler().is_running());
        assert!(orchestrator.monitoring().is_running());

        orchestrator.shutdown().await;
        assert!(!orchestrator.autoscaler().is_running());
        assert!(!orchestrator.monitoring().is_running());
    }
}
