//! Monitoring & Alerting Module
//!
//! Buffers metric samples and flushes them to a [`MetricStore`] in batches, checks each
//! sample against alert rules as it arrives, deduplicates alerts per rule and dispatches
//! rule actions through a [`Notifier`]. Also tracks the latest sample per provider so the
//! autoscaler can read current utilization from the same stream.

use crate::autoscaling::MetricsSource;
use crate::config::MonitoringConfig;
use crate::health::HealthRegistry;
use crate::metric_names::{CPU_USAGE, INSTANCE_COUNT, MEMORY_USAGE, RESPONSE_TIME};
use crate::models::{
    Alert, AlertAction, AlertRule, AlertStatus, CreateAlertRuleRequest, HealthSummary,
    MetricFilter, MetricSummary, MonitoringMetric, ProviderId, ProviderMetrics, SystemStatus,
    UpdateAlertRuleRequest,
};
use crate::{OrchestratorError, Result};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

/// Delivers alert notifications over a channel
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, action: &AlertAction, alert: &Alert) -> Result<()>;
}

/// Durable metric storage
#[async_trait::async_trait]
pub trait MetricStore: Send + Sync {
    async fn append(&self, metrics: Vec<MonitoringMetric>) -> Result<()>;

    async fn query(&self, filter: &MetricFilter) -> Result<Vec<MonitoringMetric>>;

    /// Delete samples older than `cutoff`, returning how many were removed
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Process-local metric store
#[derive(Debug, Default)]
pub struct InMemoryMetricStore {
    metrics: RwLock<Vec<MonitoringMetric>>,
}

impl InMemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.read().is_empty()
    }
}

#[async_trait::async_trait]
impl MetricStore for InMemoryMetricStore {
    async fn append(&self, metrics: Vec<MonitoringMetric>) -> Result<()> {
        self.metrics.write().extend(metrics);
        Ok(())
    }

    async fn query(&self, filter: &MetricFilter) -> Result<Vec<MonitoringMetric>> {
        let mut matched: Vec<_> = self
            .metrics
            .read()
            .iter()
            .filter(|metric| filter.matches(metric))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut metrics = self.metrics.write();
        let before = metrics.len();
        metrics.retain(|metric| metric.timestamp >= cutoff);
        Ok(before - metrics.len())
    }
}

/// Alert records plus the per-rule active slot used for deduplication
#[derive(Debug, Default)]
struct AlertBook {
    alerts: HashMap<Uuid, Alert>,
    active_by_rule: HashMap<Uuid, Uuid>,
}

impl AlertBook {
    fn active_count(&self) -> usize {
        self.active_by_rule.len()
    }
}

struct BackgroundTasks {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Metric ingestion and alerting service
pub struct MonitoringService {
    config: MonitoringConfig,

    registry: Arc<HealthRegistry>,

    store: Arc<dyn MetricStore>,

    notifier: Arc<dyn Notifier>,

    /// Samples not yet flushed to the store, oldest first
    buffer: Mutex<VecDeque<MonitoringMetric>>,

    /// Latest sample per provider and metric name
    latest: RwLock<HashMap<ProviderId, HashMap<String, MonitoringMetric>>>,

    alert_rules: RwLock<HashMap<Uuid, AlertRule>>,

    alerts: Mutex<AlertBook>,

    tasks: Mutex<Option<BackgroundTasks>>,
}

impl MonitoringService {
    pub fn new(
        config: MonitoringConfig,
        registry: Arc<HealthRegistry>,
        store: Arc<dyn MetricStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        info!(
            flush_batch_size = config.flush_batch_size,
            max_buffer_size = config.max_buffer_size,
            retention_days = config.retention_days,
            "Initialized monitoring service"
        );

        Self {
            config,
            registry,
            store,
            notifier,
            buffer: Mutex::new(VecDeque::new()),
            latest: RwLock::new(HashMap::new()),
            alert_rules: RwLock::new(HashMap::new()),
            alerts: Mutex::new(AlertBook::default()),
            tasks: Mutex::new(None),
        }
    }

    /// Record a sample; returns the alerts it opened
    pub async fn record_metric(&self, metric: MonitoringMetric) -> Result<Vec<Alert>> {
        if metric.name.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "Metric name cannot be empty".to_string(),
            ));
        }
        if !metric.value.is_finite() {
            return Err(OrchestratorError::Validation(format!(
                "Metric {} has non-finite value {}",
                metric.name, metric.value
            )));
        }

        if let Some(ref provider) = metric.provider {
            let mut latest = self.latest.write();
            let samples = latest.entry(provider.clone()).or_default();
            let newer = samples
                .get(&metric.name)
                .map(|existing| metric.timestamp >= existing.timestamp)
                .unwrap_or(true);
            if newer {
                samples.insert(metric.name.clone(), metric.clone());
            }
        }

        let should_flush = {
            let mut buffer = self.buffer.lock();
            buffer.push_back(metric.clone());
            enforce_buffer_bound(&mut buffer, self.config.max_buffer_size);
            buffer.len() >= self.config.flush_batch_size
        };

        metrics::counter!("orchestrator_metrics_recorded_total", "name" => metric.name.clone())
            .increment(1);

        let opened = self.check_alerts(&metric);
        for alert in &opened {
            self.dispatch(alert).await;
        }

        if should_flush {
            if let Err(e) = self.flush_buffer().await {
                warn!(error = %e, "Metric flush failed, samples kept in buffer");
            }
        }

        Ok(opened)
    }

    /// Drain the buffer into the store, re-queueing the batch on failure
    pub async fn flush_buffer(&self) -> Result<usize> {
        let batch: Vec<MonitoringMetric> = self.buffer.lock().drain(..).collect();
        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.len();
        match self.store.append(batch.clone()).await {
            Ok(()) => {
                debug!(count, "Flushed metrics to store");
                metrics::counter!("orchestrator_metrics_flushed_total").increment(count as u64);
                Ok(count)
            }
            Err(e) => {
                let mut buffer = self.buffer.lock();
                for metric in batch.into_iter().rev() {
                    buffer.push_front(metric);
                }
                enforce_buffer_bound(&mut buffer, self.config.max_buffer_size);
                Err(e)
            }
        }
    }

    /// Stored and buffered samples matching the filter, newest first
    pub async fn get_metrics(&self, filter: &MetricFilter) -> Vec<MonitoringMetric> {
        let unlimited = MetricFilter {
            limit: None,
            ..filter.clone()
        };

        let mut metrics = match self.store.query(&unlimited).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Metric store query failed, serving buffered metrics only");
                Vec::new()
            }
        };

        let mut seen: HashSet<Uuid> = metrics.iter().map(|metric| metric.id).collect();
        {
            let buffer = self.buffer.lock();
            for metric in buffer.iter() {
                if filter.matches(metric) && seen.insert(metric.id) {
                    metrics.push(metric.clone());
                }
            }
        }

        metrics.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            metrics.truncate(limit);
        }
        metrics
    }

    pub async fn aggregate_metrics(&self, filter: &MetricFilter) -> MetricSummary {
        let metrics = self.get_metrics(filter).await;
        if metrics.is_empty() {
            return MetricSummary::default();
        }

        let values: Vec<f64> = metrics.iter().map(|metric| metric.value).collect();
        let sum: f64 = values.iter().sum();

        MetricSummary {
            count: values.len(),
            min: values.iter().copied().reduce(f64::min),
            max: values.iter().copied().reduce(f64::max),
            avg: Some(sum / values.len() as f64),
            latest: values.first().copied(),
        }
    }

    pub fn create_alert_rule(&self, request: CreateAlertRuleRequest) -> Result<AlertRule> {
        request.validate()?;
        if !request.threshold.is_finite() {
            return Err(OrchestratorError::Validation(
                "Alert threshold must be finite".to_string(),
            ));
        }

        let now = Utc::now();
        let rule = AlertRule {
            id: Uuid::new_v4(),
            name: request.name,
            metric: request.metric,
            condition: request.condition,
            threshold: request.threshold,
            duration_secs: request.duration_secs,
            severity: request.severity,
            enabled: request.enabled,
            actions: request.actions,
            created_at: now,
            updated_at: now,
        };

        self.alert_rules.write().insert(rule.id, rule.clone());
        info!(
            rule_id = %rule.id,
            name = %rule.name,
            metric = %rule.metric,
            threshold = rule.threshold,
            "Created alert rule"
        );
        Ok(rule)
    }

    pub fn update_alert_rule(&self, id: Uuid, request: UpdateAlertRuleRequest) -> Result<AlertRule> {
        request.validate()?;
        if let Some(threshold) = request.threshold {
            if !threshold.is_finite() {
                return Err(OrchestratorError::Validation(
                    "Alert threshold must be finite".to_string(),
                ));
            }
        }

        let mut rules = self.alert_rules.write();
        let rule = rules
            .get_mut(&id)
            .ok_or(OrchestratorError::AlertRuleNotFound(id))?;

        if let Some(name) = request.name {
            rule.name = name;
        }
        if let Some(metric) = request.metric {
            rule.metric = metric;
        }
        if let Some(condition) = request.condition {
            rule.condition = condition;
        }
        if let Some(threshold) = request.threshold {
            rule.threshold = threshold;
        }
        if let Some(duration_secs) = request.duration_secs {
            rule.duration_secs = duration_secs;
        }
        if let Some(severity) = request.severity {
            rule.severity = severity;
        }
        if let Some(enabled) = request.enabled {
            rule.enabled = enabled;
        }
        if let Some(actions) = request.actions {
            rule.actions = actions;
        }
        rule.updated_at = Utc::now();

        info!(rule_id = %id, "Updated alert rule");
        Ok(rule.clone())
    }

    /// Remove a rule; alerts it already opened are kept
    pub fn delete_alert_rule(&self, id: Uuid) -> Result<AlertRule> {
        let removed = self
            .alert_rules
            .write()
            .remove(&id)
            .ok_or(OrchestratorError::AlertRuleNotFound(id))?;

        info!(rule_id = %id, name = %removed.name, "Deleted alert rule");
        Ok(removed)
    }

    pub fn get_alert_rule(&self, id: Uuid) -> Option<AlertRule> {
        self.alert_rules.read().get(&id).cloned()
    }

    pub fn list_alert_rules(&self) -> Vec<AlertRule> {
        let mut rules: Vec<_> = self.alert_rules.read().values().cloned().collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        rules
    }

    /// Resolve an alert, freeing its rule to open a new one
    pub fn resolve_alert(&self, id: Uuid) -> Result<Alert> {
        let mut book = self.alerts.lock();
        let alert = book
            .alerts
            .get_mut(&id)
            .ok_or(OrchestratorError::AlertNotFound(id))?;

        if !alert.is_active() {
            return Ok(alert.clone());
        }

        alert.status = AlertStatus::Resolved;
        alert.resolved = Some(Utc::now());
        let resolved = alert.clone();

        if book.active_by_rule.get(&resolved.rule_id) == Some(&id) {
            book.active_by_rule.remove(&resolved.rule_id);
        }
        metrics::gauge!("orchestrator_active_alerts").set(book.active_count() as f64);
        drop(book);

        info!(alert_id = %id, rule = %resolved.rule_name, "Resolved alert");
        Ok(resolved)
    }

    /// Alerts newest first, optionally filtered by status
    pub fn get_alerts(&self, status: Option<AlertStatus>) -> Vec<Alert> {
        let mut alerts: Vec<_> = self
            .alerts
            .lock()
            .alerts
            .values()
            .filter(|alert| status.map_or(true, |status| alert.status == status))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.triggered.cmp(&a.triggered));
        alerts
    }

    pub fn active_alert_count(&self) -> usize {
        self.alerts.lock().active_count()
    }

    pub fn buffered_count(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn get_system_health(&self) -> HealthSummary {
        let active_alerts = self.active_alert_count();

        HealthSummary {
            status: SystemStatus::from_active_alerts(active_alerts),
            providers: self.registry.snapshot(),
            active_alerts,
            buffered_metrics: self.buffered_count(),
            timestamp: Utc::now(),
        }
    }

    /// Evict samples and resolved alerts older than the retention window
    pub async fn sweep(&self) -> usize {
        let cutoff = Utc::now() - self.config.retention();

        let buffered_removed = {
            let mut buffer = self.buffer.lock();
            let before = buffer.len();
            buffer.retain(|metric| metric.timestamp >= cutoff);
            before - buffer.len()
        };

        let stored_removed = match self.store.purge_before(cutoff).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "Failed to purge expired metrics from store");
                0
            }
        };

        let alerts_removed = {
            let mut book = self.alerts.lock();
            let before = book.alerts.len();
            book.alerts.retain(|_, alert| match alert.resolved {
                Some(resolved) => alert.is_active() || resolved >= cutoff,
                None => true,
            });
            before - book.alerts.len()
        };

        info!(
            buffered_removed,
            stored_removed, alerts_removed, "Retention sweep complete"
        );
        buffered_removed + stored_removed
    }

    /// Start the periodic flush and retention sweep tasks
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            warn!("Monitoring service already running");
            return;
        }

        let token = CancellationToken::new();
        let flush = tokio::spawn(run_flush_task(Arc::clone(self), token.clone()));
        let sweep = tokio::spawn(run_sweep_task(Arc::clone(self), token.clone()));
        *tasks = Some(BackgroundTasks {
            token,
            handles: vec![flush, sweep],
        });

        info!(
            flush_interval_secs = self.config.flush_interval_secs,
            sweep_interval_secs = self.config.sweep_interval_secs,
            "Monitoring service started"
        );
    }

    /// Stop background tasks and flush whatever is still buffered
    pub async fn stop(&self) {
        let tasks = self.tasks.lock().take();
        if let Some(tasks) = tasks {
            tasks.token.cancel();
            for handle in tasks.handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "Monitoring task terminated abnormally");
                }
            }
        }

        if let Err(e) = self.flush_buffer().await {
            warn!(
                error = %e,
                buffered = self.buffered_count(),
                "Final metric flush failed"
            );
        }

        info!("Monitoring service stopped");
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some()
    }

    /// Open alerts for every matching rule without an active alert
    fn check_alerts(&self, metric: &MonitoringMetric) -> Vec<Alert> {
        let breached: Vec<AlertRule> = self
            .alert_rules
            .read()
            .values()
            .filter(|rule| {
                rule.enabled
                    && rule.metric == metric.name
                    && rule.condition.evaluate(metric.value, rule.threshold)
            })
            .cloned()
            .collect();

        if breached.is_empty() {
            return Vec::new();
        }

        let mut opened = Vec::new();
        let mut book = self.alerts.lock();
        for rule in breached {
            if book.active_by_rule.contains_key(&rule.id) {
                debug!(rule_id = %rule.id, "Alert already active for rule, skipping");
                continue;
            }

            let alert = Alert {
                id: Uuid::new_v4(),
                rule_id: rule.id,
                rule_name: rule.name.clone(),
                metric: metric.clone(),
                triggered: Utc::now(),
                resolved: None,
                status: AlertStatus::Active,
                message: format!(
                    "{}: {} is {:.2} ({} {:.2})",
                    rule.name,
                    metric.name,
                    metric.value,
                    rule.condition.symbol(),
                    rule.threshold
                ),
                severity: rule.severity,
            };

            book.active_by_rule.insert(rule.id, alert.id);
            book.alerts.insert(alert.id, alert.clone());
            opened.push(alert);
        }
        let active = book.active_count();
        drop(book);

        for alert in &opened {
            warn!(
                alert_id = %alert.id,
                rule = %alert.rule_name,
                severity = ?alert.severity,
                message = %alert.message,
                "Alert triggered"
            );
            metrics::counter!("orchestrator_alerts_opened_total").increment(1);
        }
        metrics::gauge!("orchestrator_active_alerts").set(active as f64);

        opened
    }

    /// Send an opened alert to every action of its rule; failures are isolated per action
    async fn dispatch(&self, alert: &Alert) {
        let actions = match self.alert_rules.read().get(&alert.rule_id) {
            Some(rule) => rule.actions.clone(),
            None => return,
        };

        let results = join_all(actions.iter().map(|action| async move {
            (action, self.notifier.notify(action, alert).await)
        }))
        .await;

        for (action, result) in results {
            match result {
                Ok(()) => debug!(
                    alert_id = %alert.id,
                    channel = %action.channel,
                    target = %action.target,
                    "Alert notification sent"
                ),
                Err(e) => {
                    error!(
                        alert_id = %alert.id,
                        channel = %action.channel,
                        target = %action.target,
                        error = %e,
                        "Alert notification failed"
                    );
                    metrics::counter!("orchestrator_alert_notification_failures_total", "channel" => action.channel.to_string()).increment(1);
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl MetricsSource for MonitoringService {
    /// Providers with current cpu, memory and response time samples
    async fn current_metrics(&self) -> Result<Vec<ProviderMetrics>> {
        let latest = self.latest.read();

        let mut snapshots: Vec<ProviderMetrics> = latest
            .iter()
            .filter_map(|(provider, samples)| {
                let cpu = samples.get(CPU_USAGE)?;
                let memory = samples.get(MEMORY_USAGE)?;
                let latency = samples.get(RESPONSE_TIME)?;

                let mut snapshot =
                    ProviderMetrics::new(provider.clone(), cpu.value, memory.value, latency.value);
                snapshot.timestamp = cpu.timestamp.max(memory.timestamp).max(latency.timestamp);
                if let Some(instances) = samples.get(INSTANCE_COUNT) {
                    if instances.value >= 0.0 {
                        snapshot.instances = Some(instances.value.round() as u32);
                    }
                }
                Some(snapshot)
            })
            .collect();

        snapshots.sort_by(|a, b| a.provider.cmp(&b.provider));
        Ok(snapshots)
    }
}

fn enforce_buffer_bound(buffer: &mut VecDeque<MonitoringMetric>, max: usize) {
    let overflow = buffer.len().saturating_sub(max);
    if overflow > 0 {
        buffer.drain(..overflow);
        warn!(dropped = overflow, "Metric buffer full, dropped oldest samples");
        metrics::counter!("orchestrator_metrics_dropped_total").increment(overflow as u64);
    }
}

async fn run_flush_task(service: Arc<MonitoringService>, token: CancellationToken) {
    let mut interval = tokio::time::interval(service.config.flush_interval());
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = service.flush_buffer().await {
                    warn!(error = %e, "Periodic metric flush failed");
                }
            }
            _ = token.cancelled() => {
                debug!("Metric flush task shutting down");
                break;
            }
        }
    }
}

async fn run_sweep_task(service: Arc<MonitoringService>, token: CancellationToken) {
    let mut interval = tokio::time::interval(service.config.sweep_interval());
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                service.sweep().await;
            }
            _ = token.cancelled() => {
                debug!("Retention sweep task shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::models::{AlertChannel, AlertCondition, AlertSeverity};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryMetricStore,
        failing: AtomicBool,
    }

    #[async_trait::async_trait]
    impl MetricStore for FlakyStore {
        async fn append(&self, metrics: Vec<MonitoringMetric>) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(OrchestratorError::Storage("store offline".to_string()));
            }
            self.inner.append(metrics).await
        }

        async fn query(&self, filter: &MetricFilter) -> Result<Vec<MonitoringMetric>> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(OrchestratorError::Storage("store offline".to_string()));
            }
            self.inner.query(filter).await
        }

        async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
            self.inner.purge_before(cutoff).await
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(AlertChannel, String)>>,
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, action: &AlertAction, _alert: &Alert) -> Result<()> {
            if action.channel == AlertChannel::Webhook {
                return Err(OrchestratorError::Notification {
                    channel: action.channel.to_string(),
                    message: "connection refused".to_string(),
                });
            }
            self.sent.lock().push((action.channel, action.target.clone()));
            Ok(())
        }
    }

    fn service_with(
        config: MonitoringConfig,
    ) -> (Arc<MonitoringService>, Arc<FlakyStore>, Arc<RecordingNotifier>) {
        let registry = Arc::new(HealthRegistry::new(
            &[ProviderConfig::new("aws", 1.0), ProviderConfig::new("gcp", 1.0)],
            3,
        ));
        let store = Arc::new(FlakyStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let service = Arc::new(MonitoringService::new(
            config,
            registry,
            store.clone(),
            notifier.clone(),
        ));
        (service, store, notifier)
    }

    fn service() -> (Arc<MonitoringService>, Arc<FlakyStore>, Arc<RecordingNotifier>) {
        service_with(MonitoringConfig::default())
    }

    fn cpu_rule(actions: Vec<AlertAction>) -> CreateAlertRuleRequest {
        CreateAlertRuleRequest {
            name: "High CPU".to_string(),
            metric: CPU_USAGE.to_string(),
            condition: AlertCondition::Gt,
            threshold: 80.0,
            duration_secs: 60,
            severity: AlertSeverity::Critical,
            enabled: true,
            actions,
        }
    }

    fn cpu(value: f64) -> MonitoringMetric {
        MonitoringMetric::new(CPU_USAGE, value, "percent").with_provider("aws")
    }

    #[tokio::test]
    async fn test_repeated_breaches_open_single_alert() {
        let (service, _, _) = service();
        service.create_alert_rule(cpu_rule(vec![])).unwrap();

        let mut opened = 0;
        for _ in 0..10 {
            opened += service.record_metric(cpu(95.0)).await.unwrap().len();
        }

        assert_eq!(opened, 1);
        assert_eq!(service.get_alerts(Some(AlertStatus::Active)).len(), 1);
        assert_eq!(service.active_alert_count(), 1);
    }

    #[tokio::test]
    async fn test_resolve_frees_rule_for_new_alert() {
        let (service, _, _) = service();
        service.create_alert_rule(cpu_rule(vec![])).unwrap();

        let first = service.record_metric(cpu(95.0)).await.unwrap();
        let resolved = service.resolve_alert(first[0].id).unwrap();
        assert_eq!(resolved.status, AlertStatus::Resolved);
        assert!(resolved.resolved.is_some());

        let second = service.record_metric(cpu(96.0)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_ne!(second[0].id, first[0].id);
        assert_eq!(service.get_alerts(None).len(), 2);
        assert_eq!(service.get_alerts(Some(AlertStatus::Resolved)).len(), 1);
    }

    #[tokio::test]
    async fn test_non_breaching_and_disabled_rules_do_not_alert() {
        let (service, _, _) = service();
        let mut request = cpu_rule(vec![]);
        request.enabled = false;
        service.create_alert_rule(request).unwrap();
        service.create_alert_rule(cpu_rule(vec![])).unwrap();

        assert!(service.record_metric(cpu(50.0)).await.unwrap().is_empty());
        assert!(service
            .record_metric(MonitoringMetric::new(MEMORY_USAGE, 99.0, "percent"))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(service.record_metric(cpu(81.0)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_notification_failures_are_isolated() {
        let (service, _, notifier) = service();
        service
            .create_alert_rule(cpu_rule(vec![
                AlertAction::new(AlertChannel::Webhook, "https://hooks.example.com/ops"),
                AlertAction::new(AlertChannel::Email, "ops@example.com"),
                AlertAction::new(AlertChannel::Slack, "#alerts"),
            ]))
            .unwrap();

        let opened = service.record_metric(cpu(99.0)).await.unwrap();

        assert_eq!(opened.len(), 1);
        assert!(opened[0].is_active());
        let sent = notifier.sent.lock().clone();
        assert_eq!(
            sent,
            vec![
                (AlertChannel::Email, "ops@example.com".to_string()),
                (AlertChannel::Slack, "#alerts".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_non_finite_metric_rejected() {
        let (service, _, _) = service();
        assert!(matches!(
            service.record_metric(cpu(f64::NAN)).await,
            Err(OrchestratorError::Validation(_))
        ));
        assert!(service.record_metric(cpu(f64::INFINITY)).await.is_err());
        assert_eq!(service.buffered_count(), 0);
    }

    #[tokio::test]
    async fn test_buffer_flushes_at_batch_size() {
        let config = MonitoringConfig {
            flush_batch_size: 3,
            ..Default::default()
        };
        let (service, store, _) = service_with(config);

        service.record_metric(cpu(10.0)).await.unwrap();
        service.record_metric(cpu(20.0)).await.unwrap();
        assert_eq!(store.inner.len(), 0);
        assert_eq!(service.buffered_count(), 2);

        service.record_metric(cpu(30.0)).await.unwrap();
        assert_eq!(store.inner.len(), 3);
        assert_eq!(service.buffered_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_flush_requeues_and_bounds_buffer() {
        let config = MonitoringConfig {
            flush_batch_size: 2,
            max_buffer_size: 5,
            ..Default::default()
        };
        let (service, store, _) = service_with(config);
        store.failing.store(true, Ordering::SeqCst);

        for value in 0..8 {
            service.record_metric(cpu(value as f64)).await.unwrap();
        }
        assert_eq!(service.buffered_count(), 5);

        store.failing.store(false, Ordering::SeqCst);
        assert_eq!(service.flush_buffer().await.unwrap(), 5);

        let values: Vec<f64> = service
            .get_metrics(&MetricFilter::by_name(CPU_USAGE))
            .await
            .iter()
            .map(|metric| metric.value)
            .collect();
        let mut sorted = values.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(sorted, vec![3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[tokio::test]
    async fn test_get_metrics_merges_store_and_buffer() {
        let config = MonitoringConfig {
            flush_batch_size: 2,
            ..Default::default()
        };
        let (service, store, _) = service_with(config);

        service.record_metric(cpu(1.0)).await.unwrap();
        service.record_metric(cpu(2.0)).await.unwrap();
        service.record_metric(cpu(3.0)).await.unwrap();
        assert_eq!(store.inner.len(), 2);

        let all = service.get_metrics(&MetricFilter::by_name(CPU_USAGE)).await;
        assert_eq!(all.len(), 3);

        store.failing.store(true, Ordering::SeqCst);
        let buffered = service.get_metrics(&MetricFilter::by_name(CPU_USAGE)).await;
        assert_eq!(buffered.len(), 1);
        assert_eq!(buffered[0].value, 3.0);
    }

    #[tokio::test]
    async fn test_get_metrics_newest_first_with_limit() {
        let (service, _, _) = service();
        let now = Utc::now();
        for (offset, value) in [(30, 1.0), (10, 3.0), (20, 2.0)] {
            service
                .record_metric(cpu(value).with_timestamp(now - chrono::Duration::seconds(offset)))
                .await
                .unwrap();
        }

        let filter = MetricFilter {
            limit: Some(2),
            ..MetricFilter::by_name(CPU_USAGE)
        };
        let values: Vec<f64> = service
            .get_metrics(&filter)
            .await
            .iter()
            .map(|metric| metric.value)
            .collect();
        assert_eq!(values, vec![3.0, 2.0]);
    }

    #[tokio::test]
    async fn test_aggregate_metrics() {
        let (service, _, _) = service();
        for value in [10.0, 20.0, 60.0] {
            service.record_metric(cpu(value)).await.unwrap();
        }

        let summary = service
            .aggregate_metrics(&MetricFilter::by_name(CPU_USAGE))
            .await;
        assert_eq!(summary.count, 3);
        assert_eq!(summary.min, Some(10.0));
        assert_eq!(summary.max, Some(60.0));
        assert_eq!(summary.avg, Some(30.0));

        let empty = service
            .aggregate_metrics(&MetricFilter::by_name("disk_usage"))
            .await;
        assert_eq!(empty, MetricSummary::default());
    }

    #[tokio::test]
    async fn test_system_health_levels() {
        let (service, _, _) = service();
        assert_eq!(service.get_system_health().status, SystemStatus::Healthy);
        assert_eq!(service.get_system_health().providers.len(), 2);

        for i in 0..6 {
            let mut request = cpu_rule(vec![]);
            request.name = format!("CPU rule {}", i);
            service.create_alert_rule(request).unwrap();
            service.record_metric(cpu(95.0)).await.unwrap();

            let expected = if i < 5 {
                SystemStatus::Degraded
            } else {
                SystemStatus::Unhealthy
            };
            assert_eq!(service.get_system_health().status, expected);
        }
    }

    #[tokio::test]
    async fn test_sweep_evicts_expired_metrics_and_keeps_active_alerts() {
        let (service, store, _) = service();
        service.create_alert_rule(cpu_rule(vec![])).unwrap();

        let old = Utc::now() - chrono::Duration::days(8);
        service.record_metric(cpu(95.0).with_timestamp(old)).await.unwrap();
        service.record_metric(cpu(50.0)).await.unwrap();
        store
            .inner
            .append(vec![cpu(40.0).with_timestamp(old)])
            .await
            .unwrap();

        let removed = service.sweep().await;

        assert_eq!(removed, 2);
        assert_eq!(service.buffered_count(), 1);
        assert_eq!(store.inner.len(), 0);
        assert_eq!(service.get_alerts(Some(AlertStatus::Active)).len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_drops_alerts_resolved_before_retention() {
        let (service, _, _) = service();
        for name in ["Stale", "Recent", "Open"] {
            let mut request = cpu_rule(vec![]);
            request.name = name.to_string();
            service.create_alert_rule(request).unwrap();
        }

        let opened = service.record_metric(cpu(95.0)).await.unwrap();
        assert_eq!(opened.len(), 3);
        let by_name = |name: &str| opened.iter().find(|a| a.rule_name == name).unwrap().id;
        let (stale, recent, open) = (by_name("Stale"), by_name("Recent"), by_name("Open"));

        service.resolve_alert(stale).unwrap();
        service.resolve_alert(recent).unwrap();
        {
            let mut book = service.alerts.lock();
            let alert = book.alerts.get_mut(&stale).unwrap();
            alert.resolved = Some(Utc::now() - chrono::Duration::days(8));
        }

        service.sweep().await;

        let remaining: HashSet<Uuid> = service.get_alerts(None).iter().map(|a| a.id).collect();
        assert!(!remaining.contains(&stale));
        assert!(remaining.contains(&recent));
        assert!(remaining.contains(&open));
        assert_eq!(service.active_alert_count(), 1);
    }

    #[tokio::test]
    async fn test_alert_rule_crud() {
        let (service, _, _) = service();
        let rule = service.create_alert_rule(cpu_rule(vec![])).unwrap();
        assert_eq!(service.list_alert_rules().len(), 1);

        let updated = service
            .update_alert_rule(
                rule.id,
                UpdateAlertRuleRequest {
                    threshold: Some(90.0),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.threshold, 90.0);
        assert_eq!(updated.name, "High CPU");
        assert!(service.record_metric(cpu(85.0)).await.unwrap().is_empty());

        service.delete_alert_rule(rule.id).unwrap();
        assert!(service.get_alert_rule(rule.id).is_none());
        assert!(matches!(
            service.delete_alert_rule(rule.id),
            Err(OrchestratorError::AlertRuleNotFound(_))
        ));
        assert!(matches!(
            service.resolve_alert(Uuid::new_v4()),
            Err(OrchestratorError::AlertNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_alert_rule_validation() {
        let (service, _, _) = service();
        let mut request = cpu_rule(vec![]);
        request.name = String::new();
        assert!(service.create_alert_rule(request).is_err());

        let mut request = cpu_rule(vec![]);
        request.threshold = f64::NAN;
        assert!(service.create_alert_rule(request).is_err());
    }

    #[tokio::test]
    async fn test_current_metrics_requires_complete_samples() {
        let (service, _, _) = service();
        for (name, value) in [
            (CPU_USAGE, 72.0),
            (MEMORY_USAGE, 40.0),
            (RESPONSE_TIME, 250.0),
            (INSTANCE_COUNT, 4.0),
        ] {
            service
                .record_metric(MonitoringMetric::new(name, value, "").with_provider("aws"))
                .await
                .unwrap();
        }
        service
            .record_metric(MonitoringMetric::new(CPU_USAGE, 10.0, "percent").with_provider("gcp"))
            .await
            .unwrap();

        let snapshots = service.current_metrics().await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].provider, "aws");
        assert_eq!(snapshots[0].cpu, 72.0);
        assert_eq!(snapshots[0].latency, 250.0);
        assert_eq!(snapshots[0].instances, Some(4));
    }

    #[tokio::test]
    async fn test_stop_flushes_buffer() {
        let (service, store, _) = service();
        service.start();
        assert!(service.is_running());

        service.record_metric(cpu(42.0)).await.unwrap();
        service.stop().await;

        assert!(!service.is_running());
        assert_eq!(service.buffered_count(), 0);
        assert_eq!(store.inner.len(), 1);
    }
}
