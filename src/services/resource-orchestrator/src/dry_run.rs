//! Logging-only collaborators
//!
//! Used by the binary when no real cloud or notification backend is wired in: every
//! scaling call and alert notification is written to the log and reported as successful.

use crate::autoscaling::ProviderOps;
use crate::models::{Alert, AlertAction, ScalingAction};
use crate::monitoring::Notifier;
use crate::Result;

use tracing::info;

/// Provider operations that only log the requested change
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingProviderOps;

#[async_trait::async_trait]
impl ProviderOps for LoggingProviderOps {
    async fn scale(
        &self,
        provider: &str,
        action: ScalingAction,
        target_instances: u32,
    ) -> Result<()> {
        info!(
            provider = %provider,
            %action,
            target_instances,
            "[dry-run] Scaling provider"
        );
        Ok(())
    }
}

/// Notifier that only logs the alert
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait::async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, action: &AlertAction, alert: &Alert) -> Result<()> {
        info!(
            channel = %action.channel,
            target = %action.target,
            alert_id = %alert.id,
            severity = ?alert.severity,
            message = %alert.message,
            "[dry-run] Sending alert notification"
        );
        Ok(())
    }
}
