//! Provider Health Registry
//!
//! Tracks per-provider weight, health score, consecutive failures and last-used time.
//! Success reports recover the health score multiplicatively, failure reports decay it,
//! and a provider stops being eligible for selection once it reaches the configured
//! number of consecutive failures.

use crate::config::{OrchestratorConfig, ProviderConfig};
use crate::health_defaults::{
    FAILURE_DECAY_FACTOR, MAX_HEALTH_SCORE, MIN_HEALTH_SCORE, SUCCESS_RECOVERY_FACTOR,
};
use crate::models::{ProviderId, ProviderState};
use crate::{OrchestratorError, Result};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// In-memory registry of provider health, guarded by a single lock
#[derive(Debug)]
pub struct HealthRegistry {
    /// Provider states in configuration order
    providers: Mutex<Vec<ProviderState>>,

    /// Consecutive failures at which a provider becomes ineligible
    max_consecutive_failures: u32,
}

impl HealthRegistry {
    /// Create a registry with every provider fully healthy
    pub fn new(providers: &[ProviderConfig], max_consecutive_failures: u32) -> Self {
        let states = providers
            .iter()
            .map(|provider| ProviderState::new(provider.id.clone(), provider.weight))
            .collect::<Vec<_>>();

        info!(
            providers = states.len(),
            max_consecutive_failures, "Initialized provider health registry"
        );

        Self {
            providers: Mutex::new(states),
            max_consecutive_failures,
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(
            &config.providers,
            config.load_balancer.max_consecutive_failures,
        )
    }

    pub fn max_consecutive_failures(&self) -> u32 {
        self.max_consecutive_failures
    }

    /// Record a successful operation: reset failures and recover health
    pub fn report_success(&self, provider_id: &str) -> Result<ProviderState> {
        let state = self.update(provider_id, |state| {
            state.consecutive_failures = 0;
            state.health_score =
                (state.health_score * SUCCESS_RECOVERY_FACTOR).min(MAX_HEALTH_SCORE);
        })?;

        debug!(
            provider = %provider_id,
            health_score = state.health_score,
            "Recorded provider success"
        );
        metrics::counter!("orchestrator_provider_reports_total", "provider" => provider_id.to_string(), "outcome" => "success").increment(1);

        Ok(state)
    }

    /// Record a failed operation: count the failure and decay health
    pub fn report_failure(&self, provider_id: &str) -> Result<ProviderState> {
        let max_failures = self.max_consecutive_failures;
        let state = self.update(provider_id, |state| {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            state.health_score = (state.health_score * FAILURE_DECAY_FACTOR).max(MIN_HEALTH_SCORE);
        })?;

        if state.consecutive_failures == max_failures {
            warn!(
                provider = %provider_id,
                consecutive_failures = state.consecutive_failures,
                health_score = state.health_score,
                "Provider is no longer eligible for selection"
            );
        } else {
            debug!(
                provider = %provider_id,
                consecutive_failures = state.consecutive_failures,
                health_score = state.health_score,
                "Recorded provider failure"
            );
        }
        metrics::counter!("orchestrator_provider_reports_total", "provider" => provider_id.to_string(), "outcome" => "failure").increment(1);

        Ok(state)
    }

    /// Record an operation outcome
    pub fn report_outcome(&self, provider_id: &str, success: bool) -> Result<ProviderState> {
        if success {
            self.report_success(provider_id)
        } else {
            self.report_failure(provider_id)
        }
    }

    /// Copy of every provider state, in registry order
    pub fn snapshot(&self) -> Vec<ProviderState> {
        self.providers.lock().clone()
    }

    pub fn state(&self, provider_id: &str) -> Option<ProviderState> {
        self.providers
            .lock()
            .iter()
            .find(|state| state.id == provider_id)
            .cloned()
    }

    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.providers
            .lock()
            .iter()
            .map(|state| state.id.clone())
            .collect()
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.providers
            .lock()
            .iter()
            .any(|state| state.id == provider_id)
    }

    pub fn eligible_count(&self) -> usize {
        self.providers
            .lock()
            .iter()
            .filter(|state| state.is_eligible(self.max_consecutive_failures))
            .count()
    }

    /// Change a provider's static weight at runtime
    pub fn set_weight(&self, provider_id: &str, weight: f64) -> Result<ProviderState> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(OrchestratorError::Validation(format!(
                "Invalid provider weight: {}",
                weight
            )));
        }

        let state = self.update(provider_id, |state| state.weight = weight)?;
        info!(provider = %provider_id, weight, "Updated provider weight");
        Ok(state)
    }

    /// Run `f` with exclusive access to all provider states
    pub(crate) fn with_providers<R>(&self, f: impl FnOnce(&mut [ProviderState]) -> R) -> R {
        let mut providers = self.providers.lock();
        f(providers.as_mut_slice())
    }

    fn update(
        &self,
        provider_id: &str,
        f: impl FnOnce(&mut ProviderState),
    ) -> Result<ProviderState> {
        let mut providers = self.providers.lock();
        let state = providers
            .iter_mut()
            .find(|state| state.id == provider_id)
            .ok_or_else(|| OrchestratorError::ProviderNotFound(provider_id.to_string()))?;

        f(state);
        Ok(state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn registry() -> HealthRegistry {
        HealthRegistry::new(
            &[
                ProviderConfig::new("aws", 1.0),
                ProviderConfig::new("azure", 1.0),
                ProviderConfig::new("gcp", 1.0),
            ],
            3,
        )
    }

    #[test]
    fn test_new_registry_is_fully_healthy() {
        let registry = registry();
        let snapshot = registry.snapshot();

        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].id, "aws");
        assert!(snapshot.iter().all(|s| s.health_score == 100.0));
        assert!(snapshot.iter().all(|s| s.consecutive_failures == 0));
        assert!(snapshot.iter().all(|s| s.last_used.is_none()));
        assert_eq!(registry.eligible_count(), 3);
    }

    #[test]
    fn test_failure_decays_health_and_counts() {
        let registry = registry();

        let state = registry.report_failure("aws").unwrap();
        assert_eq!(state.consecutive_failures, 1);
        assert!((state.health_score - 90.0).abs() < 1e-9);

        let state = registry.report_failure("aws").unwrap();
        assert_eq!(state.consecutive_failures, 2);
        assert!((state.health_score - 81.0).abs() < 1e-9);
    }

    #[test]
    fn test_success_resets_failures_and_recovers_capped() {
        let registry = registry();
        registry.report_failure("azure").unwrap();
        registry.report_failure("azure").unwrap();

        let state = registry.report_success("azure").unwrap();
        assert_eq!(state.consecutive_failures, 0);
        assert!((state.health_score - 81.0 * 1.05).abs() < 1e-9);

        let state = registry.report_success("gcp").unwrap();
        assert_eq!(state.health_score, 100.0);
    }

    #[test]
    fn test_three_failures_make_provider_ineligible() {
        let registry = registry();
        for _ in 0..3 {
            registry.report_failure("gcp").unwrap();
        }

        assert_eq!(registry.eligible_count(), 2);
        assert!(!registry.state("gcp").unwrap().is_eligible(3));

        registry.report_success("gcp").unwrap();
        assert_eq!(registry.eligible_count(), 3);
    }

    #[test]
    fn test_unknown_provider_is_error() {
        let registry = registry();
        assert!(matches!(
            registry.report_success("oracle"),
            Err(OrchestratorError::ProviderNotFound(_))
        ));
        assert!(registry.report_failure("oracle").is_err());
    }

    #[test]
    fn test_set_weight_validates() {
        let registry = registry();
        assert_eq!(registry.set_weight("aws", 3.0).unwrap().weight, 3.0);
        assert!(registry.set_weight("aws", -1.0).is_err());
        assert!(registry.set_weight("aws", f64::NAN).is_err());
    }

    proptest! {
        #[test]
        fn test_health_score_stays_in_bounds(reports in prop::collection::vec(any::<bool>(), 0..400)) {
            let registry = registry();
            for success in reports {
                let state = registry.report_outcome("aws", success).unwrap();
                prop_assert!(state.health_score >= 0.0);
                prop_assert!(state.health_score <= 100.0);
            }
        }
    }
}
