//! Load Balancer Module
//!
//! Selects a provider from the health registry using round-robin, weighted, health-based
//! or least-used strategies. Only eligible providers (fewer consecutive failures than the
//! configured limit) are considered; when none is eligible the first configured provider
//! is returned instead of an error.

use crate::health::HealthRegistry;
use crate::models::{ProviderId, ProviderState, SelectionStrategy};
use crate::{OrchestratorError, Result};

use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Round-robin counter shared by all callers
#[derive(Debug)]
struct RoundRobinCounter {
    counter: AtomicUsize,
}

impl RoundRobinCounter {
    fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }

    fn next(&self, max: usize) -> usize {
        if max == 0 {
            0
        } else {
            self.counter.fetch_add(1, Ordering::Relaxed) % max
        }
    }
}

/// Health-aware provider selector
#[derive(Debug)]
pub struct ProviderSelector {
    /// Provider health registry
    registry: Arc<HealthRegistry>,

    /// Round-robin position over the eligible set
    round_robin: RoundRobinCounter,

    /// RNG for weighted draws
    rng: Mutex<StdRng>,
}

impl ProviderSelector {
    /// Create a selector with an entropy-seeded RNG
    pub fn new(registry: Arc<HealthRegistry>) -> Self {
        Self {
            registry,
            round_robin: RoundRobinCounter::new(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Create a selector whose weighted draws are reproducible
    pub fn with_seed(registry: Arc<HealthRegistry>, seed: u64) -> Self {
        Self {
            registry,
            round_robin: RoundRobinCounter::new(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn registry(&self) -> &Arc<HealthRegistry> {
        &self.registry
    }

    /// Pick a provider and stamp its last-used time
    pub fn select(&self, strategy: SelectionStrategy) -> Result<ProviderId> {
        // Drawn up front so the RNG lock is never held together with the registry lock
        let draw = match strategy {
            SelectionStrategy::Weighted => self.rng.lock().gen::<f64>(),
            _ => 0.0,
        };
        let max_failures = self.registry.max_consecutive_failures();

        let selected = self.registry.with_providers(|providers| {
            if providers.is_empty() {
                return Err(OrchestratorError::ProviderNotFound(
                    "no providers configured".to_string(),
                ));
            }

            let eligible: Vec<usize> = providers
                .iter()
                .enumerate()
                .filter(|(_, state)| state.is_eligible(max_failures))
                .map(|(index, _)| index)
                .collect();

            let index = if eligible.is_empty() {
                warn!(
                    fallback = %providers[0].id,
                    "No eligible providers, falling back to first configured provider"
                );
                0
            } else {
                match strategy {
                    SelectionStrategy::RoundRobin => {
                        eligible[self.round_robin.next(eligible.len())]
                    }
                    SelectionStrategy::Weighted => select_weighted(providers, &eligible, draw),
                    SelectionStrategy::HealthBased => select_health_based(providers, &eligible),
                    SelectionStrategy::LeastUsed => select_least_used(providers, &eligible),
                }
            };

            let state = &mut providers[index];
            state.last_used = Some(Utc::now());
            Ok(state.id.clone())
        })?;

        debug!(provider = %selected, %strategy, "Selected provider");
        metrics::counter!("orchestrator_provider_selections_total", "provider" => selected.clone(), "strategy" => strategy.as_str()).increment(1);

        Ok(selected)
    }
}

/// Walk the eligible set subtracting effective weights from `draw × total`
fn select_weighted(providers: &[ProviderState], eligible: &[usize], draw: f64) -> usize {
    let total: f64 = eligible
        .iter()
        .map(|&index| providers[index].effective_weight())
        .sum();

    if total <= 0.0 {
        return eligible[0];
    }

    let mut remaining = draw * total;
    for &index in eligible {
        let weight = providers[index].effective_weight();
        if weight <= 0.0 {
            continue;
        }
        remaining -= weight;
        if remaining <= 0.0 {
            return index;
        }
    }

    // Floating point slack: the draw landed on the upper edge
    eligible
        .iter()
        .rev()
        .copied()
        .find(|&index| providers[index].effective_weight() > 0.0)
        .unwrap_or(eligible[0])
}

/// Highest health score; ties keep registry order
fn select_health_based(providers: &[ProviderState], eligible: &[usize]) -> usize {
    let mut best = eligible[0];
    for &index in &eligible[1..] {
        if providers[index].health_score > providers[best].health_score {
            best = index;
        }
    }
    best
}

/// Oldest last-used timestamp; never-used providers come first, ties keep registry order
fn select_least_used(providers: &[ProviderState], eligible: &[usize]) -> usize {
    let mut best = eligible[0];
    for &index in &eligible[1..] {
        let candidate = providers[index].last_used;
        let current = providers[best].last_used;
        let older = match (candidate, current) {
            (None, Some(_)) => true,
            (Some(c), Some(b)) => c < b,
            _ => false,
        };
        if older {
            best = index;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use std::collections::HashMap;

    fn registry() -> Arc<HealthRegistry> {
        Arc::new(HealthRegistry::new(
            &[
                ProviderConfig::new("aws", 1.0),
                ProviderConfig::new("azure", 1.0),
                ProviderConfig::new("gcp", 1.0),
            ],
            3,
        ))
    }

    #[test]
    fn test_round_robin_counter() {
        let counter = RoundRobinCounter::new();

        assert_eq!(counter.next(3), 0);
        assert_eq!(counter.next(3), 1);
        assert_eq!(counter.next(3), 2);
        assert_eq!(counter.next(3), 0);
    }

    #[test]
    fn test_round_robin_cycles_all_providers() {
        let selector = ProviderSelector::new(registry());

        let picks: Vec<_> = (0..6)
            .map(|_| selector.select(SelectionStrategy::RoundRobin).unwrap())
            .collect();

        assert_eq!(picks, vec!["aws", "azure", "gcp", "aws", "azure", "gcp"]);
    }

    #[test]
    fn test_round_robin_skips_failed_provider_until_success() {
        let registry = registry();
        let selector = ProviderSelector::new(registry.clone());

        for _ in 0..3 {
            registry.report_failure("gcp").unwrap();
        }

        for _ in 0..20 {
            assert_ne!(selector.select(SelectionStrategy::RoundRobin).unwrap(), "gcp");
        }

        registry.report_success("gcp").unwrap();
        let picks: Vec<_> = (0..3)
            .map(|_| selector.select(SelectionStrategy::RoundRobin).unwrap())
            .collect();
        assert!(picks.iter().any(|p| p == "gcp"));
    }

    #[test]
    fn test_weighted_never_selects_ineligible_provider() {
        let registry = registry();
        let selector = ProviderSelector::with_seed(registry.clone(), 7);

        for _ in 0..3 {
            registry.report_failure("azure").unwrap();
        }

        for _ in 0..500 {
            assert_ne!(selector.select(SelectionStrategy::Weighted).unwrap(), "azure");
        }
    }

    #[test]
    fn test_weighted_distribution_is_uniform_for_equal_weights() {
        let selector = ProviderSelector::with_seed(registry(), 42);
        let mut counts: HashMap<String, usize> = HashMap::new();

        for _ in 0..1000 {
            let provider = selector.select(SelectionStrategy::Weighted).unwrap();
            *counts.entry(provider).or_insert(0) += 1;
        }

        assert_eq!(counts.len(), 3);
        for (provider, count) in counts {
            let share = count as f64 / 1000.0;
            assert!(
                (share - 1.0 / 3.0).abs() < 0.06,
                "provider {} share {} outside tolerance",
                provider,
                share
            );
        }
    }

    #[test]
    fn test_weighted_draw_walks_effective_weights() {
        let mut providers = vec![
            ProviderState::new("aws", 1.0),
            ProviderState::new("azure", 1.0),
            ProviderState::new("gcp", 2.0),
        ];
        let eligible = vec![0, 1, 2];

        assert_eq!(select_weighted(&providers, &eligible, 0.0), 0);
        assert_eq!(select_weighted(&providers, &eligible, 0.3), 1);
        assert_eq!(select_weighted(&providers, &eligible, 0.9), 2);

        // Zero health removes the provider from the draw entirely
        providers[0].health_score = 0.0;
        assert_eq!(select_weighted(&providers, &eligible, 0.0), 1);
    }

    #[test]
    fn test_health_based_picks_highest_score() {
        let registry = registry();
        let selector = ProviderSelector::new(registry.clone());

        registry.report_failure("aws").unwrap();
        registry.report_failure("gcp").unwrap();
        registry.report_failure("gcp").unwrap();

        assert_eq!(selector.select(SelectionStrategy::HealthBased).unwrap(), "azure");
    }

    #[test]
    fn test_health_based_ties_keep_registry_order() {
        let selector = ProviderSelector::new(registry());
        assert_eq!(selector.select(SelectionStrategy::HealthBased).unwrap(), "aws");
        assert_eq!(selector.select(SelectionStrategy::HealthBased).unwrap(), "aws");
    }

    #[test]
    fn test_least_used_rotates_through_oldest() {
        let selector = ProviderSelector::new(registry());

        assert_eq!(selector.select(SelectionStrategy::LeastUsed).unwrap(), "aws");
        assert_eq!(selector.select(SelectionStrategy::LeastUsed).unwrap(), "azure");
        assert_eq!(selector.select(SelectionStrategy::LeastUsed).unwrap(), "gcp");
    }

    #[test]
    fn test_selection_updates_last_used() {
        let registry = registry();
        let selector = ProviderSelector::new(registry.clone());

        let provider = selector.select(SelectionStrategy::HealthBased).unwrap();
        assert!(registry.state(&provider).unwrap().last_used.is_some());
    }

    #[test]
    fn test_all_ineligible_falls_back_to_first_provider() {
        let registry = registry();
        let selector = ProviderSelector::with_seed(registry.clone(), 1);

        for provider in ["aws", "azure", "gcp"] {
            for _ in 0..3 {
                registry.report_failure(provider).unwrap();
            }
        }

        for strategy in SelectionStrategy::ALL {
            assert_eq!(selector.select(strategy).unwrap(), "aws");
        }
    }

    #[test]
    fn test_empty_registry_is_error() {
        let selector = ProviderSelector::new(Arc::new(HealthRegistry::new(&[], 3)));
        assert!(selector.select(SelectionStrategy::RoundRobin).is_err());
    }
}
