//! Load balancer over the supervisor's running worker set.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use thiserror::Error;
use tracing::trace;

use flexpool_state::WorkerId;

/// Selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    RoundRobin,
    LeastConnections,
    Random,
}

/// Error returned when parsing an unknown strategy name.
#[derive(Debug, Error)]
#[error("unknown load balance strategy: {0}")]
pub struct StrategyParseError(String);

impl FromStr for Strategy {
    type Err = StrategyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(Self::RoundRobin),
            "least-connections" => Ok(Self::LeastConnections),
            "random" => Ok(Self::Random),
            other => Err(StrategyParseError(other.to_string())),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RoundRobin => "round-robin",
            Self::LeastConnections => "least-connections",
            Self::Random => "random",
        };
        f.write_str(name)
    }
}

/// Pool-wide balancer state: strategy, rotating cursor, and the
/// per-interval load counters.
///
/// The load map only carries ids of live workers; the supervisor prunes
/// entries as workers leave the pool.
#[derive(Debug)]
pub struct LoadBalancer {
    strategy: Strategy,
    /// Rotating index used by round-robin.
    cursor: usize,
    loads: HashMap<WorkerId, u64>,
}

impl LoadBalancer {
    /// Create a balancer with the given strategy.
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            cursor: 0,
            loads: HashMap::new(),
        }
    }

    /// The configured strategy.
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Start tracking a worker at zero load.
    pub fn track(&mut self, worker_id: &str) {
        self.loads.entry(worker_id.to_string()).or_insert(0);
    }

    /// Stop tracking a worker that left the live set.
    pub fn untrack(&mut self, worker_id: &str) {
        self.loads.remove(worker_id);
    }

    /// Pick one worker from the running set, or `None` if it is empty.
    ///
    /// The chosen worker's load counter is bumped by one. The running set
    /// is re-evaluated on every call, so membership changes never
    /// desynchronize the round-robin cursor beyond a single rotation.
    pub fn select(&mut self, running: &[WorkerId]) -> Option<WorkerId> {
        if running.is_empty() {
            return None;
        }

        let chosen = match self.strategy {
            Strategy::RoundRobin => {
                let idx = self.cursor % running.len();
                self.cursor = (idx + 1) % running.len();
                running[idx].clone()
            }
            Strategy::LeastConnections => running
                .iter()
                .min_by_key(|id| self.load_of(id.as_str()))
                .cloned()
                .expect("running set is non-empty"),
            Strategy::Random => {
                let idx = rand::thread_rng().gen_range(0..running.len());
                running[idx].clone()
            }
        };

        self.bump(&chosen);
        trace!(worker_id = %chosen, strategy = %self.strategy, "worker selected");
        Some(chosen)
    }

    /// Bump a worker's load counter by one.
    ///
    /// Called on selection and again when the worker reports a completed
    /// request.
    pub fn bump(&mut self, worker_id: &str) {
        *self.loads.entry(worker_id.to_string()).or_insert(0) += 1;
    }

    /// Current load counter for a worker (zero if untracked).
    pub fn load_of(&self, worker_id: &str) -> u64 {
        self.loads.get(worker_id).copied().unwrap_or(0)
    }

    /// Mean load across the given workers (zero for an empty slice).
    pub fn average_load(&self, workers: &[WorkerId]) -> f64 {
        if workers.is_empty() {
            return 0.0;
        }
        let total: u64 = workers.iter().map(|id| self.load_of(id)).sum();
        total as f64 / workers.len() as f64
    }

    /// The `n` least-loaded workers out of `running`, least-loaded first.
    ///
    /// Used by the pool manager to pick termination victims.
    pub fn least_loaded(&self, running: &[WorkerId], n: usize) -> Vec<WorkerId> {
        let mut ordered: Vec<WorkerId> = running.to_vec();
        ordered.sort_by_key(|id| self.load_of(id));
        ordered.truncate(n);
        ordered
    }

    /// Zero every tracked load counter.
    ///
    /// The aggregator calls this at the end of each window, making load a
    /// per-interval figure.
    pub fn reset(&mut self) {
        for load in self.loads.values_mut() {
            *load = 0;
        }
    }

    /// Number of tracked workers.
    pub fn tracked(&self) -> usize {
        self.loads.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<WorkerId> {
        (0..n).map(|i| format!("w-{i}")).collect()
    }

    #[test]
    fn strategy_parses_from_config_names() {
        assert_eq!("round-robin".parse::<Strategy>().unwrap(), Strategy::RoundRobin);
        assert_eq!(
            "least-connections".parse::<Strategy>().unwrap(),
            Strategy::LeastConnections
        );
        assert_eq!("random".parse::<Strategy>().unwrap(), Strategy::Random);
        assert!("weighted".parse::<Strategy>().is_err());
    }

    #[test]
    fn select_on_empty_set_returns_none() {
        let mut lb = LoadBalancer::new(Strategy::RoundRobin);
        assert_eq!(lb.select(&[]), None);

        let mut lb = LoadBalancer::new(Strategy::LeastConnections);
        assert_eq!(lb.select(&[]), None);

        let mut lb = LoadBalancer::new(Strategy::Random);
        assert_eq!(lb.select(&[]), None);
    }

    // ── Round-robin ────────────────────────────────────────────────

    #[test]
    fn round_robin_visits_each_worker_exactly_once() {
        let mut lb = LoadBalancer::new(Strategy::RoundRobin);
        let running = ids(4);

        let picks: Vec<WorkerId> = (0..4).map(|_| lb.select(&running).unwrap()).collect();
        for id in &running {
            assert_eq!(picks.iter().filter(|p| *p == id).count(), 1);
        }
    }

    #[test]
    fn round_robin_is_deterministic_over_fixed_set() {
        let mut lb = LoadBalancer::new(Strategy::RoundRobin);
        let running = ids(3);

        assert_eq!(lb.select(&running).unwrap(), "w-0");
        assert_eq!(lb.select(&running).unwrap(), "w-1");
        assert_eq!(lb.select(&running).unwrap(), "w-2");
        assert_eq!(lb.select(&running).unwrap(), "w-0"); // wraps
    }

    #[test]
    fn round_robin_survives_membership_change() {
        let mut lb = LoadBalancer::new(Strategy::RoundRobin);

        let four = ids(4);
        lb.select(&four);
        lb.select(&four);
        lb.select(&four);

        // Set shrinks to 2; the cursor re-wraps within one rotation.
        let two = ids(2);
        let pick = lb.select(&two).unwrap();
        assert!(two.contains(&pick));
        let pick = lb.select(&two).unwrap();
        assert!(two.contains(&pick));
    }

    // ── Least-connections ──────────────────────────────────────────

    #[test]
    fn least_connections_returns_minimum_load() {
        let mut lb = LoadBalancer::new(Strategy::LeastConnections);
        let running = ids(3);
        for id in &running {
            lb.track(id);
        }
        lb.bump("w-0");
        lb.bump("w-0");
        lb.bump("w-1");

        let pick = lb.select(&running).unwrap();
        assert_eq!(pick, "w-2");

        // Property: the pick's load never exceeds any other running load.
        for _ in 0..20 {
            let before: Vec<u64> = running.iter().map(|id| lb.load_of(id)).collect();
            let pick = lb.select(&running).unwrap();
            let picked_load = before[running.iter().position(|id| *id == pick).unwrap()];
            assert!(before.iter().all(|&l| picked_load <= l));
        }
    }

    #[test]
    fn least_connections_ties_break_first_encountered() {
        let mut lb = LoadBalancer::new(Strategy::LeastConnections);
        let running = ids(3);
        for id in &running {
            lb.track(id);
        }

        // All at zero: the first worker in iteration order wins.
        assert_eq!(lb.select(&running).unwrap(), "w-0");
        // Now w-1 and w-2 tie at zero; w-1 comes first.
        assert_eq!(lb.select(&running).unwrap(), "w-1");
    }

    #[test]
    fn least_connections_distributes_evenly_after_reset() {
        let mut lb = LoadBalancer::new(Strategy::LeastConnections);
        let running = ids(4);
        for id in &running {
            lb.track(id);
        }
        lb.bump("w-1");
        lb.bump("w-1");
        lb.bump("w-3");

        lb.reset();

        // 4 selections over 4 workers land one each (±1 by the property,
        // exactly one here since counts started equal).
        for _ in 0..running.len() {
            lb.select(&running).unwrap();
        }
        for id in &running {
            assert_eq!(lb.load_of(id), 1);
        }
    }

    // ── Random ─────────────────────────────────────────────────────

    #[test]
    fn random_always_picks_from_running_set() {
        let mut lb = LoadBalancer::new(Strategy::Random);
        let running = ids(3);

        for _ in 0..50 {
            let pick = lb.select(&running).unwrap();
            assert!(running.contains(&pick));
        }
    }

    #[test]
    fn random_single_worker_is_deterministic() {
        let mut lb = LoadBalancer::new(Strategy::Random);
        let running = ids(1);

        for _ in 0..10 {
            assert_eq!(lb.select(&running).unwrap(), "w-0");
        }
    }

    // ── Load map ───────────────────────────────────────────────────

    #[test]
    fn selection_bumps_load() {
        let mut lb = LoadBalancer::new(Strategy::RoundRobin);
        let running = ids(2);

        lb.select(&running);
        assert_eq!(lb.load_of("w-0"), 1);
        assert_eq!(lb.load_of("w-1"), 0);
    }

    #[test]
    fn completed_requests_bump_load() {
        let mut lb = LoadBalancer::new(Strategy::LeastConnections);
        lb.track("w-0");
        lb.bump("w-0");
        lb.bump("w-0");
        assert_eq!(lb.load_of("w-0"), 2);
    }

    #[test]
    fn untrack_prunes_departed_worker() {
        let mut lb = LoadBalancer::new(Strategy::RoundRobin);
        lb.track("w-0");
        lb.track("w-1");
        lb.bump("w-0");

        lb.untrack("w-0");
        assert_eq!(lb.tracked(), 1);
        assert_eq!(lb.load_of("w-0"), 0);
    }

    #[test]
    fn reset_zeroes_all_counters_but_keeps_tracking() {
        let mut lb = LoadBalancer::new(Strategy::RoundRobin);
        lb.track("w-0");
        lb.track("w-1");
        lb.bump("w-0");
        lb.bump("w-1");
        lb.bump("w-1");

        lb.reset();

        assert_eq!(lb.tracked(), 2);
        assert_eq!(lb.load_of("w-0"), 0);
        assert_eq!(lb.load_of("w-1"), 0);
    }

    #[test]
    fn average_load_over_workers() {
        let mut lb = LoadBalancer::new(Strategy::RoundRobin);
        let running = ids(2);
        lb.track("w-0");
        lb.track("w-1");
        lb.bump("w-0");
        lb.bump("w-0");
        lb.bump("w-1");

        assert_eq!(lb.average_load(&running), 1.5);
        assert_eq!(lb.average_load(&[]), 0.0);
    }

    #[test]
    fn least_loaded_orders_by_load() {
        let mut lb = LoadBalancer::new(Strategy::LeastConnections);
        let running = ids(3);
        for id in &running {
            lb.track(id);
        }
        lb.bump("w-0");
        lb.bump("w-0");
        lb.bump("w-2");

        let victims = lb.least_loaded(&running, 2);
        assert_eq!(victims, vec!["w-1".to_string(), "w-2".to_string()]);

        // Asking for more than available returns everything.
        assert_eq!(lb.least_loaded(&running, 10).len(), 3);
    }
}
