//! Deterministic Simulation Testing for the Series Store
//!
//! VOPR-style harness that enables:
//! - Deterministic random upserts, clock advances and snapshots
//! - Cross-checking the store against a reference model after each operation
//! - Seed-based reproducibility for debugging

use super::store::SeriesStore;
use super::types::{LabelSet, MetricKind, Sample, SampleIdentity};
use crate::clock::{Clock, SimulatedClock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, HashSet};

/// Configuration for Store DST
#[derive(Debug, Clone)]
pub struct StoreDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Number of distinct metric names
    pub num_metrics: usize,
    /// Number of distinct values per label
    pub num_label_values: usize,
    /// Maximum sample age; 0 disables eviction
    pub max_age_secs: u64,
    /// Probability of a snapshot operation
    pub snapshot_prob: f64,
    /// Probability of advancing the clock
    pub advance_prob: f64,
    /// Largest backdating of an observation relative to now
    pub max_skew_secs: i64,
}

impl Default for StoreDSTConfig {
    fn default() -> Self {
        StoreDSTConfig {
            seed: 0,
            num_metrics: 8,
            num_label_values: 6,
            max_age_secs: 30,
            snapshot_prob: 0.15,
            advance_prob: 0.2,
            max_skew_secs: 40,
        }
    }
}

impl StoreDSTConfig {
    pub fn new(seed: u64) -> Self {
        StoreDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Small key space, so most upserts replace an existing series
    pub fn high_contention(seed: u64) -> Self {
        StoreDSTConfig {
            seed,
            num_metrics: 2,
            num_label_values: 2,
            ..Default::default()
        }
    }

    /// Eviction disabled
    pub fn no_eviction(seed: u64) -> Self {
        StoreDSTConfig {
            seed,
            max_age_secs: 0,
            ..Default::default()
        }
    }

    /// Short max age with fast-moving time
    pub fn aggressive_eviction(seed: u64) -> Self {
        StoreDSTConfig {
            seed,
            max_age_secs: 5,
            advance_prob: 0.5,
            max_skew_secs: 10,
            ..Default::default()
        }
    }
}

/// Operation type for logging
#[derive(Debug, Clone)]
pub enum StoreOp {
    Upsert { identity: String, observed_at: i64 },
    Snapshot { now: i64 },
    Advance { secs: i64 },
}

/// Result of a Store DST run
#[derive(Debug, Clone)]
pub struct StoreDSTResult {
    pub seed: u64,
    pub total_operations: u64,
    pub inserts: u64,
    pub replacements: u64,
    pub snapshots: u64,
    pub evicted: u64,
    pub invariant_violations: Vec<String>,
    pub last_op: Option<StoreOp>,
}

impl StoreDSTResult {
    pub fn new(seed: u64) -> Self {
        StoreDSTResult {
            seed,
            total_operations: 0,
            inserts: 0,
            replacements: 0,
            snapshots: 0,
            evicted: 0,
            invariant_violations: Vec::new(),
            last_op: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops (inserts:{}, replacements:{}, snapshots:{}, evicted:{}), {} violations",
            self.seed,
            self.total_operations,
            self.inserts,
            self.replacements,
            self.snapshots,
            self.evicted,
            self.invariant_violations.len()
        )
    }
}

/// DST harness for SeriesStore
pub struct StoreDSTHarness {
    config: StoreDSTConfig,
    rng: ChaCha8Rng,
    clock: SimulatedClock,
    store: SeriesStore<SimulatedClock>,
    result: StoreDSTResult,
    /// Reference model: latest sample per identity
    expected: HashMap<SampleIdentity, Sample>,
}

impl StoreDSTHarness {
    pub fn new(config: StoreDSTConfig) -> Self {
        let clock = SimulatedClock::new(1_000_000);
        StoreDSTHarness {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            store: SeriesStore::with_clock(config.max_age_secs, clock.clone()),
            clock,
            result: StoreDSTResult::new(config.seed),
            expected: HashMap::new(),
            config,
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::new(StoreDSTConfig::new(seed))
    }

    fn random_sample(&mut self) -> Sample {
        let metric = self.rng.gen_range(0..self.config.num_metrics);
        let name = format!("metric_{}", metric);

        // Label keys arrive in either order; identity must not care
        let host = format!("h{}", self.rng.gen_range(0..self.config.num_label_values));
        let zone = format!("z{}", self.rng.gen_range(0..self.config.num_label_values));
        let labels = if self.rng.gen_bool(0.5) {
            LabelSet::from_pairs(&[("host", &host), ("zone", &zone)])
        } else {
            LabelSet::from_pairs(&[("zone", &zone), ("host", &host)])
        };

        // Kind is a function of the name so families stay single-typed
        let kind = if metric % 2 == 0 {
            MetricKind::Counter
        } else {
            MetricKind::Gauge
        };
        let skew = self.rng.gen_range(0..=self.config.max_skew_secs);
        let value = self.rng.gen_range(0.0..1000.0);
        Sample::new(name, labels, value, kind, self.clock.now_secs() - skew)
    }

    fn run_single_op(&mut self) {
        let roll: f64 = self.rng.gen();

        if roll < self.config.snapshot_prob {
            let now = self.clock.now_secs();
            self.result.last_op = Some(StoreOp::Snapshot { now });
            self.check_snapshot(now);
            self.result.snapshots += 1;
        } else if roll < self.config.snapshot_prob + self.config.advance_prob {
            let secs = self.rng.gen_range(1..=10);
            self.result.last_op = Some(StoreOp::Advance { secs });
            self.clock.advance_secs(secs);
        } else {
            let sample = self.random_sample();
            let identity = sample.identity();
            self.result.last_op = Some(StoreOp::Upsert {
                identity: identity.to_string(),
                observed_at: sample.observed_at,
            });
            self.store.upsert(sample.clone());
            if self.expected.insert(identity, sample).is_some() {
                self.result.replacements += 1;
            } else {
                self.result.inserts += 1;
            }
        }

        self.result.total_operations += 1;
    }

    fn check_snapshot(&mut self, now: i64) {
        let snapshot = self.store.snapshot();

        // Apply the same eviction rule to the model
        if self.config.max_age_secs > 0 {
            let cutoff = now - self.config.max_age_secs as i64;
            let before = self.expected.len();
            self.expected.retain(|_, s| s.observed_at >= cutoff);
            self.result.evicted += (before - self.expected.len()) as u64;
        }

        if let Err(violation) = self.check_invariants(snapshot.into_samples(), now) {
            self.result.invariant_violations.push(format!(
                "Op #{}: {:?} - {}",
                self.result.total_operations, self.result.last_op, violation
            ));
        }
    }

    fn check_invariants(&self, samples: Vec<Sample>, now: i64) -> Result<(), String> {
        // Invariant 1: no duplicate identities
        let mut seen = HashSet::new();
        for sample in &samples {
            if !seen.insert(sample.identity()) {
                return Err(format!("Duplicate identity {}", sample.identity()));
            }
        }

        // Invariant 2: nothing older than the max age
        if self.config.max_age_secs > 0 {
            let cutoff = now - self.config.max_age_secs as i64;
            if let Some(stale) = samples.iter().find(|s| s.observed_at < cutoff) {
                return Err(format!(
                    "Stale sample {} observed at {} (cutoff {})",
                    stale.identity(),
                    stale.observed_at,
                    cutoff
                ));
            }
        }

        // Invariant 3: snapshot equals the model (last write wins)
        if samples.len() != self.expected.len() {
            return Err(format!(
                "Length mismatch: actual={}, expected={}",
                samples.len(),
                self.expected.len()
            ));
        }
        for sample in &samples {
            match self.expected.get(&sample.identity()) {
                Some(expected) if expected == sample => {}
                Some(expected) => {
                    return Err(format!(
                        "Value mismatch for {}: actual={}, expected={}",
                        sample.identity(),
                        sample.value,
                        expected.value
                    ))
                }
                None => return Err(format!("Unexpected series {}", sample.identity())),
            }
        }

        // Invariant 4: family count matches distinct names
        let names: HashSet<&str> = self.expected.keys().map(|id| id.name()).collect();
        if self.store.family_count() != names.len() {
            return Err(format!(
                "Family count mismatch: actual={}, expected={}",
                self.store.family_count(),
                names.len()
            ));
        }

        Ok(())
    }

    pub fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            self.run_single_op();
            if !self.result.invariant_violations.is_empty() {
                break;
            }
        }
        // Always finish with a checked snapshot
        if self.result.invariant_violations.is_empty() {
            let now = self.clock.now_secs();
            self.check_snapshot(now);
        }
    }

    pub fn result(&self) -> &StoreDSTResult {
        &self.result
    }

    pub fn store(&self) -> &SeriesStore<SimulatedClock> {
        &self.store
    }
}

/// Run a batch of DST tests
pub fn run_store_batch(
    start_seed: u64,
    num_seeds: usize,
    ops_per_seed: usize,
    config_fn: fn(u64) -> StoreDSTConfig,
) -> Vec<StoreDSTResult> {
    (0..num_seeds)
        .map(|i| {
            let seed = start_seed + i as u64;
            let mut harness = StoreDSTHarness::new(config_fn(seed));
            harness.run(ops_per_seed);
            harness.result().clone()
        })
        .collect()
}

/// Summarize batch results
pub fn summarize_store_batch(results: &[StoreDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed = total - passed;
    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();

    let mut summary = format!(
        "Store DST Summary\n\
         =================\n\
         Seeds: {} total, {} passed, {} failed\n\
         Total operations: {}\n",
        total, passed, failed, total_ops
    );

    if failed > 0 {
        summary.push_str("\nFailed seeds:\n");
        for result in results.iter().filter(|r| !r.is_success()) {
            summary.push_str(&format!("  Seed {}: {}\n", result.seed, result.summary()));
            for violation in &result.invariant_violations {
                summary.push_str(&format!("    - {}\n", violation));
            }
        }
    }

    summary
}
