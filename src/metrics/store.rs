//! Series store
//!
//! Holds the latest [`Sample`] per series identity, grouped into families by
//! metric name. One exclusive lock covers the whole store: `snapshot` evicts
//! before copying, so it mutates just like `upsert` does.

use super::types::{Sample, SampleIdentity};
use crate::clock::{Clock, SystemClock};
use ahash::AHashMap;
use parking_lot::Mutex;
use tracing::debug;

/// What an upsert did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First sample for this identity
    Inserted,
    /// An older sample for this identity was replaced
    Replaced,
}

/// All series sharing one metric name
#[derive(Debug, Default)]
struct SeriesFamily {
    samples: AHashMap<SampleIdentity, Sample>,
}

impl SeriesFamily {
    fn upsert(&mut self, sample: Sample) -> UpsertOutcome {
        match self.samples.insert(sample.identity(), sample) {
            Some(_) => UpsertOutcome::Replaced,
            None => UpsertOutcome::Inserted,
        }
    }

    /// Drop samples observed before `cutoff`. Returns how many were removed.
    fn evict_before(&mut self, cutoff: i64) -> usize {
        let before = self.samples.len();
        self.samples.retain(|_, sample| sample.observed_at >= cutoff);
        before - self.samples.len()
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    families: AHashMap<String, SeriesFamily>,
}

impl StoreInner {
    /// Verify all invariants hold for this store
    #[cfg(debug_assertions)]
    fn verify_invariants(&self) {
        for (name, family) in &self.families {
            // Invariant 1: no empty family survives an operation
            debug_assert!(
                !family.samples.is_empty(),
                "Invariant violated: family '{}' is empty",
                name
            );

            // Invariant 2: every sample is filed under its own identity and family
            for (identity, sample) in &family.samples {
                debug_assert_eq!(
                    identity.name(),
                    name,
                    "Invariant violated: identity {} filed under family '{}'",
                    identity,
                    name
                );
                debug_assert!(
                    identity.name() == sample.name && identity.labels() == &sample.labels,
                    "Invariant violated: sample does not match identity {}",
                    identity
                );
            }
        }
    }

    #[cfg(not(debug_assertions))]
    #[inline(always)]
    fn verify_invariants(&self) {}

    fn evict(&mut self, max_age_secs: u64, now_secs: i64) -> usize {
        if max_age_secs == 0 {
            return 0;
        }

        let cutoff = now_secs.saturating_sub(i64::try_from(max_age_secs).unwrap_or(i64::MAX));
        let mut evicted = 0;
        self.families.retain(|_, family| {
            evicted += family.evict_before(cutoff);
            !family.samples.is_empty()
        });
        evicted
    }
}

/// Point-in-time copy of the store, taken under the store lock.
///
/// Every family is non-empty and no two samples share an identity.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    samples: Vec<Sample>,
}

impl Snapshot {
    /// (family name, sample) pairs, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Sample)> {
        self.samples.iter().map(|s| (s.name.as_str(), s))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }
}

impl IntoIterator for Snapshot {
    type Item = Sample;
    type IntoIter = std::vec::IntoIter<Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.into_iter()
    }
}

/// Concurrent store of the latest sample per series.
///
/// Shared between the ingestion pipeline and scrape handlers behind an `Arc`.
pub struct SeriesStore<C: Clock = SystemClock> {
    inner: Mutex<StoreInner>,
    /// Maximum sample age in seconds; 0 keeps samples forever
    max_age_secs: u64,
    clock: C,
}

impl SeriesStore<SystemClock> {
    pub fn new(max_age_secs: u64) -> Self {
        Self::with_clock(max_age_secs, SystemClock)
    }
}

impl<C: Clock> SeriesStore<C> {
    pub fn with_clock(max_age_secs: u64, clock: C) -> Self {
        SeriesStore {
            inner: Mutex::new(StoreInner::default()),
            max_age_secs,
            clock,
        }
    }

    pub fn max_age_secs(&self) -> u64 {
        self.max_age_secs
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Insert or replace the sample for its identity (last write wins)
    pub fn upsert(&self, sample: Sample) -> UpsertOutcome {
        let mut inner = self.inner.lock();
        let outcome = inner
            .families
            .entry(sample.name.clone())
            .or_default()
            .upsert(sample);
        inner.verify_invariants();
        outcome
    }

    /// Evict stale samples, then copy out everything that remains
    pub fn snapshot(&self) -> Snapshot {
        let now = self.clock.now_secs();
        let mut inner = self.inner.lock();
        let evicted = inner.evict(self.max_age_secs, now);
        if evicted > 0 {
            debug!(evicted, max_age_secs = self.max_age_secs, "evicted stale samples");
        }
        inner.verify_invariants();

        let samples = inner
            .families
            .values()
            .flat_map(|family| family.samples.values().cloned())
            .collect();
        Snapshot { samples }
    }

    /// Remove every sample observed more than `max_age_secs` before now.
    /// Zero disables eviction. Returns the number of samples removed.
    pub fn evict(&self, max_age_secs: u64) -> usize {
        let now = self.clock.now_secs();
        let mut inner = self.inner.lock();
        let evicted = inner.evict(max_age_secs, now);
        inner.verify_invariants();
        evicted
    }

    /// Current sample for an identity, if held (no eviction is applied)
    pub fn get(&self, identity: &SampleIdentity) -> Option<Sample> {
        self.inner
            .lock()
            .families
            .get(identity.name())
            .and_then(|family| family.samples.get(identity))
            .cloned()
    }

    /// Number of series held
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .families
            .values()
            .map(|family| family.samples.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().families.is_empty()
    }

    /// Number of non-empty families held
    pub fn family_count(&self) -> usize {
        self.inner.lock().families.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use crate::metrics::types::LabelSet;

    fn path(p: &str) -> LabelSet {
        LabelSet::from_pairs(&[("path", p)])
    }

    #[test]
    fn test_upsert_inserts_then_replaces() {
        let store = SeriesStore::with_clock(0, SimulatedClock::new(1000));
        assert_eq!(
            store.upsert(Sample::counter("requests_total", path("/a"), 1.0, 1000)),
            UpsertOutcome::Inserted
        );
        assert_eq!(
            store.upsert(Sample::counter("requests_total", path("/a"), 2.0, 1001)),
            UpsertOutcome::Replaced
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.family_count(), 1);
    }

    #[test]
    fn test_distinct_labels_are_distinct_series() {
        let store = SeriesStore::with_clock(0, SimulatedClock::new(1000));
        store.upsert(Sample::counter("requests_total", path("/a"), 1.0, 1000));
        store.upsert(Sample::counter("requests_total", path("/b"), 1.0, 1000));
        store.upsert(Sample::gauge("inflight", LabelSet::empty(), 3.0, 1000));
        assert_eq!(store.len(), 3);
        assert_eq!(store.family_count(), 2);
    }

    #[test]
    fn test_eviction_boundary() {
        let clock = SimulatedClock::new(1000);
        let store = SeriesStore::with_clock(10, clock.clone());
        store.upsert(Sample::gauge("old", LabelSet::empty(), 1.0, 989));
        store.upsert(Sample::gauge("edge", LabelSet::empty(), 1.0, 990));
        store.upsert(Sample::gauge("fresh", LabelSet::empty(), 1.0, 991));

        let names: Vec<String> = store.snapshot().into_iter().map(|s| s.name).collect();
        assert!(!names.contains(&"old".to_string()));
        assert!(names.contains(&"edge".to_string()));
        assert!(names.contains(&"fresh".to_string()));
        assert_eq!(store.family_count(), 2, "empty families are removed");
    }

    #[test]
    fn test_zero_max_age_never_evicts() {
        let clock = SimulatedClock::new(0);
        let store = SeriesStore::with_clock(0, clock.clone());
        store.upsert(Sample::gauge("ancient", LabelSet::empty(), 1.0, 0));
        clock.set(10_000_000);
        assert_eq!(store.snapshot().len(), 1);
        assert_eq!(store.evict(0), 0);
    }

    #[test]
    fn test_explicit_evict() {
        let clock = SimulatedClock::new(100);
        let store = SeriesStore::with_clock(0, clock);
        store.upsert(Sample::gauge("a", path("/x"), 1.0, 50));
        store.upsert(Sample::gauge("a", path("/y"), 1.0, 95));
        assert_eq!(store.evict(10), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.family_count(), 1);
    }

    #[test]
    fn test_get_returns_latest() {
        let store = SeriesStore::with_clock(0, SimulatedClock::new(0));
        let sample = Sample::gauge("cpu", path("/"), 0.5, 1);
        let identity = sample.identity();
        store.upsert(sample);
        store.upsert(Sample::gauge("cpu", path("/"), 0.75, 2));
        assert_eq!(store.get(&identity).map(|s| s.value), Some(0.75));
    }
}
