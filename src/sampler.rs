use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::Core;
use crate::error::CoreError;
use crate::record::{LogRecord, Severity};

/// Default upper bound on tracked sampling keys before stale ones are evicted.
pub const DEFAULT_MAX_KEYS: usize = 4096;

/// Per-tick sampling policy: the first `first` repetitions of a key pass,
/// after that only every `thereafter`-th one does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingPolicy {
    #[serde(rename = "tick_ms", with = "millis")]
    pub tick: Duration,
    pub first: u64,
    pub thereafter: u64,
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            first: 100,
            thereafter: 100,
        }
    }
}

impl SamplingPolicy {
    /// Whether the `count`-th occurrence of a key within a tick passes.
    pub fn passes(&self, count: u64) -> bool {
        count <= self.first
            || (self.thereafter > 0 && (count - self.first) % self.thereafter == 0)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Copy)]
struct TickCount {
    tick: i64,
    count: u64,
}

/// Counters exposed by a [`Sampler`].
#[derive(Debug, Default)]
pub struct SamplerStats {
    pub sampled: AtomicU64,
    pub dropped: AtomicU64,
    /// Keys removed from the table by stale-key eviction.
    pub evicted: AtomicU64,
}

/// Point-in-time copy of [`SamplerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerSnapshot {
    pub sampled: u64,
    pub dropped: u64,
    pub evicted: u64,
}

/// Core wrapper that rate-limits repeated records.
///
/// Records are keyed by message, severity and caller. Counts live in a
/// sharded concurrent map and are updated under the shard lock, so
/// concurrent callers never lose an increment.
pub struct Sampler {
    name: String,
    inner: Arc<dyn Core>,
    policy: SamplingPolicy,
    counts: DashMap<u64, TickCount>,
    max_keys: usize,
    /// Tick of the last eviction sweep; at most one sweep runs per tick.
    last_sweep: AtomicI64,
    stats: SamplerStats,
}

impl Sampler {
    pub fn new(inner: Arc<dyn Core>, policy: SamplingPolicy) -> Self {
        Self {
            name: format!("sampled({})", inner.name()),
            inner,
            policy,
            counts: DashMap::new(),
            max_keys: DEFAULT_MAX_KEYS,
            last_sweep: AtomicI64::new(i64::MIN),
            stats: SamplerStats::default(),
        }
    }

    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys.max(1);
        self
    }

    pub fn policy(&self) -> SamplingPolicy {
        self.policy
    }

    pub fn stats(&self) -> SamplerSnapshot {
        SamplerSnapshot {
            sampled: self.stats.sampled.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            evicted: self.stats.evicted.load(Ordering::Relaxed),
        }
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.counts.len()
    }

    fn key(record: &LogRecord) -> u64 {
        let mut hasher = DefaultHasher::new();
        record.message.hash(&mut hasher);
        record.severity.hash(&mut hasher);
        record.caller.hash(&mut hasher);
        hasher.finish()
    }

    fn tick(&self, record: &LogRecord) -> i64 {
        let tick_micros = i64::try_from(self.policy.tick.as_micros())
            .unwrap_or(i64::MAX)
            .max(1);
        record.timestamp.timestamp_micros().div_euclid(tick_micros)
    }

    /// Count the record and decide whether it passes.
    fn sample(&self, record: &LogRecord) -> bool {
        let tick = self.tick(record);
        let count = {
            let mut entry = self
                .counts
                .entry(Self::key(record))
                .or_insert(TickCount { tick, count: 0 });
            // A late record from an older tick is counted in the current one.
            if tick > entry.tick {
                entry.tick = tick;
                entry.count = 0;
            }
            entry.count += 1;
            entry.count
        };

        if self.counts.len() > self.max_keys
            && self.last_sweep.fetch_max(tick, Ordering::Relaxed) < tick
        {
            let before = self.counts.len();
            self.counts.retain(|_, c| c.tick >= tick);
            let removed = before.saturating_sub(self.counts.len()) as u64;
            self.stats.evicted.fetch_add(removed, Ordering::Relaxed);
        }

        self.policy.passes(count)
    }
}

impl Core for Sampler {
    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self, severity: Severity) -> bool {
        self.inner.enabled(severity)
    }

    fn accepts(&self, record: &LogRecord) -> bool {
        self.inner.accepts(record)
    }

    fn handle(&self, record: &LogRecord) -> Result<bool, CoreError> {
        // Records the child would reject never consume sampling budget.
        if !self.inner.accepts(record) {
            return Ok(false);
        }
        if !self.sample(record) {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }
        self.stats.sampled.fetch_add(1, Ordering::Relaxed);
        self.inner.handle(record)
    }

    fn sync(&self) -> Result<(), CoreError> {
        self.inner.sync()
    }
}
