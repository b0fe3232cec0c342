use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;
use std::ops::Bound;

use parking_lot::Mutex;

/// Tuning knobs for one [`MrcEstimator`].
#[derive(Debug, Clone)]
pub struct MrcConfig {
    /// Fraction of keys that are sampled, in (0, 1].
    pub acceptance_rate: f64,
    /// Reuse-distance granularity in bytes.
    pub bucket_size: u64,
    /// Upper bound of the emitted curve's size axis.
    pub max_size: u64,
    /// Memory budget: number of sampled keys tracked before the oldest are
    /// dropped.
    pub max_tracked: usize,
}

impl Default for MrcConfig {
    fn default() -> Self {
        Self {
            acceptance_rate: 0.001,
            bucket_size: 100,
            max_size: 1 << 30,
            max_tracked: 8192,
        }
    }
}

/// Sampled miss-ratio-curve estimator.
///
/// Keys are spatially sampled: a key is tracked iff `hash(key) % ⌊1/r⌋ == 0`
/// for acceptance rate r, so an insertion and every later access of the same
/// key are jointly sampled or jointly ignored, and two estimators fed the
/// same stream produce identical curves. For each sampled re-access the
/// byte-weighted reuse distance (sum of object sizes touched since the
/// previous access) is scaled by 1/r and bucketed; the miss ratio at size s
/// is the fraction of samples whose scaled distance exceeds s, with
/// first-touch samples counting as misses at every size.
pub struct MrcEstimator {
    modulus: u64,
    bucket_size: u64,
    max_size: u64,
    max_tracked: usize,
    hasher: ahash::RandomState,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    /// Logical clock, advanced once per sampled access.
    clock: u64,
    /// Key hash -> time of its most recent sampled access.
    last_access: HashMap<u64, u64>,
    /// Access time -> (key hash, object size). Ordered by recency.
    stack: BTreeMap<u64, (u64, u64)>,
    /// Bucketed finite reuse distances.
    histogram: BTreeMap<u64, u64>,
    /// First-touch samples: infinite reuse distance.
    cold: u64,
    total: u64,
}

impl MrcEstimator {
    pub fn new(config: MrcConfig) -> Self {
        let rate = config.acceptance_rate.clamp(f64::MIN_POSITIVE, 1.0);
        let modulus = ((1.0 / rate).floor() as u64).max(1);
        Self {
            modulus,
            bucket_size: config.bucket_size.max(1),
            max_size: config.max_size,
            max_tracked: config.max_tracked.max(1),
            // Fixed seeds keep the sampling decision identical across
            // estimator instances and process restarts.
            hasher: ahash::RandomState::with_seeds(
                0x243f_6a88_85a3_08d3,
                0x1319_8a2e_0370_7344,
                0xa409_3822_299f_31d0,
                0x082e_fa98_ec4e_6c89,
            ),
            state: Mutex::new(State::default()),
        }
    }

    fn sample(&self, key: &[u8]) -> Option<u64> {
        let h = self.hasher.hash_one(key);
        (h % self.modulus == 0).then_some(h)
    }

    /// Records one access of `key` with the given object size.
    pub fn accessed(&self, key: &[u8], size: u32) {
        let Some(h) = self.sample(key) else { return };
        let mut s = self.state.lock();
        s.clock += 1;
        let now = s.clock;

        match s.last_access.get(&h).copied() {
            Some(prev) => {
                // Bytes touched strictly after the previous access of this
                // key, scaled up to account for the sampled population.
                let distance: u64 = s
                    .stack
                    .range((Bound::Excluded(prev), Bound::Unbounded))
                    .map(|(_, (_, size))| size)
                    .sum();
                let scaled = distance.saturating_mul(self.modulus);
                let bucket = scaled / self.bucket_size;
                *s.histogram.entry(bucket).or_insert(0) += 1;
                s.total += 1;
                s.stack.remove(&prev);
            }
            None => {
                s.cold += 1;
                s.total += 1;
            }
        }

        s.stack.insert(now, (h, u64::from(size)));
        s.last_access.insert(h, now);

        // Bounded memory: forget the coldest sampled keys. Their histogram
        // contributions stay, so the emitted curve degrades but remains
        // monotone.
        while s.last_access.len() > self.max_tracked {
            match s.stack.pop_first() {
                Some((_, (old, _))) => {
                    s.last_access.remove(&old);
                }
                None => break,
            }
        }
    }

    /// Drops any internal state tied to `key`.
    pub fn remove(&self, key: &[u8]) {
        let Some(h) = self.sample(key) else { return };
        let mut s = self.state.lock();
        if let Some(t) = s.last_access.remove(&h) {
            s.stack.remove(&t);
        }
    }

    /// Number of sampled keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.state.lock().last_access.len()
    }

    /// Emits the sorted size -> miss-ratio curve.
    ///
    /// The curve is non-increasing in size; a forward sweep clamps any rise
    /// before emission. Sizes beyond the configured maximum are omitted, as
    /// may be sizes whose miss ratio is zero.
    pub fn byte_mrc(&self) -> BTreeMap<u64, f32> {
        let s = self.state.lock();
        let mut curve = BTreeMap::new();
        if s.total == 0 {
            return curve;
        }
        let total = s.total as f64;

        // Samples in bucket b or beyond still miss at sizes below b's
        // distance range; walk buckets in size order peeling the tail sum.
        let mut tail: u64 = s.cold + s.histogram.values().sum::<u64>();
        let mut last_bucket = 0;
        for (&bucket, &count) in s.histogram.iter() {
            let size = bucket * self.bucket_size;
            if size <= self.max_size {
                curve.insert(size, (tail as f64 / total) as f32);
            }
            tail -= count;
            last_bucket = bucket;
        }
        // Floor of the curve: only first-touch samples miss once the cache
        // holds every observed reuse distance.
        if s.cold > 0 {
            let size = (last_bucket + 1) * self.bucket_size;
            if size <= self.max_size {
                curve.insert(size, (s.cold as f64 / total) as f32);
            }
        }

        let mut floor = 1.0f32;
        for ratio in curve.values_mut() {
            if *ratio > floor {
                *ratio = floor;
            }
            floor = *ratio;
        }
        curve
    }
}
