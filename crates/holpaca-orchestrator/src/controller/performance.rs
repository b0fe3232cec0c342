use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use holpaca_core::{siman, Anneal, CacheName, MonotoneSpline, PoolId, SimanParams};
use holpaca_proto::PoolStatus;
use rand::rngs::StdRng;
use rand::Rng;
use tracing::debug;

use super::Controller;
use crate::proxy::{CacheResize, PoolResize, ProxyManager};

/// Pools whose MRC has fewer usable points than this are treated as new and
/// fall back to an even share.
const MRC_MIN_LENGTH: usize = 3;
/// Safety margin on the QoS floor before shrinking is forbidden.
const QOS_MARGIN: f64 = 0.10;
/// Weight of history in the metrics moving average.
const MOVING_AVERAGE_PARAM: f64 = 0.3;

/// Controller that picks per-pool sizes minimizing aggregate predicted
/// misses, subject to per-pool bounds and QoS floors.
///
/// Each tick: collect status, smooth metrics, compute preliminary sizes,
/// rebuild per-pool utility curves from their MRCs, then anneal a
/// total-preserving exchange of bytes between pools and enforce the result.
pub struct PerformanceMaximization {
    /// Maximum change per tick as a fraction of total memory.
    delta: f64,
    /// Emit the observed sizes instead of the optimized ones, so the
    /// pipeline cost can be measured without perturbing the caches.
    fake_enforce: bool,
    /// When nonzero, record this many per-tick latency tuples and print
    /// them as CSV once full.
    print_latencies_on: u64,
    latencies: Vec<(f64, f64, f64)>,
    siman: SimanParams,
    history: HashMap<CacheName, HashMap<PoolId, PoolAvgMetrics>>,
}

#[derive(Debug, Clone, Copy)]
struct PoolAvgMetrics {
    disk_iops: f64,
    miss_ratio: f64,
    throughput: f64,
}

impl PoolAvgMetrics {
    fn observe(&mut self, status: &PoolStatus) {
        let a = MOVING_AVERAGE_PARAM;
        self.disk_iops = self.disk_iops * a + f64::from(status.disk_iops) * (1.0 - a);
        self.miss_ratio = self.miss_ratio * a + status.miss_ratio * (1.0 - a);
        self.throughput = self.throughput * a + f64::from(status.throughput) * (1.0 - a);
    }
}

impl From<&PoolStatus> for PoolAvgMetrics {
    fn from(status: &PoolStatus) -> Self {
        Self {
            disk_iops: f64::from(status.disk_iops),
            miss_ratio: status.miss_ratio,
            throughput: f64::from(status.throughput),
        }
    }
}

#[derive(Debug, Clone)]
struct PoolConfig {
    optimal_size: u64,
    lower: u64,
    upper: u64,
    utility: MonotoneSpline,
}

/// Tick-local optimization state over every pool with a usable MRC.
#[derive(Clone, Default)]
struct Context {
    caches: Vec<(CacheName, Vec<(PoolId, PoolConfig)>)>,
}

impl Context {
    fn total(&self) -> u64 {
        self.caches
            .iter()
            .flat_map(|(_, pools)| pools.iter())
            .map(|(_, cfg)| cfg.optimal_size)
            .sum()
    }
}

impl Anneal for Context {
    /// Trades a random amount of bytes from one pool to another, within
    /// both pools' bounds. Total allocated memory is preserved exactly.
    fn step(&mut self, rng: &mut StdRng) {
        let n_caches = self.caches.len();
        if n_caches == 0 {
            return;
        }
        let c1 = rng.gen_range(0..n_caches);
        let c2 = rng.gen_range(0..n_caches);
        let (n1, n2) = (self.caches[c1].1.len(), self.caches[c2].1.len());
        if n1 == 0 || n2 == 0 {
            return;
        }
        let p1 = rng.gen_range(0..n1);
        let p2 = if c1 != c2 {
            rng.gen_range(0..n2)
        } else if n2 < 2 {
            return;
        } else {
            (p1 + 1 + rng.gen_range(0..n2 - 1)) % n2
        };

        let donor = &self.caches[c1].1[p1].1;
        let recipient = &self.caches[c2].1[p2].1;
        let max_delta = donor
            .optimal_size
            .saturating_sub(donor.lower)
            .min(recipient.upper.saturating_sub(recipient.optimal_size));
        if max_delta > 0 {
            let delta = rng.gen_range(0..max_delta);
            self.caches[c1].1[p1].1.optimal_size -= delta;
            self.caches[c2].1[p2].1.optimal_size += delta;
        }
    }

    fn energy(&self) -> f64 {
        self.caches
            .iter()
            .flat_map(|(_, pools)| pools.iter())
            .map(|(_, cfg)| cfg.utility.eval(cfg.optimal_size as f64))
            .sum()
    }

    fn distance(&self, other: &Self) -> f64 {
        (self.energy() - other.energy()).abs()
    }

    fn skip(&self) -> bool {
        self.caches.iter().map(|(_, pools)| pools.len()).sum::<usize>() == 0
    }
}

impl PerformanceMaximization {
    pub fn new(delta: f64, fake_enforce: bool, print_latencies_on: u64) -> Self {
        Self {
            delta,
            fake_enforce,
            print_latencies_on,
            latencies: Vec::new(),
            siman: SimanParams::default(),
            history: HashMap::new(),
        }
    }

    /// Per-pool size window around the preliminary size. A pool failing its
    /// QoS floor keeps its preliminary size as the lower bound: it may grow
    /// but never shrink.
    fn bounds(
        &self,
        prelim: u64,
        total_size: u64,
        qos: f64,
        avg_throughput: f64,
    ) -> (u64, u64) {
        let span = total_size as f64 * self.delta;
        let mut lower = (prelim as f64 - span).max(0.0) as u64;
        let upper = (prelim as f64 + span) as u64;
        if qos > 0.0 && qos * (1.0 + QOS_MARGIN) > avg_throughput {
            lower = prelim;
        }
        (lower, upper)
    }
}

/// Rebuilds a pool's utility curve from its MRC: utility points are
/// `-avgDiskIOPS / missRatio`, shifted so the curve passes through the
/// pool's current operating point at its average throughput.
fn build_utility(status: &PoolStatus, avg: PoolAvgMetrics) -> Option<MonotoneSpline> {
    let mut xs = Vec::with_capacity(status.mrc.len());
    let mut ys = Vec::with_capacity(status.mrc.len());
    for (&size, &miss_ratio) in &status.mrc {
        if miss_ratio > 0.0 {
            xs.push(size as f64);
            ys.push(-avg.disk_iops / f64::from(miss_ratio));
        }
    }
    let spline = MonotoneSpline::fit(xs.clone(), ys.clone()).ok()?;
    let shift = spline.eval(status.used_size as f64) + avg.throughput;
    let shifted: Vec<f64> = ys.into_iter().map(|y| y + shift).collect();
    MonotoneSpline::fit(xs, shifted).ok()
}

#[async_trait]
impl Controller for PerformanceMaximization {
    async fn tick(&mut self, proxies: &dyn ProxyManager) {
        let started = Instant::now();
        let all_status = proxies.get_status().await;
        let collect_ms = started.elapsed().as_secs_f64() * 1e3;

        let started = Instant::now();
        let mut any_pool_active = false;
        let mut total_size: u64 = 0;
        let mut pools = 0usize;
        let mut new_pools = 0usize;
        let mut used_space: u64 = 0;
        let mut new_sizes: HashMap<CacheName, HashMap<PoolId, u64>> = HashMap::new();

        // Metrics history update.
        for (name, status) in &all_status {
            new_sizes.insert(name.clone(), HashMap::new());
            total_size += status.max_size;
            let cache_history = self.history.entry(name.clone()).or_default();
            for (&id, pool) in &status.pools {
                if pool.mrc.len() < MRC_MIN_LENGTH {
                    new_pools += 1;
                }
                pools += 1;
                cache_history
                    .entry(id)
                    .or_insert_with(|| PoolAvgMetrics::from(pool))
                    .observe(pool);
            }
        }

        // Preliminary sizing: seed new pools with an even share, split the
        // residual over established pools in proportion to their used space.
        for (name, status) in &all_status {
            for (&id, pool) in &status.pools {
                if pool.mrc.len() >= MRC_MIN_LENGTH {
                    used_space += pool.used_size;
                    any_pool_active = true;
                } else {
                    let share = (total_size as f64 / pools as f64) as u64;
                    new_sizes.get_mut(name).expect("seeded above").insert(id, share);
                }
            }
        }
        let seeded = new_pools as f64 * total_size as f64 / pools.max(1) as f64;
        let factor = if used_space > 0 {
            (total_size as f64 - seeded) / used_space as f64
        } else {
            0.0
        };
        let residual = total_size as f64 - seeded - factor * used_space as f64;
        let spread = if pools > new_pools {
            residual / (pools - new_pools) as f64
        } else {
            0.0
        };

        for (name, status) in &all_status {
            for (&id, pool) in &status.pools {
                if pool.mrc.len() >= MRC_MIN_LENGTH {
                    let prelim = (pool.used_size as f64 * factor + spread).max(0.0) as u64;
                    new_sizes.get_mut(name).expect("seeded above").insert(id, prelim);
                }
            }
        }

        // Optimization context over pools with usable curves.
        let mut context = Context::default();
        let mut aggregated = 0.0;
        for (name, status) in &all_status {
            let mut configs = Vec::new();
            for (&id, pool) in &status.pools {
                if pool.mrc.len() < MRC_MIN_LENGTH {
                    continue;
                }
                let prelim = new_sizes[name][&id];
                let avg = self.history[name][&id];
                let Some(utility) = build_utility(pool, avg) else {
                    debug!(
                        cache = %name,
                        pool = id,
                        avg_miss_ratio = avg.miss_ratio,
                        "utility fit failed, keeping preliminary size"
                    );
                    continue;
                };
                let (lower, upper) = self.bounds(prelim, total_size, pool.qos, avg.throughput);
                aggregated += utility.eval(prelim as f64);
                configs.push((id, PoolConfig { optimal_size: prelim, lower, upper, utility }));
            }
            if !configs.is_empty() {
                context.caches.push((name.clone(), configs));
            }
        }

        let normalizer = if context.caches.is_empty() {
            0.0
        } else {
            aggregated / context.caches.len() as f64
        };
        let optimized = siman::solve(context, &SimanParams { k: normalizer, ..self.siman });
        for (name, configs) in &optimized.caches {
            for (id, cfg) in configs {
                new_sizes.get_mut(name).expect("seeded above").insert(*id, cfg.optimal_size);
            }
        }

        let mut plan = Vec::with_capacity(new_sizes.len());
        for (name, sizes) in &new_sizes {
            let pool_resizes = sizes
                .iter()
                .map(|(&id, &size)| PoolResize {
                    id,
                    size: if self.fake_enforce {
                        all_status[name].pools[&id].max_size
                    } else {
                        size
                    },
                })
                .collect();
            plan.push(CacheResize { name: name.clone(), pools: pool_resizes });
        }
        let compute_ms = started.elapsed().as_secs_f64() * 1e3;

        let started = Instant::now();
        proxies.resize(plan).await;
        let enforce_ms = started.elapsed().as_secs_f64() * 1e3;

        if self.print_latencies_on > 0
            && (self.latencies.len() as u64) < self.print_latencies_on
            && any_pool_active
        {
            self.latencies.push((collect_ms, compute_ms, enforce_ms));
        }
        if self.print_latencies_on > 0 && self.latencies.len() as u64 == self.print_latencies_on {
            for (collect, compute, enforce) in &self.latencies {
                println!("{collect},{compute},{enforce}");
            }
            self.print_latencies_on = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::FakeProxies;
    use super::*;
    use holpaca_proto::CacheStatus;
    use rand::SeedableRng;
    use std::collections::BTreeMap;

    fn pool_status(
        id: PoolId,
        max_size: u64,
        used_size: u64,
        mrc: &[(u64, f32)],
        disk_iops: u32,
        throughput: u32,
        qos: f64,
    ) -> PoolStatus {
        PoolStatus {
            pool_id: id,
            max_size,
            used_size,
            disk_iops,
            miss_ratio: 0.5,
            throughput,
            qos,
            proportion: 1.0,
            mrc: mrc.iter().copied().collect::<BTreeMap<_, _>>(),
        }
    }

    const USABLE_MRC: &[(u64, f32)] = &[(100, 0.9), (300, 0.5), (600, 0.2)];
    const SHORT_MRC: &[(u64, f32)] = &[(100, 0.9), (300, 0.5)];

    fn spline(points: &[(f64, f64)]) -> MonotoneSpline {
        let (xs, ys): (Vec<_>, Vec<_>) = points.iter().copied().unzip();
        MonotoneSpline::fit(xs, ys).unwrap()
    }

    fn config(optimal: u64, lower: u64, upper: u64) -> PoolConfig {
        PoolConfig {
            optimal_size: optimal,
            lower,
            upper,
            utility: spline(&[(0.0, -10.0), (500.0, -4.0), (1000.0, -1.0)]),
        }
    }

    fn sample_context() -> Context {
        Context {
            caches: vec![
                (
                    "cache-a".into(),
                    vec![(0, config(400, 300, 500)), (1, config(600, 500, 700))],
                ),
                ("cache-b".into(), vec![(0, config(250, 200, 300))]),
            ],
        }
    }

    #[test]
    fn step_preserves_total_allocation() {
        let mut context = sample_context();
        let before = context.total();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..1_000 {
            context.step(&mut rng);
            assert_eq!(context.total(), before, "a trade changed the total");
        }
    }

    #[test]
    fn optimized_sizes_respect_bounds() {
        let params = SimanParams { n_tries: 100, iters_per_temp: 50, ..Default::default() };
        let optimized =
            siman::solve_with_rng(sample_context(), &params, StdRng::seed_from_u64(5));
        for (_, pools) in &optimized.caches {
            for (id, cfg) in pools {
                assert!(
                    (cfg.lower..=cfg.upper).contains(&cfg.optimal_size),
                    "pool {id}: {} outside [{}, {}]",
                    cfg.optimal_size,
                    cfg.lower,
                    cfg.upper
                );
            }
        }
        assert_eq!(optimized.total(), sample_context().total());
    }

    #[tokio::test]
    async fn insufficient_mrc_falls_back_to_even_shares() {
        let mut proxies = FakeProxies::default();
        proxies.status.insert(
            "c".into(),
            CacheStatus {
                max_size: 1_000,
                proportion: 1.0,
                pools: HashMap::from([
                    (0, pool_status(0, 700, 650, SHORT_MRC, 10, 100, 0.0)),
                    (1, pool_status(1, 300, 250, SHORT_MRC, 10, 100, 0.0)),
                ]),
            },
        );

        PerformanceMaximization::new(0.05, false, 0).tick(&proxies).await;

        let sizes = proxies.last_sizes();
        assert_eq!(sizes[&("c".into(), 0)], 500);
        assert_eq!(sizes[&("c".into(), 1)], 500);
    }

    #[test]
    fn qos_clamp_forbids_shrinking_a_struggling_pool() {
        let controller = PerformanceMaximization::new(0.05, false, 0);
        // 100 * 1.10 > 80: the pool is failing its floor.
        let (lower, upper) = controller.bounds(400, 1_000, 100.0, 80.0);
        assert_eq!(lower, 400, "lower bound must be clamped to the preliminary size");
        assert_eq!(upper, 450);
        // A healthy pool keeps the full window.
        let (lower, _) = controller.bounds(400, 1_000, 100.0, 200.0);
        assert_eq!(lower, 350);
    }

    #[tokio::test]
    async fn metrics_follow_the_moving_average_law() {
        let mut controller = PerformanceMaximization::new(0.05, false, 0);
        let mut proxies = FakeProxies::default();
        proxies.status.insert(
            "c".into(),
            CacheStatus {
                max_size: 1_000,
                proportion: 1.0,
                pools: HashMap::from([(0, pool_status(0, 500, 400, SHORT_MRC, 100, 1_000, 0.0))]),
            },
        );

        // First sight initializes to the observation.
        controller.tick(&proxies).await;
        let avg = controller.history["c"][&0];
        assert_eq!(avg.throughput, 1_000.0);

        // A step change closes 70% of the gap per tick.
        proxies.status.get_mut("c").unwrap().pools.get_mut(&0).unwrap().throughput = 2_000;
        controller.tick(&proxies).await;
        let avg = controller.history["c"][&0];
        assert!(
            (avg.throughput - (0.3 * 1_000.0 + 0.7 * 2_000.0)).abs() < 1e-9,
            "got {}",
            avg.throughput
        );
    }

    #[tokio::test]
    async fn optimization_preserves_total_memory_within_bounds() {
        let mut proxies = FakeProxies::default();
        proxies.status.insert(
            "c".into(),
            CacheStatus {
                max_size: 1_000,
                proportion: 1.0,
                pools: HashMap::from([
                    (0, pool_status(0, 700, 600, USABLE_MRC, 50, 500, 0.0)),
                    (1, pool_status(1, 300, 200, USABLE_MRC, 80, 300, 0.0)),
                ]),
            },
        );

        PerformanceMaximization::new(0.05, false, 0).tick(&proxies).await;

        let sizes = proxies.last_sizes();
        // Preliminary sizes are 750/250; trades preserve the total and stay
        // inside the +/- 5% of T window.
        let s0 = sizes[&("c".into(), 0)];
        let s1 = sizes[&("c".into(), 1)];
        assert_eq!(s0 + s1, 1_000, "total memory must be conserved");
        assert!((700..=800).contains(&s0), "pool 0 out of bounds: {s0}");
        assert!((200..=300).contains(&s1), "pool 1 out of bounds: {s1}");
    }

    #[tokio::test]
    async fn fake_enforce_replays_the_observed_sizes() {
        let mut proxies = FakeProxies::default();
        proxies.status.insert(
            "c".into(),
            CacheStatus {
                max_size: 1_000,
                proportion: 1.0,
                pools: HashMap::from([
                    (0, pool_status(0, 800, 600, SHORT_MRC, 10, 100, 0.0)),
                    (1, pool_status(1, 200, 100, SHORT_MRC, 10, 100, 0.0)),
                ]),
            },
        );

        PerformanceMaximization::new(0.05, true, 0).tick(&proxies).await;

        let sizes = proxies.last_sizes();
        assert_eq!(sizes[&("c".into(), 0)], 800);
        assert_eq!(sizes[&("c".into(), 1)], 200);
    }
}
