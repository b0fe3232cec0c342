use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

/// Cooling schedule and acceptance parameters for [`solve`].
#[derive(Debug, Clone, Copy)]
pub struct SimanParams {
    /// Upper bound on the number of temperature stages.
    pub n_tries: u32,
    /// Candidate steps evaluated at each temperature.
    pub iters_per_temp: u32,
    /// Boltzmann normalization constant.
    pub k: f64,
    pub t_initial: f64,
    pub t_min: f64,
    /// Temperature divisor applied after each stage.
    pub cooling_rate: f64,
}

impl Default for SimanParams {
    fn default() -> Self {
        Self {
            n_tries: 2000,
            iters_per_temp: 250,
            k: 1.0,
            t_initial: 90.0,
            t_min: 0.1,
            cooling_rate: 1.003,
        }
    }
}

/// A state the annealer can explore.
///
/// `step` perturbs the state in place; `energy` is the quantity being
/// minimized; `distance` measures how far two states are apart (used for
/// trace output only); `skip` short-circuits degenerate states.
pub trait Anneal: Clone {
    fn step(&mut self, rng: &mut StdRng);
    fn energy(&self) -> f64;
    fn distance(&self, other: &Self) -> f64;

    fn skip(&self) -> bool {
        false
    }
}

/// Runs simulated annealing from `start` and returns the best state seen.
pub fn solve<S: Anneal>(start: S, params: &SimanParams) -> S {
    solve_with_rng(start, params, StdRng::from_entropy())
}

/// Like [`solve`] with a caller-provided PRNG, for reproducible runs.
pub fn solve_with_rng<S: Anneal>(start: S, params: &SimanParams, mut rng: StdRng) -> S {
    if start.skip() {
        return start;
    }

    let mut current = start.clone();
    let mut current_energy = current.energy();
    let mut best = current.clone();
    let mut best_energy = current_energy;

    let mut temperature = params.t_initial;
    let mut stage = 0u32;
    while temperature > params.t_min && stage < params.n_tries {
        for _ in 0..params.iters_per_temp {
            let mut candidate = current.clone();
            candidate.step(&mut rng);
            let energy = candidate.energy();

            if energy <= best_energy {
                best = candidate.clone();
                best_energy = energy;
            }

            // Metropolis acceptance: always downhill, uphill with
            // probability exp(-ΔE / kT).
            let norm = params.k * temperature;
            if energy < current_energy
                || (norm != 0.0
                    && rng.gen::<f64>() < ((current_energy - energy) / norm).exp())
            {
                current = candidate;
                current_energy = energy;
            }
        }
        trace!(
            stage,
            temperature,
            energy = current_energy,
            best = best_energy,
            drift = best.distance(&current),
            "annealing stage done"
        );
        temperature /= params.cooling_rate;
        stage += 1;
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One-dimensional test state: energy (x - 3)^2 over steps of +/- 0.5.
    #[derive(Clone)]
    struct Parabola(f64);

    impl Anneal for Parabola {
        fn step(&mut self, rng: &mut StdRng) {
            self.0 += rng.gen_range(-0.5..0.5);
        }

        fn energy(&self) -> f64 {
            (self.0 - 3.0) * (self.0 - 3.0)
        }

        fn distance(&self, other: &Self) -> f64 {
            (self.0 - other.0).abs()
        }
    }

    #[derive(Clone)]
    struct Degenerate;

    impl Anneal for Degenerate {
        fn step(&mut self, _rng: &mut StdRng) {
            panic!("step must not run when skip() holds");
        }

        fn energy(&self) -> f64 {
            0.0
        }

        fn distance(&self, _other: &Self) -> f64 {
            0.0
        }

        fn skip(&self) -> bool {
            true
        }
    }

    #[test]
    fn finds_the_minimum_of_a_parabola() {
        let params = SimanParams { n_tries: 200, iters_per_temp: 50, ..Default::default() };
        let best = solve_with_rng(Parabola(-40.0), &params, StdRng::seed_from_u64(42));
        assert!(
            (best.0 - 3.0).abs() < 0.1,
            "expected to land near x=3, got {}",
            best.0
        );
    }

    #[test]
    fn skip_short_circuits() {
        let _ = solve_with_rng(Degenerate, &SimanParams::default(), StdRng::seed_from_u64(1));
    }
}
