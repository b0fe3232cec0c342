use thiserror::Error;

#[derive(Debug, Error)]
pub enum SplineError {
    #[error("need at least two points, got {0}")]
    TooFewPoints(usize),
    #[error("x and y lengths differ: {0} vs {1}")]
    LengthMismatch(usize, usize),
    #[error("x values must be strictly increasing")]
    NotStrictlyIncreasing,
    #[error("non-finite input value")]
    NonFinite,
}

/// Cubic Hermite spline with Fritsch-Carlson slope limiting.
///
/// Interpolates the knots exactly and never overshoots between them: if the
/// input y values are monotone over an interval, so is the spline. Outside
/// the knot range it extrapolates linearly along the boundary tangent.
#[derive(Debug, Clone)]
pub struct MonotoneSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    tangents: Vec<f64>,
}

impl MonotoneSpline {
    pub fn fit(xs: Vec<f64>, ys: Vec<f64>) -> Result<Self, SplineError> {
        if xs.len() != ys.len() {
            return Err(SplineError::LengthMismatch(xs.len(), ys.len()));
        }
        if xs.len() < 2 {
            return Err(SplineError::TooFewPoints(xs.len()));
        }
        if xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
            return Err(SplineError::NonFinite);
        }
        if xs.windows(2).any(|w| w[0] >= w[1]) {
            return Err(SplineError::NotStrictlyIncreasing);
        }

        let n = xs.len();
        let mut secants = vec![0.0; n - 1];
        for i in 0..n - 1 {
            secants[i] = (ys[i + 1] - ys[i]) / (xs[i + 1] - xs[i]);
        }

        // Finite-difference tangents, then the Fritsch-Carlson limiter.
        let mut m = vec![0.0; n];
        m[0] = secants[0];
        m[n - 1] = secants[n - 2];
        for i in 1..n - 1 {
            m[i] = (secants[i - 1] + secants[i]) / 2.0;
        }
        for i in 0..n - 1 {
            if secants[i] == 0.0 {
                m[i] = 0.0;
                m[i + 1] = 0.0;
                continue;
            }
            let a = m[i] / secants[i];
            let b = m[i + 1] / secants[i];
            if a < 0.0 {
                m[i] = 0.0;
            }
            if b < 0.0 {
                m[i + 1] = 0.0;
            }
            let norm = a * a + b * b;
            if norm > 9.0 {
                let t = 3.0 / norm.sqrt();
                m[i] = t * a * secants[i];
                m[i + 1] = t * b * secants[i];
            }
        }

        Ok(Self { xs, ys, tangents: m })
    }

    pub fn eval(&self, x: f64) -> f64 {
        let n = self.xs.len();
        if x <= self.xs[0] {
            return self.ys[0] + self.tangents[0] * (x - self.xs[0]);
        }
        if x >= self.xs[n - 1] {
            return self.ys[n - 1] + self.tangents[n - 1] * (x - self.xs[n - 1]);
        }

        let i = match self.xs.binary_search_by(|v| v.total_cmp(&x)) {
            Ok(i) => return self.ys[i],
            Err(i) => i - 1,
        };
        let h = self.xs[i + 1] - self.xs[i];
        let t = (x - self.xs[i]) / h;
        let t2 = t * t;
        let t3 = t2 * t;

        let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
        let h10 = t3 - 2.0 * t2 + t;
        let h01 = -2.0 * t3 + 3.0 * t2;
        let h11 = t3 - t2;

        h00 * self.ys[i]
            + h10 * h * self.tangents[i]
            + h01 * self.ys[i + 1]
            + h11 * h * self.tangents[i + 1]
    }
}
