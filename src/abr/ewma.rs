/// Exponentially weighted moving average with a half-life in weight units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ewma {
    half_life: f64,
    alpha: f64,
    estimate: f64,
    total_weight: f64,
}

impl Ewma {
    pub fn new(half_life: f64) -> Self {
        Self::with_state(half_life, 0.0, 0.0)
    }

    fn with_state(half_life: f64, estimate: f64, total_weight: f64) -> Self {
        let alpha = if half_life > 0.0 {
            (0.5f64.ln() / half_life).exp()
        } else {
            0.0
        };
        Self {
            half_life,
            alpha,
            estimate,
            total_weight,
        }
    }

    pub fn half_life(&self) -> f64 {
        self.half_life
    }

    pub fn sample(&mut self, weight: f64, value: f64) {
        let adj_alpha = self.alpha.powf(weight);
        self.estimate = value * (1.0 - adj_alpha) + adj_alpha * self.estimate;
        self.total_weight += weight;
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// The average, corrected for the zero it started from.
    pub fn estimate(&self) -> f64 {
        if self.alpha > 0.0 {
            let zero_factor = 1.0 - self.alpha.powf(self.total_weight);
            if zero_factor > 0.0 {
                return self.estimate / zero_factor;
            }
        }
        self.estimate
    }

    /// Same history under a new half-life.
    fn rebuilt(&self, half_life: f64) -> Self {
        Self::with_state(half_life, self.estimate, self.total_weight)
    }
}

/// Bandwidth estimate from a fast and a slow moving average, taking the
/// more pessimistic of the two.
#[derive(Debug, Clone, PartialEq)]
pub struct EwmaBandwidthEstimator {
    default_estimate: f64,
    min_weight: f64,
    min_delay_ms: f64,
    slow: Ewma,
    fast: Ewma,
}

impl EwmaBandwidthEstimator {
    pub fn new(slow: f64, fast: f64, default_estimate: f64) -> Self {
        Self {
            default_estimate,
            min_weight: 0.001,
            min_delay_ms: 50.0,
            slow: Ewma::new(slow),
            fast: Ewma::new(fast),
        }
    }

    /// Changes the half-lives, keeping the samples seen so far.
    pub fn update(&mut self, slow: f64, fast: f64) {
        if self.slow.half_life() != slow {
            self.slow = self.slow.rebuilt(slow);
        }
        if self.fast.half_life() != fast {
            self.fast = self.fast.rebuilt(fast);
        }
    }

    /// Records `bytes` loaded in `duration_ms`, weighted by seconds.
    pub fn sample(&mut self, duration_ms: f64, bytes: u64) {
        let duration_s = duration_ms.max(self.min_delay_ms) / 1000.0;
        let bits_per_second = 8.0 * bytes as f64 / duration_s;
        self.fast.sample(duration_s, bits_per_second);
        self.slow.sample(duration_s, bits_per_second);
    }

    pub fn can_estimate(&self) -> bool {
        self.fast.total_weight() >= self.min_weight
    }

    /// Bits per second, or the configured default before any sample.
    pub fn estimate(&self) -> f64 {
        if self.can_estimate() {
            self.fast.estimate().min(self.slow.estimate())
        } else {
            self.default_estimate
        }
    }
}
