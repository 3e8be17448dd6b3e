//! Apply-latency statistics: a running mean and a bounded reservoir
//! sample for the p99 estimate.

use rand::Rng;

/// Size of the bounded reservoir sample (§4.E.4).
pub const RESERVOIR_SIZE: usize = 8_192;

/// Accumulates per-event apply-latency nanoseconds. Cheap to update on
/// the hot ingest path: `O(1)` amortized per sample.
#[derive(Debug)]
pub struct LatencyStats {
    count: u64,
    sum_ns: u128,
    reservoir: Vec<u64>,
    rng: rand::rngs::ThreadRng,
}

impl LatencyStats {
    pub fn new() -> Self {
        LatencyStats {
            count: 0,
            sum_ns: 0,
            reservoir: Vec::with_capacity(RESERVOIR_SIZE),
            rng: rand::thread_rng(),
        }
    }

    /// Record one apply-latency sample.
    pub fn record(&mut self, ns: u64) {
        self.count += 1;
        self.sum_ns += ns as u128;
        if self.reservoir.len() < RESERVOIR_SIZE {
            self.reservoir.push(ns);
        } else {
            // Standard reservoir replacement: uniformly pick an index in
            // [0, n); replace only if it falls within the reservoir.
            let idx = self.rng.gen_range(0..self.count);
            if (idx as usize) < RESERVOIR_SIZE {
                self.reservoir[idx as usize] = ns;
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Arithmetic mean of every sample seen, not just the reservoir.
    pub fn mean_ns(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_ns as f64 / self.count as f64
        }
    }

    /// P99 estimated from the reservoir via `nth_element` at
    /// `idx = ceil(0.99 * n) - 1`.
    pub fn p99_ns(&self) -> u64 {
        if self.reservoir.is_empty() {
            return 0;
        }
        let n = self.reservoir.len();
        let idx = ((0.99 * n as f64).ceil() as usize)
            .saturating_sub(1)
            .min(n - 1);
        let mut copy = self.reservoir.clone();
        copy.select_nth_unstable(idx);
        copy[idx]
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}
