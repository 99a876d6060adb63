//! Count-Min Sketch frequency estimation for the probabilistic LFU mode.
//!
//! Memory is O(width x depth) regardless of how many keys pass through, at
//! the cost of one-sided overestimation. The minimum across rows is the
//! frequency estimate.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone)]
pub struct CountMinSketch {
    width: usize,
    depth: usize,
    counters: Vec<u64>,
    seeds: Vec<u64>,
}

impl CountMinSketch {
    /// Creates a sketch of `width x depth` counters. Dimensions are assumed
    /// to be pre-validated by the LFU configuration.
    pub fn new(width: usize, depth: usize) -> Self {
        // Fixed seeds keep estimates reproducible across runs.
        let seeds = (0..depth)
            .map(|row| {
                (row as u64)
                    .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                    .wrapping_add(0x2545_F491_4F6C_DD1D)
            })
            .collect();
        Self {
            width,
            depth,
            counters: vec![0; width * depth],
            seeds,
        }
    }

    fn index(&self, row: usize, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        self.seeds[row].hash(&mut hasher);
        key.hash(&mut hasher);
        row * self.width + (hasher.finish() as usize % self.width)
    }

    /// Adds one occurrence of `key`.
    pub fn increment(&mut self, key: &str) {
        for row in 0..self.depth {
            let idx = self.index(row, key);
            self.counters[idx] = self.counters[idx].saturating_add(1);
        }
    }

    /// Estimated occurrence count: the minimum over all rows. Never
    /// underestimates.
    pub fn estimate(&self, key: &str) -> u64 {
        (0..self.depth)
            .map(|row| self.counters[self.index(row, key)])
            .min()
            .unwrap_or(0)
    }

    /// Multiplies every counter by `factor` (rounding down), aging out old
    /// traffic.
    pub fn decay(&mut self, factor: f64) {
        let factor = factor.clamp(0.0, 1.0);
        for counter in &mut self.counters {
            *counter = (*counter as f64 * factor) as u64;
        }
    }

    pub fn clear(&mut self) {
        self.counters.fill(0);
    }
}
