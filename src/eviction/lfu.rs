//! LFU eviction state: exact or Count-Min-Sketch frequency tracking with
//! periodic multiplicative decay.

use std::time::{Duration, Instant};

use crate::eviction::config::LfuConfig;
use crate::eviction::sketch::CountMinSketch;
use crate::keys::KeyHash;
use crate::metadata::{ItemMetadata, MetadataProvider};

#[derive(Debug)]
pub struct LfuState {
    config: LfuConfig,
    sketch: Option<CountMinSketch>,
    last_decay: Instant,
}

impl LfuState {
    pub fn new(config: LfuConfig) -> Self {
        let sketch = config
            .use_probabilistic_counting
            .then(|| CountMinSketch::new(config.sketch_width, config.sketch_depth));
        Self {
            config,
            sketch,
            last_decay: Instant::now(),
        }
    }

    pub fn on_access(&mut self, hash: &KeyHash, provider: &mut dyn MetadataProvider) {
        if let Some(sketch) = &mut self.sketch {
            sketch.increment(hash.as_str());
        }
        self.maybe_decay(provider);
    }

    pub fn on_added(&mut self, hash: &KeyHash, provider: &mut dyn MetadataProvider) {
        if let Some(sketch) = &mut self.sketch {
            sketch.increment(hash.as_str());
        }
        self.maybe_decay(provider);
    }

    /// The decayed frequency this state attributes to an item.
    pub fn effective_frequency(&self, hash: &KeyHash, meta: &ItemMetadata) -> f64 {
        match &self.sketch {
            Some(sketch) => sketch.estimate(hash.as_str()) as f64,
            None => meta.frequency_score,
        }
    }

    /// Victim ordering: lowest decayed frequency first, ties broken by older
    /// `last_accessed_at`.
    pub fn victim_ordering(
        &mut self,
        provider: &dyn MetadataProvider,
    ) -> Vec<(KeyHash, ItemMetadata)> {
        let mut candidates = provider.all_metadata();
        candidates.sort_by(|(ka, ma), (kb, mb)| {
            let fa = self.effective_frequency(ka, ma);
            let fb = self.effective_frequency(kb, mb);
            fa.partial_cmp(&fb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| ma.last_accessed_at.cmp(&mb.last_accessed_at))
                .then_with(|| ka.as_str().cmp(kb.as_str()))
        });
        candidates
    }

    pub fn clear(&mut self) {
        if let Some(sketch) = &mut self.sketch {
            sketch.clear();
        }
    }

    /// Applies multiplicative decay once per configured interval. Runs at
    /// touch points rather than on a timer, so an idle cache spends nothing.
    fn maybe_decay(&mut self, provider: &mut dyn MetadataProvider) {
        if self.config.decay_factor <= 0.0 {
            return;
        }
        let interval = Duration::from_millis(self.config.decay_interval_ms);
        if self.last_decay.elapsed() < interval {
            return;
        }
        self.last_decay = Instant::now();

        let keep = 1.0 - self.config.decay_factor;
        if let Some(sketch) = &mut self.sketch {
            sketch.decay(keep);
        }
        let now = Instant::now();
        for (hash, _) in provider.all_metadata() {
            let mut meta = match provider.metadata(&hash) {
                Some(meta) => meta,
                None => continue,
            };
            meta.frequency_score *= keep;
            meta.last_frequency_update = now;
            provider.set_metadata(&hash, meta);
        }
    }
}
