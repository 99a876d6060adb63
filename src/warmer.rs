//! Proactive cache warming.
//!
//! Registered warming operations run on an interval, highest priority
//! first, in batches of bounded concurrency, each under its own timeout.
//! A tick that arrives while the previous cycle is still running is skipped
//! rather than overlapped.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::CacheError;

/// Warming cycle settings.
#[derive(Debug, Clone)]
pub struct WarmerConfig {
    /// Delay between cycle starts. The first cycle runs immediately on
    /// `start()`.
    pub interval: Duration,
    /// How many operations run in parallel within a cycle.
    pub max_concurrency: usize,
    /// Hard deadline for one warming operation.
    pub operation_timeout: Duration,
    /// Keep going after a failed operation instead of aborting the cycle.
    pub continue_on_error: bool,
}

impl Default for WarmerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            max_concurrency: 5,
            operation_timeout: Duration::from_secs(30),
            continue_on_error: true,
        }
    }
}

/// The work a warming operation performs. Returns the number of items it
/// brought into the cache.
pub type WarmingFetcher =
    Arc<dyn Fn() -> BoxFuture<'static, Result<u64, CacheError>> + Send + Sync>;

/// One registered warming operation.
#[derive(Clone)]
pub struct WarmingOperation {
    /// Stable identifier; re-adding an id replaces the previous operation.
    pub id: String,
    /// Opaque description of what gets warmed, carried for observability.
    pub params: serde_json::Value,
    /// Priority in `[1, 10]`, higher runs earlier.
    pub priority: u8,
    pub fetcher: WarmingFetcher,
    /// Optional TTL stretch for warmed entries, applied by whoever builds
    /// the fetcher.
    pub ttl_multiplier: Option<f64>,
}

impl fmt::Debug for WarmingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmingOperation")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("params", &self.params)
            .field("ttl_multiplier", &self.ttl_multiplier)
            .finish_non_exhaustive()
    }
}

/// Aggregate warming statistics across cycles.
#[derive(Debug, Clone, Default)]
pub struct WarmingStats {
    pub total_cycles: u64,
    pub total_operations: u64,
    pub successful_operations: u64,
    pub total_items_warmed: u64,
    pub average_items_per_operation: f64,
    pub success_rate: f64,
    pub last_warming_at: Option<Instant>,
    pub next_warming_at: Option<Instant>,
}

pub struct CacheWarmer {
    config: WarmerConfig,
    operations: Arc<Mutex<Vec<WarmingOperation>>>,
    stats: Arc<Mutex<WarmingStats>>,
    cycle_running: Arc<AtomicBool>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl CacheWarmer {
    pub fn new(config: WarmerConfig) -> Self {
        Self {
            config,
            operations: Arc::new(Mutex::new(Vec::new())),
            stats: Arc::new(Mutex::new(WarmingStats::default())),
            cycle_running: Arc::new(AtomicBool::new(false)),
            timer: Mutex::new(None),
        }
    }

    /// Registers an operation, keeping the list sorted by priority
    /// descending. An operation with an already-registered id replaces the
    /// old one. Priorities are clamped into `[1, 10]`.
    pub fn add_operation(&self, mut operation: WarmingOperation) {
        if operation.priority < 1 || operation.priority > 10 {
            warn!(
                id = %operation.id,
                priority = operation.priority,
                "warming priority outside [1, 10], clamped"
            );
            operation.priority = operation.priority.clamp(1, 10);
        }
        let mut ops = self.operations.lock();
        ops.retain(|existing| existing.id != operation.id);
        // Stable insertion keeps registration order among equal priorities.
        let position = ops
            .iter()
            .position(|existing| existing.priority < operation.priority)
            .unwrap_or(ops.len());
        ops.insert(position, operation);
    }

    /// Unregisters an operation by id. Returns `true` when it existed.
    pub fn remove_operation(&self, id: &str) -> bool {
        let mut ops = self.operations.lock();
        let before = ops.len();
        ops.retain(|op| op.id != id);
        ops.len() != before
    }

    pub fn operation_count(&self) -> usize {
        self.operations.lock().len()
    }

    /// Starts the interval timer. The first cycle runs immediately;
    /// subsequent cycles every `interval`. Calling `start` on a running
    /// warmer is a no-op.
    pub fn start(&self) {
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return;
        }

        let operations = self.operations.clone();
        let stats = self.stats.clone();
        let cycle_running = self.cycle_running.clone();
        let config = self.config.clone();

        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.interval);
            loop {
                ticker.tick().await;
                if cycle_running.swap(true, Ordering::SeqCst) {
                    debug!("warming tick skipped, previous cycle still running");
                    continue;
                }
                let snapshot = operations.lock().clone();
                run_cycle(snapshot, &config, &stats).await;
                cycle_running.store(false, Ordering::SeqCst);
            }
        }));
        info!(interval = ?self.config.interval, "cache warming started");
    }

    /// Runs a single warming cycle right now, unless one is already in
    /// progress (in which case it is skipped, like an overlapping tick).
    pub async fn run_cycle_now(&self) {
        if self.cycle_running.swap(true, Ordering::SeqCst) {
            debug!("manual warming cycle skipped, previous cycle still running");
            return;
        }
        let snapshot = self.operations.lock().clone();
        run_cycle(snapshot, &self.config, &self.stats).await;
        self.cycle_running.store(false, Ordering::SeqCst);
    }

    /// Cancels the interval timer. Idempotent.
    pub fn stop(&self) {
        if let Some(task) = self.timer.lock().take() {
            task.abort();
            info!("cache warming stopped");
        }
    }

    /// Stops the timer and clears registered operations. Idempotent.
    pub fn cleanup(&self) {
        self.stop();
        self.operations.lock().clear();
        self.cycle_running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.timer.lock().is_some()
    }

    pub fn stats(&self) -> WarmingStats {
        self.stats.lock().clone()
    }
}

impl Drop for CacheWarmer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One warming pass over a snapshot of the operation list. The snapshot is
/// taken at cycle start, so additions and removals during the cycle take
/// effect next cycle.
async fn run_cycle(
    snapshot: Vec<WarmingOperation>,
    config: &WarmerConfig,
    stats: &Mutex<WarmingStats>,
) {
    let cycle_started = Instant::now();
    let mut attempted = 0u64;
    let mut succeeded = 0u64;
    let mut items_warmed = 0u64;
    let mut aborted = false;

    for batch in snapshot.chunks(config.max_concurrency.max(1)) {
        let outcomes = join_all(batch.iter().map(|op| {
            let fetcher = op.fetcher.clone();
            let id = op.id.clone();
            async move {
                let outcome = tokio::time::timeout(config.operation_timeout, fetcher()).await;
                (id, outcome)
            }
        }))
        .await;

        for (id, outcome) in outcomes {
            attempted += 1;
            match outcome {
                Ok(Ok(count)) => {
                    succeeded += 1;
                    items_warmed += count;
                }
                Ok(Err(err)) => {
                    warn!(operation = %id, error = %err, "warming operation failed");
                    if !config.continue_on_error {
                        aborted = true;
                    }
                }
                Err(_) => {
                    warn!(operation = %id, timeout = ?config.operation_timeout, "warming operation timed out");
                    if !config.continue_on_error {
                        aborted = true;
                    }
                }
            }
        }
        if aborted {
            warn!("warming cycle aborted after failure");
            break;
        }
    }

    let mut stats = stats.lock();
    stats.total_cycles += 1;
    stats.total_operations += attempted;
    stats.successful_operations += succeeded;
    stats.total_items_warmed += items_warmed;
    stats.average_items_per_operation = if stats.successful_operations == 0 {
        0.0
    } else {
        stats.total_items_warmed as f64 / stats.successful_operations as f64
    };
    stats.success_rate = if stats.total_operations == 0 {
        0.0
    } else {
        stats.successful_operations as f64 / stats.total_operations as f64
    };
    stats.last_warming_at = Some(cycle_started);
    stats.next_warming_at = Some(cycle_started + config.interval);

    debug!(
        attempted,
        succeeded, items_warmed, "warming cycle finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::AtomicU32;

    fn op(id: &str, priority: u8, items: u64) -> WarmingOperation {
        WarmingOperation {
            id: id.to_string(),
            params: serde_json::json!({}),
            priority,
            fetcher: Arc::new(move || async move { Ok(items) }.boxed()),
            ttl_multiplier: None,
        }
    }

    #[test]
    fn test_operations_sorted_by_priority_descending() {
        let warmer = CacheWarmer::new(WarmerConfig::default());
        warmer.add_operation(op("low", 3, 0));
        warmer.add_operation(op("high", 9, 0));
        warmer.add_operation(op("mid", 5, 0));

        let ids: Vec<String> = warmer.operations.lock().iter().map(|o| o.id.clone()).collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);
    }

    #[test]
    fn test_duplicate_id_replaces() {
        let warmer = CacheWarmer::new(WarmerConfig::default());
        warmer.add_operation(op("a", 3, 0));
        warmer.add_operation(op("a", 8, 0));
        assert_eq!(warmer.operation_count(), 1);
        assert_eq!(warmer.operations.lock()[0].priority, 8);
    }

    #[test]
    fn test_priority_clamped() {
        let warmer = CacheWarmer::new(WarmerConfig::default());
        warmer.add_operation(op("zero", 0, 0));
        warmer.add_operation(op("big", 200, 0));
        let ops = warmer.operations.lock();
        assert!(ops.iter().all(|o| (1..=10).contains(&o.priority)));
    }

    #[tokio::test]
    async fn test_cycle_updates_stats() {
        let warmer = CacheWarmer::new(WarmerConfig::default());
        warmer.add_operation(op("a", 5, 7));
        warmer.add_operation(op("b", 5, 3));

        warmer.run_cycle_now().await;

        let stats = warmer.stats();
        assert_eq!(stats.total_cycles, 1);
        assert_eq!(stats.total_operations, 2);
        assert_eq!(stats.successful_operations, 2);
        assert_eq!(stats.total_items_warmed, 10);
        assert_eq!(stats.average_items_per_operation, 5.0);
        assert_eq!(stats.success_rate, 1.0);
        assert!(stats.last_warming_at.is_some());
        assert!(stats.next_warming_at.is_some());
    }

    #[tokio::test]
    async fn test_failures_counted_and_cycle_continues() {
        let warmer = CacheWarmer::new(WarmerConfig::default());
        warmer.add_operation(op("ok", 5, 4));
        warmer.add_operation(WarmingOperation {
            id: "bad".into(),
            params: serde_json::json!({}),
            priority: 9,
            fetcher: Arc::new(|| {
                async { Err(CacheError::Api(crate::error::ApiError::Server("x".into()))) }.boxed()
            }),
            ttl_multiplier: None,
        });

        warmer.run_cycle_now().await;

        let stats = warmer.stats();
        assert_eq!(stats.total_operations, 2);
        assert_eq!(stats.successful_operations, 1);
        assert_eq!(stats.total_items_warmed, 4);
        assert_eq!(stats.success_rate, 0.5);
    }

    #[tokio::test]
    async fn test_abort_on_error_stops_later_batches() {
        let warmer = CacheWarmer::new(WarmerConfig {
            max_concurrency: 1,
            continue_on_error: false,
            ..Default::default()
        });
        let ran = Arc::new(AtomicU32::new(0));
        let ran2 = ran.clone();

        warmer.add_operation(WarmingOperation {
            id: "fails-first".into(),
            params: serde_json::json!({}),
            priority: 10,
            fetcher: Arc::new(|| {
                async { Err(CacheError::Api(crate::error::ApiError::Server("x".into()))) }.boxed()
            }),
            ttl_multiplier: None,
        });
        warmer.add_operation(WarmingOperation {
            id: "never-runs".into(),
            params: serde_json::json!({}),
            priority: 1,
            fetcher: Arc::new(move || {
                let ran = ran2.clone();
                async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(0)
                }
                .boxed()
            }),
            ttl_multiplier: None,
        });

        warmer.run_cycle_now().await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(warmer.stats().total_operations, 1);
    }

    #[tokio::test]
    async fn test_start_stop_cleanup_idempotent() {
        let warmer = CacheWarmer::new(WarmerConfig {
            interval: Duration::from_millis(20),
            ..Default::default()
        });
        warmer.add_operation(op("a", 5, 1));

        warmer.start();
        warmer.start(); // no-op
        assert!(warmer.is_running());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(warmer.stats().total_cycles >= 1);

        warmer.stop();
        warmer.stop();
        assert!(!warmer.is_running());

        warmer.cleanup();
        warmer.cleanup();
        assert_eq!(warmer.operation_count(), 0);
    }
}
