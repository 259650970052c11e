//! Background garbage collection
//!
//! A worker thread wakes up periodically and, when enough of the main area
//! is invalid, runs a GC round. The sleep adapts: productive rounds shorten
//! it, idle or failed ones lengthen it, and a round that finds no victim at
//! all backs off to `no_gc_sleep`.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::gc::collector::GarbageCollector;
use crate::status::Status;

/// Configuration for background GC
#[derive(Debug, Clone)]
pub struct BackgroundGcConfig {
    /// Shortest sleep between rounds, and the adjustment step
    pub min_sleep: Duration,
    /// Longest sleep between rounds
    pub max_sleep: Duration,
    /// Sleep after a round that found nothing to collect
    pub no_gc_sleep: Duration,
    /// Percentage of the main area that must be invalid before collecting
    pub invalid_threshold_pct: u32,
    /// Free space, as a percentage of unwritten space, below which to collect
    pub free_threshold_pct: u32,
}

impl Default for BackgroundGcConfig {
    fn default() -> Self {
        Self {
            min_sleep: Duration::from_secs(30),
            max_sleep: Duration::from_secs(60),
            no_gc_sleep: Duration::from_secs(300),
            invalid_threshold_pct: 40,
            free_threshold_pct: 40,
        }
    }
}

impl BackgroundGcConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shortest sleep
    pub fn with_min_sleep(mut self, sleep: Duration) -> Self {
        self.min_sleep = sleep;
        self
    }

    /// Set the longest sleep
    pub fn with_max_sleep(mut self, sleep: Duration) -> Self {
        self.max_sleep = sleep;
        self
    }

    /// Set the sleep used when there is nothing to collect
    pub fn with_no_gc_sleep(mut self, sleep: Duration) -> Self {
        self.no_gc_sleep = sleep;
        self
    }

    /// Set the invalid block threshold
    pub fn with_invalid_threshold_pct(mut self, pct: u32) -> Self {
        self.invalid_threshold_pct = pct.min(100);
        self
    }

    /// Set the free block threshold
    pub fn with_free_threshold_pct(mut self, pct: u32) -> Self {
        self.free_threshold_pct = pct.min(100);
        self
    }

    fn increase_sleep(&self, wait: Duration) -> Duration {
        (wait + self.min_sleep).min(self.max_sleep)
    }

    fn decrease_sleep(&self, wait: Duration) -> Duration {
        wait.saturating_sub(self.min_sleep).max(self.min_sleep)
    }
}

/// What the worker drives
pub trait BackgroundGcTarget: Send + Sync + 'static {
    /// Check if collecting now is worthwhile
    fn should_collect(&self, config: &BackgroundGcConfig) -> bool;

    /// Run one round; `None` if another round is already running.
    fn collect(&self) -> Option<Result<u32, Status>>;
}

impl BackgroundGcTarget for GarbageCollector {
    fn should_collect(&self, config: &BackgroundGcConfig) -> bool {
        self.segments()
            .has_enough_invalid_blocks(config.invalid_threshold_pct, config.free_threshold_pct)
    }

    fn collect(&self) -> Option<Result<u32, Status>> {
        self.try_start_gc(0)
    }
}

/// Statistics for background GC
#[derive(Debug, Default)]
pub struct BackgroundGcStats {
    /// Rounds attempted
    pub total_rounds: AtomicU64,
    /// Rounds that collected a victim
    pub successful_rounds: AtomicU64,
    /// Rounds with nothing to collect
    pub idle_rounds: AtomicU64,
    /// Rounds that failed
    pub failed_rounds: AtomicU64,
    /// Sections freed by foreground escalation
    pub sections_freed: AtomicU64,
    /// Sleep chosen after the last round, in milliseconds
    pub current_sleep_ms: AtomicU64,
    /// Duration of the last round in milliseconds
    pub last_round_duration_ms: AtomicU64,
}

impl BackgroundGcStats {
    /// Create new statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a round that collected something
    pub fn record_success(&self, sections_freed: u32, duration: Duration) {
        self.total_rounds.fetch_add(1, Ordering::Relaxed);
        self.successful_rounds.fetch_add(1, Ordering::Relaxed);
        self.sections_freed
            .fetch_add(u64::from(sections_freed), Ordering::Relaxed);
        self.last_round_duration_ms
            .store(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record a round without a victim
    pub fn record_idle(&self) {
        self.total_rounds.fetch_add(1, Ordering::Relaxed);
        self.idle_rounds.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed round
    pub fn record_failure(&self) {
        self.total_rounds.fetch_add(1, Ordering::Relaxed);
        self.failed_rounds.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the success rate
    pub fn success_rate(&self) -> f64 {
        let total = self.total_rounds.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        self.successful_rounds.load(Ordering::Relaxed) as f64 / total as f64
    }
}

/// State of the background GC worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BackgroundGcState {
    /// Worker is stopped
    Stopped = 0,
    /// Worker is sleeping between rounds
    Idle = 1,
    /// Worker is running a round
    Collecting = 2,
    /// Worker is paused
    Paused = 3,
}

impl From<u8> for BackgroundGcState {
    fn from(value: u8) -> Self {
        match value {
            1 => BackgroundGcState::Idle,
            2 => BackgroundGcState::Collecting,
            3 => BackgroundGcState::Paused,
            _ => BackgroundGcState::Stopped,
        }
    }
}

struct Shared {
    running: AtomicBool,
    paused: AtomicBool,
    state: AtomicU8,
    stats: BackgroundGcStats,
}

impl Shared {
    fn set_state(&self, state: BackgroundGcState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Sleep up to `wait`, waking early on stop.
    fn sleep(&self, wait: Duration) {
        const SLICE: Duration = Duration::from_millis(10);
        let deadline = Instant::now() + wait;
        while self.running.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(SLICE.min(deadline - now));
        }
    }
}

/// Background GC worker
///
/// Holds only a weak reference to its target and exits once the target is
/// dropped.
pub struct BackgroundGcWorker<T: BackgroundGcTarget = GarbageCollector> {
    config: BackgroundGcConfig,
    target: Weak<T>,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl<T: BackgroundGcTarget> BackgroundGcWorker<T> {
    /// Create a stopped worker
    pub fn new(target: Weak<T>, config: BackgroundGcConfig) -> Self {
        Self {
            config,
            target,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                state: AtomicU8::new(BackgroundGcState::Stopped as u8),
                stats: BackgroundGcStats::new(),
            }),
            handle: None,
        }
    }

    /// Get the current state
    pub fn state(&self) -> BackgroundGcState {
        BackgroundGcState::from(self.shared.state.load(Ordering::Acquire))
    }

    /// Check if the worker is running
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Check if the worker is paused
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Get the statistics
    pub fn stats(&self) -> &BackgroundGcStats {
        &self.shared.stats
    }

    /// Get the configuration
    pub fn config(&self) -> &BackgroundGcConfig {
        &self.config
    }

    /// Start the worker thread.
    ///
    /// Returns false if it is already running.
    pub fn start(&mut self) -> bool {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return false;
        }
        // A previous thread may have exited on its own after its target was
        // dropped.
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }

        let shared = Arc::clone(&self.shared);
        let target = self.target.clone();
        let config = self.config.clone();
        self.handle = Some(thread::spawn(move || {
            Self::worker_loop(&shared, &target, &config);
        }));
        true
    }

    /// Signal the worker to stop and wait for it
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.shared.set_state(BackgroundGcState::Stopped);
    }

    /// Pause the worker between rounds
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
        self.shared.set_state(BackgroundGcState::Paused);
    }

    /// Resume a paused worker
    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
        if self.is_running() {
            self.shared.set_state(BackgroundGcState::Idle);
        }
    }

    fn worker_loop(shared: &Shared, target: &Weak<T>, config: &BackgroundGcConfig) {
        let mut wait = config.min_sleep;
        shared.set_state(BackgroundGcState::Idle);

        while shared.running.load(Ordering::Acquire) {
            shared.sleep(wait);
            if !shared.running.load(Ordering::Acquire) {
                break;
            }
            if shared.paused.load(Ordering::Acquire) {
                continue;
            }

            let Some(target) = target.upgrade() else {
                shared.running.store(false, Ordering::Release);
                break;
            };

            if !target.should_collect(config) {
                wait = config.increase_sleep(wait);
                shared
                    .stats
                    .current_sleep_ms
                    .store(wait.as_millis() as u64, Ordering::Relaxed);
                continue;
            }

            shared.set_state(BackgroundGcState::Collecting);
            let start = Instant::now();
            wait = match target.collect() {
                None => wait,
                Some(Ok(freed)) => {
                    shared.stats.record_success(freed, start.elapsed());
                    config.decrease_sleep(wait)
                }
                Some(Err(Status::Unavailable)) => {
                    shared.stats.record_idle();
                    config.no_gc_sleep
                }
                Some(Err(status)) => {
                    tracing::warn!(%status, "background gc round failed");
                    shared.stats.record_failure();
                    config.increase_sleep(wait)
                }
            };
            shared
                .stats
                .current_sleep_ms
                .store(wait.as_millis() as u64, Ordering::Relaxed);
            if !shared.paused.load(Ordering::Acquire) {
                shared.set_state(BackgroundGcState::Idle);
            }
        }

        shared.set_state(BackgroundGcState::Stopped);
    }
}

impl<T: BackgroundGcTarget> Drop for BackgroundGcWorker<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct MockTarget {
        should_collect: AtomicBool,
        outcome: AtomicU8,
        collect_count: AtomicU32,
    }

    const OUTCOME_FREED: u8 = 0;
    const OUTCOME_NO_VICTIM: u8 = 1;
    const OUTCOME_IO_ERROR: u8 = 2;

    impl MockTarget {
        fn new(should_collect: bool, outcome: u8) -> Self {
            Self {
                should_collect: AtomicBool::new(should_collect),
                outcome: AtomicU8::new(outcome),
                collect_count: AtomicU32::new(0),
            }
        }

        fn collect_count(&self) -> u32 {
            self.collect_count.load(Ordering::Acquire)
        }
    }

    impl BackgroundGcTarget for MockTarget {
        fn should_collect(&self, _config: &BackgroundGcConfig) -> bool {
            self.should_collect.load(Ordering::Acquire)
        }

        fn collect(&self) -> Option<Result<u32, Status>> {
            self.collect_count.fetch_add(1, Ordering::AcqRel);
            Some(match self.outcome.load(Ordering::Acquire) {
                OUTCOME_FREED => Ok(1),
                OUTCOME_NO_VICTIM => Err(Status::Unavailable),
                _ => Err(Status::IoError),
            })
        }
    }

    fn fast_config() -> BackgroundGcConfig {
        BackgroundGcConfig::new()
            .with_min_sleep(Duration::from_millis(10))
            .with_max_sleep(Duration::from_millis(40))
            .with_no_gc_sleep(Duration::from_millis(500))
    }

    #[test]
    fn test_background_gc_config() {
        let config = BackgroundGcConfig::new()
            .with_min_sleep(Duration::from_secs(1))
            .with_max_sleep(Duration::from_secs(3))
            .with_invalid_threshold_pct(150);

        assert_eq!(config.invalid_threshold_pct, 100);
        assert_eq!(
            config.increase_sleep(Duration::from_secs(1)),
            Duration::from_secs(2)
        );
        assert_eq!(
            config.increase_sleep(Duration::from_secs(3)),
            Duration::from_secs(3)
        );
        assert_eq!(
            config.decrease_sleep(Duration::from_secs(3)),
            Duration::from_secs(2)
        );
        assert_eq!(
            config.decrease_sleep(Duration::from_secs(1)),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_background_gc_stats() {
        let stats = BackgroundGcStats::new();
        stats.record_success(2, Duration::from_millis(5));
        stats.record_idle();
        assert_eq!(stats.sections_freed.load(Ordering::Relaxed), 2);
        assert_eq!(stats.total_rounds.load(Ordering::Relaxed), 2);
        assert_eq!(stats.success_rate(), 0.5);

        stats.record_failure();
        assert_eq!(stats.failed_rounds.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_worker_start_stop() {
        let target = Arc::new(MockTarget::new(false, OUTCOME_FREED));
        let mut worker = BackgroundGcWorker::new(Arc::downgrade(&target), fast_config());

        assert!(!worker.is_running());
        assert_eq!(worker.state(), BackgroundGcState::Stopped);
        assert!(worker.start());
        assert!(worker.is_running());
        assert!(!worker.start());

        thread::sleep(Duration::from_millis(50));
        worker.stop();
        assert!(!worker.is_running());
        assert_eq!(worker.state(), BackgroundGcState::Stopped);
        assert_eq!(target.collect_count(), 0);
    }

    #[test]
    fn test_worker_collects_when_worthwhile() {
        let target = Arc::new(MockTarget::new(true, OUTCOME_FREED));
        let mut worker = BackgroundGcWorker::new(Arc::downgrade(&target), fast_config());
        worker.start();
        thread::sleep(Duration::from_millis(200));
        worker.stop();

        assert!(target.collect_count() >= 1);
        assert!(worker.stats().successful_rounds.load(Ordering::Relaxed) >= 1);
        assert_eq!(
            worker.stats().current_sleep_ms.load(Ordering::Relaxed),
            10
        );
    }

    #[test]
    fn test_worker_backs_off_without_victims() {
        let target = Arc::new(MockTarget::new(true, OUTCOME_NO_VICTIM));
        let mut worker = BackgroundGcWorker::new(Arc::downgrade(&target), fast_config());
        worker.start();
        thread::sleep(Duration::from_millis(150));
        worker.stop();

        // One round, then the long no-victim sleep.
        assert_eq!(target.collect_count(), 1);
        assert_eq!(worker.stats().idle_rounds.load(Ordering::Relaxed), 1);
        assert_eq!(
            worker.stats().current_sleep_ms.load(Ordering::Relaxed),
            500
        );
    }

    #[test]
    fn test_worker_records_failures() {
        let target = Arc::new(MockTarget::new(true, OUTCOME_IO_ERROR));
        let mut worker = BackgroundGcWorker::new(Arc::downgrade(&target), fast_config());
        worker.start();
        thread::sleep(Duration::from_millis(150));
        worker.stop();

        assert!(worker.stats().failed_rounds.load(Ordering::Relaxed) >= 1);
        assert_eq!(worker.stats().successful_rounds.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_worker_pause_resume() {
        let target = Arc::new(MockTarget::new(true, OUTCOME_FREED));
        let mut worker = BackgroundGcWorker::new(Arc::downgrade(&target), fast_config());
        worker.pause();
        worker.start();
        thread::sleep(Duration::from_millis(60));
        assert!(worker.is_paused());
        assert_eq!(target.collect_count(), 0);

        worker.resume();
        assert!(!worker.is_paused());
        thread::sleep(Duration::from_millis(100));
        worker.stop();
        assert!(target.collect_count() >= 1);
    }

    #[test]
    fn test_worker_exits_when_target_dropped() {
        let target = Arc::new(MockTarget::new(true, OUTCOME_FREED));
        let mut worker = BackgroundGcWorker::new(Arc::downgrade(&target), fast_config());
        worker.start();
        drop(target);
        thread::sleep(Duration::from_millis(80));
        assert!(!worker.is_running());
        worker.stop();
        assert_eq!(worker.state(), BackgroundGcState::Stopped);
    }
}
