//! Cancellable repeating-task runner on the tokio timer.
//!
//! At most one task runs per scheduler. The task is invoked once per period (the first run
//! one period after `start`); ticks missed while a run is slow are skipped rather than
//! replayed in a burst. A task returning `Err` or panicking is logged and stops the scheduler.

use std::ops::ControlFlow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

pub const MIN_PERIOD_MS: u64 = 10;
pub const MAX_PERIOD_MS: u64 = 24 * 60 * 60 * 1000;

/// `Continue` keeps the schedule, `Break` ends it normally.
pub type TaskResult = anyhow::Result<ControlFlow<()>>;

#[derive(Debug, Default)]
struct RunCounters {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
}

struct ActiveRun {
    // `Some(period)` re-times the loop, `None` (or dropping the sender) stops it.
    control: watch::Sender<Option<Duration>>,
    running: Arc<AtomicBool>,
}

pub struct IntervalScheduler {
    period: Duration,
    active: Option<ActiveRun>,
    counters: Arc<RunCounters>,
}

impl IntervalScheduler {
    pub fn new() -> Self {
        IntervalScheduler {
            period: Duration::from_millis(500),
            active: None,
            counters: Arc::new(RunCounters::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|run| run.running.load(Ordering::SeqCst))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Counters of the current (or most recent) run.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            total: self.counters.total.load(Ordering::SeqCst),
            succeeded: self.counters.succeeded.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }

    /// Schedules `task` every `period_ms`. Returns `false` without doing anything when a task
    /// is already running or no tokio runtime is available.
    pub fn start<F>(&mut self, task: F, period_ms: u64) -> bool
    where
        F: FnMut() -> TaskResult + Send + 'static,
    {
        if self.is_running() {
            tracing::debug!("Scheduler already running; start ignored");
            return false;
        }
        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "Cannot start scheduler outside a tokio runtime");
                return false;
            }
        };

        self.period = clamp_period(period_ms);
        self.counters = Arc::new(RunCounters::default());
        let (control, control_rx) = watch::channel(Some(self.period));
        let running = Arc::new(AtomicBool::new(true));

        runtime.spawn(run_loop(task, self.period, control_rx, running.clone(), self.counters.clone()));
        self.active = Some(ActiveRun { control, running });

        tracing::info!(period_ms = self.period.as_millis() as u64, "Scheduler started");
        true
    }

    /// Stops the running task, if any. A run already in progress completes first.
    pub fn stop(&mut self) {
        if let Some(run) = self.active.take() {
            let was_running = run.running.swap(false, Ordering::SeqCst);
            let _ = run.control.send(None);
            if was_running {
                let stats = self.stats();
                tracing::info!(total = stats.total, succeeded = stats.succeeded, failed = stats.failed, "Scheduler stopped");
            }
        }
    }

    /// Flips the running state. Returns whether a task is running afterwards.
    pub fn toggle<F>(&mut self, task: F, period_ms: u64) -> bool
    where
        F: FnMut() -> TaskResult + Send + 'static,
    {
        if self.is_running() {
            self.stop();
            false
        } else {
            self.start(task, period_ms)
        }
    }

    /// Changes the period; a running task is re-timed starting from now.
    pub fn set_period(&mut self, period_ms: u64) {
        self.period = clamp_period(period_ms);
        if let Some(run) = &self.active {
            let _ = run.control.send(Some(self.period));
        }
    }
}

impl Default for IntervalScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IntervalScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn clamp_period(period_ms: u64) -> Duration {
    let clamped = period_ms.clamp(MIN_PERIOD_MS, MAX_PERIOD_MS);
    if clamped != period_ms {
        tracing::warn!(requested_ms = period_ms, clamped_ms = clamped, "Scheduler period out of range, clamped");
    }
    Duration::from_millis(clamped)
}

fn new_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn run_loop<F>(
    mut task: F,
    period: Duration,
    mut control: watch::Receiver<Option<Duration>>,
    running: Arc<AtomicBool>,
    counters: Arc<RunCounters>,
) where
    F: FnMut() -> TaskResult + Send + 'static,
{
    let mut ticker = new_ticker(period);

    loop {
        tokio::select! {
            biased;
            changed = control.changed() => {
                let next = if changed.is_ok() { *control.borrow_and_update() } else { None };
                match next {
                    Some(period) => ticker = new_ticker(period),
                    None => break,
                }
            }
            _ = ticker.tick() => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                counters.total.fetch_add(1, Ordering::SeqCst);
                let outcome = catch_unwind(AssertUnwindSafe(&mut task)).unwrap_or_else(|panic| {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    Err(anyhow::anyhow!("task panicked: {}", message))
                });
                match outcome {
                    Ok(ControlFlow::Continue(())) => {
                        counters.succeeded.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(ControlFlow::Break(())) => {
                        counters.succeeded.fetch_add(1, Ordering::SeqCst);
                        tracing::debug!("Scheduled task finished; stopping");
                        break;
                    }
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::SeqCst);
                        tracing::error!(error = %e, "Scheduled task failed; stopping scheduler");
                        break;
                    }
                }
            }
        }
    }

    running.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    fn counting_task(counter: Arc<AtomicUsize>) -> impl FnMut() -> TaskResult + Send + 'static {
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ControlFlow::Continue(()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_once_per_period() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = IntervalScheduler::new();
        assert!(scheduler.start(counting_task(counter.clone()), 100));

        sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(300)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(scheduler.is_running());
        assert_eq!(scheduler.stats(), SchedulerStats { total: 3, succeeded: 3, failed: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_ignored() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut scheduler = IntervalScheduler::new();
        assert!(scheduler.start(counting_task(first.clone()), 100));
        assert!(!scheduler.start(counting_task(second.clone()), 100));

        sleep(Duration::from_millis(250)).await;
        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_halts_runs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = IntervalScheduler::new();
        scheduler.start(counting_task(counter.clone()), 100);
        sleep(Duration::from_millis(150)).await;

        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());

        sleep(Duration::from_millis(1000)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_flips_state() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = IntervalScheduler::new();
        assert!(scheduler.toggle(counting_task(counter.clone()), 100));
        assert!(!scheduler.toggle(counting_task(counter.clone()), 100));
        assert!(!scheduler.is_running());
        assert!(scheduler.toggle(counting_task(counter.clone()), 100));
        assert!(scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_error_stops_scheduler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let task_calls = calls.clone();
        let mut scheduler = IntervalScheduler::new();
        scheduler.start(
            move || {
                if task_calls.fetch_add(1, Ordering::SeqCst) == 1 {
                    Err(anyhow!("boom"))
                } else {
                    Ok(ControlFlow::Continue(()))
                }
            },
            100,
        );

        sleep(Duration::from_millis(1000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.stats(), SchedulerStats { total: 2, succeeded: 1, failed: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_panic_stops_scheduler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let task_calls = calls.clone();
        let mut scheduler = IntervalScheduler::new();
        scheduler.start(
            move || -> TaskResult {
                task_calls.fetch_add(1, Ordering::SeqCst);
                panic!("boom")
            },
            100,
        );

        sleep(Duration::from_millis(1000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.stats(), SchedulerStats { total: 1, succeeded: 0, failed: 1 });

        let counter = Arc::new(AtomicUsize::new(0));
        assert!(scheduler.start(counting_task(counter.clone()), 100));
        sleep(Duration::from_millis(150)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_break_stops_scheduler() {
        let mut scheduler = IntervalScheduler::new();
        scheduler.start(|| Ok(ControlFlow::Break(())), 100);
        sleep(Duration::from_millis(500)).await;
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.stats().total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_period_retimes_running_task() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = IntervalScheduler::new();
        scheduler.start(counting_task(counter.clone()), 1000);
        scheduler.set_period(100);
        assert_eq!(scheduler.period(), Duration::from_millis(100));

        sleep(Duration::from_millis(450)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_period_is_clamped() {
        let mut scheduler = IntervalScheduler::new();
        scheduler.start(|| Ok(ControlFlow::Continue(())), 1);
        assert_eq!(scheduler.period(), Duration::from_millis(MIN_PERIOD_MS));
        scheduler.set_period(u64::MAX);
        assert_eq!(scheduler.period(), Duration::from_millis(MAX_PERIOD_MS));
    }

    #[test]
    fn test_start_outside_runtime_is_a_noop() {
        let mut scheduler = IntervalScheduler::new();
        assert!(!scheduler.start(|| Ok(ControlFlow::Continue(())), 100));
        assert!(!scheduler.is_running());
    }
}
