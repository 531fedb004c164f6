//! Interval scheduler for periodic jobs
//!
//! A scheduler runs one task repeatedly on a fixed interval measured from
//! the start of each invocation. A task that overruns its interval is
//! followed after only a minimal pause; a cycle is never skipped and two
//! invocations never overlap.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Delay before the first invocation
pub const INITIAL_DELAY: Duration = Duration::from_millis(1);

/// Smallest pause between two invocations
pub const MIN_WAIT: Duration = Duration::from_millis(1);

type BoxedTask =
    Box<dyn FnMut(CancellationToken) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Lifecycle of a scheduler; `Stopped` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

/// Runs a task on a fixed interval until stopped
///
/// The task receives the scheduler's stop token so a long invocation can
/// wind down early once [`IntervalScheduler::stop`] is called.
///
/// # Example
///
/// ```no_run
/// use pricewatch::jobs::IntervalScheduler;
/// use std::time::Duration;
///
/// # async fn demo() {
/// let mut scheduler = IntervalScheduler::new("heartbeat", Duration::from_secs(60), |_stop| async {
///     tracing::info!("still alive");
/// });
/// scheduler.start();
/// // ...
/// scheduler.stop().await;
/// # }
/// ```
pub struct IntervalScheduler {
    name: String,
    interval: Duration,
    task: Option<BoxedTask>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    state: SchedulerState,
}

impl IntervalScheduler {
    pub fn new<F, Fut>(name: impl Into<String>, interval: Duration, mut task: F) -> Self
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task: BoxedTask = Box::new(move |cancel| Box::pin(task(cancel)));
        Self {
            name: name.into(),
            interval,
            task: Some(task),
            cancel: CancellationToken::new(),
            handle: None,
            state: SchedulerState::Idle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Starts the scheduling loop
    ///
    /// Returns false when the scheduler is not idle.
    pub fn start(&mut self) -> bool {
        if self.state != SchedulerState::Idle {
            return false;
        }
        let Some(task) = self.task.take() else {
            return false;
        };

        info!("Starting job {} every {:?}", self.name, self.interval);
        self.handle = Some(tokio::spawn(run_loop(
            self.name.clone(),
            self.interval,
            task,
            self.cancel.clone(),
        )));
        self.state = SchedulerState::Running;
        true
    }

    /// Stops the loop and waits for an in-flight invocation to complete
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!("Job {} ended abnormally: {}", self.name, e);
            }
        }
        self.state = SchedulerState::Stopped;
        info!("Stopped job {}", self.name);
    }
}

/// Pause before the next invocation given how long the last one took
pub fn next_wait(interval: Duration, elapsed: Duration) -> Duration {
    interval
        .checked_sub(elapsed)
        .filter(|wait| !wait.is_zero())
        .unwrap_or(MIN_WAIT)
}

async fn run_loop(name: String, interval: Duration, mut task: BoxedTask, cancel: CancellationToken) {
    let mut wait = INITIAL_DELAY;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        let started = Instant::now();
        task(cancel.clone()).await;
        let elapsed = started.elapsed();

        wait = next_wait(interval, elapsed);
        debug!("Job {} took {:?}, next run in {:?}", name, elapsed, wait);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_next_wait() {
        let interval = Duration::from_secs(10);
        assert_eq!(next_wait(interval, Duration::from_secs(3)), Duration::from_secs(7));
        assert_eq!(next_wait(interval, interval), MIN_WAIT);
        assert_eq!(next_wait(interval, Duration::from_secs(25)), MIN_WAIT);
        assert_eq!(next_wait(Duration::ZERO, Duration::ZERO), MIN_WAIT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_once_per_interval() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let mut scheduler = IntervalScheduler::new("count", Duration::from_secs(10), move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert!(scheduler.start());
        assert!(!scheduler.start());
        assert_eq!(scheduler.state(), SchedulerState::Running);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        scheduler.stop().await;
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(!scheduler.start());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrun_is_followed_by_minimal_wait() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));

        let (s, f, m) = (starts.clone(), in_flight.clone(), max_in_flight.clone());
        let mut scheduler = IntervalScheduler::new("slow", Duration::from_secs(10), move |_| {
            let (s, f, m) = (s.clone(), f.clone(), m.clone());
            async move {
                s.lock().unwrap().push(Instant::now());
                let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                m.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(15)).await;
                f.fetch_sub(1, Ordering::SeqCst);
            }
        });

        scheduler.start();
        tokio::time::sleep(Duration::from_secs(40)).await;
        scheduler.stop().await;

        let starts = starts.lock().unwrap();
        assert!(starts.len() >= 2);
        let gap = starts[1] - starts[0];
        assert!(gap >= Duration::from_secs(15));
        assert!(gap < Duration::from_secs(15) + Duration::from_millis(100));
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_running_task() {
        let count = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let (c, done) = (count.clone(), finished.clone());
        let mut scheduler = IntervalScheduler::new("long", Duration::from_secs(60), move |_| {
            let (c, done) = (c.clone(), done.clone());
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                done.store(true, Ordering::SeqCst);
            }
        });

        scheduler.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!finished.load(Ordering::SeqCst));

        scheduler.stop().await;
        assert!(finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_sees_stop_signal() {
        let saw_stop = Arc::new(AtomicBool::new(false));
        let flag = saw_stop.clone();
        let mut scheduler = IntervalScheduler::new("watching", Duration::from_secs(60), move |stop| {
            let flag = flag.clone();
            async move {
                stop.cancelled().await;
                flag.store(true, Ordering::SeqCst);
            }
        });

        scheduler.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.stop().await;
        assert!(saw_stop.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let mut scheduler = IntervalScheduler::new("never", Duration::from_secs(1), |_| async {});
        scheduler.stop().await;
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(!scheduler.start());
    }
}
