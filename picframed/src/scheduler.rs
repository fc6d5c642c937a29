use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Runs an async job on a fixed period until stopped.
///
/// Each run is awaited before the next tick is taken, so runs never overlap; ticks missed
/// while a run is in progress are skipped rather than queued.
pub struct PeriodicTask {
    name: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn spawn<F, Fut>(
        name: impl Into<String>,
        every: Duration,
        run_immediately: bool,
        mut job: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let cancel = CancellationToken::new();
        let every = every.max(MIN_PERIOD);
        let handle = tokio::spawn({
            let name = name.clone();
            let cancel = cancel.clone();
            async move {
                let first = if run_immediately {
                    Instant::now()
                } else {
                    Instant::now() + every
                };
                let mut ticker = tokio::time::interval_at(first, every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    debug!(task = %name, "periodic run");
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!(task = %name, "periodic run cancelled");
                            break;
                        }
                        _ = job() => {}
                    }
                }
            }
        });
        Self {
            name,
            cancel,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancels the timer and any in-flight run, then waits for the task to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.handle.await {
            warn!(task = %self.name, error = %err, "periodic task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(
        counter: &Arc<AtomicUsize>,
        run_for: Duration,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>> + Send + 'static {
        let counter = counter.clone();
        move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(run_for).await;
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_immediately_then_on_each_period() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = PeriodicTask::spawn(
            "sync",
            Duration::from_secs(600),
            true,
            counting_job(&runs, Duration::ZERO),
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        task.stop().await;
        tokio::time::sleep(Duration::from_secs(1800)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_start_waits_one_period() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = PeriodicTask::spawn(
            "sync",
            Duration::from_secs(60),
            false,
            counting_job(&runs, Duration::ZERO),
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn slow_runs_do_not_overlap() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = PeriodicTask::spawn(
            "sync",
            Duration::from_secs(60),
            true,
            counting_job(&runs, Duration::from_secs(150)),
        );

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // The late tick fires when the first run ends at 150s.
        tokio::time::sleep(Duration::from_secs(70)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // Ticks at 180s and 240s fall inside the second run and are skipped.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_a_run_in_progress() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = PeriodicTask::spawn(
            "sync",
            Duration::from_secs(60),
            true,
            counting_job(&runs, Duration::from_secs(3600)),
        );
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(task.is_running());
        assert_eq!(task.name(), "sync");

        task.stop().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
