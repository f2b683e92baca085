use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Handle to one scheduled job
#[derive(Debug)]
pub struct DebounceHandle {
    task: JoinHandle<()>,
}

impl DebounceHandle {
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Runs the most recently scheduled job once `delay` has passed without a
/// newer schedule. Scheduling cancels whatever was pending.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<DebounceHandle>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Outside a tokio runtime the job runs immediately
    pub fn schedule<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut pending = self.pending.lock();
        if let Some(previous) = pending.take() {
            previous.cancel();
        }

        match Handle::try_current() {
            Ok(runtime) => {
                let delay = self.delay;
                let task = runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    job();
                });
                *pending = Some(DebounceHandle { task });
            }
            Err(_) => {
                drop(pending);
                job();
            }
        }
    }

    /// Returns true if a job was still pending
    pub fn cancel(&self) -> bool {
        match self.pending.lock().take() {
            Some(handle) => {
                let was_pending = !handle.is_finished();
                handle.cancel();
                was_pending
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.get_mut().take() {
            handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter_job(counter: &Arc<AtomicUsize>, value: usize) -> impl FnOnce() + Send + 'static {
        let counter = counter.clone();
        move || {
            counter.store(value, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_last_schedule_wins() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let last = Arc::new(AtomicUsize::new(0));

        debouncer.schedule(counter_job(&last, 1));
        tokio::time::sleep(Duration::from_millis(20)).await;
        debouncer.schedule(counter_job(&last, 2));
        tokio::time::sleep(Duration::from_millis(20)).await;
        debouncer.schedule(counter_job(&last, 3));
        assert!(debouncer.is_pending());
        assert_eq!(last.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(last.load(Ordering::SeqCst), 3);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test]
    async fn test_cancel_prevents_run() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let ran = Arc::new(AtomicUsize::new(0));

        debouncer.schedule(counter_job(&ran, 1));
        assert!(debouncer.cancel());
        assert!(!debouncer.cancel());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_runs_inline_without_runtime() {
        let debouncer = Debouncer::new(Duration::from_secs(60));
        let ran = Arc::new(AtomicUsize::new(0));
        debouncer.schedule(counter_job(&ran, 7));
        assert_eq!(ran.load(Ordering::SeqCst), 7);
        assert!(!debouncer.is_pending());
    }
}
