use std::{future::Future, time::Duration};

use tokio::task::JoinHandle;

pub const DEFAULT_DEBOUNCE_DELAY: Duration = Duration::from_millis(1000);

/// A single deferred action. Scheduling again cancels whatever was waiting,
/// and dropping the timer cancels it too.
#[derive(Debug)]
pub struct DebounceTimer {
    delay: Duration,
    handle: Option<JoinHandle<()>>,
}

impl DebounceTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            handle: None,
        }
    }

    /// Runs `action` after the delay unless the timer is rescheduled or
    /// dropped first. Must be called from within a tokio runtime.
    pub fn schedule<F>(&mut self, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let delay = self.delay;
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
#[path = "tests/debounce_tests.rs"]
mod tests;
