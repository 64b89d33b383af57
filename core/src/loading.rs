//! Process-wide in-flight request counter driving the global busy indicator.
//!
//! # Design
//! The indicator is mounted on the 0→1 edge and unmounted on the 1→0 edge
//! only, so overlapping requests show a single overlay. Edge detection and
//! the indicator call happen under the same lock, which keeps mount/unmount
//! paired on a multi-threaded runtime. `exit` at zero is a silent no-op.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// The visual overlay. Called at most once per edge.
pub trait Indicator: Send + Sync {
    fn mount(&self);
    fn unmount(&self);
}

/// Default indicator: records the overlay transitions in the log.
#[derive(Debug, Default)]
pub struct LogIndicator;

impl Indicator for LogIndicator {
    fn mount(&self) {
        tracing::info!("loading indicator mounted");
    }

    fn unmount(&self) {
        tracing::info!("loading indicator unmounted");
    }
}

pub struct LoadingCounter {
    count: Mutex<usize>,
    indicator: Arc<dyn Indicator>,
}

impl fmt::Debug for LoadingCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadingCounter")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl Default for LoadingCounter {
    fn default() -> Self {
        Self::new(Arc::new(LogIndicator))
    }
}

impl LoadingCounter {
    pub fn new(indicator: Arc<dyn Indicator>) -> Self {
        Self {
            count: Mutex::new(0),
            indicator,
        }
    }

    pub fn enter(&self) {
        let mut count = self.lock();
        *count += 1;
        if *count == 1 {
            self.indicator.mount();
        }
    }

    pub fn exit(&self) {
        let mut count = self.lock();
        if *count == 0 {
            tracing::debug!("loading exit with no request in flight; ignored");
            return;
        }
        *count -= 1;
        if *count == 0 {
            self.indicator.unmount();
        }
    }

    pub fn count(&self) -> usize {
        *self.lock()
    }

    /// Enter and hand back a ticket that exits exactly once.
    pub fn ticket(self: &Arc<Self>) -> LoadingTicket {
        self.enter();
        LoadingTicket {
            counter: Arc::clone(self),
            done: AtomicBool::new(false),
        }
    }

    // A panic inside an indicator must not wedge every later request.
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One `enter` paired with exactly one `exit`, on `finish` or on drop.
#[derive(Debug)]
pub struct LoadingTicket {
    counter: Arc<LoadingCounter>,
    done: AtomicBool,
}

impl LoadingTicket {
    pub fn finish(&self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.counter.exit();
        }
    }
}

impl Drop for LoadingTicket {
    fn drop(&mut self) {
        self.finish();
    }
}
