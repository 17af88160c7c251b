use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Drained,
    Aborted,
    TimedOut,
}

#[derive(Debug, Default)]
pub struct PendingBuffers {
    referenced: AtomicUsize,
    peak: AtomicUsize,
}

impl PendingBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> usize {
        let count = self.referenced.fetch_add(1, Ordering::AcqRel) + 1;
        let mut peak = self.peak.load(Ordering::Relaxed);
        while count > peak {
            match self.peak.compare_exchange_weak(
                peak,
                count,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => peak = current,
            }
        }
        count
    }

    pub fn release(&self) {
        loop {
            let used = self.referenced.load(Ordering::Acquire);
            if used == 0 {
                tracing::warn!("pending buffer release without a matching reference");
                return;
            }
            if self
                .referenced
                .compare_exchange_weak(used, used - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    pub fn count(&self) -> usize {
        self.referenced.load(Ordering::Acquire)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn wait_drained(&self, abort: Option<&AtomicBool>, timeout: Option<Duration>) -> DrainOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.count() == 0 {
                return DrainOutcome::Drained;
            }
            if abort.is_some_and(|flag| flag.load(Ordering::Acquire)) {
                return DrainOutcome::Aborted;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return DrainOutcome::TimedOut;
            }
            thread::yield_now();
        }
    }
}

pub(crate) fn wait_for_flag(
    flag: &AtomicBool,
    abort: &AtomicBool,
    timeout: Option<Duration>,
) -> DrainOutcome {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        if flag.load(Ordering::Acquire) {
            return DrainOutcome::Drained;
        }
        if abort.load(Ordering::Acquire) {
            return DrainOutcome::Aborted;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return DrainOutcome::TimedOut;
        }
        thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn counter_tracks_peak_and_saturates_at_zero() {
        let pending = PendingBuffers::new();
        assert_eq!(pending.acquire(), 1);
        assert_eq!(pending.acquire(), 2);
        pending.release();
        pending.release();
        pending.release();
        assert_eq!(pending.count(), 0);
        assert_eq!(pending.peak(), 2);
    }

    #[test]
    fn wait_returns_once_released_from_another_thread() {
        let pending = Arc::new(PendingBuffers::new());
        pending.acquire();
        let worker = {
            let pending = Arc::clone(&pending);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                pending.release();
            })
        };
        let outcome = pending.wait_drained(None, Some(Duration::from_secs(5)));
        worker.join().unwrap();
        assert_eq!(outcome, DrainOutcome::Drained);
    }

    #[test]
    fn wait_exits_early_on_abort_or_timeout() {
        let pending = PendingBuffers::new();
        pending.acquire();
        let abort = AtomicBool::new(true);
        assert_eq!(
            pending.wait_drained(Some(&abort), None),
            DrainOutcome::Aborted
        );
        assert_eq!(
            pending.wait_drained(None, Some(Duration::from_millis(5))),
            DrainOutcome::TimedOut
        );
    }

    #[test]
    fn flag_wait_observes_abort() {
        let flag = AtomicBool::new(false);
        let abort = AtomicBool::new(true);
        assert_eq!(wait_for_flag(&flag, &abort, None), DrainOutcome::Aborted);
        flag.store(true, Ordering::Release);
        assert_eq!(wait_for_flag(&flag, &abort, None), DrainOutcome::Drained);
    }
}
