use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSendError {
    Full,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueRecvError {
    Empty,
    Disconnected,
    Timeout,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub depth: usize,
    pub peak_depth: usize,
    pub capacity: usize,
}

#[derive(Debug)]
struct QueueCounters {
    capacity: usize,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
}

impl QueueCounters {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
        }
    }

    // Taken before the value enters the channel so a receiver never sees an
    // item ahead of its slot. A blocked sender may briefly hold capacity + 1.
    fn reserve(&self) {
        let depth = self.depth.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_depth
            .fetch_max(depth.min(self.capacity), Ordering::Relaxed);
    }

    fn release(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| depth.checked_sub(1));
    }

    fn snapshot(&self) -> QueueStats {
        QueueStats {
            depth: self.depth.load(Ordering::Acquire),
            peak_depth: self.peak_depth.load(Ordering::Relaxed),
            capacity: self.capacity,
        }
    }
}

#[derive(Debug)]
pub struct BoundedQueueTx<T> {
    inner: SyncSender<T>,
    counters: Arc<QueueCounters>,
}

impl<T> Clone for BoundedQueueTx<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            counters: Arc::clone(&self.counters),
        }
    }
}

#[derive(Debug)]
pub struct BoundedQueueRx<T> {
    inner: Receiver<T>,
    counters: Arc<QueueCounters>,
}

impl<T> BoundedQueueTx<T> {
    pub fn send(&self, value: T) -> Result<(), QueueSendError> {
        self.counters.reserve();
        self.inner.send(value).map_err(|_| {
            self.counters.release();
            QueueSendError::Disconnected
        })
    }

    pub fn try_send(&self, value: T) -> Result<(), QueueSendError> {
        self.try_send_or_return(value).map_err(|(err, _)| err)
    }

    pub fn try_send_or_return(&self, value: T) -> Result<(), (QueueSendError, T)> {
        self.counters.reserve();
        let result = match self.inner.try_send(value) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(value)) => Err((QueueSendError::Full, value)),
            Err(TrySendError::Disconnected(value)) => Err((QueueSendError::Disconnected, value)),
        };
        self.counters.release();
        result
    }

    pub fn is_full(&self) -> bool {
        let stats = self.counters.snapshot();
        stats.depth >= stats.capacity
    }

    pub fn stats(&self) -> QueueStats {
        self.counters.snapshot()
    }
}

impl<T> BoundedQueueRx<T> {
    pub fn recv(&self) -> Result<T, QueueRecvError> {
        match self.inner.recv() {
            Ok(item) => {
                self.counters.release();
                Ok(item)
            }
            Err(_) => Err(QueueRecvError::Disconnected),
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, QueueRecvError> {
        match self.inner.recv_timeout(timeout) {
            Ok(item) => {
                self.counters.release();
                Ok(item)
            }
            Err(RecvTimeoutError::Timeout) => Err(QueueRecvError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(QueueRecvError::Disconnected),
        }
    }

    pub fn try_recv(&self) -> Result<T, QueueRecvError> {
        match self.inner.try_recv() {
            Ok(item) => {
                self.counters.release();
                Ok(item)
            }
            Err(TryRecvError::Empty) => Err(QueueRecvError::Empty),
            Err(TryRecvError::Disconnected) => Err(QueueRecvError::Disconnected),
        }
    }

    pub fn stats(&self) -> QueueStats {
        self.counters.snapshot()
    }
}

pub fn bounded_queue<T>(capacity: usize) -> (BoundedQueueTx<T>, BoundedQueueRx<T>) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::sync_channel(capacity);
    let counters = Arc::new(QueueCounters::new(capacity));
    (
        BoundedQueueTx {
            inner: tx,
            counters: Arc::clone(&counters),
        },
        BoundedQueueRx {
            inner: rx,
            counters,
        },
    )
}
