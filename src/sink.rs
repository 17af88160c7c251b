use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::frame::FrameInfo;
use crate::pipeline::{BoundedQueueRx, BoundedQueueTx, bounded_queue};

/// Downstream boundary of the decoder.
///
/// `create_frame_info` returning `None` is transient backpressure: the caller
/// retries after a short pause. `send_flow_eos` must tolerate repeated calls.
pub trait OutputSink: Send + Sync {
    fn create_frame_info(&self) -> Option<FrameInfo>;

    fn send_frame_info(&self, info: FrameInfo);

    fn send_flow_eos(&self);
}

#[derive(Debug, Default)]
pub(crate) struct EosLatch {
    sent: AtomicBool,
}

impl EosLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self) -> bool {
        !self.sent.swap(true, Ordering::AcqRel)
    }

    pub fn send_once(&self, sink: &dyn OutputSink) -> bool {
        if !self.claim() {
            return false;
        }
        sink.send_flow_eos();
        true
    }
}

const SLOW_DOWNSTREAM_WARN: Duration = Duration::from_secs(1);

pub(crate) fn acquire_frame_info(
    sink: &dyn OutputSink,
    poll: Duration,
    cancelled: impl Fn() -> bool,
) -> Option<FrameInfo> {
    let start = Instant::now();
    let mut warned = false;
    loop {
        if let Some(info) = sink.create_frame_info() {
            return Some(info);
        }
        if cancelled() {
            return None;
        }
        if !warned && start.elapsed() >= SLOW_DOWNSTREAM_WARN {
            tracing::warn!(
                waited_ms = start.elapsed().as_millis() as u64,
                "downstream has no free frame slot, decoder is stalled"
            );
            warned = true;
        }
        thread::sleep(poll);
    }
}

#[derive(Debug)]
pub enum SinkItem {
    Frame(FrameInfo),
    Eos,
}

#[derive(Debug)]
pub struct ChannelSink {
    tx: BoundedQueueTx<SinkItem>,
    eos: EosLatch,
}

pub fn channel_sink(capacity: usize) -> (Arc<ChannelSink>, BoundedQueueRx<SinkItem>) {
    let (tx, rx) = bounded_queue(capacity);
    (
        Arc::new(ChannelSink {
            tx,
            eos: EosLatch::new(),
        }),
        rx,
    )
}

impl OutputSink for ChannelSink {
    fn create_frame_info(&self) -> Option<FrameInfo> {
        if self.tx.is_full() {
            None
        } else {
            Some(FrameInfo::new())
        }
    }

    fn send_frame_info(&self, info: FrameInfo) {
        if self.tx.send(SinkItem::Frame(info)).is_err() {
            tracing::warn!("frame dropped, sink receiver is gone");
        }
    }

    fn send_flow_eos(&self) {
        if !self.eos.claim() {
            return;
        }
        if self.tx.send(SinkItem::Eos).is_err() {
            tracing::warn!("eos dropped, sink receiver is gone");
        }
    }
}
