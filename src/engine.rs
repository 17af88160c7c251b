use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::accel::{AccelSession, Accelerator, CallStatus, HwFrame, SequenceInfo, SessionProfile};
use crate::buffers::{DrainOutcome, PendingBuffers, wait_for_flag};
use crate::config::{DecodeParams, OutputTarget, should_report_timing};
use crate::frame::{FrameDescriptor, HostBuffer, Plane, PlaneLocation, ReuseToken, plane_bytes};
use crate::hw_adapter::{
    DecoderEvent, DecoderEventHandler, HardwareAdapter, accel_codec, pixel_format, profile_for,
};
use crate::sink::{EosLatch, OutputSink, acquire_frame_info};
use crate::software::{RawVideoBackend, SoftwareBackend, SoftwareDecoder};
use crate::{
    DecodeError, DecodePath, DecoderPreference, DeviceContext, EsPacket, PixelFormat,
    SessionState, VideoStreamInfo,
};

const SLOW_FRAME: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub frames_decoded: u64,
    pub frames_sent: u64,
    pub restarts: u64,
    pub pending_buffers: usize,
}

pub(crate) trait StreamDecoder: Send {
    fn path(&self) -> DecodePath;

    fn feed(&mut self, packet: EsPacket<'_>) -> Result<(), DecodeError>;

    fn close(&mut self);

    fn state(&self) -> SessionState;

    fn stats(&self) -> DecodeStats;
}

/// Turns compressed packets into decoded frames delivered to an [`OutputSink`].
pub struct DecoderEngine {
    params: DecodeParams,
    accelerator: Option<Arc<dyn Accelerator>>,
    software: Arc<dyn SoftwareBackend>,
    sink: Option<Arc<dyn OutputSink>>,
    stream: Option<Box<dyn StreamDecoder>>,
}

impl DecoderEngine {
    pub fn new(params: DecodeParams) -> Self {
        Self {
            params,
            accelerator: None,
            software: Arc::new(RawVideoBackend),
            sink: None,
            stream: None,
        }
    }

    #[must_use]
    pub fn with_accelerator(mut self, accelerator: Arc<dyn Accelerator>) -> Self {
        self.accelerator = Some(accelerator);
        self
    }

    #[must_use]
    pub fn with_software_backend(mut self, backend: Arc<dyn SoftwareBackend>) -> Self {
        self.software = backend;
        self
    }

    pub fn attach_sink(&mut self, sink: Arc<dyn OutputSink>) {
        self.sink = Some(sink);
    }

    pub fn params(&self) -> &DecodeParams {
        &self.params
    }

    pub fn open(&mut self, info: &VideoStreamInfo, interval: u32) -> Result<(), DecodeError> {
        if self
            .stream
            .as_ref()
            .is_some_and(|stream| !stream.state().is_terminal())
        {
            return Err(DecodeError::InvalidInput(
                "a stream is already open on this decoder".to_string(),
            ));
        }
        if interval == 0 {
            return Err(DecodeError::InvalidInput(
                "frame sampling interval must be at least 1".to_string(),
            ));
        }
        let sink = self.sink.clone().ok_or(DecodeError::NoSink)?;
        let path = self.select_path(info)?;

        let stream: Box<dyn StreamDecoder> = match path {
            DecodePath::HardwareVideo | DecodePath::HardwareImage => {
                let accelerator = self
                    .accelerator
                    .clone()
                    .ok_or(DecodeError::UnsupportedCodec(info.codec))?;
                Box::new(HardwareStream::open(
                    self.params.clone(),
                    accelerator,
                    sink,
                    info.clone(),
                    u64::from(interval),
                    path,
                )?)
            }
            DecodePath::Software => Box::new(SoftwareDecoder::open(
                self.params.clone(),
                self.software.as_ref(),
                self.accelerator.clone(),
                sink,
                info,
                u64::from(interval),
            )?),
        };
        tracing::info!(%path, %info, interval, params = %self.params, "decoder opened");
        self.stream = Some(stream);
        Ok(())
    }

    pub fn feed(&mut self, packet: EsPacket<'_>) -> Result<(), DecodeError> {
        match self.stream.as_mut() {
            Some(stream) => stream.feed(packet),
            None => Err(DecodeError::Closed),
        }
    }

    pub fn feed_eos(&mut self) -> Result<(), DecodeError> {
        self.feed(EsPacket::eos())
    }

    /// Drains and tears down the stream. Calling it again is a no-op.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            stream.close();
        }
    }

    pub fn state(&self) -> SessionState {
        self.stream
            .as_ref()
            .map_or(SessionState::Uninitialized, |stream| stream.state())
    }

    pub fn path(&self) -> Option<DecodePath> {
        self.stream.as_ref().map(|stream| stream.path())
    }

    pub fn stats(&self) -> DecodeStats {
        self.stream
            .as_ref()
            .map(|stream| stream.stats())
            .unwrap_or_default()
    }

    fn select_path(&self, info: &VideoStreamInfo) -> Result<DecodePath, DecodeError> {
        let profile = profile_for(info.codec);
        let hardware = self.accelerator.as_ref().is_some_and(|accelerator| {
            accel_codec(info.codec).is_some_and(|codec| accelerator.supports(profile, codec))
        });
        let hardware_path = match profile {
            SessionProfile::Video => DecodePath::HardwareVideo,
            SessionProfile::StillImage => DecodePath::HardwareImage,
        };
        let software = self.software.supports(info.codec);

        match self.params.preference {
            DecoderPreference::Hardware if hardware => Ok(hardware_path),
            DecoderPreference::Software if software => Ok(DecodePath::Software),
            DecoderPreference::Auto if hardware => Ok(hardware_path),
            DecoderPreference::Auto if software => {
                tracing::debug!(codec = %info.codec, "no accelerator profile, using software decoder");
                Ok(DecodePath::Software)
            }
            _ => Err(DecodeError::UnsupportedCodec(info.codec)),
        }
    }
}

impl Drop for DecoderEngine {
    fn drop(&mut self) {
        self.close();
    }
}

struct Lifecycle {
    state: SessionState,
    adapter: Option<Arc<HardwareAdapter>>,
}

struct HwShared {
    me: Weak<HwShared>,
    params: DecodeParams,
    accelerator: Arc<dyn Accelerator>,
    sink: Arc<dyn OutputSink>,
    info: VideoStreamInfo,
    path: DecodePath,
    interval: u64,
    lifecycle: Mutex<Lifecycle>,
    generation: AtomicU64,
    abort: AtomicBool,
    error: AtomicBool,
    restarting: AtomicBool,
    restart_pending: AtomicBool,
    eos_sent: AtomicBool,
    eos_got: AtomicBool,
    accepted: AtomicBool,
    eos: EosLatch,
    pending: Arc<PendingBuffers>,
    next_frame_id: AtomicU64,
    decoded: AtomicU64,
    frames_sent: AtomicU64,
    restarts: AtomicU64,
    report_timing: bool,
}

struct HardwareStream {
    shared: Arc<HwShared>,
}

impl HardwareStream {
    fn open(
        params: DecodeParams,
        accelerator: Arc<dyn Accelerator>,
        sink: Arc<dyn OutputSink>,
        info: VideoStreamInfo,
        interval: u64,
        path: DecodePath,
    ) -> Result<Self, DecodeError> {
        let shared = Arc::new_cyclic(|me| HwShared {
            me: me.clone(),
            params,
            accelerator,
            sink,
            info,
            path,
            interval,
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Uninitialized,
                adapter: None,
            }),
            generation: AtomicU64::new(0),
            abort: AtomicBool::new(false),
            error: AtomicBool::new(false),
            restarting: AtomicBool::new(false),
            restart_pending: AtomicBool::new(false),
            eos_sent: AtomicBool::new(false),
            eos_got: AtomicBool::new(false),
            accepted: AtomicBool::new(false),
            eos: EosLatch::new(),
            pending: Arc::new(PendingBuffers::new()),
            next_frame_id: AtomicU64::new(0),
            decoded: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            report_timing: should_report_timing(),
        });
        let adapter = shared.create_adapter()?;
        {
            let mut lifecycle = lock_state(&shared.lifecycle);
            lifecycle.adapter = Some(adapter);
            lifecycle.state = SessionState::Created;
        }
        Ok(Self { shared })
    }
}

impl StreamDecoder for HardwareStream {
    fn path(&self) -> DecodePath {
        self.shared.path
    }

    fn feed(&mut self, packet: EsPacket<'_>) -> Result<(), DecodeError> {
        if packet.eos {
            self.shared.feed_eos()
        } else {
            self.shared.feed_data(packet)
        }
    }

    fn close(&mut self) {
        self.shared.close();
    }

    fn state(&self) -> SessionState {
        lock_state(&self.shared.lifecycle).state
    }

    fn stats(&self) -> DecodeStats {
        DecodeStats {
            frames_decoded: self.shared.decoded.load(Ordering::Acquire),
            frames_sent: self.shared.frames_sent.load(Ordering::Acquire),
            restarts: self.shared.restarts.load(Ordering::Acquire),
            pending_buffers: self.shared.pending.count(),
        }
    }
}

impl HwShared {
    fn create_adapter(&self) -> Result<Arc<HardwareAdapter>, DecodeError> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let handler: Weak<dyn DecoderEventHandler> = self.me.clone();
        let adapter = HardwareAdapter::create(
            self.accelerator.as_ref(),
            &self.params,
            &self.info,
            generation,
            handler,
        )?;
        Ok(Arc::new(adapter))
    }

    fn current_adapter(&self) -> Option<Arc<HardwareAdapter>> {
        lock_state(&self.lifecycle).adapter.clone()
    }

    fn adapter_for(&self, generation: u64) -> Option<Arc<HardwareAdapter>> {
        lock_state(&self.lifecycle)
            .adapter
            .as_ref()
            .filter(|adapter| adapter.generation() == generation)
            .cloned()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    fn check_feedable(&self) -> Result<(), DecodeError> {
        match lock_state(&self.lifecycle).state {
            SessionState::Aborted => return Err(DecodeError::Aborted),
            SessionState::Draining | SessionState::Destroyed => return Err(DecodeError::Closed),
            _ => {}
        }
        if self.abort.load(Ordering::Acquire) || self.error.load(Ordering::Acquire) {
            return Err(DecodeError::Aborted);
        }
        Ok(())
    }

    fn feed_data(&self, packet: EsPacket<'_>) -> Result<(), DecodeError> {
        self.check_feedable()?;
        if self.restart_pending.swap(false, Ordering::AcqRel) {
            tracing::info!(pts = packet.pts, "restarting session after accelerator reset");
            self.restart()?;
        }
        let adapter = self.current_adapter().ok_or(DecodeError::Closed)?;
        let retry = self.params.retry;
        let attempts = retry.attempts.max(1);
        for attempt in 1..=attempts {
            if self.abort.load(Ordering::Acquire) {
                return Err(DecodeError::Aborted);
            }
            match adapter.feed_packet(packet, retry.timeout) {
                CallStatus::Ok => {
                    self.accepted.store(true, Ordering::Release);
                    let mut lifecycle = lock_state(&self.lifecycle);
                    if lifecycle.state == SessionState::Created {
                        lifecycle.state = SessionState::Running;
                    }
                    return Ok(());
                }
                CallStatus::Timeout => {
                    tracing::debug!(attempt, attempts, pts = packet.pts, "feed timed out, retrying");
                }
                CallStatus::Failed(code) => {
                    tracing::error!(code, pts = packet.pts, "feed failed");
                    self.error.store(true, Ordering::Release);
                    self.abort_stream("feed failed");
                    return Err(DecodeError::FeedFailed(format!(
                        "accelerator returned {code} for pts {}",
                        packet.pts
                    )));
                }
            }
        }
        tracing::error!(
            attempts,
            pts = packet.pts,
            "feed timed out on every attempt, restarting session"
        );
        self.restart()
    }

    fn restart(&self) -> Result<(), DecodeError> {
        self.restarting.store(true, Ordering::Release);
        lock_state(&self.lifecycle).state = SessionState::Restarting;

        let outcome = self
            .pending
            .wait_drained(Some(&self.abort), self.params.drain.buffers_timeout);
        if outcome != DrainOutcome::Drained {
            tracing::warn!(
                ?outcome,
                pending = self.pending.count(),
                "restarting with accelerator buffers still referenced"
            );
        }

        let old = lock_state(&self.lifecycle).adapter.take();
        if let Some(old) = old {
            old.abort();
        }
        let created = self.create_adapter();
        self.restarting.store(false, Ordering::Release);

        match created {
            Ok(adapter) => {
                let mut lifecycle = lock_state(&self.lifecycle);
                if self.abort.load(Ordering::Acquire) {
                    drop(lifecycle);
                    adapter.abort();
                    return Err(DecodeError::Aborted);
                }
                lifecycle.adapter = Some(adapter);
                lifecycle.state = SessionState::Running;
                drop(lifecycle);
                let restarts = self.restarts.fetch_add(1, Ordering::AcqRel) + 1;
                tracing::info!(
                    restarts,
                    next_frame_id = self.next_frame_id.load(Ordering::Acquire),
                    "session restarted"
                );
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "session restart failed, aborting stream");
                self.abort_stream("restart failed");
                Err(err)
            }
        }
    }

    fn feed_eos(&self) -> Result<(), DecodeError> {
        {
            let mut lifecycle = lock_state(&self.lifecycle);
            match lifecycle.state {
                SessionState::Aborted => return Err(DecodeError::Aborted),
                SessionState::Destroyed => return Err(DecodeError::Closed),
                SessionState::Draining => return Ok(()),
                _ => {}
            }
            if self.abort.load(Ordering::Acquire) || self.error.load(Ordering::Acquire) {
                return Err(DecodeError::Aborted);
            }
            lifecycle.state = SessionState::Draining;
        }
        self.eos_sent.store(true, Ordering::Release);
        let adapter = self.current_adapter().ok_or(DecodeError::Closed)?;

        match adapter.feed_packet(EsPacket::eos(), self.params.eos_feed_timeout) {
            CallStatus::Ok => Ok(()),
            CallStatus::Timeout => {
                tracing::error!("eos feed timed out, aborting stream");
                self.abort_stream("eos feed timeout");
                Err(DecodeError::FeedTimeout("end of stream".to_string()))
            }
            CallStatus::Failed(code) => {
                tracing::error!(code, "eos feed failed");
                self.error.store(true, Ordering::Release);
                self.abort_stream("eos feed failed");
                Err(DecodeError::FeedFailed(format!(
                    "accelerator returned {code} for end of stream"
                )))
            }
        }
    }

    fn abort_stream(&self, reason: &str) {
        self.abort.store(true, Ordering::Release);
        {
            let mut lifecycle = lock_state(&self.lifecycle);
            if lifecycle.state != SessionState::Destroyed {
                lifecycle.state = SessionState::Aborted;
            }
        }
        if self.eos.send_once(self.sink.as_ref()) {
            tracing::warn!(reason, "stream aborted, eos sent downstream");
        }
    }

    fn close(&self) {
        let (state, adapter) = {
            let lifecycle = lock_state(&self.lifecycle);
            (lifecycle.state, lifecycle.adapter.clone())
        };
        if state == SessionState::Destroyed {
            return;
        }

        if let Some(adapter) = adapter {
            let graceful = self.drain(state, &adapter);
            lock_state(&self.lifecycle).adapter = None;
            if graceful {
                self.stop_gracefully(&adapter);
            } else {
                self.abort.store(true, Ordering::Release);
                adapter.abort();
            }
        }

        lock_state(&self.lifecycle).state = SessionState::Destroyed;
        self.eos.send_once(self.sink.as_ref());
        tracing::info!(
            frames_sent = self.frames_sent.load(Ordering::Acquire),
            restarts = self.restarts.load(Ordering::Acquire),
            peak_pending = self.pending.peak(),
            "decoder closed"
        );
    }

    fn drain(&self, state: SessionState, adapter: &HardwareAdapter) -> bool {
        if state == SessionState::Aborted || self.abort.load(Ordering::Acquire) {
            return false;
        }
        // Accepted packets may still be ahead of the sequence event.
        let accepted = self.accepted.load(Ordering::Acquire);
        if !adapter.is_started()
            && !(accepted && adapter.wait_started(&self.abort, self.params.stop_timeout))
        {
            tracing::info!("session never started, aborting it");
            return false;
        }
        if !self.eos_sent.load(Ordering::Acquire) && self.feed_eos().is_err() {
            return false;
        }

        let drain = self.params.drain;
        match wait_for_flag(&self.eos_got, &self.abort, drain.eos_timeout) {
            DrainOutcome::Drained => {}
            outcome => {
                tracing::warn!(?outcome, "no eos from accelerator");
                return false;
            }
        }
        match self.pending.wait_drained(Some(&self.abort), drain.buffers_timeout) {
            DrainOutcome::Drained => true,
            outcome => {
                tracing::warn!(
                    ?outcome,
                    pending = self.pending.count(),
                    "accelerator buffers still referenced at close"
                );
                false
            }
        }
    }

    fn stop_gracefully(&self, adapter: &HardwareAdapter) {
        match adapter.stop(self.params.stop_timeout) {
            CallStatus::Ok => {}
            CallStatus::Timeout => {
                tracing::error!("session stop timed out, aborting it");
                self.abort.store(true, Ordering::Release);
                adapter.abort();
                return;
            }
            CallStatus::Failed(code) => tracing::error!(code, "session stop failed"),
        }
        if let Err(err) = adapter.destroy() {
            tracing::error!(error = %err, "session destroy failed");
        }
    }

    fn frame_cancelled(&self, generation: u64) -> bool {
        self.abort.load(Ordering::Acquire)
            || self.error.load(Ordering::Acquire)
            || self.restarting.load(Ordering::Acquire)
            || !self.is_current(generation)
    }

    fn on_frame(&self, generation: u64, frame: HwFrame) {
        if frame.width == 0 || frame.height == 0 {
            tracing::warn!(
                width = frame.width,
                height = frame.height,
                pts = frame.pts,
                "skipping empty frame"
            );
            return;
        }
        let index = self.decoded.fetch_add(1, Ordering::AcqRel);
        if index % self.interval != 0 {
            // Unsampled frames stay with the accelerator; no reference is taken.
            return;
        }
        let Some(adapter) = self.adapter_for(generation) else {
            return;
        };
        let session = adapter.session();
        let pending = Arc::clone(&self.pending);
        let token = match ReuseToken::acquire(Arc::clone(&session), frame.buffer, pending) {
            Ok(token) => token,
            Err(err) => {
                tracing::error!(buffer = %frame.buffer, error = %err, "failed to reference frame buffer");
                return;
            }
        };

        let start = Instant::now();
        match self.process_frame(generation, session.as_ref(), &frame, token) {
            Ok(()) => {}
            Err(DecodeError::Aborted) => {
                tracing::debug!(pts = frame.pts, "frame dropped, stream is going away");
            }
            Err(err @ DecodeError::AllocationFailed(_)) => {
                tracing::error!(error = %err, "cannot allocate host frame");
                self.abort_stream("host allocation failed");
            }
            Err(err) => {
                tracing::error!(pts = frame.pts, error = %err, "frame processing failed");
            }
        }
        let elapsed = start.elapsed();
        if elapsed > SLOW_FRAME {
            tracing::debug!(elapsed_us = elapsed.as_micros() as u64, "slow frame processing");
        }
        if self.report_timing {
            tracing::info!(
                pts = frame.pts,
                elapsed_us = elapsed.as_micros() as u64,
                pending = self.pending.count(),
                "frame timing"
            );
        }
    }

    fn process_frame(
        &self,
        generation: u64,
        session: &dyn AccelSession,
        frame: &HwFrame,
        token: ReuseToken,
    ) -> Result<(), DecodeError> {
        let cancelled = || self.frame_cancelled(generation);
        let Some(mut info) =
            acquire_frame_info(self.sink.as_ref(), self.params.frame_info_poll, cancelled)
        else {
            return Err(DecodeError::Aborted);
        };
        if cancelled() {
            return Err(DecodeError::Aborted);
        }

        let frame_id = self.next_frame_id.fetch_add(1, Ordering::AcqRel);
        let format = pixel_format(frame.pixel_format);
        info.timestamp = frame.pts;

        let descriptor = match self.params.output_target {
            OutputTarget::Device => {
                let ctx = DeviceContext::accelerator(self.params.device_id, frame.channel);
                let descriptor =
                    FrameDescriptor::new(frame_id, frame.pts, frame.width, frame.height, format, ctx);
                if self.params.reuses_device_buffers() {
                    let mut descriptor = descriptor.with_reuse_token(token);
                    for plane in frame.planes.iter().take(format.planes()) {
                        descriptor.planes.push(Plane {
                            stride: plane.stride,
                            location: PlaneLocation::Device(plane.addr),
                        });
                    }
                    descriptor
                } else {
                    let staged = copy_planes(session, frame, format)?;
                    drop(token);
                    let memory = self.accelerator.upload(self.params.device_id, staged.1.as_slice())?;
                    let base = memory.addr();
                    let mut descriptor = descriptor.with_device_memory(memory);
                    for plane in staged.0 {
                        let PlaneLocation::Host { offset, .. } = plane.location else {
                            continue;
                        };
                        descriptor.planes.push(Plane {
                            stride: plane.stride,
                            location: PlaneLocation::Device(base + offset as u64),
                        });
                    }
                    descriptor
                }
            }
            OutputTarget::Host => {
                let (planes, host) = copy_planes(session, frame, format)?;
                drop(token);
                let mut descriptor = FrameDescriptor::new(
                    frame_id,
                    frame.pts,
                    frame.width,
                    frame.height,
                    format,
                    DeviceContext::host(),
                )
                .with_host(host);
                descriptor.planes = planes;
                descriptor
            }
        };

        info.frame = Some(Arc::new(descriptor));
        self.sink.send_frame_info(info);
        self.frames_sent.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn on_invalid_image(&self, generation: u64, pts: i64) {
        tracing::warn!(pts, "still image failed to decode");
        let cancelled = || self.frame_cancelled(generation);
        let Some(mut info) =
            acquire_frame_info(self.sink.as_ref(), self.params.frame_info_poll, cancelled)
        else {
            return;
        };
        info.timestamp = pts;
        info.flags.invalid = true;
        self.sink.send_frame_info(info);
    }

    fn on_sequence(&self, generation: u64, seq: SequenceInfo) {
        let lifecycle = lock_state(&self.lifecycle);
        let Some(adapter) = lifecycle
            .adapter
            .as_ref()
            .filter(|adapter| adapter.generation() == generation)
        else {
            return;
        };
        if let Err(err) = adapter.on_sequence(&self.params, &seq) {
            tracing::error!(error = %err, "session start failed");
        }
    }

    fn on_eos(&self) {
        let state = lock_state(&self.lifecycle).state;
        if state != SessionState::Draining {
            tracing::error!(%state, "accelerator sent eos before the stream was drained");
            self.abort_stream("unexpected eos");
            return;
        }
        self.eos.send_once(self.sink.as_ref());
        self.eos_got.store(true, Ordering::Release);
    }
}

impl DecoderEventHandler for HwShared {
    fn on_decoder_event(&self, generation: u64, event: DecoderEvent) {
        if !self.is_current(generation) {
            tracing::debug!(generation, ?event, "event from a replaced session ignored");
            return;
        }
        match event {
            DecoderEvent::FrameReady(frame) => self.on_frame(generation, frame),
            DecoderEvent::InvalidImage { pts } => self.on_invalid_image(generation, pts),
            DecoderEvent::SequenceChanged(seq) => self.on_sequence(generation, seq),
            DecoderEvent::FrameCorrupted {
                frame_number,
                frame_count,
            } => {
                tracing::warn!(frame_number, frame_count, "stream corrupt, frame discarded");
                self.decoded.fetch_add(1, Ordering::AcqRel);
            }
            DecoderEvent::RecoverableReset => {
                tracing::warn!(generation, "accelerator reset, session will be restarted");
                self.restart_pending.store(true, Ordering::Release);
            }
            DecoderEvent::FatalReset => {
                tracing::error!(generation, "accelerator crashed");
                self.abort_stream("fatal reset");
            }
            DecoderEvent::OutOfMemory => {
                tracing::error!(generation, "accelerator out of memory");
                self.abort_stream("out of memory");
            }
            DecoderEvent::EosAcknowledged => self.on_eos(),
        }
    }
}

fn copy_planes(
    session: &dyn AccelSession,
    frame: &HwFrame,
    format: PixelFormat,
) -> Result<(Vec<Plane>, HostBuffer), DecodeError> {
    let plane_count = format.planes();
    let sizes: Vec<usize> = frame
        .planes
        .iter()
        .take(plane_count)
        .enumerate()
        .map(|(i, plane)| plane_bytes(format, i, plane.stride, frame.height))
        .collect();
    let mut host = HostBuffer::alloc(sizes.iter().sum())?;
    let mut planes = Vec::with_capacity(plane_count);
    let mut offset = 0;
    for (plane, len) in frame.planes.iter().zip(sizes) {
        session
            .copy_to_host(plane.addr, &mut host.as_mut_slice()[offset..offset + len])
            .map_err(|err| DecodeError::DeviceCopy(format!("plane at {:#x}: {err}", plane.addr)))?;
        planes.push(Plane {
            stride: plane.stride,
            location: PlaneLocation::Host { offset, len },
        });
        offset += len;
    }
    Ok((planes, host))
}

fn lock_state<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
