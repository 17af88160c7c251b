//! In-process accelerator with a worker thread standing in for the vendor's
//! callback context.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crate::accel::{
    AccelCallback, AccelCodec, AccelEvent, AccelPixelFormat, AccelSession, Accelerator,
    CallStatus, DeviceMemory, HwBufferId, HwFrame, HwPlane, SequenceInfo, SessionCreateInfo,
    SessionProfile,
};
use crate::pipeline::{BoundedQueueRx, BoundedQueueTx, QueueRecvError, QueueSendError, bounded_queue};
use crate::{DecodeError, EsPacket};

const POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    Corrupt,
    EmptyFrame,
    ImageFailure,
    SwReset,
    HwReset,
    OutOfMemory,
    AbortError,
    SpuriousEos,
    OversizedFrame,
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub min_output_buffers: u32,
    pub pixel_format: AccelPixelFormat,
    pub supports_video: bool,
    pub supports_image: bool,
    pub decode_delay: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            min_output_buffers: 4,
            pixel_format: AccelPixelFormat::Nv12,
            supports_video: true,
            supports_image: true,
            decode_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    stalls: HashMap<i64, u32>,
    feed_failures: HashMap<i64, i32>,
    faults: HashMap<i64, SimFault>,
    session_limit: Option<u64>,
    eos_stall: bool,
    eos_swallowed: bool,
    reset_on_eos: bool,
    stop_stall: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimCounters {
    pub sessions_created: u64,
    pub sessions_aborted: u64,
    pub sessions_destroyed: u64,
    pub add_refs: u64,
    pub releases: u64,
    pub double_releases: u64,
    pub frames_emitted: u64,
    pub feed_timeouts: u64,
    pub uploads: u64,
    pub max_packet_len: u64,
}

impl SimCounters {
    pub fn outstanding(&self) -> u64 {
        self.add_refs.saturating_sub(self.releases)
    }
}

#[derive(Debug, Default)]
struct SimStats {
    sessions_created: AtomicU64,
    sessions_aborted: AtomicU64,
    sessions_destroyed: AtomicU64,
    add_refs: AtomicU64,
    releases: AtomicU64,
    double_releases: AtomicU64,
    frames_emitted: AtomicU64,
    feed_timeouts: AtomicU64,
    uploads: AtomicU64,
    max_packet_len: AtomicU64,
}

impl SimStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::AcqRel);
    }

    fn snapshot(&self) -> SimCounters {
        SimCounters {
            sessions_created: self.sessions_created.load(Ordering::Acquire),
            sessions_aborted: self.sessions_aborted.load(Ordering::Acquire),
            sessions_destroyed: self.sessions_destroyed.load(Ordering::Acquire),
            add_refs: self.add_refs.load(Ordering::Acquire),
            releases: self.releases.load(Ordering::Acquire),
            double_releases: self.double_releases.load(Ordering::Acquire),
            frames_emitted: self.frames_emitted.load(Ordering::Acquire),
            feed_timeouts: self.feed_timeouts.load(Ordering::Acquire),
            uploads: self.uploads.load(Ordering::Acquire),
            max_packet_len: self.max_packet_len.load(Ordering::Acquire),
        }
    }
}

pub struct SimAccelerator {
    config: SimConfig,
    script: Arc<Mutex<Script>>,
    stats: Arc<SimStats>,
    next_upload: AtomicU64,
}

impl SimAccelerator {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            script: Arc::new(Mutex::new(Script::default())),
            stats: Arc::new(SimStats::default()),
            next_upload: AtomicU64::new(1),
        }
    }

    pub fn stall_feed(&self, pts: i64, times: u32) {
        lock_state(&self.script).stalls.insert(pts, times);
    }

    pub fn fail_feed(&self, pts: i64, code: i32) {
        lock_state(&self.script).feed_failures.insert(pts, code);
    }

    pub fn inject(&self, pts: i64, fault: SimFault) {
        lock_state(&self.script).faults.insert(pts, fault);
    }

    pub fn limit_sessions(&self, count: u64) {
        lock_state(&self.script).session_limit = Some(count);
    }

    pub fn stall_eos(&self) {
        lock_state(&self.script).eos_stall = true;
    }

    pub fn swallow_eos(&self) {
        lock_state(&self.script).eos_swallowed = true;
    }

    pub fn reset_on_eos(&self) {
        lock_state(&self.script).reset_on_eos = true;
    }

    pub fn stall_stop(&self) {
        lock_state(&self.script).stop_stall = true;
    }

    pub fn counters(&self) -> SimCounters {
        self.stats.snapshot()
    }
}

impl Default for SimAccelerator {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl fmt::Debug for SimAccelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimAccelerator")
            .field("config", &self.config)
            .field("counters", &self.stats.snapshot())
            .finish()
    }
}

impl Accelerator for SimAccelerator {
    fn supports(&self, profile: SessionProfile, codec: AccelCodec) -> bool {
        match profile {
            SessionProfile::Video => {
                self.config.supports_video && matches!(codec, AccelCodec::H264 | AccelCodec::Hevc)
            }
            SessionProfile::StillImage => self.config.supports_image && codec == AccelCodec::Jpeg,
        }
    }

    fn create_session(
        &self,
        info: &SessionCreateInfo,
        callback: Arc<dyn AccelCallback>,
    ) -> Result<Arc<dyn AccelSession>, DecodeError> {
        let created = self.stats.sessions_created.load(Ordering::Acquire);
        if lock_state(&self.script)
            .session_limit
            .is_some_and(|limit| created >= limit)
        {
            return Err(DecodeError::SessionCreate(format!(
                "simulated device refused session {}",
                created + 1
            )));
        }
        let id = self.stats.sessions_created.fetch_add(1, Ordering::AcqRel) + 1;
        let session = SimSession::spawn(
            id,
            info.clone(),
            self.config.clone(),
            Arc::clone(&self.script),
            Arc::clone(&self.stats),
            callback,
        )?;
        Ok(Arc::new(session))
    }

    fn upload(&self, device_id: i32, data: &[u8]) -> Result<Box<dyn DeviceMemory>, DecodeError> {
        SimStats::bump(&self.stats.uploads);
        let id = self.next_upload.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(SimDeviceMemory {
            addr: (0xD000_u64 << 32) | (id << 20) | (device_id.max(0) as u64),
            data: data.to_vec(),
        }))
    }
}

#[derive(Debug)]
pub struct SimDeviceMemory {
    addr: u64,
    data: Vec<u8>,
}

impl DeviceMemory for SimDeviceMemory {
    fn addr(&self) -> u64 {
        self.addr
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

enum SimInput {
    Packet { pts: i64, len: usize },
    Eos,
}

#[derive(Debug, Default)]
struct OutputPool {
    width: u32,
    height: u32,
    stride: u32,
    memory: Vec<Vec<u8>>,
    refs: Vec<u32>,
}

impl OutputPool {
    fn configure(&mut self, count: u32, width: u32, height: u32, align: u32) {
        let align = align.max(1);
        self.width = width;
        self.height = height;
        self.stride = width.div_ceil(align) * align;
        let size = self.stride as usize * (height as usize + height.div_ceil(2) as usize);
        self.memory = (0..count).map(|_| vec![0; size]).collect();
        self.refs = vec![0; count as usize];
    }

    fn free_slot(&self) -> Option<usize> {
        self.refs.iter().position(|&refs| refs == 0)
    }
}

fn encode_addr(session: u64, buffer: usize, offset: usize) -> u64 {
    (session << 48) | ((buffer as u64) << 32) | offset as u64
}

fn decode_addr(addr: u64) -> (u64, usize, usize) {
    (
        addr >> 48,
        ((addr >> 32) & 0xFFFF) as usize,
        (addr & 0xFFFF_FFFF) as usize,
    )
}

struct SessionCore {
    id: u64,
    info: SessionCreateInfo,
    config: SimConfig,
    script: Arc<Mutex<Script>>,
    stats: Arc<SimStats>,
    callback: Arc<dyn AccelCallback>,
    pool: Mutex<OutputPool>,
    alignment: AtomicU64,
    started: AtomicBool,
    aborted: AtomicBool,
}

pub struct SimSession {
    core: Arc<SessionCore>,
    tx: Mutex<Option<BoundedQueueTx<SimInput>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    torn_down: AtomicBool,
}

impl SimSession {
    fn spawn(
        id: u64,
        info: SessionCreateInfo,
        config: SimConfig,
        script: Arc<Mutex<Script>>,
        stats: Arc<SimStats>,
        callback: Arc<dyn AccelCallback>,
    ) -> Result<Self, DecodeError> {
        let still_image = info.profile == SessionProfile::StillImage;
        let mut pool = OutputPool::default();
        if still_image {
            pool.configure(info.output_buf_num.max(1), info.width, info.height, 1);
        }
        let (tx, rx) = bounded_queue(info.input_buf_num.max(1) as usize);
        let core = Arc::new(SessionCore {
            id,
            info,
            config,
            script,
            stats,
            callback,
            pool: Mutex::new(pool),
            alignment: AtomicU64::new(1),
            started: AtomicBool::new(still_image),
            aborted: AtomicBool::new(false),
        });
        let worker_core = Arc::clone(&core);
        let worker = thread::Builder::new()
            .name(format!("sim-decode-{id}"))
            .spawn(move || worker_core.run(rx))
            .map_err(|err| DecodeError::SessionCreate(format!("worker spawn failed: {err}")))?;
        let worker_id = worker.thread().id();
        Ok(Self {
            core,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            worker_id,
            torn_down: AtomicBool::new(false),
        })
    }

    fn send(&self, input: SimInput, timeout: Duration) -> CallStatus {
        let deadline = Instant::now() + timeout;
        let mut input = input;
        loop {
            let tx = lock_state(&self.tx);
            let Some(tx) = tx.as_ref() else {
                return CallStatus::Failed(-1);
            };
            match tx.try_send_or_return(input) {
                Ok(()) => return CallStatus::Ok,
                Err((QueueSendError::Disconnected, _)) => return CallStatus::Failed(-1),
                Err((QueueSendError::Full, back)) => input = back,
            }
            drop(tx);
            if self.core.aborted.load(Ordering::Acquire) {
                return CallStatus::Failed(-1);
            }
            if Instant::now() >= deadline {
                SimStats::bump(&self.core.stats.feed_timeouts);
                return CallStatus::Timeout;
            }
            thread::sleep(POLL);
        }
    }

    fn shut_down(&self) {
        lock_state(&self.tx).take();
        if thread::current().id() == self.worker_id {
            return;
        }
        let worker = lock_state(&self.worker).take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!(session = self.core.id, "simulated decode worker panicked");
            }
        }
    }
}

impl AccelSession for SimSession {
    fn set_output_alignment(&self, align: u32) -> Result<(), DecodeError> {
        if align == 0 {
            return Err(DecodeError::UnsupportedConfig("zero stride alignment".to_string()));
        }
        self.core.alignment.store(u64::from(align), Ordering::Release);
        Ok(())
    }

    fn feed(&self, packet: EsPacket<'_>, timeout: Duration) -> CallStatus {
        if self.core.aborted.load(Ordering::Acquire) {
            return CallStatus::Failed(-1);
        }
        if packet.eos {
            if lock_state(&self.core.script).eos_stall {
                SimStats::bump(&self.core.stats.feed_timeouts);
                return CallStatus::Timeout;
            }
            return self.send(SimInput::Eos, timeout);
        }
        {
            let mut script = lock_state(&self.core.script);
            if let Some(code) = script.feed_failures.remove(&packet.pts) {
                return CallStatus::Failed(code);
            }
            if let Some(remaining) = script.stalls.get_mut(&packet.pts) {
                if *remaining > 0 {
                    *remaining -= 1;
                    SimStats::bump(&self.core.stats.feed_timeouts);
                    return CallStatus::Timeout;
                }
            }
        }
        self.core
            .stats
            .max_packet_len
            .fetch_max(packet.data.len() as u64, Ordering::AcqRel);
        self.send(
            SimInput::Packet {
                pts: packet.pts,
                len: packet.data.len(),
            },
            timeout,
        )
    }

    fn start(&self, info: &SessionCreateInfo) -> Result<(), DecodeError> {
        if self.core.aborted.load(Ordering::Acquire) {
            return Err(DecodeError::Backend("session aborted".to_string()));
        }
        let align = self.core.alignment.load(Ordering::Acquire) as u32;
        lock_state(&self.core.pool).configure(info.output_buf_num, info.width, info.height, align);
        self.core.started.store(true, Ordering::Release);
        Ok(())
    }

    fn add_reference(&self, buffer: HwBufferId) -> Result<(), DecodeError> {
        if self.core.aborted.load(Ordering::Acquire) {
            return Err(DecodeError::Backend("session aborted".to_string()));
        }
        let mut pool = lock_state(&self.core.pool);
        let refs = pool
            .refs
            .get_mut(buffer.0 as usize)
            .ok_or_else(|| DecodeError::Backend(format!("unknown buffer {buffer}")))?;
        *refs += 1;
        SimStats::bump(&self.core.stats.add_refs);
        Ok(())
    }

    fn release_reference(&self, buffer: HwBufferId) -> Result<(), DecodeError> {
        let mut pool = lock_state(&self.core.pool);
        match pool.refs.get_mut(buffer.0 as usize) {
            Some(refs) if *refs > 0 => {
                *refs -= 1;
                SimStats::bump(&self.core.stats.releases);
                Ok(())
            }
            _ => {
                SimStats::bump(&self.core.stats.double_releases);
                Err(DecodeError::Backend(format!("{buffer} is not referenced")))
            }
        }
    }

    fn copy_to_host(&self, addr: u64, dst: &mut [u8]) -> Result<(), DecodeError> {
        let (session, buffer, offset) = decode_addr(addr);
        if session != self.core.id {
            return Err(DecodeError::DeviceCopy(format!(
                "address {addr:#x} belongs to another session"
            )));
        }
        let pool = lock_state(&self.core.pool);
        let src = pool
            .memory
            .get(buffer)
            .and_then(|memory| memory.get(offset..offset + dst.len()))
            .ok_or_else(|| DecodeError::DeviceCopy(format!("address {addr:#x} out of range")))?;
        dst.copy_from_slice(src);
        Ok(())
    }

    fn stop(&self, _timeout: Duration) -> CallStatus {
        if lock_state(&self.core.script).stop_stall {
            return CallStatus::Timeout;
        }
        self.shut_down();
        CallStatus::Ok
    }

    fn destroy(&self) -> Result<(), DecodeError> {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return Err(DecodeError::Backend("session already torn down".to_string()));
        }
        self.shut_down();
        SimStats::bump(&self.core.stats.sessions_destroyed);
        Ok(())
    }

    fn abort(&self) {
        self.core.aborted.store(true, Ordering::Release);
        self.shut_down();
        if !self.torn_down.swap(true, Ordering::AcqRel) {
            SimStats::bump(&self.core.stats.sessions_aborted);
        }
    }
}

impl Drop for SimSession {
    fn drop(&mut self) {
        self.core.aborted.store(true, Ordering::Release);
        self.shut_down();
    }
}

impl SessionCore {
    fn run(&self, rx: BoundedQueueRx<SimInput>) {
        loop {
            if self.aborted.load(Ordering::Acquire) {
                return;
            }
            match rx.recv_timeout(Duration::from_millis(10)) {
                Ok(SimInput::Packet { pts, len }) => self.decode(pts, len),
                Ok(SimInput::Eos) => self.end_of_stream(),
                Err(QueueRecvError::Timeout | QueueRecvError::Empty) => {}
                Err(QueueRecvError::Disconnected) => return,
            }
        }
    }

    fn end_of_stream(&self) {
        let (swallowed, reset) = {
            let script = lock_state(&self.script);
            (script.eos_swallowed, script.reset_on_eos)
        };
        if reset {
            self.callback.on_event(AccelEvent::HwReset);
        } else if !swallowed {
            self.callback.on_event(AccelEvent::Eos);
        }
    }

    fn decode(&self, pts: i64, len: usize) {
        if !self.started.load(Ordering::Acquire) {
            self.callback.on_event(AccelEvent::Sequence(SequenceInfo {
                codec: self.info.codec,
                width: self.info.width,
                height: self.info.height,
                min_output_buf_num: self.config.min_output_buffers,
            }));
            if !self.started.load(Ordering::Acquire) {
                tracing::debug!(session = self.id, pts, "session not started, packet dropped");
                return;
            }
        }
        if !self.config.decode_delay.is_zero() {
            thread::sleep(self.config.decode_delay);
        }
        if len == 0 {
            return;
        }

        let fault = lock_state(&self.script).faults.remove(&pts);
        match fault {
            Some(SimFault::Corrupt) => {
                self.callback.on_event(AccelEvent::StreamCorrupt {
                    frame_number: pts.max(0) as u64,
                    frame_count: 1,
                });
                return;
            }
            Some(SimFault::ImageFailure) => {
                self.callback.on_event(AccelEvent::ImageDecodeFailed { pts });
                return;
            }
            Some(SimFault::HwReset) => {
                self.callback.on_event(AccelEvent::HwReset);
                return;
            }
            Some(SimFault::OutOfMemory) => {
                self.callback.on_event(AccelEvent::OutOfMemory);
                return;
            }
            Some(SimFault::AbortError) => {
                self.callback.on_event(AccelEvent::AbortError);
                return;
            }
            Some(SimFault::SpuriousEos) => {
                self.callback.on_event(AccelEvent::Eos);
                return;
            }
            Some(SimFault::EmptyFrame | SimFault::SwReset | SimFault::OversizedFrame) | None => {}
        }

        let Some(mut frame) = self.fill_buffer(pts, fault == Some(SimFault::EmptyFrame)) else {
            return;
        };
        if fault == Some(SimFault::OversizedFrame) {
            frame.height = 1 << 31;
            for plane in &mut frame.planes {
                plane.stride = u32::MAX;
            }
        }
        self.stats.frames_emitted.fetch_add(1, Ordering::AcqRel);
        self.callback.on_event(AccelEvent::NewFrame(frame));
        if fault == Some(SimFault::SwReset) {
            self.callback.on_event(AccelEvent::SwReset);
        }
    }

    fn fill_buffer(&self, pts: i64, empty: bool) -> Option<HwFrame> {
        loop {
            {
                let mut pool = lock_state(&self.pool);
                if let Some(slot) = pool.free_slot() {
                    let luma = pool.stride as usize * pool.height as usize;
                    let memory = &mut pool.memory[slot];
                    memory[..luma].fill(pts as u8);
                    memory[luma..].fill(128);
                    let (width, height) = if empty {
                        (0, 0)
                    } else {
                        (pool.width, pool.height)
                    };
                    return Some(HwFrame {
                        buffer: HwBufferId(slot as u64),
                        width,
                        height,
                        pixel_format: self.config.pixel_format,
                        planes: [
                            HwPlane {
                                addr: encode_addr(self.id, slot, 0),
                                stride: pool.stride,
                            },
                            HwPlane {
                                addr: encode_addr(self.id, slot, luma),
                                stride: pool.stride,
                            },
                        ],
                        channel: 0,
                        pts,
                    });
                }
            }
            if self.aborted.load(Ordering::Acquire) {
                return None;
            }
            thread::sleep(POLL);
        }
    }
}

fn lock_state<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw_adapter::session_create_info;
    use crate::{Codec, DecodeParams, FieldOrder, VideoStreamInfo};

    #[derive(Default)]
    struct EventLog(Mutex<Vec<AccelEvent>>);

    impl AccelCallback for EventLog {
        fn on_event(&self, event: AccelEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    impl EventLog {
        fn wait_for(&self, count: usize) -> Vec<AccelEvent> {
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                let events = self.0.lock().unwrap().clone();
                if events.len() >= count {
                    return events;
                }
                assert!(Instant::now() < deadline, "only saw {events:?}");
                thread::sleep(POLL);
            }
        }
    }

    fn open_session(sim: &SimAccelerator) -> (Arc<dyn AccelSession>, Arc<EventLog>, SessionCreateInfo) {
        let info = VideoStreamInfo::new(Codec::H264, 32, 16, FieldOrder::Progressive);
        let create = session_create_info(&DecodeParams::default(), &info).unwrap();
        let log = Arc::new(EventLog::default());
        let session = sim.create_session(&create, log.clone()).unwrap();
        (session, log, create)
    }

    #[test]
    fn first_packet_reports_sequence_then_frames_follow_start() {
        let sim = SimAccelerator::default();
        let (session, log, mut create) = open_session(&sim);
        session.set_output_alignment(64).unwrap();

        let data = [1u8; 8];
        assert_eq!(session.feed(EsPacket::new(&data, 0), POLL * 100), CallStatus::Ok);
        let events = log.wait_for(1);
        assert!(matches!(events[0], AccelEvent::Sequence(seq) if seq.min_output_buf_num == 4));

        create.output_buf_num = 5;
        session.start(&create).unwrap();
        assert_eq!(session.feed(EsPacket::new(&data, 7), POLL * 100), CallStatus::Ok);
        let events = log.wait_for(2);
        let AccelEvent::NewFrame(frame) = events[1] else {
            panic!("expected a frame, got {:?}", events[1]);
        };
        assert_eq!(frame.pts, 7);
        assert_eq!(frame.planes[0].stride, 64);

        let mut luma = [0u8; 4];
        session.copy_to_host(frame.planes[0].addr, &mut luma).unwrap();
        assert_eq!(luma, [7; 4]);
        let mut chroma = [0u8; 4];
        session.copy_to_host(frame.planes[1].addr, &mut chroma).unwrap();
        assert_eq!(chroma, [128; 4]);

        assert_eq!(session.stop(POLL), CallStatus::Ok);
        session.destroy().unwrap();
        assert!(session.destroy().is_err());
        assert_eq!(sim.counters().sessions_destroyed, 1);
    }

    #[test]
    fn double_release_is_counted() {
        let sim = SimAccelerator::default();
        let (session, _log, create) = open_session(&sim);
        session.start(&create).unwrap();
        session.add_reference(HwBufferId(1)).unwrap();
        session.release_reference(HwBufferId(1)).unwrap();
        assert!(session.release_reference(HwBufferId(1)).is_err());
        assert!(session.add_reference(HwBufferId(99)).is_err());

        let counters = sim.counters();
        assert_eq!((counters.add_refs, counters.releases), (1, 1));
        assert_eq!(counters.double_releases, 1);
        session.abort();
    }

    #[test]
    fn scripted_feed_results() {
        let sim = SimAccelerator::default();
        sim.stall_feed(3, 2);
        sim.fail_feed(4, -12);
        sim.stall_eos();
        let (session, _log, _create) = open_session(&sim);
        let data = [1u8; 8];

        assert_eq!(session.feed(EsPacket::new(&data, 3), POLL), CallStatus::Timeout);
        assert_eq!(session.feed(EsPacket::new(&data, 3), POLL), CallStatus::Timeout);
        assert_eq!(session.feed(EsPacket::new(&data, 3), POLL * 100), CallStatus::Ok);
        assert_eq!(session.feed(EsPacket::new(&data, 4), POLL), CallStatus::Failed(-12));
        assert_eq!(session.feed(EsPacket::eos(), POLL), CallStatus::Timeout);
        assert_eq!(sim.counters().feed_timeouts, 3);

        session.abort();
        assert_eq!(session.feed(EsPacket::new(&data, 5), POLL), CallStatus::Failed(-1));
        assert_eq!(sim.counters().sessions_aborted, 1);
    }

    #[test]
    fn session_limit_refuses_creation() {
        let sim = SimAccelerator::default();
        sim.limit_sessions(1);
        let (session, _log, create) = open_session(&sim);
        assert!(matches!(
            sim.create_session(&create, Arc::new(EventLog::default())),
            Err(DecodeError::SessionCreate(_))
        ));
        session.abort();
        assert_eq!(sim.counters().sessions_created, 1);
    }
}
