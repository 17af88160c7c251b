use std::sync::Arc;

use crate::accel::Accelerator;
use crate::config::{DecodeParams, OutputTarget};
use crate::engine::{DecodeStats, StreamDecoder};
use crate::frame::{FrameDescriptor, Plane, PlaneLocation};
use crate::sink::{EosLatch, OutputSink, acquire_frame_info};
use crate::transform::{Nv12Image, PlanarFormat, PlanarFrame, normalize_to_nv12};
use crate::{
    Codec, DecodeError, DecodePath, DeviceContext, EsPacket, PixelFormat, RawFormat,
    SessionState, VideoStreamInfo,
};

pub trait SoftwareCodec: Send {
    fn decode(
        &mut self,
        packet: Option<&EsPacket<'_>>,
        frame: &mut PlanarFrame,
    ) -> Result<bool, DecodeError>;
}

pub trait SoftwareBackend: Send + Sync {
    fn supports(&self, codec: Codec) -> bool;

    fn open(&self, info: &VideoStreamInfo) -> Result<Box<dyn SoftwareCodec>, DecodeError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RawVideoBackend;

impl SoftwareBackend for RawVideoBackend {
    fn supports(&self, codec: Codec) -> bool {
        matches!(codec, Codec::RawVideo(_))
    }

    fn open(&self, info: &VideoStreamInfo) -> Result<Box<dyn SoftwareCodec>, DecodeError> {
        let Codec::RawVideo(format) = info.codec else {
            return Err(DecodeError::UnsupportedCodec(info.codec));
        };
        Ok(Box::new(RawVideoCodec {
            format,
            width: info.coded_width as usize,
            height: info.coded_height as usize,
            held: None,
        }))
    }
}

struct RawVideoCodec {
    format: RawFormat,
    width: usize,
    height: usize,
    held: Option<(Vec<u8>, i64)>,
}

impl RawVideoCodec {
    fn picture_size(&self) -> usize {
        match self.format {
            RawFormat::I420 => {
                let chroma = self.width.div_ceil(2) * self.height.div_ceil(2);
                self.width * self.height + 2 * chroma
            }
            RawFormat::Yuyv422 => self.width * 2 * self.height,
        }
    }

    fn unpack(&self, data: &[u8], pts: i64, frame: &mut PlanarFrame) {
        match self.format {
            RawFormat::I420 => {
                frame.reshape(PlanarFormat::Yuv420p, self.width, self.height);
                let luma = self.width * self.height;
                let chroma = frame.data[1].len();
                frame.data[0].copy_from_slice(&data[..luma]);
                frame.data[1].copy_from_slice(&data[luma..luma + chroma]);
                frame.data[2].copy_from_slice(&data[luma + chroma..luma + 2 * chroma]);
            }
            RawFormat::Yuyv422 => {
                frame.reshape(PlanarFormat::Yuyv422, self.width, self.height);
                frame.data[0].copy_from_slice(data);
            }
        }
        frame.pts = pts;
    }
}

impl SoftwareCodec for RawVideoCodec {
    fn decode(
        &mut self,
        packet: Option<&EsPacket<'_>>,
        frame: &mut PlanarFrame,
    ) -> Result<bool, DecodeError> {
        let incoming = match packet {
            Some(packet) => {
                let expected = self.picture_size();
                if packet.data.len() != expected {
                    return Err(DecodeError::InvalidInput(format!(
                        "{} picture needs {expected} bytes, packet has {}",
                        self.format,
                        packet.data.len()
                    )));
                }
                Some((packet.data.to_vec(), packet.pts))
            }
            None => None,
        };
        let ready = std::mem::replace(&mut self.held, incoming);
        match ready {
            Some((data, pts)) => {
                self.unpack(&data, pts, frame);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

pub(crate) struct SoftwareDecoder {
    params: DecodeParams,
    accelerator: Option<Arc<dyn Accelerator>>,
    sink: Arc<dyn OutputSink>,
    codec: Box<dyn SoftwareCodec>,
    frame: PlanarFrame,
    scratch: PlanarFrame,
    interval: u64,
    decoded: u64,
    next_frame_id: u64,
    frames_sent: u64,
    state: SessionState,
    eos: EosLatch,
    warned_host_fallback: bool,
}

impl SoftwareDecoder {
    pub fn open(
        params: DecodeParams,
        backend: &dyn SoftwareBackend,
        accelerator: Option<Arc<dyn Accelerator>>,
        sink: Arc<dyn OutputSink>,
        info: &VideoStreamInfo,
        interval: u64,
    ) -> Result<Self, DecodeError> {
        if !backend.supports(info.codec) {
            return Err(DecodeError::UnsupportedCodec(info.codec));
        }
        let codec = backend.open(info)?;
        Ok(Self {
            params,
            accelerator,
            sink,
            codec,
            frame: PlanarFrame::default(),
            scratch: PlanarFrame::default(),
            interval: interval.max(1),
            decoded: 0,
            next_frame_id: 0,
            frames_sent: 0,
            state: SessionState::Created,
            eos: EosLatch::new(),
            warned_host_fallback: false,
        })
    }

    fn abort(&mut self, reason: &str) {
        self.state = SessionState::Aborted;
        if self.eos.send_once(self.sink.as_ref()) {
            tracing::warn!(reason, "software stream aborted, eos sent downstream");
        }
    }

    fn drain(&mut self) -> Result<(), DecodeError> {
        self.state = SessionState::Draining;
        loop {
            match self.codec.decode(None, &mut self.frame) {
                Ok(true) => self.on_frame()?,
                Ok(false) => break,
                Err(err) => {
                    tracing::warn!(error = %err, "software drain failed");
                    break;
                }
            }
        }
        self.eos.send_once(self.sink.as_ref());
        Ok(())
    }

    fn on_frame(&mut self) -> Result<(), DecodeError> {
        let index = self.decoded;
        self.decoded += 1;
        if index % self.interval != 0 {
            return Ok(());
        }
        if !self.frame.format.is_supported() {
            tracing::error!(format = ?self.frame.format, "unsupported software pixel format, frame dropped");
            return Ok(());
        }
        let image = match normalize_to_nv12(
            &self.frame,
            self.params.stride_align() as usize,
            &mut self.scratch,
        ) {
            Ok(image) => image,
            Err(err @ DecodeError::AllocationFailed(_)) => {
                self.abort("host allocation failed");
                return Err(err);
            }
            Err(err) => {
                tracing::error!(pts = self.frame.pts, error = %err, "frame conversion failed");
                return Ok(());
            }
        };

        let Some(mut info) =
            acquire_frame_info(self.sink.as_ref(), self.params.frame_info_poll, || false)
        else {
            return Ok(());
        };
        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;
        info.timestamp = self.frame.pts;
        let descriptor = match self.describe(frame_id, image) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                tracing::error!(frame_id, error = %err, "frame dropped");
                return Ok(());
            }
        };
        info.frame = Some(Arc::new(descriptor));
        self.sink.send_frame_info(info);
        self.frames_sent += 1;
        Ok(())
    }

    fn describe(&mut self, frame_id: u64, image: Nv12Image) -> Result<FrameDescriptor, DecodeError> {
        let width = to_u32(image.width)?;
        let height = to_u32(image.height)?;
        let stride = to_u32(image.stride)?;
        let luma = image.luma_len();
        let chroma = image.chroma_len();
        let pts = self.frame.pts;

        if self.params.output_target == OutputTarget::Device {
            match &self.accelerator {
                Some(accelerator) => {
                    let memory = accelerator
                        .upload(self.params.device_id, image.data.as_slice())
                        .map_err(|err| DecodeError::DeviceCopy(err.to_string()))?;
                    let base = memory.addr();
                    let ctx = DeviceContext::accelerator(self.params.device_id, 0);
                    let mut descriptor =
                        FrameDescriptor::new(frame_id, pts, width, height, PixelFormat::Nv12, ctx)
                            .with_device_memory(memory);
                    descriptor.planes.push(Plane {
                        stride,
                        location: PlaneLocation::Device(base),
                    });
                    descriptor.planes.push(Plane {
                        stride,
                        location: PlaneLocation::Device(base + luma as u64),
                    });
                    return Ok(descriptor);
                }
                None if !self.warned_host_fallback => {
                    tracing::warn!("device output requested without an accelerator, keeping frames on host");
                    self.warned_host_fallback = true;
                }
                None => {}
            }
        }

        let mut descriptor = FrameDescriptor::new(
            frame_id,
            pts,
            width,
            height,
            PixelFormat::Nv12,
            DeviceContext::host(),
        )
        .with_host(image.data);
        descriptor.planes.push(Plane {
            stride,
            location: PlaneLocation::Host {
                offset: 0,
                len: luma,
            },
        });
        descriptor.planes.push(Plane {
            stride,
            location: PlaneLocation::Host {
                offset: luma,
                len: chroma,
            },
        });
        Ok(descriptor)
    }
}

impl StreamDecoder for SoftwareDecoder {
    fn path(&self) -> DecodePath {
        DecodePath::Software
    }

    fn feed(&mut self, packet: EsPacket<'_>) -> Result<(), DecodeError> {
        match self.state {
            SessionState::Aborted => return Err(DecodeError::Aborted),
            SessionState::Draining | SessionState::Destroyed => return Err(DecodeError::Closed),
            _ => {}
        }
        if packet.eos {
            return self.drain();
        }
        match self.codec.decode(Some(&packet), &mut self.frame) {
            Ok(true) => self.on_frame()?,
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(pts = packet.pts, error = %err, "software decode failed, packet skipped");
            }
        }
        if self.state == SessionState::Created {
            self.state = SessionState::Running;
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.state == SessionState::Destroyed {
            return;
        }
        if matches!(self.state, SessionState::Created | SessionState::Running) {
            let _ = self.drain();
        }
        self.state = SessionState::Destroyed;
        self.eos.send_once(self.sink.as_ref());
        tracing::info!(frames_sent = self.frames_sent, "software decoder closed");
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn stats(&self) -> DecodeStats {
        DecodeStats {
            frames_decoded: self.decoded,
            frames_sent: self.frames_sent,
            restarts: 0,
            pending_buffers: 0,
        }
    }
}

fn to_u32(value: usize) -> Result<u32, DecodeError> {
    u32::try_from(value)
        .map_err(|_| DecodeError::InvalidInput(format!("frame dimension {value} out of range")))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::frame::FrameInfo;
    use crate::transform::make_i420_dummy;
    use crate::FieldOrder;

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<FrameInfo>>,
        eos: Mutex<u32>,
    }

    impl OutputSink for RecordingSink {
        fn create_frame_info(&self) -> Option<FrameInfo> {
            Some(FrameInfo::new())
        }

        fn send_frame_info(&self, info: FrameInfo) {
            self.frames.lock().unwrap().push(info);
        }

        fn send_flow_eos(&self) {
            *self.eos.lock().unwrap() += 1;
        }
    }

    fn i420_packet(width: usize, height: usize, seed: u8) -> Vec<u8> {
        let frame = make_i420_dummy(width, height, seed);
        let mut data = frame.data[0].clone();
        data.extend_from_slice(&frame.data[1]);
        data.extend_from_slice(&frame.data[2]);
        data
    }

    fn open_decoder(params: DecodeParams, interval: u64) -> (SoftwareDecoder, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let info = VideoStreamInfo::new(
            Codec::RawVideo(RawFormat::I420),
            16,
            8,
            FieldOrder::Progressive,
        );
        let decoder =
            SoftwareDecoder::open(params, &RawVideoBackend, None, sink.clone(), &info, interval)
                .unwrap();
        (decoder, sink)
    }

    #[test]
    fn raw_codec_delays_one_picture() {
        let info = VideoStreamInfo::new(
            Codec::RawVideo(RawFormat::I420),
            4,
            2,
            FieldOrder::Progressive,
        );
        let mut codec = RawVideoBackend.open(&info).unwrap();
        let mut frame = PlanarFrame::default();
        let data = i420_packet(4, 2, 1);
        assert!(!codec.decode(Some(&EsPacket::new(&data, 7)), &mut frame).unwrap());
        assert!(codec.decode(Some(&EsPacket::new(&data, 8)), &mut frame).unwrap());
        assert_eq!(frame.pts, 7);
        assert!(codec.decode(None, &mut frame).unwrap());
        assert_eq!(frame.pts, 8);
        assert!(!codec.decode(None, &mut frame).unwrap());
    }

    #[test]
    fn eos_drains_buffered_frame_then_closes() {
        let (mut decoder, sink) = open_decoder(DecodeParams::default(), 1);
        for pts in 0..3 {
            decoder
                .feed(EsPacket::new(&i420_packet(16, 8, pts as u8), pts))
                .unwrap();
        }
        decoder.feed(EsPacket::eos()).unwrap();
        assert_eq!(decoder.feed(EsPacket::new(&[], 9)), Err(DecodeError::Closed));
        decoder.close();
        decoder.close();

        let frames = sink.frames.lock().unwrap();
        let pts: Vec<i64> = frames.iter().map(|info| info.timestamp).collect();
        assert_eq!(pts, vec![0, 1, 2]);
        assert_eq!(*sink.eos.lock().unwrap(), 1);
        let ids: Vec<u64> = frames
            .iter()
            .map(|info| info.frame.as_ref().unwrap().frame_id)
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn malformed_packets_are_skipped() {
        let (mut decoder, sink) = open_decoder(DecodeParams::default(), 1);
        decoder.feed(EsPacket::new(&[1, 2, 3], 0)).unwrap();
        decoder
            .feed(EsPacket::new(&i420_packet(16, 8, 0), 1))
            .unwrap();
        decoder.close();
        assert_eq!(sink.frames.lock().unwrap().len(), 1);
        assert_eq!(decoder.stats().frames_decoded, 1);
    }

    #[test]
    fn frames_are_nv12_with_aligned_stride() {
        let mut params = DecodeParams::default();
        params.apply_stride_align_for_scaler = true;
        let (mut decoder, sink) = open_decoder(params, 1);
        decoder
            .feed(EsPacket::new(&i420_packet(16, 8, 3), 0))
            .unwrap();
        decoder.close();

        let frames = sink.frames.lock().unwrap();
        let frame = frames[0].frame.as_ref().unwrap();
        assert_eq!(frame.format, PixelFormat::Nv12);
        assert_eq!(frame.planes[0].stride, 128);
        assert_eq!(frame.plane_data(0).unwrap().len(), 128 * 8);
        assert_eq!(frame.plane_data(1).unwrap()[..2], [100, 200]);
        assert_eq!(frame.ctx, DeviceContext::host());
    }

    #[test]
    fn sampling_skips_frames_between_intervals() {
        let (mut decoder, sink) = open_decoder(DecodeParams::default(), 2);
        for pts in 0..5 {
            decoder
                .feed(EsPacket::new(&i420_packet(16, 8, 0), pts))
                .unwrap();
        }
        decoder.close();
        let pts: Vec<i64> = sink
            .frames
            .lock()
            .unwrap()
            .iter()
            .map(|info| info.timestamp)
            .collect();
        assert_eq!(pts, vec![0, 2, 4]);
    }
}
