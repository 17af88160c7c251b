use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::accel::{
    AccelCallback, AccelCodec, AccelColorSpace, AccelEvent, AccelPixelFormat, AccelSession,
    Accelerator, CallStatus, HwFrame, SequenceInfo, SessionCreateInfo, SessionProfile,
};
use crate::buffers::{DrainOutcome, wait_for_flag};
use crate::config::{DecodeParams, MAX_OUTPUT_BUFFERS};
use crate::{Codec, ColorSpace, DecodeError, EsPacket, PixelFormat, VideoStreamInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderEvent {
    FrameReady(HwFrame),
    InvalidImage { pts: i64 },
    SequenceChanged(SequenceInfo),
    FrameCorrupted { frame_number: u64, frame_count: u64 },
    RecoverableReset,
    FatalReset,
    OutOfMemory,
    EosAcknowledged,
}

pub(crate) trait DecoderEventHandler: Send + Sync {
    fn on_decoder_event(&self, generation: u64, event: DecoderEvent);
}

pub fn translate_event(event: AccelEvent) -> Option<DecoderEvent> {
    match event {
        AccelEvent::NewFrame(frame) => Some(DecoderEvent::FrameReady(frame)),
        AccelEvent::ImageDecodeFailed { pts } => Some(DecoderEvent::InvalidImage { pts }),
        AccelEvent::Sequence(seq) => Some(DecoderEvent::SequenceChanged(seq)),
        AccelEvent::Eos => Some(DecoderEvent::EosAcknowledged),
        AccelEvent::SwReset => Some(DecoderEvent::RecoverableReset),
        AccelEvent::HwReset | AccelEvent::AbortError => Some(DecoderEvent::FatalReset),
        AccelEvent::OutOfMemory => Some(DecoderEvent::OutOfMemory),
        AccelEvent::StreamCorrupt {
            frame_number,
            frame_count,
        } => Some(DecoderEvent::FrameCorrupted {
            frame_number,
            frame_count,
        }),
        AccelEvent::Unknown(code) => {
            tracing::error!(code, "unsupported accelerator event");
            None
        }
    }
}

/// Callback registered with one accelerator session. Holds the engine weakly
/// so a session outliving its stream cannot keep the stream alive.
struct CallbackBridge {
    generation: u64,
    handler: Weak<dyn DecoderEventHandler>,
}

impl AccelCallback for CallbackBridge {
    fn on_event(&self, event: AccelEvent) {
        let Some(event) = translate_event(event) else {
            return;
        };
        match self.handler.upgrade() {
            Some(handler) => handler.on_decoder_event(self.generation, event),
            None => {
                tracing::debug!(generation = self.generation, "event after stream teardown dropped");
            }
        }
    }
}

pub fn accel_codec(codec: Codec) -> Option<AccelCodec> {
    match codec {
        Codec::H264 => Some(AccelCodec::H264),
        Codec::Hevc => Some(AccelCodec::Hevc),
        Codec::Mjpeg => Some(AccelCodec::Jpeg),
        Codec::RawVideo(_) => None,
    }
}

pub fn profile_for(codec: Codec) -> SessionProfile {
    if codec.is_still_image() {
        SessionProfile::StillImage
    } else {
        SessionProfile::Video
    }
}

pub fn accel_color_space(color_space: ColorSpace) -> AccelColorSpace {
    match color_space {
        ColorSpace::Bt709 => AccelColorSpace::Bt709,
        ColorSpace::Bt2020Ncl | ColorSpace::Bt2020Cl => AccelColorSpace::Bt2020,
        ColorSpace::Bt470Bg | ColorSpace::Smpte170m => AccelColorSpace::Bt601,
        ColorSpace::Unspecified => AccelColorSpace::Bt709,
    }
}

pub fn pixel_format(format: AccelPixelFormat) -> PixelFormat {
    match format {
        AccelPixelFormat::Nv12 => PixelFormat::Nv12,
        AccelPixelFormat::Nv21 => PixelFormat::Nv21,
        AccelPixelFormat::Other(_) => PixelFormat::Invalid,
    }
}

const BITSTREAM_PADDING: usize = 128;

pub fn bitstream_buffer_size(width: u32, height: u32) -> usize {
    (width as usize) * (height as usize) * 3 / 2 / 2 + BITSTREAM_PADDING
}

pub fn session_create_info(
    params: &DecodeParams,
    info: &VideoStreamInfo,
) -> Result<SessionCreateInfo, DecodeError> {
    let codec = accel_codec(info.codec).ok_or(DecodeError::UnsupportedCodec(info.codec))?;
    let profile = profile_for(info.codec);
    let color_space = match profile {
        SessionProfile::Video => accel_color_space(info.color_space),
        SessionProfile::StillImage => {
            let (max_width, max_height) = params.max_image_size;
            if info.coded_width > max_width || info.coded_height > max_height {
                return Err(DecodeError::UnsupportedConfig(format!(
                    "image {}x{} exceeds the {max_width}x{max_height} decoder limit",
                    info.coded_width, info.coded_height
                )));
            }
            AccelColorSpace::Bt709
        }
    };
    Ok(SessionCreateInfo {
        profile,
        device_id: params.device_id,
        codec,
        pixel_format: AccelPixelFormat::Nv12,
        color_space,
        width: info.coded_width,
        height: info.coded_height,
        progressive: info.progressive,
        bit_depth_minus8: 0,
        input_buf_num: params.input_buf_number,
        output_buf_num: params.output_buf_number,
        suggested_bitstream_buf_size: bitstream_buffer_size(info.coded_width, info.coded_height),
    })
}

pub fn negotiate_output_buffers(params: &DecodeParams, input_buf_num: u32, min_output: u32) -> u32 {
    let mut wanted = params.output_buf_number;
    if params.reuses_device_buffers() {
        wanted = wanted.saturating_add(params.flow_depth);
    }
    wanted = wanted.saturating_add(input_buf_num);
    let count = if wanted > min_output {
        wanted
    } else {
        min_output.saturating_add(1)
    };
    count.min(MAX_OUTPUT_BUFFERS)
}

pub(crate) struct HardwareAdapter {
    session: Arc<dyn AccelSession>,
    create_info: Mutex<SessionCreateInfo>,
    generation: u64,
    started: AtomicBool,
}

impl HardwareAdapter {
    pub fn create(
        accelerator: &dyn Accelerator,
        params: &DecodeParams,
        info: &VideoStreamInfo,
        generation: u64,
        handler: Weak<dyn DecoderEventHandler>,
    ) -> Result<Self, DecodeError> {
        let create_info = session_create_info(params, info)?;
        if !accelerator.supports(create_info.profile, create_info.codec) {
            return Err(DecodeError::UnsupportedCodec(info.codec));
        }
        let callback = Arc::new(CallbackBridge {
            generation,
            handler,
        });
        let session = accelerator.create_session(&create_info, callback)?;

        // Still-image sessions have no sequence negotiation and accept data
        // right away.
        let started = create_info.profile == SessionProfile::StillImage;
        if create_info.profile == SessionProfile::Video {
            let align = params.stride_align();
            if let Err(err) = session.set_output_alignment(align) {
                tracing::error!(align, error = %err, "failed to set output stride alignment");
                session.abort();
                return Err(err);
            }
        }
        tracing::debug!(
            generation,
            profile = ?create_info.profile,
            codec = ?create_info.codec,
            width = create_info.width,
            height = create_info.height,
            "accelerator session created"
        );
        Ok(Self {
            session,
            create_info: Mutex::new(create_info),
            generation,
            started: AtomicBool::new(started),
        })
    }

    pub fn session(&self) -> Arc<dyn AccelSession> {
        Arc::clone(&self.session)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn wait_started(&self, abort: &AtomicBool, timeout: Duration) -> bool {
        wait_for_flag(&self.started, abort, Some(timeout)) == DrainOutcome::Drained
    }

    pub fn feed_packet(&self, packet: EsPacket<'_>, timeout: Duration) -> CallStatus {
        let limit = lock_state(&self.create_info).suggested_bitstream_buf_size;
        let packet = if !packet.eos && packet.data.len() > limit {
            tracing::warn!(
                len = packet.data.len(),
                limit,
                pts = packet.pts,
                "packet larger than bitstream buffer, truncating"
            );
            EsPacket {
                data: &packet.data[..limit],
                ..packet
            }
        } else {
            packet
        };
        self.session.feed(packet, timeout)
    }

    pub fn on_sequence(&self, params: &DecodeParams, seq: &SequenceInfo) -> Result<(), DecodeError> {
        let start_info = {
            let mut create_info = lock_state(&self.create_info);
            create_info.codec = seq.codec;
            create_info.width = seq.width;
            create_info.height = seq.height;
            create_info.output_buf_num =
                negotiate_output_buffers(params, create_info.input_buf_num, seq.min_output_buf_num);
            create_info.clone()
        };
        tracing::debug!(
            generation = self.generation,
            width = seq.width,
            height = seq.height,
            output_buffers = start_info.output_buf_num,
            "sequence negotiated"
        );
        self.session.start(&start_info)?;
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    pub fn stop(&self, timeout: Duration) -> CallStatus {
        self.session.stop(timeout)
    }

    pub fn destroy(&self) -> Result<(), DecodeError> {
        self.session.destroy()
    }

    pub fn abort(&self) {
        self.session.abort();
    }
}

fn lock_state<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
