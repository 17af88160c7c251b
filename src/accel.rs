//! Primitive surface of a hardware decode accelerator.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::{DecodeError, EsPacket};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HwBufferId(pub u64);

impl fmt::Display for HwBufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hwbuf#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelCodec {
    H264,
    Hevc,
    Jpeg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelPixelFormat {
    Nv12,
    Nv21,
    Other(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelColorSpace {
    Bt601,
    Bt709,
    Bt2020,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionProfile {
    Video,
    StillImage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCreateInfo {
    pub profile: SessionProfile,
    pub device_id: i32,
    pub codec: AccelCodec,
    pub pixel_format: AccelPixelFormat,
    pub color_space: AccelColorSpace,
    pub width: u32,
    pub height: u32,
    pub progressive: bool,
    pub bit_depth_minus8: u32,
    pub input_buf_num: u32,
    pub output_buf_num: u32,
    pub suggested_bitstream_buf_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwPlane {
    pub addr: u64,
    pub stride: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwFrame {
    pub buffer: HwBufferId,
    pub width: u32,
    pub height: u32,
    pub pixel_format: AccelPixelFormat,
    pub planes: [HwPlane; 2],
    pub channel: i32,
    pub pts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceInfo {
    pub codec: AccelCodec,
    pub width: u32,
    pub height: u32,
    pub min_output_buf_num: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccelEvent {
    NewFrame(HwFrame),
    ImageDecodeFailed { pts: i64 },
    Sequence(SequenceInfo),
    Eos,
    SwReset,
    HwReset,
    OutOfMemory,
    AbortError,
    StreamCorrupt { frame_number: u64, frame_count: u64 },
    Unknown(i32),
}

pub trait AccelCallback: Send + Sync {
    fn on_event(&self, event: AccelEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Ok,
    Timeout,
    Failed(i32),
}

pub trait DeviceMemory: Send + Sync + fmt::Debug {
    fn addr(&self) -> u64;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait AccelSession: Send + Sync {
    fn set_output_alignment(&self, align: u32) -> Result<(), DecodeError>;

    fn feed(&self, packet: EsPacket<'_>, timeout: Duration) -> CallStatus;

    fn start(&self, info: &SessionCreateInfo) -> Result<(), DecodeError>;

    fn add_reference(&self, buffer: HwBufferId) -> Result<(), DecodeError>;

    fn release_reference(&self, buffer: HwBufferId) -> Result<(), DecodeError>;

    fn copy_to_host(&self, addr: u64, dst: &mut [u8]) -> Result<(), DecodeError>;

    fn stop(&self, timeout: Duration) -> CallStatus;

    fn destroy(&self) -> Result<(), DecodeError>;

    fn abort(&self);
}

pub trait Accelerator: Send + Sync {
    fn supports(&self, profile: SessionProfile, codec: AccelCodec) -> bool;

    fn create_session(
        &self,
        info: &SessionCreateInfo,
        callback: Arc<dyn AccelCallback>,
    ) -> Result<Arc<dyn AccelSession>, DecodeError>;

    fn upload(&self, device_id: i32, data: &[u8]) -> Result<Box<dyn DeviceMemory>, DecodeError>;
}
