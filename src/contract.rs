use std::{fmt, fmt::Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawFormat {
    I420,
    Yuyv422,
}

impl Display for RawFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I420 => f.write_str("i420"),
            Self::Yuyv422 => f.write_str("yuyv422"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    H264,
    Hevc,
    Mjpeg,
    RawVideo(RawFormat),
}

impl Codec {
    pub fn from_str(v: &str) -> Result<Self, DecodeError> {
        match v.to_ascii_lowercase().as_str() {
            "h264" | "avc" => Ok(Self::H264),
            "hevc" | "h265" => Ok(Self::Hevc),
            "mjpeg" | "jpeg" | "jpg" => Ok(Self::Mjpeg),
            "i420" | "yuv420p" => Ok(Self::RawVideo(RawFormat::I420)),
            "yuyv" | "yuyv422" => Ok(Self::RawVideo(RawFormat::Yuyv422)),
            other => Err(DecodeError::UnsupportedConfig(format!(
                "unknown codec name: {other}"
            ))),
        }
    }

    pub fn is_still_image(self) -> bool {
        matches!(self, Self::Mjpeg)
    }
}

impl Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::H264 => f.write_str("h264"),
            Self::Hevc => f.write_str("hevc"),
            Self::Mjpeg => f.write_str("mjpeg"),
            Self::RawVideo(format) => write!(f, "rawvideo({format})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpace {
    Bt709,
    Bt470Bg,
    Smpte170m,
    Bt2020Ncl,
    Bt2020Cl,
    #[default]
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldOrder {
    Progressive,
    TopFirst,
    BottomFirst,
    TopBottom,
    BottomTop,
    #[default]
    Unknown,
}

impl FieldOrder {
    pub fn is_progressive(self) -> bool {
        !matches!(
            self,
            Self::TopFirst | Self::BottomFirst | Self::TopBottom | Self::BottomTop
        )
    }
}

pub const DEFAULT_CODED_WIDTH: u32 = 1920;
pub const DEFAULT_CODED_HEIGHT: u32 = 1080;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoStreamInfo {
    pub codec: Codec,
    pub coded_width: u32,
    pub coded_height: u32,
    pub progressive: bool,
    pub color_space: ColorSpace,
    pub extra_data: Vec<u8>,
}

impl VideoStreamInfo {
    #[must_use]
    pub fn new(codec: Codec, width: u32, height: u32, field_order: FieldOrder) -> Self {
        Self {
            codec,
            coded_width: if width == 0 { DEFAULT_CODED_WIDTH } else { width },
            coded_height: if height == 0 {
                DEFAULT_CODED_HEIGHT
            } else {
                height
            },
            progressive: field_order.is_progressive(),
            color_space: ColorSpace::Unspecified,
            extra_data: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_color_space(mut self, color_space: ColorSpace) -> Self {
        self.color_space = color_space;
        self
    }

    #[must_use]
    pub fn with_extra_data(mut self, extra_data: Vec<u8>) -> Self {
        self.extra_data = extra_data;
        self
    }
}

impl Display for VideoStreamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VideoStreamInfo(codec={}, coded={}x{}, progressive={}, color_space={:?}, extra_data={}B)",
            self.codec,
            self.coded_width,
            self.coded_height,
            self.progressive,
            self.color_space,
            self.extra_data.len()
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EsPacket<'a> {
    pub data: &'a [u8],
    pub pts: i64,
    pub eos: bool,
}

impl<'a> EsPacket<'a> {
    pub fn new(data: &'a [u8], pts: i64) -> Self {
        Self {
            data,
            pts,
            eos: false,
        }
    }

    pub fn eos() -> EsPacket<'static> {
        EsPacket {
            data: &[],
            pts: 0,
            eos: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Nv12,
    Nv21,
    Invalid,
}

impl PixelFormat {
    pub fn planes(self) -> usize {
        match self {
            Self::Nv12 | Self::Nv21 => 2,
            Self::Invalid => 0,
        }
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nv12 => f.write_str("nv12"),
            Self::Nv21 => f.write_str("nv21"),
            Self::Invalid => f.write_str("invalid"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Host,
    Accelerator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceContext {
    pub kind: DeviceKind,
    pub device_id: i32,
    pub ddr_channel: i32,
}

impl DeviceContext {
    pub fn host() -> Self {
        Self {
            kind: DeviceKind::Host,
            device_id: -1,
            ddr_channel: 0,
        }
    }

    pub fn accelerator(device_id: i32, ddr_channel: i32) -> Self {
        Self {
            kind: DeviceKind::Accelerator,
            device_id,
            ddr_channel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Created,
    Running,
    Restarting,
    Draining,
    Destroyed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Destroyed)
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Created => "created",
            Self::Running => "running",
            Self::Restarting => "restarting",
            Self::Draining => "draining",
            Self::Destroyed => "destroyed",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecoderPreference {
    #[default]
    Auto,
    Hardware,
    Software,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePath {
    HardwareVideo,
    HardwareImage,
    Software,
}

impl Display for DecodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HardwareVideo => f.write_str("hardware-video"),
            Self::HardwareImage => f.write_str("hardware-image"),
            Self::Software => f.write_str("software"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(Codec),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no output sink attached")]
    NoSink,
    #[error("session create failed: {0}")]
    SessionCreate(String),
    #[error("feed failed: {0}")]
    FeedFailed(String),
    #[error("feed timed out: {0}")]
    FeedTimeout(String),
    #[error("stream aborted")]
    Aborted,
    #[error("stream closed")]
    Closed,
    #[error("allocation failed: {0}")]
    AllocationFailed(String),
    #[error("device copy failed: {0}")]
    DeviceCopy(String),
    #[error("backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dimensions_fall_back_to_full_hd() {
        let info = VideoStreamInfo::new(Codec::H264, 0, 0, FieldOrder::Unknown);
        assert_eq!(info.coded_width, 1920);
        assert_eq!(info.coded_height, 1080);
        assert!(info.progressive);
    }

    #[test]
    fn interlaced_field_orders_are_not_progressive() {
        assert!(!FieldOrder::TopFirst.is_progressive());
        assert!(!FieldOrder::BottomTop.is_progressive());
        assert!(FieldOrder::Progressive.is_progressive());
        let info = VideoStreamInfo::new(Codec::Hevc, 720, 576, FieldOrder::TopBottom);
        assert!(!info.progressive);
        assert_eq!((info.coded_width, info.coded_height), (720, 576));
    }

    #[test]
    fn codec_names_parse() {
        assert_eq!(Codec::from_str("AVC").unwrap(), Codec::H264);
        assert_eq!(Codec::from_str("h265").unwrap(), Codec::Hevc);
        assert_eq!(
            Codec::from_str("yuyv").unwrap(),
            Codec::RawVideo(RawFormat::Yuyv422)
        );
        assert!(Codec::from_str("vp9").is_err());
        assert!(Codec::Mjpeg.is_still_image());
        assert!(!Codec::H264.is_still_image());
    }
}
