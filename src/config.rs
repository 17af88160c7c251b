use std::time::Duration;
use std::{fmt, fmt::Display};

use crate::DecoderPreference;

pub const STRIDE_ALIGN_FOR_SCALER: u32 = 128;
pub const MAX_OUTPUT_BUFFERS: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputTarget {
    Device,
    #[default]
    Host,
}

impl Display for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device => f.write_str("device"),
            Self::Host => f.write_str("host"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedRetryPolicy {
    pub attempts: u32,
    pub timeout: Duration,
}

impl Default for FeedRetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Upper bounds for the blocking waits in `close`. `None` waits until the
/// condition holds or the stream aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainPolicy {
    pub eos_timeout: Option<Duration>,
    pub buffers_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct DecodeParams {
    pub device_id: i32,
    pub input_buf_number: u32,
    pub output_buf_number: u32,
    pub output_target: OutputTarget,
    pub reuse_buffers: bool,
    pub apply_stride_align_for_scaler: bool,
    pub flow_depth: u32,
    pub preference: DecoderPreference,
    pub max_image_size: (u32, u32),
    pub retry: FeedRetryPolicy,
    pub eos_feed_timeout: Duration,
    pub stop_timeout: Duration,
    pub frame_info_poll: Duration,
    pub drain: DrainPolicy,
}

impl DecodeParams {
    #[must_use]
    pub fn new(output_target: OutputTarget) -> Self {
        Self {
            output_target,
            ..Self::default()
        }
    }

    pub fn stride_align(&self) -> u32 {
        if self.apply_stride_align_for_scaler {
            STRIDE_ALIGN_FOR_SCALER
        } else {
            1
        }
    }

    pub fn reuses_device_buffers(&self) -> bool {
        self.reuse_buffers && self.output_target == OutputTarget::Device
    }
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            device_id: 0,
            input_buf_number: 2,
            output_buf_number: 3,
            output_target: OutputTarget::Host,
            reuse_buffers: false,
            apply_stride_align_for_scaler: false,
            flow_depth: 0,
            preference: DecoderPreference::Auto,
            max_image_size: (7680, 4320),
            retry: FeedRetryPolicy::default(),
            eos_feed_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(10),
            frame_info_poll: Duration::from_millis(5),
            drain: DrainPolicy::default(),
        }
    }
}

impl Display for DecodeParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DecodeParams(device_id={}, input_bufs={}, output_bufs={}, target={}, reuse={}, stride_align={}, preference={:?})",
            self.device_id,
            self.input_buf_number,
            self.output_buf_number,
            self.output_target,
            self.reuse_buffers,
            self.stride_align(),
            self.preference
        )
    }
}

pub(crate) fn should_report_timing() -> bool {
    std::env::var("VIDEO_HW_DECODE_TIMING")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_decoder_contract() {
        let params = DecodeParams::default();
        assert_eq!(params.retry.attempts, 3);
        assert_eq!(params.retry.timeout, Duration::from_secs(10));
        assert_eq!(params.max_image_size, (7680, 4320));
        assert_eq!(params.stride_align(), 1);
        assert_eq!(params.output_target, OutputTarget::Host);
    }

    #[test]
    fn reuse_requires_device_target() {
        let mut params = DecodeParams::new(OutputTarget::Host);
        params.reuse_buffers = true;
        assert!(!params.reuses_device_buffers());
        params.output_target = OutputTarget::Device;
        assert!(params.reuses_device_buffers());
        params.apply_stride_align_for_scaler = true;
        assert_eq!(params.stride_align(), 128);
    }
}
