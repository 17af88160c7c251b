pub mod accel;
mod buffers;
mod config;
mod contract;
mod engine;
mod frame;
mod hw_adapter;
mod pipeline;
pub mod sim;
mod sink;
mod software;
mod transform;

pub use buffers::{DrainOutcome, PendingBuffers};
pub use config::{
    DecodeParams, DrainPolicy, FeedRetryPolicy, MAX_OUTPUT_BUFFERS, OutputTarget,
    STRIDE_ALIGN_FOR_SCALER,
};
pub use contract::{
    Codec, ColorSpace, DEFAULT_CODED_HEIGHT, DEFAULT_CODED_WIDTH, DecodeError, DecodePath,
    DecoderPreference, DeviceContext, DeviceKind, EsPacket, FieldOrder, PixelFormat, RawFormat,
    SessionState, VideoStreamInfo,
};
pub use engine::{DecodeStats, DecoderEngine};
pub use frame::{
    FrameDescriptor, FrameFlags, FrameInfo, HOST_BUFFER_GRANULE, HostBuffer, Plane,
    PlaneLocation, ReuseToken, plane_bytes, round_up,
};
pub use hw_adapter::{
    DecoderEvent, accel_color_space, bitstream_buffer_size, negotiate_output_buffers,
    session_create_info, translate_event,
};
pub use pipeline::{
    BoundedQueueRx, BoundedQueueTx, QueueRecvError, QueueSendError, QueueStats, bounded_queue,
};
pub use sink::{ChannelSink, OutputSink, SinkItem, channel_sink};
pub use software::{RawVideoBackend, SoftwareBackend, SoftwareCodec};
pub use transform::{
    Nv12Image, PlanarFormat, PlanarFrame, aligned_stride, make_i420_dummy, normalize_to_nv12,
    planar_to_semi_planar, semi_planar_size, yuyv_to_planar,
};
