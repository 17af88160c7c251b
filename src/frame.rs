use std::sync::{Arc, Mutex};
use std::{fmt, fmt::Display};

use crate::accel::{AccelSession, DeviceMemory, HwBufferId};
use crate::buffers::PendingBuffers;
use crate::{DecodeError, DeviceContext, PixelFormat};

pub const HOST_BUFFER_GRANULE: usize = 64 * 1024;

pub fn round_up(value: usize, align: usize) -> usize {
    if align <= 1 {
        return value;
    }
    value.div_ceil(align).saturating_mul(align)
}

pub fn plane_bytes(format: PixelFormat, plane: usize, stride: u32, height: u32) -> usize {
    let stride = stride as usize;
    let height = height as usize;
    match (format, plane) {
        (PixelFormat::Nv12 | PixelFormat::Nv21, 0) => stride * height,
        (PixelFormat::Nv12 | PixelFormat::Nv21, 1) => stride * height.div_ceil(2),
        _ => 0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBuffer {
    data: Vec<u8>,
}

impl HostBuffer {
    pub fn alloc(bytes: usize) -> Result<Self, DecodeError> {
        Self::alloc_exact(round_up(bytes, HOST_BUFFER_GRANULE))
    }

    pub fn alloc_exact(size: usize) -> Result<Self, DecodeError> {
        let mut data = Vec::new();
        data.try_reserve_exact(size).map_err(|err| {
            DecodeError::AllocationFailed(format!("host buffer of {size} bytes: {err}"))
        })?;
        data.resize(size, 0);
        Ok(Self { data })
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// One held reference on an accelerator output buffer.
///
/// The reference is returned exactly once: either by [`ReuseToken::release`],
/// which consumes the token, or when the token is dropped.
pub struct ReuseToken {
    session: Arc<dyn AccelSession>,
    buffer: HwBufferId,
    pending: Arc<PendingBuffers>,
    released: bool,
}

impl ReuseToken {
    pub(crate) fn acquire(
        session: Arc<dyn AccelSession>,
        buffer: HwBufferId,
        pending: Arc<PendingBuffers>,
    ) -> Result<Self, DecodeError> {
        session.add_reference(buffer)?;
        pending.acquire();
        Ok(Self {
            session,
            buffer,
            pending,
            released: false,
        })
    }

    pub fn buffer(&self) -> HwBufferId {
        self.buffer
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.session.release_reference(self.buffer) {
            tracing::warn!(buffer = %self.buffer, error = %err, "release reference failed");
        }
        self.pending.release();
    }
}

impl Drop for ReuseToken {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for ReuseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReuseToken")
            .field("buffer", &self.buffer)
            .field("released", &self.released)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneLocation {
    Device(u64),
    Host { offset: usize, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plane {
    pub stride: u32,
    pub location: PlaneLocation,
}

#[derive(Debug)]
pub struct FrameDescriptor {
    pub frame_id: u64,
    pub pts: i64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub ctx: DeviceContext,
    pub planes: Vec<Plane>,
    host: Option<HostBuffer>,
    device: Option<Box<dyn DeviceMemory>>,
    reuse: Mutex<Option<ReuseToken>>,
}

impl FrameDescriptor {
    pub(crate) fn new(
        frame_id: u64,
        pts: i64,
        width: u32,
        height: u32,
        format: PixelFormat,
        ctx: DeviceContext,
    ) -> Self {
        Self {
            frame_id,
            pts,
            width,
            height,
            format,
            ctx,
            planes: Vec::with_capacity(format.planes()),
            host: None,
            device: None,
            reuse: Mutex::new(None),
        }
    }

    pub(crate) fn with_host(mut self, host: HostBuffer) -> Self {
        self.host = Some(host);
        self
    }

    pub(crate) fn with_device_memory(mut self, memory: Box<dyn DeviceMemory>) -> Self {
        self.device = Some(memory);
        self
    }

    pub(crate) fn with_reuse_token(self, token: ReuseToken) -> Self {
        *lock_token(&self.reuse) = Some(token);
        self
    }

    pub fn plane_bytes(&self, plane: usize) -> usize {
        self.planes
            .get(plane)
            .map(|p| plane_bytes(self.format, plane, p.stride, self.height))
            .unwrap_or(0)
    }

    pub fn bytes(&self) -> usize {
        (0..self.planes.len()).map(|i| self.plane_bytes(i)).sum()
    }

    pub fn host_data(&self) -> Option<&[u8]> {
        self.host.as_ref().map(HostBuffer::as_slice)
    }

    pub fn plane_data(&self, plane: usize) -> Option<&[u8]> {
        let host = self.host.as_ref()?;
        match self.planes.get(plane)?.location {
            PlaneLocation::Host { offset, len } => host.as_slice().get(offset..offset + len),
            PlaneLocation::Device(_) => None,
        }
    }

    pub fn device_memory(&self) -> Option<&dyn DeviceMemory> {
        self.device.as_deref()
    }

    pub fn is_reused(&self) -> bool {
        lock_token(&self.reuse).is_some()
    }

    pub fn take_reuse_token(&self) -> Option<ReuseToken> {
        lock_token(&self.reuse).take()
    }
}

impl Display for FrameDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame(id={}, pts={}, {}x{}, {}, {:?})",
            self.frame_id, self.pts, self.width, self.height, self.format, self.ctx.kind
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags {
    pub invalid: bool,
}

#[derive(Debug, Default)]
pub struct FrameInfo {
    pub timestamp: i64,
    pub flags: FrameFlags,
    pub frame: Option<Arc<FrameDescriptor>>,
}

impl FrameInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_invalid(&self) -> bool {
        self.flags.invalid
    }
}

fn lock_token(mutex: &Mutex<Option<ReuseToken>>) -> std::sync::MutexGuard<'_, Option<ReuseToken>> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_to_granule() {
        assert_eq!(round_up(1, HOST_BUFFER_GRANULE), HOST_BUFFER_GRANULE);
        assert_eq!(round_up(HOST_BUFFER_GRANULE, HOST_BUFFER_GRANULE), HOST_BUFFER_GRANULE);
        assert_eq!(round_up(65_537, HOST_BUFFER_GRANULE), 2 * HOST_BUFFER_GRANULE);
        assert_eq!(round_up(33, 1), 33);
        assert_eq!(round_up(130, 128), 256);
    }

    #[test]
    fn host_buffer_is_granule_sized() {
        let buffer = HostBuffer::alloc(1920 * 1080 * 3 / 2).unwrap();
        assert_eq!(buffer.len() % HOST_BUFFER_GRANULE, 0);
        assert!(buffer.len() >= 1920 * 1080 * 3 / 2);
    }

    #[test]
    fn nv12_plane_sizes() {
        assert_eq!(plane_bytes(PixelFormat::Nv12, 0, 128, 64), 128 * 64);
        assert_eq!(plane_bytes(PixelFormat::Nv12, 1, 128, 64), 128 * 32);
        assert_eq!(plane_bytes(PixelFormat::Invalid, 0, 128, 64), 0);
    }

    #[test]
    fn host_planes_slice_the_buffer() {
        let mut host = HostBuffer::from_vec(vec![0; 6]);
        host.as_mut_slice()[4] = 9;
        let mut frame =
            FrameDescriptor::new(0, 0, 2, 2, PixelFormat::Nv12, DeviceContext::host()).with_host(host);
        frame.planes.push(Plane {
            stride: 2,
            location: PlaneLocation::Host { offset: 0, len: 4 },
        });
        frame.planes.push(Plane {
            stride: 2,
            location: PlaneLocation::Host { offset: 4, len: 2 },
        });
        assert_eq!(frame.bytes(), 6);
        assert_eq!(frame.plane_data(1), Some(&[9_u8, 0][..]));
        assert!(!frame.is_reused());
        assert!(frame.take_reuse_token().is_none());
    }
}
