//! Media samples and stream segments.
//!
//! A [`Sample`] is a fixed-size byte buffer plus timing metadata. Samples
//! handed out by an allocator carry a [`Recycle`] handle and return their
//! storage to the allocator when dropped.

use std::sync::Arc;

use bytes::BytesMut;

use crate::clock::RefTime;
use crate::error::{Error, Result};
use crate::format::MediaType;

/// Receives sample storage back when a pooled sample is dropped.
pub trait Recycle: Send + Sync {
    fn recycle(&self, buffer: BytesMut);
}

/// Per-sample flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SampleFlags(u32);

impl SampleFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Sample can be decoded without reference to earlier samples.
    pub const SYNC_POINT: Self = Self(1 << 0);
    /// Sample is needed for decoding but must not be presented.
    pub const PREROLL: Self = Self(1 << 1);
    /// Sample follows a gap in the stream.
    pub const DISCONTINUITY: Self = Self(1 << 2);

    #[inline]
    pub const fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) == flag.0
    }

    #[inline]
    pub const fn insert(self, flag: Self) -> Self {
        Self(self.0 | flag.0)
    }

    #[inline]
    pub const fn remove(self, flag: Self) -> Self {
        Self(self.0 & !flag.0)
    }

    #[inline]
    pub const fn set(self, flag: Self, on: bool) -> Self {
        if on { self.insert(flag) } else { self.remove(flag) }
    }
}

// ============================================================================
// Sample
// ============================================================================

/// A unit of media data with timing and flags.
///
/// The buffer has a fixed `size()`; `actual_len()` bytes of it hold valid
/// data. Ownership moves into `receive` and the sample is dropped (and
/// recycled) once the receiving filter is done with it.
pub struct Sample {
    buffer: BytesMut,
    actual_len: usize,
    time: Option<(RefTime, RefTime)>,
    media_time: Option<(i64, i64)>,
    flags: SampleFlags,
    media_type: Option<MediaType>,
    recycler: Option<Arc<dyn Recycle>>,
}

impl Sample {
    /// Create an unpooled, zero-filled sample of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self::from_buffer(BytesMut::zeroed(size), None)
    }

    /// Create an unpooled sample holding `data`.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self::from_buffer(BytesMut::from(&data[..]), None)
    }

    /// Create a sample whose storage goes back to `recycler` on drop.
    ///
    /// The buffer's current length is the sample's size.
    pub fn with_recycler(buffer: BytesMut, recycler: Arc<dyn Recycle>) -> Self {
        Self::from_buffer(buffer, Some(recycler))
    }

    fn from_buffer(buffer: BytesMut, recycler: Option<Arc<dyn Recycle>>) -> Self {
        Self {
            actual_len: buffer.len(),
            buffer,
            time: None,
            media_time: None,
            flags: SampleFlags::NONE,
            media_type: None,
            recycler,
        }
    }

    /// Valid data.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.actual_len]
    }

    /// The whole buffer, for writing. Call `set_actual_len` afterwards.
    #[inline]
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..]
    }

    /// Buffer capacity in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn actual_len(&self) -> usize {
        self.actual_len
    }

    pub fn set_actual_len(&mut self, len: usize) -> Result<()> {
        if len > self.buffer.len() {
            return Err(Error::InvalidArgument(format!(
                "actual length {} exceeds buffer size {}",
                len,
                self.buffer.len()
            )));
        }
        self.actual_len = len;
        Ok(())
    }

    /// Copy `data` into the buffer and set the actual length.
    pub fn fill(&mut self, data: &[u8]) -> Result<()> {
        self.set_actual_len(data.len())?;
        self.buffer[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Presentation time range `[start, stop)` in stream time.
    #[inline]
    pub fn time(&self) -> Option<(RefTime, RefTime)> {
        self.time
    }

    /// Set or clear the presentation time. A missing stop time is stored as
    /// `start + 1`.
    pub fn set_time(&mut self, start: Option<RefTime>, stop: Option<RefTime>) {
        self.time = start.map(|start| (start, stop.unwrap_or(start + RefTime::from_units(1))));
    }

    /// Builder form of `set_time`.
    pub fn with_time(mut self, start: RefTime, stop: RefTime) -> Self {
        self.time = Some((start, stop));
        self
    }

    /// Media time range (frame or byte positions).
    #[inline]
    pub fn media_time(&self) -> Option<(i64, i64)> {
        self.media_time
    }

    pub fn set_media_time(&mut self, media_time: Option<(i64, i64)>) {
        self.media_time = media_time;
    }

    #[inline]
    pub fn flags(&self) -> SampleFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: SampleFlags) {
        self.flags = flags;
    }

    #[inline]
    pub fn is_sync_point(&self) -> bool {
        self.flags.contains(SampleFlags::SYNC_POINT)
    }

    pub fn set_sync_point(&mut self, on: bool) {
        self.flags = self.flags.set(SampleFlags::SYNC_POINT, on);
    }

    #[inline]
    pub fn is_preroll(&self) -> bool {
        self.flags.contains(SampleFlags::PREROLL)
    }

    pub fn set_preroll(&mut self, on: bool) {
        self.flags = self.flags.set(SampleFlags::PREROLL, on);
    }

    #[inline]
    pub fn is_discontinuity(&self) -> bool {
        self.flags.contains(SampleFlags::DISCONTINUITY)
    }

    pub fn set_discontinuity(&mut self, on: bool) {
        self.flags = self.flags.set(SampleFlags::DISCONTINUITY, on);
    }

    /// A media type change that takes effect with this sample.
    #[inline]
    pub fn media_type(&self) -> Option<&MediaType> {
        self.media_type.as_ref()
    }

    pub fn set_media_type(&mut self, media_type: Option<MediaType>) {
        self.media_type = media_type;
    }

    /// Builder form of `set_media_type`.
    pub fn with_media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = Some(media_type);
        self
    }

    /// Copy timing and flags from `other`. Data and media type are not copied.
    pub fn copy_properties_from(&mut self, other: &Sample) {
        self.time = other.time;
        self.media_time = other.media_time;
        self.flags = other.flags;
    }

    /// Whether the sample came from an allocator.
    #[inline]
    pub fn is_pooled(&self) -> bool {
        self.recycler.is_some()
    }
}

impl Drop for Sample {
    fn drop(&mut self) {
        if let Some(recycler) = self.recycler.take() {
            recycler.recycle(std::mem::take(&mut self.buffer));
        }
    }
}

impl std::fmt::Debug for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sample")
            .field("size", &self.size())
            .field("actual_len", &self.actual_len)
            .field("time", &self.time)
            .field("flags", &self.flags)
            .field("pooled", &self.is_pooled())
            .finish()
    }
}

// ============================================================================
// Segment
// ============================================================================

/// A playback segment announced by `NewSegment`.
///
/// Samples that follow are timestamped relative to `start` and should be
/// played at `rate`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    pub start: RefTime,
    pub stop: RefTime,
    pub rate: f64,
}

impl Segment {
    pub fn new(start: RefTime, stop: RefTime, rate: f64) -> Self {
        Self { start, stop, rate }
    }
}

impl Default for Segment {
    fn default() -> Self {
        Self {
            start: RefTime::ZERO,
            stop: RefTime::MAX,
            rate: 1.0,
        }
    }
}
