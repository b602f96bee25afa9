//! Sample allocators negotiated between connected pins.
//!
//! A source pin obtains its delivery samples from an [`Allocator`] agreed at
//! connect time. The allocator is sized with [`AllocatorProperties`] while
//! the filter is stopped, committed when streaming starts and decommitted
//! when it stops. [`MemoryAllocator`] is the default heap-backed pool used
//! when the sink pin does not offer its own.
//!
//! ```rust,ignore
//! let allocator = MemoryAllocator::new();
//! allocator.set_properties(&AllocatorProperties::new(4, 4096))?;
//! allocator.commit()?;
//!
//! let mut sample = allocator.get_buffer(None, None, BufferFlags::NONE)?;
//! sample.fill(&payload)?;
//! // Dropping the sample returns its storage to the pool.
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

use crate::clock::RefTime;
use crate::error::{Error, Result};
use crate::sample::{Recycle, Sample};

/// Buffer size used when neither side of a connection states one.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

// ============================================================================
// AllocatorProperties
// ============================================================================

/// Buffer count and layout for an allocator.
///
/// Also used by sink pins to express minimum requirements.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocatorProperties {
    /// Number of buffers.
    pub buffers: usize,
    /// Usable bytes per buffer.
    pub size: usize,
    /// Required alignment; 0 or 1 means unaligned.
    pub align: usize,
    /// Bytes reserved before each buffer.
    pub prefix: usize,
}

impl AllocatorProperties {
    pub fn new(buffers: usize, size: usize) -> Self {
        Self {
            buffers,
            size,
            align: 1,
            prefix: 0,
        }
    }

    pub fn with_align(mut self, align: usize) -> Self {
        self.align = align;
        self
    }

    pub fn with_prefix(mut self, prefix: usize) -> Self {
        self.prefix = prefix;
        self
    }

    /// True if these properties meet `required` buffer count and size.
    pub fn satisfies(&self, required: &AllocatorProperties) -> bool {
        self.buffers >= required.buffers && self.size >= required.size
    }
}

/// Flags for [`Allocator::get_buffer`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct BufferFlags(u32);

impl BufferFlags {
    /// Block until a buffer is free.
    pub const NONE: Self = Self(0);
    /// Fail with `Timeout` instead of blocking.
    pub const NO_WAIT: Self = Self(1 << 0);
    /// The previous frame was skipped by the caller.
    pub const PREV_FRAME_SKIPPED: Self = Self(1 << 1);

    #[inline]
    pub const fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) == flag.0 && flag.0 != 0
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

// ============================================================================
// Allocator Trait
// ============================================================================

/// A pool of samples shared across a connection.
pub trait Allocator: Send + Sync {
    /// Request new properties. Returns what the allocator actually provides.
    ///
    /// Fails while committed or while samples are still outstanding.
    fn set_properties(&self, request: &AllocatorProperties) -> Result<AllocatorProperties>;

    /// Current properties.
    fn properties(&self) -> Result<AllocatorProperties>;

    /// Allocate storage and allow `get_buffer`.
    fn commit(&self) -> Result<()>;

    /// Release free storage and fail further `get_buffer` calls, including
    /// ones currently blocked.
    fn decommit(&self) -> Result<()>;

    /// Take a free sample, blocking unless `NO_WAIT` is set.
    fn get_buffer(
        &self,
        start: Option<RefTime>,
        stop: Option<RefTime>,
        flags: BufferFlags,
    ) -> Result<Sample>;

    fn name(&self) -> &str {
        "allocator"
    }
}

// ============================================================================
// MemoryAllocator
// ============================================================================

/// Statistics about allocator usage.
#[derive(Debug, Clone, Default)]
pub struct AllocatorStats {
    /// Buffers in the pool when committed.
    pub capacity: usize,
    /// Samples currently handed out.
    pub outstanding: usize,
    /// Total number of `get_buffer` successes.
    pub acquisitions: u64,
    /// Acquisitions that had to wait for a buffer.
    pub waits: u64,
}

/// Heap-backed allocator with a fixed number of equally sized buffers.
pub struct MemoryAllocator {
    inner: Arc<PoolInner>,
    name: String,
}

struct PoolInner {
    state: Mutex<PoolState>,
    available: Condvar,
    acquisitions: AtomicU64,
    waits: AtomicU64,
}

#[derive(Default)]
struct PoolState {
    props: Option<AllocatorProperties>,
    committed: bool,
    free: Vec<BytesMut>,
    outstanding: usize,
}

impl MemoryAllocator {
    pub fn new() -> Self {
        Self::with_name("memory-allocator")
    }

    /// Create an allocator with a debug name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState::default()),
                available: Condvar::new(),
                acquisitions: AtomicU64::new(0),
                waits: AtomicU64::new(0),
            }),
            name: name.into(),
        }
    }

    pub fn is_committed(&self) -> bool {
        self.inner.state.lock().unwrap().committed
    }

    pub fn stats(&self) -> AllocatorStats {
        let state = self.inner.state.lock().unwrap();
        AllocatorStats {
            capacity: state.props.map_or(0, |p| p.buffers),
            outstanding: state.outstanding,
            acquisitions: self.inner.acquisitions.load(Ordering::Relaxed),
            waits: self.inner.waits.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Recycle for PoolInner {
    fn recycle(&self, buffer: BytesMut) {
        let mut state = self.state.lock().unwrap();
        state.outstanding = state.outstanding.saturating_sub(1);
        if state.committed {
            state.free.push(buffer);
            self.available.notify_one();
        }
    }
}

impl Allocator for MemoryAllocator {
    fn set_properties(&self, request: &AllocatorProperties) -> Result<AllocatorProperties> {
        let mut state = self.inner.state.lock().unwrap();
        if state.committed {
            return Err(Error::Allocator("cannot change properties while committed".into()));
        }
        if state.outstanding > 0 {
            return Err(Error::Allocator(format!(
                "{} buffers still outstanding",
                state.outstanding
            )));
        }

        let align = request.align.max(1);
        if !align.is_power_of_two() {
            return Err(Error::InvalidArgument(format!(
                "alignment {} is not a power of two",
                align
            )));
        }

        // Round so that prefix + size ends on an alignment boundary.
        let size = (request.size + request.prefix).next_multiple_of(align) - request.prefix;
        let actual = AllocatorProperties {
            buffers: request.buffers.max(1),
            size,
            align,
            prefix: request.prefix,
        };
        state.props = Some(actual);

        debug!(allocator = %self.name, buffers = actual.buffers, size = actual.size, "properties set");
        Ok(actual)
    }

    fn properties(&self) -> Result<AllocatorProperties> {
        self.inner
            .state
            .lock()
            .unwrap()
            .props
            .ok_or_else(|| Error::Allocator("properties not set".into()))
    }

    fn commit(&self) -> Result<()> {
        let mut state = self.inner.state.lock().unwrap();
        let props = state
            .props
            .ok_or_else(|| Error::Allocator("commit before properties were set".into()))?;
        if state.committed {
            return Ok(());
        }

        let missing = props
            .buffers
            .saturating_sub(state.outstanding + state.free.len());
        for _ in 0..missing {
            state.free.push(aligned_buffer(&props));
        }
        state.committed = true;

        debug!(allocator = %self.name, buffers = props.buffers, "committed");
        Ok(())
    }

    fn decommit(&self) -> Result<()> {
        let mut state = self.inner.state.lock().unwrap();
        if !state.committed {
            return Ok(());
        }
        state.committed = false;
        state.free.clear();
        self.inner.available.notify_all();

        debug!(allocator = %self.name, outstanding = state.outstanding, "decommitted");
        Ok(())
    }

    fn get_buffer(
        &self,
        start: Option<RefTime>,
        stop: Option<RefTime>,
        flags: BufferFlags,
    ) -> Result<Sample> {
        let mut state = self.inner.state.lock().unwrap();
        let mut waited = false;
        let mut buffer = loop {
            if !state.committed {
                return Err(Error::NotCommitted);
            }
            if let Some(buffer) = state.free.pop() {
                break buffer;
            }
            if flags.contains(BufferFlags::NO_WAIT) {
                return Err(Error::Timeout);
            }
            if !waited {
                waited = true;
                self.inner.waits.fetch_add(1, Ordering::Relaxed);
                trace!(allocator = %self.name, "waiting for a free buffer");
            }
            state = self.inner.available.wait(state).unwrap();
        };
        state.outstanding += 1;
        let size = state.props.map_or(buffer.len(), |p| p.size);
        drop(state);

        buffer.resize(size, 0);
        self.inner.acquisitions.fetch_add(1, Ordering::Relaxed);

        let recycler: Arc<dyn Recycle> = self.inner.clone();
        let mut sample = Sample::with_recycler(buffer, recycler);
        sample.set_time(start, stop);
        Ok(sample)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A zeroed buffer of `props.size` bytes whose first byte is aligned to
/// `props.align`, with `props.prefix` bytes reserved in front of it.
fn aligned_buffer(props: &AllocatorProperties) -> BytesMut {
    let align = props.align.max(1);
    let mut raw = BytesMut::zeroed(props.prefix + props.size + align - 1);
    let misalign = (raw.as_ptr() as usize + props.prefix) % align;
    let pad = if misalign == 0 { 0 } else { align - misalign };
    raw.advance(pad + props.prefix);
    raw.truncate(props.size);
    raw
}

impl Drop for MemoryAllocator {
    fn drop(&mut self) {
        self.inner.available.notify_all();
    }
}
