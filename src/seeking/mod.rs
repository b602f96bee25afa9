//! Seeking: the [`MediaSeeking`] capability and its standard implementations.
//!
//! Seeking requests enter a graph at the renderers and travel upstream until
//! they reach a filter that can act on them, normally the source:
//!
//! - [`SeekingPassThrough`] forwards every request to the upstream peer of
//!   one of its filter's sink pins. A renderer's pass-through additionally
//!   answers "current position" from the last rendered sample.
//! - [`SourceSeeking`] keeps start/stop/rate state for source filters and
//!   reports changes through [`SeekingCallbacks`].

mod passthrough;
mod source;

pub use passthrough::SeekingPassThrough;
pub use source::{SeekingCallbacks, SourceSeeking};

use crate::error::{Error, Result};

/// Unit in which seeking positions are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimeFormat {
    /// No format selected.
    None,
    Frame,
    Sample,
    Field,
    Byte,
    /// 100 ns reference time units.
    #[default]
    MediaTime,
}

/// What a seeking implementation can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeekingCapabilities(u32);

impl SeekingCapabilities {
    pub const NONE: Self = Self(0);
    pub const CAN_SEEK_ABSOLUTE: Self = Self(1 << 0);
    pub const CAN_SEEK_FORWARDS: Self = Self(1 << 1);
    pub const CAN_SEEK_BACKWARDS: Self = Self(1 << 2);
    pub const CAN_GET_CURRENT_POS: Self = Self(1 << 3);
    pub const CAN_GET_STOP_POS: Self = Self(1 << 4);
    pub const CAN_GET_DURATION: Self = Self(1 << 5);
    pub const CAN_PLAY_BACKWARDS: Self = Self(1 << 6);
    pub const CAN_DO_SEGMENTS: Self = Self(1 << 7);
    /// Doesn't pass through to anything upstream.
    pub const SOURCE: Self = Self(1 << 8);

    /// Absolute seeks in both directions plus all position queries.
    pub const ALL_POSITIONING: Self = Self(0b11_1111);

    /// Check if all of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }
}

/// How a position in `set_positions` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SeekType {
    /// Leave this position unchanged.
    #[default]
    None,
    /// Absolute position.
    Absolute,
    /// Relative to the current value of the same position.
    Relative,
    /// Stop only: relative to the new current position.
    Incremental,
}

/// Modifiers for a seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeekFlags(u32);

impl SeekFlags {
    pub const NONE: Self = Self(0);
    /// Snap to the nearest keyframe.
    pub const SEEK_TO_KEYFRAME: Self = Self(1 << 0);
    /// Announce the end of the segment instead of end of stream.
    pub const SEGMENT: Self = Self(1 << 1);
    /// Do not flush the graph for this seek.
    pub const NO_FLUSH: Self = Self(1 << 2);

    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// One position argument of `set_positions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeekPosition {
    pub seek_type: SeekType,
    pub position: i64,
    pub flags: SeekFlags,
}

impl SeekPosition {
    /// An absolute position.
    pub fn absolute(position: i64) -> Self {
        Self {
            seek_type: SeekType::Absolute,
            position,
            flags: SeekFlags::NONE,
        }
    }

    /// An offset from the current value.
    pub fn relative(offset: i64) -> Self {
        Self {
            seek_type: SeekType::Relative,
            position: offset,
            flags: SeekFlags::NONE,
        }
    }

    /// Stop position as an offset from the new current position.
    pub fn incremental(offset: i64) -> Self {
        Self {
            seek_type: SeekType::Incremental,
            position: offset,
            flags: SeekFlags::NONE,
        }
    }

    /// Leave the position unchanged.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_flags(mut self, flags: SeekFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Position control of a stream.
///
/// Positions are `i64` values in the current [`TimeFormat`]. Passing `None`
/// as a format to `convert_time_format` means "the current format".
pub trait MediaSeeking: Send + Sync {
    fn capabilities(&self) -> Result<SeekingCapabilities>;

    /// The subset of `wanted` that is supported. Fails when none of it is.
    fn check_capabilities(&self, wanted: SeekingCapabilities) -> Result<SeekingCapabilities> {
        let common = self.capabilities()?.intersection(wanted);
        if common.is_empty() && !wanted.is_empty() {
            return Err(Error::NotImplemented("requested seeking capabilities"));
        }
        Ok(common)
    }

    fn is_format_supported(&self, format: TimeFormat) -> Result<bool>;

    fn query_preferred_format(&self) -> Result<TimeFormat>;

    fn time_format(&self) -> Result<TimeFormat>;

    fn is_using_time_format(&self, format: TimeFormat) -> Result<bool> {
        Ok(self.time_format()? == format)
    }

    fn set_time_format(&self, format: TimeFormat) -> Result<()>;

    fn duration(&self) -> Result<i64>;

    fn stop_position(&self) -> Result<i64>;

    fn current_position(&self) -> Result<i64>;

    fn convert_time_format(
        &self,
        target: Option<TimeFormat>,
        source: i64,
        source_format: Option<TimeFormat>,
    ) -> Result<i64>;

    fn set_positions(&self, current: SeekPosition, stop: SeekPosition) -> Result<()>;

    /// Current and stop positions.
    fn positions(&self) -> Result<(i64, i64)>;

    /// Earliest and latest seekable positions.
    fn available(&self) -> Result<(i64, i64)>;

    fn set_rate(&self, rate: f64) -> Result<()>;

    fn rate(&self) -> Result<f64>;

    /// Data needed before the current position to start playback.
    fn preroll(&self) -> Result<i64>;
}
