//! Seeking state for source filters.

use std::sync::Mutex;

use tracing::debug;

use super::{MediaSeeking, SeekPosition, SeekType, SeekingCapabilities, TimeFormat};
use crate::clock::RefTime;
use crate::error::{Error, Result};

/// Hooks run after a [`SourceSeeking`] position or rate changes.
///
/// They run without the seeking lock held, typically to flush the stream
/// and restart delivery from the new position.
pub trait SeekingCallbacks: Send + Sync {
    fn change_start(&self, _start: RefTime) -> Result<()> {
        Ok(())
    }

    fn change_stop(&self, _stop: RefTime) -> Result<()> {
        Ok(())
    }

    fn change_rate(&self, _rate: f64) -> Result<()> {
        Ok(())
    }
}

impl SeekingCallbacks for () {}

#[derive(Debug, Clone, Copy)]
struct SeekState {
    duration: RefTime,
    start: RefTime,
    stop: RefTime,
    rate: f64,
    format: TimeFormat,
}

/// Start, stop and rate of a source stream, in media time only.
///
/// ```rust,ignore
/// let seeking = SourceSeeking::new(RefTime::from_secs(10), SeekingCapabilities::ALL_POSITIONING);
/// seeking.set_positions(SeekPosition::absolute(RefTime::from_secs(2).units()), SeekPosition::none())?;
/// assert_eq!(seeking.current_position()?, RefTime::from_secs(2).units());
/// ```
pub struct SourceSeeking {
    capabilities: SeekingCapabilities,
    state: Mutex<SeekState>,
    callbacks: Box<dyn SeekingCallbacks>,
}

impl SourceSeeking {
    /// Seeking over `[0, duration]` with no callbacks.
    pub fn new(duration: RefTime, capabilities: SeekingCapabilities) -> Self {
        Self::with_callbacks(duration, capabilities, ())
    }

    pub fn with_callbacks(
        duration: RefTime,
        capabilities: SeekingCapabilities,
        callbacks: impl SeekingCallbacks + 'static,
    ) -> Self {
        Self {
            capabilities,
            state: Mutex::new(SeekState {
                duration,
                start: RefTime::ZERO,
                stop: duration,
                rate: 1.0,
                format: TimeFormat::MediaTime,
            }),
            callbacks: Box::new(callbacks),
        }
    }

    /// Update the duration once it is known. The stop position follows it
    /// when it was at the old end of the stream.
    pub fn set_duration(&self, duration: RefTime) {
        let mut state = self.state.lock().unwrap();
        if state.stop == state.duration {
            state.stop = duration;
        }
        state.duration = duration;
    }

    /// Current start, stop and rate as one snapshot.
    pub fn segment(&self) -> (RefTime, RefTime, f64) {
        let state = self.state.lock().unwrap();
        (state.start, state.stop, state.rate)
    }

    fn resolve(&self, format: Option<TimeFormat>) -> TimeFormat {
        format.unwrap_or_else(|| self.state.lock().unwrap().format)
    }
}

fn apply(position: SeekPosition, old: RefTime, base: RefTime) -> RefTime {
    let offset = RefTime::from_units(position.position);
    match position.seek_type {
        SeekType::None => old,
        SeekType::Absolute => offset,
        SeekType::Relative => old.saturating_add(offset),
        SeekType::Incremental => base.saturating_add(offset),
    }
}

impl MediaSeeking for SourceSeeking {
    fn capabilities(&self) -> Result<SeekingCapabilities> {
        Ok(self.capabilities)
    }

    fn is_format_supported(&self, format: TimeFormat) -> Result<bool> {
        Ok(format == TimeFormat::MediaTime)
    }

    fn query_preferred_format(&self) -> Result<TimeFormat> {
        Ok(TimeFormat::MediaTime)
    }

    fn time_format(&self) -> Result<TimeFormat> {
        Ok(self.state.lock().unwrap().format)
    }

    fn set_time_format(&self, format: TimeFormat) -> Result<()> {
        if format != TimeFormat::MediaTime {
            return Err(Error::InvalidArgument(format!(
                "unsupported time format {:?}",
                format
            )));
        }
        self.state.lock().unwrap().format = format;
        Ok(())
    }

    fn duration(&self) -> Result<i64> {
        Ok(self.state.lock().unwrap().duration.units())
    }

    fn stop_position(&self) -> Result<i64> {
        Ok(self.state.lock().unwrap().stop.units())
    }

    fn current_position(&self) -> Result<i64> {
        Ok(self.state.lock().unwrap().start.units())
    }

    fn convert_time_format(
        &self,
        target: Option<TimeFormat>,
        source: i64,
        source_format: Option<TimeFormat>,
    ) -> Result<i64> {
        let target = self.resolve(target);
        let source_format = self.resolve(source_format);
        if target == source_format {
            return Ok(source);
        }
        Err(Error::InvalidArgument(format!(
            "cannot convert {:?} to {:?}",
            source_format, target
        )))
    }

    fn set_positions(&self, current: SeekPosition, stop: SeekPosition) -> Result<()> {
        if current.seek_type == SeekType::Incremental {
            return Err(Error::InvalidArgument(
                "current position cannot be incremental".into(),
            ));
        }

        let (new_start, new_stop) = {
            let mut state = self.state.lock().unwrap();
            let start = apply(current, state.start, state.start);
            let stop_pos = apply(stop, state.stop, start);
            if start.is_negative() || stop_pos.is_negative() {
                return Err(Error::InvalidArgument(format!(
                    "negative seek position ({}, {})",
                    start, stop_pos
                )));
            }
            state.start = start;
            state.stop = stop_pos;
            (start, stop_pos)
        };
        debug!(start = %new_start, stop = %new_stop, "source positions set");

        if current.seek_type != SeekType::None {
            self.callbacks.change_start(new_start)?;
        }
        if stop.seek_type != SeekType::None {
            self.callbacks.change_stop(new_stop)?;
        }
        Ok(())
    }

    fn positions(&self) -> Result<(i64, i64)> {
        let state = self.state.lock().unwrap();
        Ok((state.start.units(), state.stop.units()))
    }

    fn available(&self) -> Result<(i64, i64)> {
        Ok((0, self.state.lock().unwrap().duration.units()))
    }

    fn set_rate(&self, rate: f64) -> Result<()> {
        if rate == 0.0 || !rate.is_finite() {
            return Err(Error::InvalidArgument(format!("invalid rate {}", rate)));
        }
        self.state.lock().unwrap().rate = rate;
        self.callbacks.change_rate(rate)
    }

    fn rate(&self) -> Result<f64> {
        Ok(self.state.lock().unwrap().rate)
    }

    fn preroll(&self) -> Result<i64> {
        Ok(0)
    }
}
