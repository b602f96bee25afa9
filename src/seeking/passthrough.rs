//! Seeking that defers to the upstream peer of a sink pin.

use std::sync::{Arc, Mutex, Weak};

use tracing::trace;

use super::{MediaSeeking, SeekPosition, SeekingCapabilities, TimeFormat};
use crate::clock::RefTime;
use crate::error::{Error, Result};
use crate::filter::Filter;

/// Forwards seeking calls to the peer of one sink pin.
///
/// The pin is named by its filter and index, so the pass-through does not
/// keep the filter alive. Without a peer every call fails with
/// `NotConnected` except `set_positions`, which succeeds as a no-op.
///
/// A renderer's pass-through also caches the stream time of the last sample
/// presented (and the stop position once end of stream arrives) and answers
/// `current_position` from that cache.
pub struct SeekingPassThrough {
    filter: Weak<Filter>,
    pin: usize,
    renderer: bool,
    media_time: Mutex<Option<RefTime>>,
}

impl SeekingPassThrough {
    /// Bind to sink pin `pin` of `filter`.
    pub fn new(filter: Weak<Filter>, pin: usize, renderer: bool) -> Self {
        Self {
            filter,
            pin,
            renderer,
            media_time: Mutex::new(None),
        }
    }

    /// Whether this pass-through caches presentation times.
    pub fn is_renderer(&self) -> bool {
        self.renderer
    }

    /// Remember the stream time of the sample just presented.
    pub fn register_media_time(&self, start: RefTime) {
        *self.media_time.lock().unwrap() = Some(start);
    }

    /// Forget the cached time.
    pub fn reset_media_time(&self) {
        *self.media_time.lock().unwrap() = None;
    }

    /// The cached time, if any.
    pub fn media_time(&self) -> Option<RefTime> {
        *self.media_time.lock().unwrap()
    }

    /// End of stream: cache the upstream stop position as the final time.
    pub fn end_of_stream(&self) {
        let stop = self.stop_position().and_then(|stop| {
            self.convert_time_format(Some(TimeFormat::MediaTime), stop, None)
        });
        let mut cached = self.media_time.lock().unwrap();
        match stop {
            Ok(stop) => *cached = Some(RefTime::from_units(stop)),
            Err(e) => {
                trace!(error = %e, "no stop position at end of stream");
                *cached = None;
            }
        }
    }

    fn peer_seeking(&self) -> Result<Arc<dyn MediaSeeking>> {
        let filter = self.filter.upgrade().ok_or(Error::FilterReleased)?;
        let pin = filter
            .pin(self.pin)
            .ok_or_else(|| Error::InvalidArgument(format!("no pin {}", self.pin)))?;
        pin.connected_to()?
            .seeking()
            .ok_or(Error::NotImplemented("seeking on upstream pin"))
    }
}

impl MediaSeeking for SeekingPassThrough {
    fn capabilities(&self) -> Result<SeekingCapabilities> {
        self.peer_seeking()?.capabilities()
    }

    fn check_capabilities(&self, wanted: SeekingCapabilities) -> Result<SeekingCapabilities> {
        self.peer_seeking()?.check_capabilities(wanted)
    }

    fn is_format_supported(&self, format: TimeFormat) -> Result<bool> {
        self.peer_seeking()?.is_format_supported(format)
    }

    fn query_preferred_format(&self) -> Result<TimeFormat> {
        self.peer_seeking()?.query_preferred_format()
    }

    fn time_format(&self) -> Result<TimeFormat> {
        self.peer_seeking()?.time_format()
    }

    fn is_using_time_format(&self, format: TimeFormat) -> Result<bool> {
        self.peer_seeking()?.is_using_time_format(format)
    }

    fn set_time_format(&self, format: TimeFormat) -> Result<()> {
        self.peer_seeking()?.set_time_format(format)
    }

    fn duration(&self) -> Result<i64> {
        self.peer_seeking()?.duration()
    }

    fn stop_position(&self) -> Result<i64> {
        self.peer_seeking()?.stop_position()
    }

    fn current_position(&self) -> Result<i64> {
        if self.renderer {
            if let Some(time) = self.media_time() {
                return match self.time_format() {
                    Ok(TimeFormat::MediaTime)
                    | Err(Error::NotConnected)
                    | Err(Error::NotImplemented(_)) => Ok(time.units()),
                    Ok(_) => self.convert_time_format(
                        None,
                        time.units(),
                        Some(TimeFormat::MediaTime),
                    ),
                    Err(e) => Err(e),
                };
            }
        }
        self.peer_seeking()?.current_position()
    }

    fn convert_time_format(
        &self,
        target: Option<TimeFormat>,
        source: i64,
        source_format: Option<TimeFormat>,
    ) -> Result<i64> {
        self.peer_seeking()?
            .convert_time_format(target, source, source_format)
    }

    fn set_positions(&self, current: SeekPosition, stop: SeekPosition) -> Result<()> {
        match self.peer_seeking() {
            Ok(peer) => peer.set_positions(current, stop),
            Err(Error::NotConnected) => {
                trace!(pin = self.pin, "set_positions without a peer ignored");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn positions(&self) -> Result<(i64, i64)> {
        self.peer_seeking()?.positions()
    }

    fn available(&self) -> Result<(i64, i64)> {
        self.peer_seeking()?.available()
    }

    fn set_rate(&self, rate: f64) -> Result<()> {
        self.peer_seeking()?.set_rate(rate)
    }

    fn rate(&self) -> Result<f64> {
        self.peer_seeking()?.rate()
    }

    fn preroll(&self) -> Result<i64> {
        self.peer_seeking()?.preroll()
    }
}
