//! The per-kind behavior table behind every filter.

use std::sync::Arc;
use std::time::Duration;

use crate::allocator::{Allocator, AllocatorProperties, DEFAULT_BUFFER_SIZE};
use crate::error::{Error, Result};
use crate::filter::{Filter, FilterCore, FilterGuard};
use crate::format::MediaType;
use crate::pin::Pin;
use crate::quality::Quality;
use crate::sample::{Sample, Segment};
use crate::seeking::MediaSeeking;

/// Outcome of a successful `receive` or `end_of_stream` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// The sample was consumed.
    Delivered,
    /// The sink is flushing; the sample or EOS was ignored.
    Flushed,
    /// The sample was dropped (end of stream already seen, or a presentation
    /// wait was interrupted).
    Discarded,
}

/// Hooks a filter kind supplies to the shared pin and state machinery.
///
/// Every hook has a default, so a kind overrides only what it needs. Hooks
/// that take a [`FilterCore`] or [`FilterGuard`] run with the filter lock
/// held and must not call back into state-changing filter operations.
///
/// [`Renderer`](crate::renderer::Renderer) and
/// [`Transform`](crate::transform::Transform) are built on this trait; plain
/// filters such as sources implement it directly.
pub trait FilterOps: Send + Sync + 'static {
    /// Accept or reject a media type for `pin`.
    fn check_media_type(&self, pin: &Pin, media_type: &MediaType) -> Result<()>;

    /// The `index`th media type `pin` prefers, in preference order.
    fn media_type(&self, pin: &Pin, index: usize) -> Option<MediaType> {
        let _ = (pin, index);
        None
    }

    /// Called once `pin` has recorded its peer and media type.
    fn complete_connect(&self, pin: &Pin, media_type: &MediaType) -> Result<()> {
        let _ = (pin, media_type);
        Ok(())
    }

    /// Called after `pin` loses its connection.
    fn break_connect(&self, pin: &Pin) -> Result<()> {
        let _ = pin;
        Ok(())
    }

    /// Minimum allocator properties a sink pin asks of its source.
    fn allocator_requirements(&self, pin: &Pin) -> Option<AllocatorProperties> {
        let _ = pin;
        None
    }

    /// An allocator a sink pin offers to its source.
    fn preferred_allocator(&self, pin: &Pin) -> Option<Arc<dyn Allocator>> {
        let _ = pin;
        None
    }

    /// Final allocator properties for a source pin, given the sink's
    /// requirements.
    fn decide_buffer_size(
        &self,
        pin: &Pin,
        requirements: &AllocatorProperties,
    ) -> Result<AllocatorProperties> {
        default_buffer_size(pin, requirements)
    }

    /// Stopped to Paused.
    fn init_streaming(&self, filter: &Filter, core: &FilterCore) -> Result<()> {
        let _ = (filter, core);
        Ok(())
    }

    /// Entering Running. `core.start_time()` holds the new stream start.
    fn start_streaming(&self, filter: &Filter, core: &FilterCore) -> Result<()> {
        let _ = (filter, core);
        Ok(())
    }

    /// Leaving Running.
    fn stop_streaming(&self, filter: &Filter, core: &FilterCore) -> Result<()> {
        let _ = (filter, core);
        Ok(())
    }

    /// Entering Stopped from Paused or Running.
    fn cleanup_streaming(&self, filter: &Filter, core: &FilterCore) -> Result<()> {
        let _ = (filter, core);
        Ok(())
    }

    /// Wait up to `timeout` for a pending transition to settle. Runs without
    /// the filter lock. Returns false on timeout.
    fn wait_state(&self, filter: &Filter, timeout: Duration) -> bool {
        let _ = (filter, timeout);
        true
    }

    /// Consume a sample arriving on sink `pin`.
    ///
    /// Called with the filter lock held after the state, connection and
    /// flushing checks have passed. The guard may be dropped and re-taken.
    fn receive(
        &self,
        filter: &Filter,
        pin: &Pin,
        guard: FilterGuard<'_>,
        sample: Sample,
    ) -> Result<Delivery> {
        let _ = (filter, pin, guard, sample);
        Err(Error::NotImplemented("receive"))
    }

    /// Whether `receive` on `pin` may block.
    fn receive_can_block(&self, pin: &Pin) -> bool {
        let _ = pin;
        true
    }

    /// End of stream on sink `pin`, called with the filter lock held.
    fn end_of_stream(&self, filter: &Filter, pin: &Pin) -> Result<Delivery> {
        let _ = (filter, pin);
        Ok(Delivery::Delivered)
    }

    /// Flush start on sink `pin`. Runs without the filter lock so that it
    /// can interrupt a blocked `receive`.
    fn begin_flush(&self, filter: &Filter, pin: &Pin) -> Result<()> {
        let _ = (filter, pin);
        Ok(())
    }

    /// Flush end on sink `pin`. Runs without the filter lock.
    fn end_flush(&self, filter: &Filter, pin: &Pin) -> Result<()> {
        let _ = (filter, pin);
        Ok(())
    }

    /// A new segment announced on sink `pin`.
    fn new_segment(&self, filter: &Filter, pin: &Pin, segment: &Segment) -> Result<()> {
        let _ = (filter, pin, segment);
        Ok(())
    }

    /// Handle a quality message arriving at source `pin`. `None` lets the
    /// default forwarding upstream happen.
    fn notify_quality(&self, filter: &Filter, pin: &Pin, quality: &Quality) -> Option<Result<()>> {
        let _ = (filter, pin, quality);
        None
    }

    /// Seeking capability of the filter (`pin` is `None`) or of one pin.
    fn seeking(&self, pin: Option<&Pin>) -> Option<Arc<dyn MediaSeeking>> {
        let _ = pin;
        None
    }
}

/// Merge a sink's requirements with the connection's sample size.
pub fn default_buffer_size(
    pin: &Pin,
    requirements: &AllocatorProperties,
) -> Result<AllocatorProperties> {
    let media_type = pin.connection_media_type().ok();
    Ok(buffer_size_for(media_type.as_ref(), requirements))
}

/// At least one buffer; the size is the larger of the requested size and the
/// media type's fixed sample size, or [`DEFAULT_BUFFER_SIZE`] when both are 0.
pub fn buffer_size_for(
    media_type: Option<&MediaType>,
    requirements: &AllocatorProperties,
) -> AllocatorProperties {
    let sample_size = media_type.map_or(0, |mt| mt.sample_size as usize);
    let size = match requirements.size.max(sample_size) {
        0 => DEFAULT_BUFFER_SIZE,
        size => size,
    };

    AllocatorProperties {
        buffers: requirements.buffers.max(1),
        size,
        align: requirements.align.max(1),
        prefix: requirements.prefix,
    }
}
