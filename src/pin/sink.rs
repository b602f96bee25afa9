//! Sink pin operations: accepting connections, receiving samples, flushing
//! and end of stream.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::{debug, trace};

use super::{Pin, PinDirection};
use crate::allocator::{Allocator, AllocatorProperties};
use crate::error::{Error, Result};
use crate::filter::{Delivery, FilterState};
use crate::format::MediaType;
use crate::sample::{Sample, Segment};

impl Pin {
    /// Accept a connection proposed by the source pin `connector`.
    pub fn receive_connection(&self, connector: &Arc<Pin>, mt: &MediaType) -> Result<()> {
        self.expect_direction(PinDirection::Input)?;
        let filter = self.owner()?;
        let core = filter.lock();

        if core.state() != FilterState::Stopped {
            return Err(Error::NotStopped);
        }
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }
        if filter.ops().check_media_type(self, mt).is_err() {
            return Err(Error::TypeNotAccepted);
        }
        if connector.direction() != PinDirection::Output {
            return Err(Error::WrongDirection);
        }

        {
            let mut link = self.link.lock().unwrap();
            link.peer = Some(Arc::downgrade(connector));
            link.media_type = Some(mt.clone());
        }
        if let Err(e) = filter.ops().complete_connect(self, mt) {
            let mut link = self.link.lock().unwrap();
            link.peer = None;
            link.media_type = None;
            return Err(e);
        }

        trace!(pin = %self.name, connector = %connector.name(), media_type = %mt, "connection received");
        Ok(())
    }

    /// Deliver one sample into this sink pin.
    ///
    /// Fails with `WrongState` while the filter is stopped; returns
    /// [`Delivery::Flushed`] while flushing.
    pub fn receive(&self, sample: Sample) -> Result<Delivery> {
        self.expect_direction(PinDirection::Input)?;
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let filter = self.owner()?;
        let core = filter.lock();

        if core.state() == FilterState::Stopped {
            return Err(Error::WrongState(FilterState::Stopped));
        }
        if self.is_flushing() {
            trace!(pin = %self.name, "sample refused while flushing");
            return Ok(Delivery::Flushed);
        }

        filter.ops().receive(&filter, self, core, sample)
    }

    /// Deliver samples in order, stopping at the first one not delivered.
    ///
    /// Returns how many samples were delivered.
    pub fn receive_multiple(&self, samples: impl IntoIterator<Item = Sample>) -> Result<usize> {
        let mut delivered = 0;
        for sample in samples {
            match self.receive(sample)? {
                Delivery::Delivered => delivered += 1,
                Delivery::Flushed | Delivery::Discarded => break,
            }
        }
        Ok(delivered)
    }

    /// Whether `receive` may block the calling thread.
    pub fn receive_can_block(&self) -> bool {
        self.owner()
            .is_ok_and(|f| f.ops().receive_can_block(self))
    }

    /// Start flushing: refuse samples and unblock any waiting `receive`.
    pub fn begin_flush(&self) -> Result<()> {
        self.expect_direction(PinDirection::Input)?;
        let filter = self.owner()?;
        self.flushing.store(true, Ordering::Release);
        debug!(filter = %filter.name(), pin = %self.name, "begin flush");
        filter.ops().begin_flush(&filter, self)
    }

    /// Stop flushing and accept samples again.
    pub fn end_flush(&self) -> Result<()> {
        self.expect_direction(PinDirection::Input)?;
        let filter = self.owner()?;
        self.flushing.store(false, Ordering::Release);
        debug!(filter = %filter.name(), pin = %self.name, "end flush");
        filter.ops().end_flush(&filter, self)
    }

    /// No more samples will follow until the next flush or stop.
    pub fn end_of_stream(&self) -> Result<Delivery> {
        self.expect_direction(PinDirection::Input)?;
        let filter = self.owner()?;
        let _core = filter.lock();
        if self.is_flushing() {
            trace!(pin = %self.name, "end of stream ignored while flushing");
            return Ok(Delivery::Flushed);
        }
        filter.ops().end_of_stream(&filter, self)
    }

    /// Record a new segment and pass it to the filter.
    pub fn new_segment(&self, segment: Segment) -> Result<()> {
        self.expect_direction(PinDirection::Input)?;
        let filter = self.owner()?;
        self.link.lock().unwrap().segment = Some(segment);
        trace!(pin = %self.name, start = %segment.start, stop = %segment.stop, rate = segment.rate, "new segment");
        filter.ops().new_segment(&filter, self, &segment)
    }

    /// The last segment announced on this pin.
    pub fn segment(&self) -> Option<Segment> {
        self.link.lock().unwrap().segment
    }

    // ------------------------------------------------------------------------
    // Allocator negotiation
    // ------------------------------------------------------------------------

    /// The allocator this sink would like its source to use.
    pub fn allocator(&self) -> Result<Arc<dyn Allocator>> {
        self.expect_direction(PinDirection::Input)?;
        self.owner()?
            .ops()
            .preferred_allocator(self)
            .ok_or(Error::NoAllocator)
    }

    /// Minimum allocator properties this sink needs.
    pub fn allocator_requirements(&self) -> Option<AllocatorProperties> {
        self.owner().ok()?.ops().allocator_requirements(self)
    }

    /// The source announces the allocator it will deliver from.
    pub fn notify_allocator(&self, allocator: Arc<dyn Allocator>, read_only: bool) -> Result<()> {
        self.expect_direction(PinDirection::Input)?;
        let mut link = self.link.lock().unwrap();
        link.allocator = Some(allocator);
        link.read_only = read_only;
        Ok(())
    }

    /// The allocator announced by the connected source.
    pub fn notified_allocator(&self) -> Option<Arc<dyn Allocator>> {
        self.link.lock().unwrap().allocator.clone()
    }

    /// Whether samples from the connected source must not be modified.
    pub fn is_read_only(&self) -> bool {
        self.link.lock().unwrap().read_only
    }
}
