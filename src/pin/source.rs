//! Source pin operations: connection, allocator negotiation and delivery.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::{Pin, PinDirection};
use crate::allocator::{Allocator, AllocatorProperties, BufferFlags, MemoryAllocator};
use crate::clock::RefTime;
use crate::error::{Error, Result};
use crate::filter::{Delivery, Filter, FilterState};
use crate::format::MediaType;
use crate::observability::span_pin;
use crate::sample::{Sample, Segment};

impl Pin {
    /// Connect this source pin to the sink pin `peer`.
    ///
    /// A complete `proposed` type is tried alone. Otherwise the source's own
    /// preferred types are tried in order, then the sink's, keeping only those
    /// that match a partial `proposed` pattern. Returns the agreed type.
    pub fn connect(self: &Arc<Self>, peer: &Arc<Pin>, proposed: Option<&MediaType>) -> Result<MediaType> {
        self.expect_direction(PinDirection::Output)?;
        let filter = self.owner()?;
        let _span = span_pin(filter.name(), &self.name).entered();
        let core = filter.lock();

        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }
        if core.state() != FilterState::Stopped {
            return Err(Error::NotStopped);
        }

        if let Some(mt) = proposed.filter(|mt| !mt.is_partial()) {
            if filter.ops().check_media_type(self, mt).is_err() {
                return Err(self.no_acceptable(peer));
            }
            self.attempt_connection(&filter, peer, mt)?;
            debug!(pin = %self.name, peer = %peer.name, media_type = %mt, "connected");
            return Ok(mt.clone());
        }

        // Own preferences first, then the peer's.
        let candidates = self.enum_media_types().chain(peer.enum_media_types());
        for candidate in candidates {
            if proposed.is_some_and(|pattern| !candidate.matches(pattern)) {
                continue;
            }
            trace!(pin = %self.name, media_type = %candidate, "trying media type");
            if filter.ops().check_media_type(self, &candidate).is_err() {
                continue;
            }
            match self.attempt_connection(&filter, peer, &candidate) {
                Ok(()) => {
                    debug!(pin = %self.name, peer = %peer.name, media_type = %candidate, "connected");
                    return Ok(candidate);
                }
                Err(e) if e.is_format_rejection() => {
                    trace!(pin = %self.name, media_type = %candidate, error = %e, "media type rejected");
                }
                Err(e) => return Err(e),
            }
        }

        Err(self.no_acceptable(peer))
    }

    fn no_acceptable(&self, peer: &Pin) -> Error {
        Error::NoAcceptableFormats {
            output: self.name.clone(),
            input: peer.name.clone(),
        }
    }

    /// Try one media type: record it, let the sink accept it, then agree on
    /// an allocator. Rolls both ends back on failure.
    fn attempt_connection(self: &Arc<Self>, filter: &Filter, peer: &Arc<Pin>, mt: &MediaType) -> Result<()> {
        {
            let mut link = self.link.lock().unwrap();
            link.peer = Some(Arc::downgrade(peer));
            link.media_type = Some(mt.clone());
        }

        let result = peer
            .receive_connection(self, mt)
            .and_then(|()| self.decide_allocator(filter, peer))
            .and_then(|()| filter.ops().complete_connect(self, mt));

        if let Err(e) = result {
            if peer.is_connected_to(self) {
                peer.abandon_connection();
            }
            let mut link = self.link.lock().unwrap();
            link.peer = None;
            link.media_type = None;
            link.allocator = None;
            return Err(e);
        }
        Ok(())
    }

    /// Agree on an allocator with the sink and size it.
    fn decide_allocator(&self, filter: &Filter, peer: &Pin) -> Result<()> {
        let allocator: Arc<dyn Allocator> = match peer.allocator() {
            Ok(allocator) => allocator,
            Err(Error::NoAllocator) => Arc::new(MemoryAllocator::with_name(format!(
                "{}.{}",
                filter.name(),
                self.name
            ))),
            Err(e) => return Err(e),
        };

        let requirements = peer.allocator_requirements().unwrap_or_default();
        let wanted = filter.ops().decide_buffer_size(self, &requirements)?;
        let actual = allocator.set_properties(&wanted)?;
        if !actual.satisfies(&wanted) {
            return Err(Error::Allocator(format!(
                "{} provided {} x {} bytes, wanted {} x {}",
                allocator.name(),
                actual.buffers,
                actual.size,
                wanted.buffers,
                wanted.size
            )));
        }
        peer.notify_allocator(Arc::clone(&allocator), false)?;

        debug!(
            pin = %self.name,
            allocator = %allocator.name(),
            buffers = actual.buffers,
            size = actual.size,
            "allocator negotiated"
        );
        self.link.lock().unwrap().allocator = Some(allocator);
        Ok(())
    }

    /// The negotiated allocator's properties.
    pub fn allocator_properties(&self) -> Result<AllocatorProperties> {
        self.delivery_allocator()?.properties()
    }

    fn delivery_allocator(&self) -> Result<Arc<dyn Allocator>> {
        self.link
            .lock()
            .unwrap()
            .allocator
            .clone()
            .ok_or(Error::NotConnected)
    }

    // ------------------------------------------------------------------------
    // Streaming
    // ------------------------------------------------------------------------

    /// Commit the negotiated allocator. Called when the filter leaves Stopped.
    pub fn active(&self) -> Result<()> {
        if self.direction != PinDirection::Output {
            return Ok(());
        }
        match self.delivery_allocator() {
            Ok(allocator) => allocator.commit(),
            Err(_) => Ok(()),
        }
    }

    /// Decommit the negotiated allocator. Called when the filter stops.
    pub fn inactive(&self) -> Result<()> {
        if self.direction != PinDirection::Output {
            return Ok(());
        }
        match self.delivery_allocator() {
            Ok(allocator) => allocator.decommit(),
            Err(_) => Ok(()),
        }
    }

    /// Take an empty sample from the negotiated allocator.
    pub fn get_delivery_buffer(
        &self,
        start: Option<RefTime>,
        stop: Option<RefTime>,
        flags: BufferFlags,
    ) -> Result<Sample> {
        self.expect_direction(PinDirection::Output)?;
        self.delivery_allocator()?.get_buffer(start, stop, flags)
    }

    /// Hand a sample to the connected sink.
    pub fn deliver(&self, sample: Sample) -> Result<Delivery> {
        self.expect_direction(PinDirection::Output)?;
        self.connected_to()?.receive(sample)
    }

    pub fn deliver_end_of_stream(&self) -> Result<Delivery> {
        self.expect_direction(PinDirection::Output)?;
        self.connected_to()?.end_of_stream()
    }

    pub fn deliver_begin_flush(&self) -> Result<()> {
        self.expect_direction(PinDirection::Output)?;
        self.connected_to()?.begin_flush()
    }

    pub fn deliver_end_flush(&self) -> Result<()> {
        self.expect_direction(PinDirection::Output)?;
        self.connected_to()?.end_flush()
    }

    pub fn deliver_new_segment(&self, segment: Segment) -> Result<()> {
        self.expect_direction(PinDirection::Output)?;
        self.connected_to()?.new_segment(segment)
    }

    /// Clear a half-made connection on the sink side after a failed attempt.
    pub(super) fn abandon_connection(&self) {
        match self.owner() {
            Ok(filter) => {
                let _core = filter.lock();
                self.release_link(&filter);
            }
            Err(e) => {
                warn!(pin = %self.name, error = %e, "abandoning connection on released filter");
                let mut link = self.link.lock().unwrap();
                link.peer = None;
                link.media_type = None;
                link.allocator = None;
            }
        }
    }
}
