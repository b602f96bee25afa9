//! Pins: the connection points of filters.
//!
//! Every pin is either a source (output, delivers samples downstream) or a
//! sink (input, receives samples). The connection protocol is driven from
//! the source side:
//!
//! 1. [`Pin::connect`] picks a media type, trying the source's own preferred
//!    types first and then the sink's.
//! 2. The sink validates it in [`Pin::receive_connection`].
//! 3. The source negotiates an allocator with the sink.
//!
//! Any failure rolls both ends back to unconnected. A pin knows its peer only
//! through a weak reference; the owning filters keep pins alive.

mod enumerate;
mod sink;
mod source;

pub use enumerate::{MediaTypeEnum, PinEnum};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, trace, warn};

use crate::allocator::Allocator;
use crate::error::{Error, Result};
use crate::filter::{Filter, FilterGuard, FilterState};
use crate::format::MediaType;
use crate::quality::{Quality, QualityControl};
use crate::sample::Segment;
use crate::seeking::MediaSeeking;

/// Direction of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinDirection {
    /// Sink pin (receives samples from upstream).
    Input,
    /// Source pin (delivers samples downstream).
    Output,
}

impl std::fmt::Display for PinDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PinDirection::Input => "input",
            PinDirection::Output => "output",
        })
    }
}

/// Name and direction of a pin to create on a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinTemplate {
    pub name: String,
    pub direction: PinDirection,
}

impl PinTemplate {
    pub fn new(name: impl Into<String>, direction: PinDirection) -> Self {
        Self {
            name: name.into(),
            direction,
        }
    }

    /// Template for a sink pin.
    pub fn input(name: impl Into<String>) -> Self {
        Self::new(name, PinDirection::Input)
    }

    /// Template for a source pin.
    pub fn output(name: impl Into<String>) -> Self {
        Self::new(name, PinDirection::Output)
    }
}

/// Connection state of a pin.
#[derive(Default)]
struct PinLink {
    peer: Option<Weak<Pin>>,
    media_type: Option<MediaType>,
    /// Source: the negotiated allocator. Sink: the allocator the source
    /// announced through `notify_allocator`.
    allocator: Option<Arc<dyn Allocator>>,
    read_only: bool,
    segment: Option<Segment>,
}

/// A connection point on a filter.
pub struct Pin {
    name: String,
    direction: PinDirection,
    index: usize,
    filter: Weak<Filter>,
    link: Mutex<PinLink>,
    flushing: AtomicBool,
    quality_sink: Mutex<Option<Arc<dyn QualityControl>>>,
}

impl Pin {
    pub(crate) fn new(template: PinTemplate, index: usize, filter: Weak<Filter>) -> Self {
        Self {
            name: template.name,
            direction: template.direction,
            index,
            filter,
            link: Mutex::new(PinLink::default()),
            flushing: AtomicBool::new(false),
            quality_sink: Mutex::new(None),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier of the pin within its filter (its name).
    #[inline]
    pub fn id(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn direction(&self) -> PinDirection {
        self.direction
    }

    /// Position of the pin in its filter's pin list.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The owning filter, unless it has been released.
    pub fn filter(&self) -> Option<Arc<Filter>> {
        self.filter.upgrade()
    }

    pub(crate) fn owner(&self) -> Result<Arc<Filter>> {
        self.filter.upgrade().ok_or(Error::FilterReleased)
    }

    fn expect_direction(&self, direction: PinDirection) -> Result<()> {
        if self.direction == direction {
            Ok(())
        } else {
            Err(Error::WrongDirection)
        }
    }

    // ------------------------------------------------------------------------
    // Connection queries
    // ------------------------------------------------------------------------

    pub fn is_connected(&self) -> bool {
        self.link.lock().unwrap().peer.is_some()
    }

    /// Whether this pin's peer is `other`.
    pub fn is_connected_to(&self, other: &Pin) -> bool {
        self.link
            .lock()
            .unwrap()
            .peer
            .as_ref()
            .is_some_and(|p| std::ptr::eq(p.as_ptr(), other))
    }

    /// The connected peer.
    pub fn connected_to(&self) -> Result<Arc<Pin>> {
        self.peer().ok_or(Error::NotConnected)
    }

    fn peer(&self) -> Option<Arc<Pin>> {
        self.link.lock().unwrap().peer.as_ref().and_then(Weak::upgrade)
    }

    /// The media type agreed on the current connection.
    pub fn connection_media_type(&self) -> Result<MediaType> {
        let link = self.link.lock().unwrap();
        match (&link.peer, &link.media_type) {
            (Some(_), Some(mt)) => Ok(mt.clone()),
            _ => Err(Error::NotConnected),
        }
    }

    /// Whether the pin would accept `media_type` right now.
    pub fn query_accept(&self, media_type: &MediaType) -> bool {
        self.owner()
            .is_ok_and(|f| f.ops().check_media_type(self, media_type).is_ok())
    }

    /// Enumerate the pin's preferred media types.
    pub fn enum_media_types(self: &Arc<Self>) -> MediaTypeEnum {
        MediaTypeEnum::new(Arc::clone(self))
    }

    /// Pins on the same filter that data flows to or from through this pin.
    pub fn query_internal_connections(&self) -> Result<Vec<Arc<Pin>>> {
        Err(Error::NotImplemented("internal connections"))
    }

    /// Seeking capability this pin exposes to its peer.
    pub fn seeking(&self) -> Option<Arc<dyn MediaSeeking>> {
        self.filter.upgrade()?.ops().seeking(Some(self))
    }

    // ------------------------------------------------------------------------
    // Disconnect
    // ------------------------------------------------------------------------

    /// Break the connection at both ends.
    ///
    /// Returns `Ok(false)` if the pin was not connected. Both owning filters
    /// must be stopped.
    pub fn disconnect(&self) -> Result<bool> {
        let filter = self.owner()?;
        let Some(peer) = self.peer() else {
            let core = filter.lock();
            if core.state() != FilterState::Stopped {
                return Err(Error::NotStopped);
            }
            // Peer pin gone with its filter; drop the stale link.
            let stale = self.link.lock().unwrap().peer.is_some();
            if stale {
                self.release_link(&filter);
            }
            return Ok(stale);
        };
        let peer_filter = peer.owner()?;

        let (core, peer_core) = lock_pair(&filter, &peer_filter);
        if core.state() != FilterState::Stopped
            || peer_core
                .as_ref()
                .is_some_and(|g| g.state() != FilterState::Stopped)
        {
            return Err(Error::NotStopped);
        }
        if !self.is_connected_to(&peer) {
            return Ok(false);
        }

        self.release_link(&filter);
        if peer.is_connected_to(self) {
            peer.release_link(&peer_filter);
        }

        debug!(filter = %filter.name(), pin = %self.name, peer = %peer.name, "disconnected");
        Ok(true)
    }

    /// Clear the connection and run the teardown hook. The filter lock must
    /// be held (or the filter otherwise quiescent).
    fn release_link(&self, filter: &Filter) {
        let allocator = {
            let mut link = self.link.lock().unwrap();
            link.peer = None;
            link.media_type = None;
            link.read_only = false;
            link.segment = None;
            link.allocator.take()
        };
        if let Some(allocator) = allocator {
            trace!(pin = %self.name, allocator = %allocator.name(), "allocator released");
        }
        if let Err(e) = filter.ops().break_connect(self) {
            warn!(filter = %filter.name(), pin = %self.name, error = %e, "break connect failed");
        }
    }

    // ------------------------------------------------------------------------
    // Quality control
    // ------------------------------------------------------------------------

    /// Route quality messages arriving at this pin to `sink` instead of the
    /// default handling.
    pub fn set_quality_sink(&self, sink: Option<Arc<dyn QualityControl>>) {
        *self.quality_sink.lock().unwrap() = sink;
    }

    /// A quality message from the downstream filter `sender`.
    ///
    /// Delivered to the quality sink if one is set; otherwise the filter may
    /// handle it, and if it does not the message is passed upstream from the
    /// filter's first connected sink pin.
    pub fn notify_quality(&self, sender: &Filter, quality: Quality) -> Result<()> {
        let sink = self.quality_sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            return sink.notify(sender, quality);
        }

        let filter = self.owner()?;
        if let Some(handled) = filter.ops().notify_quality(&filter, self, &quality) {
            return handled;
        }

        let upstream = filter
            .pins()
            .iter()
            .filter(|p| p.direction == PinDirection::Input)
            .find_map(|p| p.peer());
        match upstream {
            Some(upstream) => {
                trace!(filter = %filter.name(), ?quality, "forwarding quality upstream");
                upstream.notify_quality(&filter, quality)
            }
            None => {
                trace!(filter = %filter.name(), from = %sender.name(), ?quality, "quality message dropped");
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Flushing
    // ------------------------------------------------------------------------

    /// Whether the sink pin is between `begin_flush` and `end_flush`.
    #[inline]
    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }
}

impl QualityControl for Pin {
    fn notify(&self, sender: &Filter, quality: Quality) -> Result<()> {
        self.notify_quality(sender, quality)
    }
}

impl std::fmt::Debug for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pin")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Lock two filters in a fixed order. The second guard is `None` when both
/// are the same filter.
fn lock_pair<'a>(a: &'a Filter, b: &'a Filter) -> (FilterGuard<'a>, Option<FilterGuard<'a>>) {
    if std::ptr::eq(a, b) {
        return (a.lock(), None);
    }
    if (a as *const Filter) < (b as *const Filter) {
        let ga = a.lock();
        let gb = b.lock();
        (ga, Some(gb))
    } else {
        let gb = b.lock();
        let ga = a.lock();
        (ga, Some(gb))
    }
}
