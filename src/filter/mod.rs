//! Filters and their Stopped / Paused / Running state machine.
//!
//! A [`Filter`] owns a fixed set of [`Pin`]s, one lock ([`FilterCore`]) that
//! serializes state changes with sample delivery, and a [`FilterOps`] table
//! supplying kind-specific behavior.
//!
//! ```rust,ignore
//! let source = Filter::new("source", "test-source", [PinTemplate::output("Out")], SourceOps);
//! let renderer = Renderer::new("renderer", MyHooks, RendererConfig::default());
//!
//! source.pin(0).unwrap().connect(renderer.sink_pin(), None)?;
//! renderer.pause()?;
//! source.pause()?;
//! ```

mod ops;

pub use ops::{Delivery, FilterOps, buffer_size_for, default_buffer_size};

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::clock::{RefTime, ReferenceClock};
use crate::error::Result;
use crate::event::{EventSink, GraphEvent};
use crate::observability::span_filter;
use crate::pin::{Pin, PinDirection, PinEnum, PinTemplate};
use crate::seeking::MediaSeeking;

// ============================================================================
// State
// ============================================================================

/// Streaming state of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterState {
    /// Not streaming; connections may change.
    #[default]
    Stopped,
    /// Streaming paused; renderers pre-roll.
    Paused,
    /// Streaming against the clock.
    Running,
}

impl std::fmt::Display for FilterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FilterState::Stopped => "stopped",
            FilterState::Paused => "paused",
            FilterState::Running => "running",
        })
    }
}

/// Result of [`Filter::get_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateQuery {
    /// The filter has completed its last transition.
    Settled(FilterState),
    /// The filter is still transitioning (e.g. a renderer waiting for its
    /// first sample in Paused).
    Intermediate(FilterState),
}

impl StateQuery {
    pub fn state(self) -> FilterState {
        match self {
            StateQuery::Settled(state) | StateQuery::Intermediate(state) => state,
        }
    }

    pub fn is_intermediate(self) -> bool {
        matches!(self, StateQuery::Intermediate(_))
    }
}

/// State protected by the filter lock.
#[derive(Default)]
pub struct FilterCore {
    pub(crate) state: FilterState,
    pub(crate) clock: Option<Arc<dyn ReferenceClock>>,
    pub(crate) start_time: RefTime,
}

impl FilterCore {
    #[inline]
    pub fn state(&self) -> FilterState {
        self.state
    }

    /// The reference clock, if one is set.
    #[inline]
    pub fn clock(&self) -> Option<&Arc<dyn ReferenceClock>> {
        self.clock.as_ref()
    }

    /// Clock time that corresponds to stream time zero.
    #[inline]
    pub fn start_time(&self) -> RefTime {
        self.start_time
    }
}

/// Guard over a filter's lock.
pub type FilterGuard<'a> = MutexGuard<'a, FilterCore>;

// ============================================================================
// Filter
// ============================================================================

/// A node in a streaming graph.
pub struct Filter {
    name: String,
    class_id: &'static str,
    pins: SmallVec<[Arc<Pin>; 2]>,
    pin_version: AtomicU32,
    core: Mutex<FilterCore>,
    graph: Mutex<Option<Weak<dyn EventSink>>>,
    ops: Box<dyn FilterOps>,
}

impl Filter {
    /// Create a filter with one pin per template.
    pub fn new(
        name: impl Into<String>,
        class_id: &'static str,
        pins: impl IntoIterator<Item = PinTemplate>,
        ops: impl FilterOps,
    ) -> Arc<Self> {
        Self::new_cyclic(name, class_id, pins, move |_| -> Box<dyn FilterOps> {
            Box::new(ops)
        })
    }

    /// Create a filter whose ops need a handle back to the filter.
    pub fn new_cyclic(
        name: impl Into<String>,
        class_id: &'static str,
        pins: impl IntoIterator<Item = PinTemplate>,
        make_ops: impl FnOnce(&Weak<Filter>) -> Box<dyn FilterOps>,
    ) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|weak| {
            let pins = pins
                .into_iter()
                .enumerate()
                .map(|(index, template)| Arc::new(Pin::new(template, index, weak.clone())))
                .collect();
            Filter {
                name,
                class_id,
                pins,
                pin_version: AtomicU32::new(1),
                core: Mutex::new(FilterCore::default()),
                graph: Mutex::new(None),
                ops: make_ops(weak),
            }
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type tag identifying the filter's implementation.
    #[inline]
    pub fn class_id(&self) -> &'static str {
        self.class_id
    }

    #[inline]
    pub fn ops(&self) -> &dyn FilterOps {
        self.ops.as_ref()
    }

    #[inline]
    pub fn pins(&self) -> &[Arc<Pin>] {
        &self.pins
    }

    #[inline]
    pub fn pin(&self, index: usize) -> Option<&Arc<Pin>> {
        self.pins.get(index)
    }

    /// Find a pin by its id.
    pub fn find_pin(&self, id: &str) -> Option<Arc<Pin>> {
        self.pins.iter().find(|p| p.id() == id).cloned()
    }

    /// Enumerate the filter's pins.
    pub fn enum_pins(self: &Arc<Self>) -> PinEnum {
        PinEnum::new(Arc::clone(self))
    }

    /// Version of the pin set and of the media types pins offer.
    #[inline]
    pub fn pin_version(&self) -> u32 {
        self.pin_version.load(Ordering::Acquire)
    }

    /// Invalidate outstanding pin and media type enumerators.
    pub fn increment_pin_version(&self) {
        self.pin_version.fetch_add(1, Ordering::AcqRel);
    }

    /// Take the filter lock.
    #[inline]
    pub fn lock(&self) -> FilterGuard<'_> {
        self.core.lock().unwrap()
    }

    /// Current state without waiting for transitions.
    pub fn state(&self) -> FilterState {
        self.lock().state
    }

    // ------------------------------------------------------------------------
    // State transitions
    // ------------------------------------------------------------------------

    /// Transition to Stopped, decommitting source allocators.
    pub fn stop(&self) -> Result<()> {
        let _span = span_filter(&self.name, self.class_id).entered();
        let mut core = self.lock();
        let from = core.state;

        if from == FilterState::Running {
            self.ops.stop_streaming(self, &core)?;
        }
        if from != FilterState::Stopped {
            self.ops.cleanup_streaming(self, &core)?;
            self.deactivate_sources();
        }
        core.state = FilterState::Stopped;

        debug!(filter = %self.name, from = %from, "stopped");
        Ok(())
    }

    /// Transition to Paused.
    pub fn pause(&self) -> Result<()> {
        let _span = span_filter(&self.name, self.class_id).entered();
        let mut core = self.lock();
        let from = core.state;

        match from {
            FilterState::Stopped => self.init_from_stopped(&core)?,
            FilterState::Running => self.ops.stop_streaming(self, &core)?,
            FilterState::Paused => {}
        }
        core.state = FilterState::Paused;

        debug!(filter = %self.name, from = %from, "paused");
        Ok(())
    }

    /// Transition to Running with `start` as the clock time of stream time 0.
    pub fn run(&self, start: RefTime) -> Result<()> {
        let _span = span_filter(&self.name, self.class_id).entered();
        let mut core = self.lock();
        let from = core.state;
        if from == FilterState::Running {
            return Ok(());
        }

        core.start_time = start;
        if from == FilterState::Stopped {
            self.init_from_stopped(&core)?;
        }
        if let Err(e) = self.ops.start_streaming(self, &core) {
            warn!(filter = %self.name, error = %e, "start streaming failed");
            if from == FilterState::Stopped {
                let _ = self.ops.cleanup_streaming(self, &core);
                self.deactivate_sources();
            }
            return Err(e);
        }
        core.state = FilterState::Running;

        debug!(filter = %self.name, from = %from, start = %start, "running");
        Ok(())
    }

    /// Current state, waiting up to `timeout` for a pending transition.
    pub fn get_state(&self, timeout: Duration) -> StateQuery {
        let settled = self.ops.wait_state(self, timeout);
        let state = self.state();
        if settled {
            StateQuery::Settled(state)
        } else {
            StateQuery::Intermediate(state)
        }
    }

    fn init_from_stopped(&self, core: &FilterCore) -> Result<()> {
        for pin in self.output_pins() {
            if let Err(e) = pin.active() {
                self.deactivate_sources();
                return Err(e);
            }
        }
        if let Err(e) = self.ops.init_streaming(self, core) {
            warn!(filter = %self.name, error = %e, "init streaming failed");
            self.deactivate_sources();
            return Err(e);
        }
        Ok(())
    }

    fn deactivate_sources(&self) {
        for pin in self.output_pins() {
            if let Err(e) = pin.inactive() {
                warn!(filter = %self.name, pin = %pin.name(), error = %e, "decommit failed");
            }
        }
    }

    fn output_pins(&self) -> impl Iterator<Item = &Arc<Pin>> {
        self.pins
            .iter()
            .filter(|p| p.direction() == PinDirection::Output)
    }

    // ------------------------------------------------------------------------
    // Clock and graph
    // ------------------------------------------------------------------------

    /// Set or clear the reference clock.
    pub fn set_sync_source(&self, clock: Option<Arc<dyn ReferenceClock>>) {
        let mut core = self.lock();
        debug!(
            filter = %self.name,
            clock = clock.as_ref().map(|c| c.name()).unwrap_or("none"),
            "sync source set"
        );
        core.clock = clock;
    }

    pub fn sync_source(&self) -> Option<Arc<dyn ReferenceClock>> {
        self.lock().clock.clone()
    }

    /// Attach to (or detach from) the graph that receives notifications.
    pub fn join_graph(&self, graph: Option<&Arc<dyn EventSink>>) {
        *self.graph.lock().unwrap() = graph.map(Arc::downgrade);
    }

    /// Post a notification to the owning graph, if any.
    pub fn notify_graph(&self, event: GraphEvent) {
        let graph = self.graph.lock().unwrap().as_ref().and_then(Weak::upgrade);
        match graph {
            Some(graph) => graph.notify(event),
            None => debug!(filter = %self.name, ?event, "no graph to notify"),
        }
    }

    /// The filter's seeking capability.
    pub fn seeking(&self) -> Option<Arc<dyn MediaSeeking>> {
        self.ops.seeking(None)
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("name", &self.name)
            .field("class_id", &self.class_id)
            .field("pins", &self.pins.len())
            .finish()
    }
}
