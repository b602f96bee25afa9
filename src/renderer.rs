//! Renderer: a filter with one sink pin that presents samples on time.
//!
//! A renderer pre-rolls while paused: it renders the sample it is given at
//! once so the graph can show a still frame, then blocks the streaming
//! thread until the graph runs, stops or flushes. While running it holds
//! each sample until the reference clock reaches its presentation time. The
//! wait is cut short by a flush or a state change, in which case the sample
//! is dropped instead of rendered.
//!
//! ```rust,ignore
//! struct Display;
//!
//! impl RenderHooks for Display {
//!     fn check_media_type(&self, mt: &MediaType) -> Result<()> {
//!         if mt.major == Some(MajorType::Video) { Ok(()) } else { Err(Error::TypeNotAccepted) }
//!     }
//!
//!     fn render(&self, sample: &Sample) -> Result<()> {
//!         blit(sample.data());
//!         Ok(())
//!     }
//! }
//!
//! let renderer = Renderer::new("display", Display, RendererConfig::default());
//! decoder_out.connect(renderer.sink_pin(), None)?;
//! ```

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::allocator::{Allocator, AllocatorProperties};
use crate::clock::{AdviseSignal, RefTime, ReferenceClock};
use crate::config::RendererConfig;
use crate::error::{Error, Result};
use crate::event::GraphEvent;
use crate::filter::{Delivery, Filter, FilterCore, FilterGuard, FilterOps, FilterState};
use crate::format::MediaType;
use crate::observability::span_sample;
use crate::pin::{Pin, PinTemplate};
use crate::quality::{QosTracker, Quality, RenderStats};
use crate::sample::Sample;
use crate::seeking::{MediaSeeking, SeekingPassThrough};

// ============================================================================
// Hooks
// ============================================================================

/// What a concrete renderer supplies.
///
/// Only `check_media_type` and `render` are required. All hooks except
/// `begin_flush` and `end_flush` run with the filter lock held.
pub trait RenderHooks: Send + Sync + 'static {
    /// Type tag for filters built from these hooks.
    const CLASS_ID: &'static str = "renderer";

    /// Accept or reject a media type, at connection time or mid-stream.
    fn check_media_type(&self, media_type: &MediaType) -> Result<()>;

    /// Preferred media types in order.
    fn media_type(&self, index: usize) -> Option<MediaType> {
        let _ = index;
        None
    }

    /// Present one sample.
    fn render(&self, sample: &Sample) -> Result<()>;

    /// Entering Running.
    fn start_streaming(&self) -> Result<()> {
        Ok(())
    }

    /// Leaving Running.
    fn stop_streaming(&self) -> Result<()> {
        Ok(())
    }

    fn end_of_stream(&self) -> Result<()> {
        Ok(())
    }

    fn begin_flush(&self) -> Result<()> {
        Ok(())
    }

    fn end_flush(&self) -> Result<()> {
        Ok(())
    }

    fn complete_connect(&self, media_type: &MediaType) -> Result<()> {
        let _ = media_type;
        Ok(())
    }

    fn break_connect(&self) -> Result<()> {
        Ok(())
    }

    fn allocator_requirements(&self) -> Option<AllocatorProperties> {
        None
    }

    /// An allocator to offer the upstream pin, e.g. one backed by video
    /// memory.
    fn preferred_allocator(&self) -> Option<Arc<dyn Allocator>> {
        None
    }
}

// ============================================================================
// Presentation wait
// ============================================================================

#[derive(Debug)]
struct WaitFlags {
    time_due: bool,
    flush: bool,
    ready: bool,
    /// Bumped on every Running or Paused exit.
    generation: u64,
}

/// Why a presentation wait or a paused hold ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitOutcome {
    Due,
    Flushed,
    StateChanged,
}

/// Flags a streaming thread sleeps on while a sample waits for its time.
///
/// `flush` wins over `time_due`: a flushed wait never renders.
#[derive(Debug)]
struct RenderWait {
    flags: Mutex<WaitFlags>,
    cond: Condvar,
}

impl RenderWait {
    fn new() -> Self {
        Self {
            flags: Mutex::new(WaitFlags {
                time_due: false,
                flush: false,
                ready: true,
                generation: 0,
            }),
            cond: Condvar::new(),
        }
    }

    fn signal_due(&self) {
        self.flags.lock().unwrap().time_due = true;
        self.cond.notify_all();
    }

    fn set_flush(&self, flush: bool) {
        self.flags.lock().unwrap().flush = flush;
        if flush {
            self.cond.notify_all();
        }
    }

    fn is_flushing(&self) -> bool {
        self.flags.lock().unwrap().flush
    }

    fn generation(&self) -> u64 {
        self.flags.lock().unwrap().generation
    }

    /// Wake every waiter that started before a state change.
    fn state_changed(&self) {
        self.flags.lock().unwrap().generation += 1;
        self.cond.notify_all();
    }

    fn set_ready(&self, ready: bool) {
        self.flags.lock().unwrap().ready = ready;
        if ready {
            self.cond.notify_all();
        }
    }

    /// Sleep until the clock reaches `base + offset`, a flush arrives or the
    /// state moves on from `generation`.
    fn wait_for(
        self: &Arc<Self>,
        clock: &dyn ReferenceClock,
        base: RefTime,
        offset: RefTime,
        generation: u64,
    ) -> Result<WaitOutcome> {
        self.flags.lock().unwrap().time_due = false;

        let wait = Arc::clone(self);
        let cookie = clock.advise_time(base, offset, AdviseSignal::new(move || wait.signal_due()))?;
        let outcome = self.block(generation, true);

        if let Err(e) = clock.unadvise(cookie) {
            trace!(error = %e, "unadvise after presentation wait");
        }
        Ok(outcome)
    }

    /// Sleep until a flush arrives or the state moves on from `generation`.
    fn hold(&self, generation: u64) -> WaitOutcome {
        self.block(generation, false)
    }

    fn block(&self, generation: u64, timed: bool) -> WaitOutcome {
        let mut flags = self.flags.lock().unwrap();
        loop {
            if flags.flush {
                return WaitOutcome::Flushed;
            }
            if flags.generation != generation {
                return WaitOutcome::StateChanged;
            }
            if timed && flags.time_due {
                return WaitOutcome::Due;
            }
            flags = self.cond.wait(flags).unwrap();
        }
    }

    /// Wait up to `timeout` for the renderer to settle. Returns false on
    /// timeout.
    fn wait_ready(&self, timeout: Duration) -> bool {
        let flags = self.flags.lock().unwrap();
        let (flags, _) = self
            .cond
            .wait_timeout_while(flags, timeout, |f| !f.ready)
            .unwrap();
        flags.ready
    }
}

// ============================================================================
// Filter ops
// ============================================================================

struct RendererShared<H> {
    hooks: H,
    config: RendererConfig,
    wait: Arc<RenderWait>,
    eos: AtomicBool,
    qos: Mutex<QosTracker>,
}

struct RendererOps<H> {
    shared: Arc<RendererShared<H>>,
    passthru: Arc<SeekingPassThrough>,
}

impl<H: RenderHooks> RendererOps<H> {
    /// Render `sample` now and account for it.
    fn present(
        &self,
        filter: &Filter,
        pin: &Pin,
        core: FilterGuard<'_>,
        sample: &Sample,
    ) -> Result<Delivery> {
        let shared = &self.shared;
        let clock = core.clock().cloned();
        let now = || clock.as_ref().map(|c| c.time());

        shared.qos.lock().unwrap().begin_render(now());
        let rendered = shared.hooks.render(sample);
        shared.qos.lock().unwrap().end_render(now());

        if let Err(e) = rendered {
            warn!(filter = %filter.name(), error = %e, "render failed");
            filter.notify_graph(GraphEvent::ErrorAbort {
                filter: filter.name().to_string(),
                message: e.to_string(),
            });
            return Err(e);
        }

        if let Some((start, _)) = sample.time() {
            self.passthru.register_media_time(start);
        }
        if core.state() == FilterState::Paused {
            shared.wait.set_ready(true);
        }
        drop(core);

        let quality = shared.qos.lock().unwrap().do_qos(false);
        self.send_quality(filter, pin, quality);
        Ok(Delivery::Delivered)
    }

    /// Block after a preroll until the graph runs, stops or flushes.
    ///
    /// Run completes the delivery; a flush or stop discards it.
    fn hold_prerolled(&self, filter: &Filter, generation: u64) -> Delivery {
        trace!(filter = %filter.name(), "holding prerolled sample");
        match self.shared.wait.hold(generation) {
            WaitOutcome::Flushed | WaitOutcome::Due => Delivery::Discarded,
            WaitOutcome::StateChanged => {
                let core = filter.lock();
                if core.state() == FilterState::Running && !self.shared.wait.is_flushing() {
                    Delivery::Delivered
                } else {
                    Delivery::Discarded
                }
            }
        }
    }

    /// Account for a sample that was not rendered.
    fn drop_sample(&self, filter: &Filter, pin: &Pin) -> Delivery {
        let quality = self.shared.qos.lock().unwrap().do_qos(true);
        self.send_quality(filter, pin, quality);
        Delivery::Discarded
    }

    fn send_quality(&self, filter: &Filter, pin: &Pin, quality: Option<Quality>) {
        let Some(quality) = quality else { return };
        if !self.shared.config.qos {
            return;
        }
        let Ok(upstream) = pin.connected_to() else { return };
        trace!(filter = %filter.name(), ?quality, "sending quality upstream");
        if let Err(e) = upstream.notify_quality(filter, quality) {
            debug!(filter = %filter.name(), error = %e, "quality message not handled");
        }
    }
}

impl<H: RenderHooks> FilterOps for RendererOps<H> {
    fn check_media_type(&self, _pin: &Pin, media_type: &MediaType) -> Result<()> {
        self.shared.hooks.check_media_type(media_type)
    }

    fn media_type(&self, _pin: &Pin, index: usize) -> Option<MediaType> {
        self.shared.hooks.media_type(index)
    }

    fn complete_connect(&self, _pin: &Pin, media_type: &MediaType) -> Result<()> {
        self.shared.hooks.complete_connect(media_type)
    }

    fn break_connect(&self, _pin: &Pin) -> Result<()> {
        self.shared.hooks.break_connect()
    }

    fn allocator_requirements(&self, _pin: &Pin) -> Option<AllocatorProperties> {
        self.shared.hooks.allocator_requirements()
    }

    fn preferred_allocator(&self, _pin: &Pin) -> Option<Arc<dyn Allocator>> {
        self.shared.hooks.preferred_allocator()
    }

    fn init_streaming(&self, filter: &Filter, _core: &FilterCore) -> Result<()> {
        let shared = &self.shared;
        shared.eos.store(false, Ordering::Release);
        shared.wait.set_flush(false);
        // A connected renderer is not settled in Paused until it prerolls.
        let connected = filter.pins().first().is_some_and(|p| p.is_connected());
        shared.wait.set_ready(!connected);
        Ok(())
    }

    fn start_streaming(&self, _filter: &Filter, _core: &FilterCore) -> Result<()> {
        let shared = &self.shared;
        shared.hooks.start_streaming()?;
        shared.wait.set_flush(false);
        shared.wait.set_ready(true);
        shared.qos.lock().unwrap().reset();
        // Releases a sample held since preroll.
        shared.wait.state_changed();
        Ok(())
    }

    fn stop_streaming(&self, _filter: &Filter, _core: &FilterCore) -> Result<()> {
        self.shared.hooks.stop_streaming()?;
        // A sample waiting for its time is dropped, even if Run follows
        // before the waiter wakes.
        self.shared.wait.state_changed();
        Ok(())
    }

    fn cleanup_streaming(&self, _filter: &Filter, _core: &FilterCore) -> Result<()> {
        let shared = &self.shared;
        shared.wait.set_flush(true);
        shared.wait.set_ready(true);
        self.passthru.reset_media_time();
        Ok(())
    }

    fn wait_state(&self, _filter: &Filter, timeout: Duration) -> bool {
        self.shared.wait.wait_ready(timeout)
    }

    fn receive(
        &self,
        filter: &Filter,
        pin: &Pin,
        guard: FilterGuard<'_>,
        sample: Sample,
    ) -> Result<Delivery> {
        let shared = &self.shared;
        let times = sample.time();
        let _span = shared
            .config
            .tracing
            .sample_spans
            .then(|| span_sample(pin.name(), times.map(|(start, _)| start)).entered());

        if shared.eos.load(Ordering::Acquire) || shared.wait.is_flushing() {
            trace!(filter = %filter.name(), "sample discarded after end of stream or flush");
            return Ok(Delivery::Discarded);
        }
        if let Some(mt) = sample.media_type() {
            if shared.hooks.check_media_type(mt).is_err() {
                debug!(filter = %filter.name(), media_type = %mt, "mid-stream media type rejected");
                return Err(Error::TypeNotAccepted);
            }
        }
        shared.qos.lock().unwrap().set_current(times);

        let schedule = match (guard.state(), guard.clock(), times) {
            (FilterState::Running, Some(clock), Some((start, _))) => {
                Some((Arc::clone(clock), guard.start_time(), start))
            }
            _ => None,
        };
        let generation = shared.wait.generation();
        let Some((clock, base, start)) = schedule else {
            let paused = guard.state() == FilterState::Paused;
            let delivery = self.present(filter, pin, guard, &sample)?;
            if !paused {
                return Ok(delivery);
            }
            return Ok(self.hold_prerolled(filter, generation));
        };

        let due = base.saturating_add(start);
        let delta = clock.time().saturating_sub(due);
        if delta > -shared.config.early_threshold {
            shared.qos.lock().unwrap().set_jitter(delta);
            return self.present(filter, pin, guard, &sample);
        }

        if shared.config.tracing.wait_events {
            trace!(filter = %filter.name(), due = %due, early = %(-delta), "waiting for presentation time");
        }
        drop(guard);
        match shared.wait.wait_for(clock.as_ref(), base, start, generation)? {
            WaitOutcome::Due => {}
            WaitOutcome::Flushed => {
                trace!(filter = %filter.name(), "presentation wait flushed");
                return Ok(self.drop_sample(filter, pin));
            }
            WaitOutcome::StateChanged => {
                trace!(filter = %filter.name(), "state changed during presentation wait");
                return Ok(self.drop_sample(filter, pin));
            }
        }

        let core = filter.lock();
        if core.state() != FilterState::Running || shared.wait.generation() != generation {
            trace!(filter = %filter.name(), state = %core.state(), "state changed during presentation wait");
            drop(core);
            return Ok(self.drop_sample(filter, pin));
        }

        shared.qos.lock().unwrap().set_jitter(clock.time().saturating_sub(due));
        self.present(filter, pin, core, &sample)
    }

    fn receive_can_block(&self, _pin: &Pin) -> bool {
        true
    }

    fn end_of_stream(&self, filter: &Filter, _pin: &Pin) -> Result<Delivery> {
        let shared = &self.shared;
        if shared.eos.load(Ordering::Acquire) {
            trace!(filter = %filter.name(), "repeated end of stream ignored");
            return Ok(Delivery::Discarded);
        }
        shared.hooks.end_of_stream()?;
        shared.eos.store(true, Ordering::Release);
        self.passthru.end_of_stream();
        shared.wait.set_ready(true);

        debug!(filter = %filter.name(), "end of stream");
        filter.notify_graph(GraphEvent::Complete {
            filter: filter.name().to_string(),
        });
        Ok(Delivery::Delivered)
    }

    fn begin_flush(&self, _filter: &Filter, _pin: &Pin) -> Result<()> {
        self.shared.wait.set_flush(true);
        self.shared.hooks.begin_flush()
    }

    fn end_flush(&self, filter: &Filter, _pin: &Pin) -> Result<()> {
        let shared = &self.shared;
        shared.hooks.end_flush()?;
        shared.eos.store(false, Ordering::Release);
        self.passthru.reset_media_time();
        shared.qos.lock().unwrap().reset();
        if filter.state() == FilterState::Paused {
            shared.wait.set_ready(false);
        }
        shared.wait.set_flush(false);
        Ok(())
    }

    fn seeking(&self, pin: Option<&Pin>) -> Option<Arc<dyn MediaSeeking>> {
        match pin {
            None => Some(Arc::clone(&self.passthru) as Arc<dyn MediaSeeking>),
            Some(_) => None,
        }
    }
}

// ============================================================================
// Renderer handle
// ============================================================================

/// A renderer filter. Derefs to its [`Filter`] for state changes and
/// queries.
pub struct Renderer<H> {
    filter: Arc<Filter>,
    shared: Arc<RendererShared<H>>,
}

impl<H> Clone for Renderer<H> {
    fn clone(&self) -> Self {
        Self {
            filter: Arc::clone(&self.filter),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<H: RenderHooks> Renderer<H> {
    /// Create a renderer with a single sink pin named "In".
    pub fn new(name: impl Into<String>, hooks: H, config: RendererConfig) -> Self {
        let shared = Arc::new(RendererShared {
            hooks,
            config,
            wait: Arc::new(RenderWait::new()),
            eos: AtomicBool::new(false),
            qos: Mutex::new(QosTracker::default()),
        });

        let ops_shared = Arc::clone(&shared);
        let filter = Filter::new_cyclic(
            name,
            H::CLASS_ID,
            [PinTemplate::input("In")],
            move |weak| -> Box<dyn FilterOps> {
                Box::new(RendererOps {
                    shared: ops_shared,
                    passthru: Arc::new(SeekingPassThrough::new(weak.clone(), 0, true)),
                })
            },
        );

        Self { filter, shared }
    }

    pub fn filter(&self) -> &Arc<Filter> {
        &self.filter
    }

    /// The renderer's only pin.
    pub fn sink_pin(&self) -> &Arc<Pin> {
        &self.filter.pins()[0]
    }

    pub fn hooks(&self) -> &H {
        &self.shared.hooks
    }

    pub fn config(&self) -> &RendererConfig {
        &self.shared.config
    }

    /// Whether end of stream has arrived since the last flush or start.
    pub fn is_end_of_stream(&self) -> bool {
        self.shared.eos.load(Ordering::Acquire)
    }

    /// Rendered and dropped sample counts and timing averages.
    pub fn stats(&self) -> RenderStats {
        self.shared.qos.lock().unwrap().stats()
    }
}

impl<H> Deref for Renderer<H> {
    type Target = Filter;

    fn deref(&self) -> &Filter {
        &self.filter
    }
}

impl<H> std::fmt::Debug for Renderer<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("filter", &self.filter)
            .field("eos", &self.shared.eos.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ChannelEventSink, EventSink};
    use crate::format::{FourCc, MajorType};
    use crate::pin::PinDirection;
    use std::sync::atomic::AtomicUsize;

    const PCM: FourCc = FourCc::new(b"PCM ");

    #[derive(Default)]
    struct Counting {
        rendered: AtomicUsize,
        fail: AtomicBool,
    }

    impl RenderHooks for Arc<Counting> {
        const CLASS_ID: &'static str = "counting-renderer";

        fn check_media_type(&self, mt: &MediaType) -> Result<()> {
            if mt.major == Some(MajorType::Audio) {
                Ok(())
            } else {
                Err(Error::TypeNotAccepted)
            }
        }

        fn render(&self, _sample: &Sample) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::hook("device lost"));
            }
            self.rendered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn renderer() -> (Renderer<Arc<Counting>>, Arc<Counting>) {
        let counting = Arc::new(Counting::default());
        let renderer = Renderer::new("speaker", Arc::clone(&counting), RendererConfig::default());
        (renderer, counting)
    }

    #[test]
    fn test_renderer_shape() {
        let (renderer, _) = renderer();
        assert_eq!(renderer.class_id(), "counting-renderer");
        assert_eq!(renderer.pins().len(), 1);
        assert_eq!(renderer.sink_pin().direction(), PinDirection::Input);
        assert_eq!(renderer.sink_pin().name(), "In");
        assert!(renderer.seeking().is_some());
        assert!(renderer.sink_pin().seeking().is_none());
    }

    #[test]
    fn test_check_media_type_delegates() {
        let (renderer, _) = renderer();
        let pin = renderer.sink_pin();
        assert!(pin.query_accept(&MediaType::new(MajorType::Audio, PCM)));
        assert!(!pin.query_accept(&MediaType::new(MajorType::Video, PCM)));
    }

    #[test]
    fn test_unconnected_renderer_settles_in_paused() {
        let (renderer, _) = renderer();
        renderer.pause().unwrap();
        let state = renderer.get_state(Duration::from_millis(10));
        assert!(!state.is_intermediate());
        assert_eq!(state.state(), FilterState::Paused);
    }

    #[test]
    fn test_wait_flags_flush_wins() {
        let wait = RenderWait::new();
        wait.signal_due();
        wait.set_flush(true);
        let flags = wait.flags.lock().unwrap();
        assert!(flags.flush && flags.time_due);
    }

    #[test]
    fn test_hold_ends_on_state_change_or_flush() {
        let wait = RenderWait::new();
        let generation = wait.generation();
        wait.state_changed();
        assert_eq!(wait.hold(generation), WaitOutcome::StateChanged);

        // Flush takes priority over a state change.
        wait.set_flush(true);
        assert_eq!(wait.hold(generation), WaitOutcome::Flushed);
    }

    #[test]
    fn test_wait_ready_times_out() {
        let wait = RenderWait::new();
        wait.set_ready(false);
        assert!(!wait.wait_ready(Duration::from_millis(5)));
        wait.set_ready(true);
        assert!(wait.wait_ready(Duration::from_millis(5)));
    }

    #[test]
    fn test_end_of_stream_posts_complete_once() {
        let (renderer, _) = renderer();
        let (sink, events) = ChannelEventSink::unbounded();
        let sink: Arc<dyn EventSink> = Arc::new(sink);
        renderer.join_graph(Some(&sink));

        let ops = renderer.ops();
        let pin = renderer.sink_pin();
        assert_eq!(ops.end_of_stream(&renderer, pin).unwrap(), Delivery::Delivered);
        assert_eq!(ops.end_of_stream(&renderer, pin).unwrap(), Delivery::Discarded);
        assert!(renderer.is_end_of_stream());

        assert_eq!(
            events.try_recv().unwrap(),
            Some(GraphEvent::Complete {
                filter: "speaker".into()
            })
        );
        assert_eq!(events.try_recv().unwrap(), None);
    }

    #[test]
    fn test_end_flush_clears_end_of_stream() {
        let (renderer, _) = renderer();
        let ops = renderer.ops();
        let pin = renderer.sink_pin();
        ops.end_of_stream(&renderer, pin).unwrap();
        ops.begin_flush(&renderer, pin).unwrap();
        ops.end_flush(&renderer, pin).unwrap();
        assert!(!renderer.is_end_of_stream());
    }
}
