//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use strmbase::clock::{AdviseCookie, AdviseSignal, RefTime, ReferenceClock};
use strmbase::error::{Error, Result};
use strmbase::filter::{Filter, FilterOps};
use strmbase::format::{FourCc, MajorType, MediaType};
use strmbase::pin::{Pin, PinDirection, PinTemplate};
use strmbase::quality::Quality;
use strmbase::renderer::RenderHooks;
use strmbase::sample::{Sample, Segment};
use strmbase::seeking::{MediaSeeking, SourceSeeking};
use strmbase::transform::{TransformHooks, TransformOutcome};

pub const A: FourCc = FourCc::new(b"AAAA");
pub const B: FourCc = FourCc::new(b"BBBB");
pub const C: FourCc = FourCc::new(b"CCCC");

pub fn video(subtype: FourCc) -> MediaType {
    MediaType::new(MajorType::Video, subtype)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `cond` until it holds, failing the test after five seconds.
pub fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// A sample of `len` bytes presented over `[start_ms, stop_ms)`.
pub fn timed_sample(start_ms: i64, stop_ms: i64) -> Sample {
    Sample::from_vec(vec![0x5a; 16]).with_time(RefTime::from_millis(start_ms), RefTime::from_millis(stop_ms))
}

// ============================================================================
// ManualClock
// ============================================================================

/// A clock that only moves when told to.
#[derive(Default)]
pub struct ManualClock {
    now: Mutex<RefTime>,
    advises: Mutex<Vec<(AdviseCookie, RefTime, AdviseSignal)>>,
    next_cookie: AtomicU64,
}

impl ManualClock {
    pub fn new(now: RefTime) -> Arc<Self> {
        let clock = Self::default();
        *clock.now.lock().unwrap() = now;
        Arc::new(clock)
    }

    /// Move the clock to `now` and fire every advise that came due.
    pub fn advance_to(&self, now: RefTime) {
        *self.now.lock().unwrap() = now;
        let due: Vec<AdviseSignal> = {
            let mut advises = self.advises.lock().unwrap();
            let (due, pending): (Vec<_>, Vec<_>) = advises.drain(..).partition(|(_, at, _)| *at <= now);
            *advises = pending;
            due.into_iter().map(|(_, _, signal)| signal).collect()
        };
        for signal in due {
            signal.fire();
        }
    }

    pub fn pending(&self) -> usize {
        self.advises.lock().unwrap().len()
    }
}

impl ReferenceClock for ManualClock {
    fn time(&self) -> RefTime {
        *self.now.lock().unwrap()
    }

    fn advise_time(&self, base: RefTime, offset: RefTime, signal: AdviseSignal) -> Result<AdviseCookie> {
        let due = base + offset;
        let cookie = AdviseCookie::new(self.next_cookie.fetch_add(1, Ordering::SeqCst));
        if due <= self.time() {
            signal.fire();
        } else {
            self.advises.lock().unwrap().push((cookie, due, signal));
        }
        Ok(cookie)
    }

    fn unadvise(&self, cookie: AdviseCookie) -> Result<()> {
        self.advises.lock().unwrap().retain(|(c, _, _)| *c != cookie);
        Ok(())
    }

    fn name(&self) -> &str {
        "manual"
    }
}

// ============================================================================
// Source filter
// ============================================================================

/// Observable state of a test source.
#[derive(Default)]
pub struct SourceState {
    pub offered: Vec<MediaType>,
    pub accepted: Vec<MediaType>,
    pub seeking: Option<Arc<SourceSeeking>>,
    pub quality: Mutex<Vec<Quality>>,
}

/// Ops of a source filter with a single "Out" pin.
pub struct SourceOps(pub Arc<SourceState>);

impl FilterOps for SourceOps {
    fn check_media_type(&self, _pin: &Pin, mt: &MediaType) -> Result<()> {
        if self.0.accepted.iter().any(|accepted| mt.matches(accepted)) {
            Ok(())
        } else {
            Err(Error::TypeNotAccepted)
        }
    }

    fn media_type(&self, _pin: &Pin, index: usize) -> Option<MediaType> {
        self.0.offered.get(index).cloned()
    }

    fn notify_quality(&self, _filter: &Filter, _pin: &Pin, quality: &Quality) -> Option<Result<()>> {
        self.0.quality.lock().unwrap().push(*quality);
        Some(Ok(()))
    }

    fn seeking(&self, pin: Option<&Pin>) -> Option<Arc<dyn MediaSeeking>> {
        let seeking = self.0.seeking.clone()?;
        match pin.map(Pin::direction) {
            None | Some(PinDirection::Output) => Some(seeking as Arc<dyn MediaSeeking>),
            Some(PinDirection::Input) => None,
        }
    }
}

pub fn source(name: &str, offered: &[FourCc]) -> (Arc<Filter>, Arc<SourceState>) {
    source_with(name, offered, offered, None)
}

pub fn source_with_seeking(
    name: &str,
    offered: &[FourCc],
    seeking: Arc<SourceSeeking>,
) -> (Arc<Filter>, Arc<SourceState>) {
    source_with(name, offered, offered, Some(seeking))
}

/// A source that enumerates `offered` but accepts `accepted`.
pub fn source_with(
    name: &str,
    offered: &[FourCc],
    accepted: &[FourCc],
    seeking: Option<Arc<SourceSeeking>>,
) -> (Arc<Filter>, Arc<SourceState>) {
    let state = Arc::new(SourceState {
        offered: offered.iter().map(|s| video(*s)).collect(),
        accepted: accepted.iter().map(|s| video(*s)).collect(),
        seeking,
        quality: Mutex::new(Vec::new()),
    });
    let filter = Filter::new(name, "test-source", [PinTemplate::output("Out")], SourceOps(Arc::clone(&state)));
    (filter, state)
}

// ============================================================================
// Renderer hooks
// ============================================================================

/// Renderer hooks that accept a fixed set of subtypes and record every call.
#[derive(Default)]
pub struct RecordingRenderer {
    pub accepted: Vec<FourCc>,
    pub rendered: Mutex<Vec<Option<RefTime>>>,
    pub begin_flushes: AtomicUsize,
    pub end_flushes: AtomicUsize,
    pub eos: AtomicUsize,
    pub fail_render: AtomicBool,
}

impl RecordingRenderer {
    pub fn accepting(accepted: &[FourCc]) -> Self {
        Self {
            accepted: accepted.to_vec(),
            ..Self::default()
        }
    }

    pub fn rendered(&self) -> Vec<Option<RefTime>> {
        self.rendered.lock().unwrap().clone()
    }
}

impl RenderHooks for RecordingRenderer {
    const CLASS_ID: &'static str = "recording-renderer";

    fn check_media_type(&self, mt: &MediaType) -> Result<()> {
        match mt.subtype {
            Some(sub) if self.accepted.contains(&sub) => Ok(()),
            _ => Err(Error::TypeNotAccepted),
        }
    }

    fn media_type(&self, index: usize) -> Option<MediaType> {
        self.accepted.get(index).map(|s| video(*s))
    }

    fn render(&self, sample: &Sample) -> Result<()> {
        if self.fail_render.load(Ordering::SeqCst) {
            return Err(Error::hook("display lost"));
        }
        self.rendered.lock().unwrap().push(sample.time().map(|(start, _)| start));
        Ok(())
    }

    fn end_of_stream(&self) -> Result<()> {
        self.eos.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn begin_flush(&self) -> Result<()> {
        self.begin_flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn end_flush(&self) -> Result<()> {
        self.end_flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Transform hooks
// ============================================================================

/// A transform that copies samples of one subtype through unchanged.
pub struct Passthrough {
    pub subtype: FourCc,
    pub transformed: AtomicUsize,
    pub begin_flushes: AtomicUsize,
    pub end_flushes: AtomicUsize,
    pub eos: AtomicUsize,
    pub segments: Mutex<Vec<Segment>>,
}

impl Passthrough {
    pub fn new(subtype: FourCc) -> Self {
        Self {
            subtype,
            transformed: AtomicUsize::new(0),
            begin_flushes: AtomicUsize::new(0),
            end_flushes: AtomicUsize::new(0),
            eos: AtomicUsize::new(0),
            segments: Mutex::new(Vec::new()),
        }
    }
}

impl TransformHooks for Passthrough {
    fn check_input_type(&self, mt: &MediaType) -> Result<()> {
        if mt.subtype == Some(self.subtype) {
            Ok(())
        } else {
            Err(Error::TypeNotAccepted)
        }
    }

    fn check_output_type(&self, input: Option<&MediaType>, output: &MediaType) -> Result<()> {
        match input {
            Some(input) if input.subtype == output.subtype => Ok(()),
            _ => Err(Error::TypeNotAccepted),
        }
    }

    fn output_type(&self, input: Option<&MediaType>, index: usize) -> Option<MediaType> {
        (index == 0).then(|| input.cloned()).flatten()
    }

    fn transform(&self, input: &Sample, output: &mut Sample) -> Result<TransformOutcome> {
        output.fill(input.data())?;
        self.transformed.fetch_add(1, Ordering::SeqCst);
        Ok(TransformOutcome::Deliver)
    }

    fn end_of_stream(&self) -> Result<()> {
        self.eos.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn begin_flush(&self) -> Result<()> {
        self.begin_flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn end_flush(&self) -> Result<()> {
        self.end_flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn new_segment(&self, segment: &Segment) -> Result<()> {
        self.segments.lock().unwrap().push(*segment);
        Ok(())
    }
}
