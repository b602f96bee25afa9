//! Reference time and clock types.
//!
//! This module provides:
//! - [`RefTime`]: a signed 100-nanosecond timestamp (8 bytes, Copy)
//! - [`ReferenceClock`]: the clock contract filters synchronize against
//! - [`AdviseSignal`]: the handle a clock fires when an advise comes due
//! - [`SystemClock`]: a monotonic clock with a timer thread for advises

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::error::{Error, Result};

// ============================================================================
// RefTime
// ============================================================================

/// Time in 100-nanosecond units (8 bytes, Copy).
///
/// Stream times (sample start/stop) are relative to the stream start time
/// passed to `Run`; clock times are whatever epoch the clock uses. Both are
/// signed so that "how early is this sample" can be expressed directly.
///
/// # Examples
///
/// ```rust
/// use strmbase::clock::RefTime;
///
/// let t1 = RefTime::from_secs(1);
/// let t2 = RefTime::from_millis(500);
/// let t3 = t1 + t2;
///
/// assert_eq!(t3.millis(), 1500);
/// assert_eq!(format!("{}", t3), "1.500s");
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct RefTime(i64);

impl RefTime {
    /// Zero time.
    pub const ZERO: Self = Self(0);

    /// Largest representable time.
    pub const MAX: Self = Self(i64::MAX);

    /// Smallest representable time.
    pub const MIN: Self = Self(i64::MIN);

    /// Units per millisecond.
    pub const UNITS_PER_MS: i64 = 10_000;

    /// Units per second.
    pub const UNITS_PER_SEC: i64 = 10_000_000;

    /// Create from raw 100 ns units.
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Self(units)
    }

    /// Create from microseconds.
    #[inline]
    pub const fn from_micros(us: i64) -> Self {
        Self(us.saturating_mul(10))
    }

    /// Create from milliseconds.
    #[inline]
    pub const fn from_millis(ms: i64) -> Self {
        Self(ms.saturating_mul(Self::UNITS_PER_MS))
    }

    /// Create from seconds.
    #[inline]
    pub const fn from_secs(s: i64) -> Self {
        Self(s.saturating_mul(Self::UNITS_PER_SEC))
    }

    /// Raw 100 ns units.
    #[inline]
    pub const fn units(self) -> i64 {
        self.0
    }

    /// Milliseconds (truncated toward zero).
    #[inline]
    pub const fn millis(self) -> i64 {
        self.0 / Self::UNITS_PER_MS
    }

    /// Seconds (truncated toward zero).
    #[inline]
    pub const fn secs(self) -> i64 {
        self.0 / Self::UNITS_PER_SEC
    }

    #[inline]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    #[inline]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    #[inline]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Convert to a `Duration`, clamping negative times to zero.
    #[inline]
    pub fn to_duration(self) -> Duration {
        if self.0 <= 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos((self.0 as u64).saturating_mul(100))
        }
    }
}

impl std::ops::Add for RefTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl std::ops::AddAssign for RefTime {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = self.saturating_add(rhs);
    }
}

impl std::ops::Sub for RefTime {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl std::ops::SubAssign for RefTime {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        *self = self.saturating_sub(rhs);
    }
}

impl std::ops::Neg for RefTime {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self(self.0.saturating_neg())
    }
}

impl From<Duration> for RefTime {
    #[inline]
    fn from(d: Duration) -> Self {
        Self(i64::try_from(d.as_nanos() / 100).unwrap_or(i64::MAX))
    }
}

impl std::fmt::Display for RefTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let secs = abs / Self::UNITS_PER_SEC as u64;
        let ms = (abs / Self::UNITS_PER_MS as u64) % 1000;
        write!(f, "{}{}.{:03}s", sign, secs, ms)
    }
}

// ============================================================================
// Advise plumbing
// ============================================================================

/// Identifies a pending advise so it can be cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AdviseCookie(u64);

impl AdviseCookie {
    /// Create a cookie from a clock-specific id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The clock-specific id.
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// A signal a clock raises when an advise comes due.
///
/// Cloning shares the same underlying callback.
#[derive(Clone)]
pub struct AdviseSignal {
    notify: Arc<dyn Fn() + Send + Sync>,
}

impl AdviseSignal {
    /// Wrap a callback. The callback may run on the clock's own thread or
    /// synchronously inside `advise_time`, so it must not block.
    pub fn new(notify: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            notify: Arc::new(notify),
        }
    }

    /// Raise the signal.
    #[inline]
    pub fn fire(&self) {
        (self.notify)();
    }
}

impl std::fmt::Debug for AdviseSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdviseSignal").finish_non_exhaustive()
    }
}

// ============================================================================
// ReferenceClock Trait
// ============================================================================

/// A clock that filters synchronize presentation against.
///
/// Implementations provide monotonic time and one-shot advises. A clock may
/// fire an advise synchronously from inside `advise_time` when the requested
/// time has already passed.
pub trait ReferenceClock: Send + Sync {
    /// Current clock time.
    fn time(&self) -> RefTime;

    /// Fire `signal` once the clock reaches `base + offset`.
    fn advise_time(
        &self,
        base: RefTime,
        offset: RefTime,
        signal: AdviseSignal,
    ) -> Result<AdviseCookie>;

    /// Fire `signal` at `start` and every `period` after it until cancelled.
    fn advise_periodic(
        &self,
        start: RefTime,
        period: RefTime,
        signal: AdviseSignal,
    ) -> Result<AdviseCookie> {
        let _ = (start, period, signal);
        Err(Error::NotImplemented("periodic advise"))
    }

    /// Cancel an advise. Cancelling one that already fired is not an error.
    fn unadvise(&self, cookie: AdviseCookie) -> Result<()>;

    /// Human-readable clock name.
    fn name(&self) -> &str {
        "unknown"
    }
}

// ============================================================================
// SystemClock
// ============================================================================

/// System monotonic clock.
///
/// Time is relative to when the clock was created. Advises are served by a
/// timer thread that starts on the first advise and stops when the clock is
/// dropped.
pub struct SystemClock {
    shared: Arc<ClockShared>,
    name: String,
}

struct ClockShared {
    epoch: Instant,
    timers: Mutex<TimerState>,
    wake: Condvar,
}

#[derive(Default)]
struct TimerState {
    next_cookie: u64,
    pending: HashMap<u64, PendingAdvise>,
    worker: Option<JoinHandle<()>>,
    shutdown: bool,
}

struct PendingAdvise {
    due: RefTime,
    period: Option<RefTime>,
    signal: AdviseSignal,
}

impl SystemClock {
    /// Create a new system clock with the current instant as epoch.
    pub fn new() -> Self {
        Self::with_name("system-monotonic")
    }

    /// Create a system clock with a custom name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(ClockShared {
                epoch: Instant::now(),
                timers: Mutex::new(TimerState::default()),
                wake: Condvar::new(),
            }),
            name: name.into(),
        }
    }

    /// Number of advises not yet fired or cancelled.
    pub fn pending_advises(&self) -> usize {
        self.shared.timers.lock().unwrap().pending.len()
    }

    fn schedule(
        &self,
        due: RefTime,
        period: Option<RefTime>,
        signal: AdviseSignal,
    ) -> Result<AdviseCookie> {
        let mut timers = self.shared.timers.lock().unwrap();
        if timers.worker.is_none() {
            let shared = Arc::clone(&self.shared);
            let worker = thread::Builder::new()
                .name(format!("{}-timer", self.name))
                .spawn(move || shared.run_timers())
                .map_err(|e| Error::Clock(e.to_string()))?;
            timers.worker = Some(worker);
        }

        timers.next_cookie += 1;
        let cookie = timers.next_cookie;
        timers.pending.insert(
            cookie,
            PendingAdvise {
                due,
                period,
                signal,
            },
        );
        self.shared.wake.notify_all();

        trace!(clock = %self.name, cookie, due = %due, "advise scheduled");
        Ok(AdviseCookie(cookie))
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockShared {
    #[inline]
    fn now(&self) -> RefTime {
        RefTime::from(self.epoch.elapsed())
    }

    fn run_timers(self: Arc<Self>) {
        let mut timers = self.timers.lock().unwrap();
        loop {
            if timers.shutdown {
                return;
            }

            let now = self.now();
            let mut fired: SmallVec<[AdviseSignal; 4]> = SmallVec::new();
            timers.pending.retain(|_, advise| {
                if advise.due > now {
                    return true;
                }
                fired.push(advise.signal.clone());
                match advise.period {
                    Some(period) => {
                        let missed = (now - advise.due).units() / period.units() + 1;
                        advise.due += RefTime::from_units(period.units().saturating_mul(missed));
                        true
                    }
                    None => false,
                }
            });

            if !fired.is_empty() {
                drop(timers);
                for signal in &fired {
                    signal.fire();
                }
                timers = self.timers.lock().unwrap();
                continue;
            }

            let next_due = timers.pending.values().map(|a| a.due).min();
            timers = match next_due {
                Some(due) => {
                    self.wake
                        .wait_timeout(timers, (due - now).to_duration())
                        .unwrap()
                        .0
                }
                None => self.wake.wait(timers).unwrap(),
            };
        }
    }
}

impl ReferenceClock for SystemClock {
    #[inline]
    fn time(&self) -> RefTime {
        self.shared.now()
    }

    fn advise_time(
        &self,
        base: RefTime,
        offset: RefTime,
        signal: AdviseSignal,
    ) -> Result<AdviseCookie> {
        let due = base
            .checked_add(offset)
            .ok_or_else(|| Error::InvalidArgument("advise time overflows".into()))?;
        if due.is_negative() {
            return Err(Error::InvalidArgument(format!("advise time {} is negative", due)));
        }
        self.schedule(due, None, signal)
    }

    fn advise_periodic(
        &self,
        start: RefTime,
        period: RefTime,
        signal: AdviseSignal,
    ) -> Result<AdviseCookie> {
        if period.units() <= 0 || start.is_negative() {
            return Err(Error::InvalidArgument(format!(
                "periodic advise start {} period {}",
                start, period
            )));
        }
        self.schedule(start, Some(period), signal)
    }

    fn unadvise(&self, cookie: AdviseCookie) -> Result<()> {
        let removed = self.shared.timers.lock().unwrap().pending.remove(&cookie.0);
        trace!(clock = %self.name, cookie = cookie.0, removed = removed.is_some(), "unadvise");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SystemClock {
    fn drop(&mut self) {
        let worker = {
            let mut timers = self.shared.timers.lock().unwrap();
            timers.shutdown = true;
            timers.pending.clear();
            timers.worker.take()
        };
        self.shared.wake.notify_all();

        if let Some(worker) = worker {
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
            debug!(clock = %self.name, "timer thread stopped");
        }
    }
}
