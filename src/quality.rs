//! Quality-of-service messages and the renderer-side QoS tracker.
//!
//! A renderer measures how late each sample is presented relative to the
//! clock and how long rendering takes. From running averages of those it
//! derives a [`Quality`] message sent upstream so sources or decoders can
//! drop or catch up.

use crate::clock::RefTime;
use crate::error::Result;
use crate::filter::Filter;

/// Direction of a quality problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QualityKind {
    /// Samples arrive too late; upstream should send less.
    Famine,
    /// Samples arrive early enough; upstream may send more.
    Flood,
}

/// A quality message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality {
    pub kind: QualityKind,
    /// Requested data rate in parts per thousand of the current rate.
    pub proportion: i32,
    /// How late the sample was; negative when early.
    pub late: RefTime,
    /// Stream time of the sample the message refers to.
    pub timestamp: RefTime,
}

/// Receives quality messages.
pub trait QualityControl: Send + Sync {
    fn notify(&self, sender: &Filter, quality: Quality) -> Result<()>;
}

/// Presentation statistics of a renderer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Samples rendered.
    pub rendered: u64,
    /// Samples dropped.
    pub dropped: u64,
    /// Running average of the render hook's duration.
    pub avg_render_time: Option<RefTime>,
    /// Lateness of the last sample measured against the clock.
    pub jitter: RefTime,
}

#[inline]
fn running_avg(avg: i64, value: i64) -> i64 {
    (value + 15 * avg) / 16
}

/// Per-stream QoS bookkeeping, reset on flush and stream start.
#[derive(Debug, Default)]
pub(crate) struct QosTracker {
    current: Option<(RefTime, RefTime)>,
    jitter: RefTime,
    render_start: Option<RefTime>,
    avg_render: Option<i64>,
    avg_duration: Option<i64>,
    avg_pt: Option<i64>,
    last_left: Option<RefTime>,
    late: bool,
    rendered: u64,
    dropped: u64,
}

impl QosTracker {
    pub(crate) fn reset(&mut self) {
        *self = QosTracker {
            rendered: self.rendered,
            dropped: self.dropped,
            ..QosTracker::default()
        };
    }

    /// Start measuring a sample with presentation range `time`.
    pub(crate) fn set_current(&mut self, time: Option<(RefTime, RefTime)>) {
        self.current = time;
        self.jitter = RefTime::ZERO;
    }

    /// Lateness of the current sample (clock time minus presentation time).
    pub(crate) fn set_jitter(&mut self, jitter: RefTime) {
        self.jitter = jitter;
    }

    pub(crate) fn begin_render(&mut self, now: Option<RefTime>) {
        self.render_start = now;
    }

    pub(crate) fn end_render(&mut self, now: Option<RefTime>) {
        if let (Some(start), Some(end)) = (self.render_start.take(), now) {
            let elapsed = (end - start).units();
            self.avg_render = Some(match self.avg_render {
                Some(avg) => running_avg(avg, elapsed),
                None => elapsed,
            });
        }
    }

    /// Account for the current sample and decide whether upstream should
    /// hear about it.
    ///
    /// A Famine message is produced for every late sample; one Flood message
    /// is produced on the first sample back on time.
    pub(crate) fn do_qos(&mut self, dropped: bool) -> Option<Quality> {
        if dropped {
            self.dropped += 1;
        } else {
            self.rendered += 1;
        }
        let (start, stop) = self.current.take()?;
        let jitter = self.jitter;

        // Time the sample entered and left the renderer, in stream time.
        let (entered, left) = if jitter.is_negative() {
            let entered = if start < -jitter { RefTime::ZERO } else { start + jitter };
            (entered, start)
        } else {
            (start + jitter, start + jitter)
        };

        let duration = if stop >= start { (stop - start).units() } else { 0 };
        self.avg_duration = Some(match self.avg_duration {
            Some(avg) => running_avg(avg, duration),
            None => duration,
        });

        let pt = match self.last_left {
            Some(last) if entered > last => (entered - last).units(),
            _ => 0,
        };
        self.avg_pt = Some(match self.avg_pt {
            Some(avg) => running_avg(avg, pt),
            None => pt,
        });
        self.last_left = Some(left);

        let late = jitter.units() > 0;
        let was_late = std::mem::replace(&mut self.late, late);
        if !late && !was_late {
            return None;
        }

        let proportion = match (self.avg_pt, self.avg_duration) {
            (Some(pt), Some(dur)) if pt > 0 && dur > 0 => {
                ((1000 * dur) / pt).clamp(1, i32::MAX as i64) as i32
            }
            _ => 1000,
        };
        Some(Quality {
            kind: if late { QualityKind::Famine } else { QualityKind::Flood },
            proportion,
            late: jitter,
            timestamp: start,
        })
    }

    pub(crate) fn stats(&self) -> RenderStats {
        RenderStats {
            rendered: self.rendered,
            dropped: self.dropped,
            avg_render_time: self.avg_render.map(RefTime::from_units),
            jitter: self.jitter,
        }
    }
}
