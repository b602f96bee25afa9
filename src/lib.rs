//! # strmbase
//!
//! Building blocks for pin-connected streaming filters.
//!
//! A graph is made of [`Filter`]s whose [`Pin`]s are connected source to
//! sink. Before data flows, each connected pair agrees on a [`MediaType`]
//! and an [`Allocator`]. Once streaming, the upstream side pushes
//! [`Sample`]s into the downstream sink while a control thread moves every
//! filter through Stopped, Paused and Running, and issues flushes and seeks.
//!
//! ## Features
//!
//! - **Deterministic negotiation**: own preferences first, then the peer's
//! - **One lock per filter**: state changes never interleave with a sample
//! - **Clocked rendering**: [`Renderer`] pre-rolls in Paused and waits on a
//!   [`ReferenceClock`] in Running; flushes interrupt the wait
//! - **Transforms**: [`Transform`] forwards flush, end of stream, segments,
//!   quality and seeking in the right direction
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use strmbase::prelude::*;
//!
//! let source = Filter::new("source", "app-source", [PinTemplate::output("Out")], MySource);
//! let scaler = Transform::new("scaler", Scaler::default());
//! let display = Renderer::new("display", Display::default(), RendererConfig::default());
//!
//! source.pin(0).unwrap().connect(scaler.input_pin(), None)?;
//! scaler.output_pin().connect(display.sink_pin(), None)?;
//!
//! let clock: Arc<dyn ReferenceClock> = Arc::new(SystemClock::new());
//! display.set_sync_source(Some(clock.clone()));
//! for filter in [&*display, &*scaler, &*source] {
//!     filter.run(clock.time())?;
//! }
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod allocator;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod format;
pub mod observability;
pub mod pin;
pub mod quality;
pub mod renderer;
pub mod sample;
pub mod seeking;
pub mod transform;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::allocator::{Allocator, AllocatorProperties, BufferFlags, MemoryAllocator};
    pub use crate::clock::{RefTime, ReferenceClock, SystemClock};
    pub use crate::config::RendererConfig;
    pub use crate::error::{Error, Result};
    pub use crate::event::{ChannelEventSink, EventSink, GraphEvent};
    pub use crate::filter::{Delivery, Filter, FilterOps, FilterState, StateQuery};
    pub use crate::format::{FourCc, MajorType, MediaType};
    pub use crate::pin::{Pin, PinDirection, PinTemplate};
    pub use crate::renderer::{RenderHooks, Renderer};
    pub use crate::sample::{Sample, Segment};
    pub use crate::seeking::{MediaSeeking, SeekPosition, SeekingPassThrough, TimeFormat};
    pub use crate::transform::{Transform, TransformHooks, TransformOutcome};
}

pub use allocator::Allocator;
pub use clock::ReferenceClock;
pub use error::{Error, Result};
pub use filter::Filter;
pub use format::MediaType;
pub use pin::Pin;
pub use renderer::Renderer;
pub use sample::Sample;
pub use transform::Transform;
