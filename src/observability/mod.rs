//! Observability: tracing spans for filters, pins and samples.
//!
//! The crate logs through `tracing` and never installs a subscriber. Hosts
//! and tests pick one, e.g. `tracing_subscriber::fmt()`.
//!
//! Spans emitted:
//! - `filter` around every state transition (`name`, `class`)
//! - `pin` around connection negotiation (`filter`, `pin`)
//! - `sample` around a renderer's handling of one sample, when enabled in
//!   [`TracingConfig`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use strmbase::observability::span_filter;
//!
//! let _guard = span_filter("renderer", "video-renderer").entered();
//! // Work here is attributed to the filter...
//! ```

mod tracing_support;

pub use tracing_support::{TracingConfig, span_filter, span_pin, span_sample};
