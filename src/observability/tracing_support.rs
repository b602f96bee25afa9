//! Span helpers and per-filter tracing switches.

use tracing::{Level, Span, span};

use crate::clock::RefTime;

/// Which optional spans a filter creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Whether to create a span per rendered sample.
    pub sample_spans: bool,
    /// Whether to log every presentation wait at `trace`.
    pub wait_events: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            sample_spans: false, // Can be expensive
            wait_events: false,
        }
    }
}

impl TracingConfig {
    /// Everything enabled.
    pub fn all() -> Self {
        Self {
            sample_spans: true,
            wait_events: true,
        }
    }

    /// Nothing optional.
    pub fn none() -> Self {
        Self {
            sample_spans: false,
            wait_events: false,
        }
    }
}

/// Span for a filter operation.
///
/// # Example
///
/// ```rust,ignore
/// let _guard = span_filter("decoder", "mpeg-decoder").entered();
/// ```
#[inline]
pub fn span_filter(name: &str, class_id: &str) -> Span {
    span!(Level::DEBUG, "filter", name = %name, class = %class_id)
}

/// Span for a pin operation.
#[inline]
pub fn span_pin(filter: &str, pin: &str) -> Span {
    span!(Level::DEBUG, "pin", filter = %filter, pin = %pin)
}

/// Span for handling one sample on `pin`.
#[inline]
pub fn span_sample(pin: &str, start: Option<RefTime>) -> Span {
    match start {
        Some(start) => span!(Level::TRACE, "sample", pin = %pin, start = %start),
        None => span!(Level::TRACE, "sample", pin = %pin),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_config_presets() {
        let config = TracingConfig::default();
        assert!(!config.sample_spans);
        assert!(!config.wait_events);

        let config = TracingConfig::all();
        assert!(config.sample_spans);
        assert!(config.wait_events);

        assert_eq!(TracingConfig::none(), TracingConfig::default());
    }

    #[test]
    fn test_span_creation() {
        // These should not panic without a subscriber
        let _span = span_filter("renderer", "test-renderer");
        let _span = span_pin("renderer", "In");
        let _guard = span_sample("In", Some(RefTime::from_millis(40))).entered();
        let _guard = span_sample("In", None).entered();
    }
}
