//! Configuration for the filter kinds built into the crate.

use crate::clock::RefTime;
use crate::observability::TracingConfig;

/// Renderer behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// How far ahead of its presentation time a sample must arrive before
    /// the renderer waits on the clock instead of rendering at once.
    pub early_threshold: RefTime,

    /// Send quality messages upstream.
    pub qos: bool,

    /// Optional spans and events.
    pub tracing: TracingConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            early_threshold: RefTime::from_millis(1),
            qos: true,
            tracing: TracingConfig::default(),
        }
    }
}

impl RendererConfig {
    pub fn with_early_threshold(mut self, threshold: RefTime) -> Self {
        self.early_threshold = threshold;
        self
    }

    pub fn with_qos(mut self, enabled: bool) -> Self {
        self.qos = enabled;
        self
    }

    pub fn with_tracing(mut self, tracing: TracingConfig) -> Self {
        self.tracing = tracing;
        self
    }
}
