//! Notifications filters post to the graph that owns them.
//!
//! A filter holds only a weak reference to its graph's [`EventSink`], set
//! with [`Filter::join_graph`](crate::filter::Filter::join_graph). Renderers
//! post [`GraphEvent::Complete`] when end of stream reaches them and
//! [`GraphEvent::ErrorAbort`] when rendering fails.
//!
//! ```rust,ignore
//! let (sink, events) = ChannelEventSink::unbounded();
//! let sink: Arc<dyn EventSink> = Arc::new(sink);
//! renderer.join_graph(Some(&sink));
//!
//! while let Ok(event) = events.recv() {
//!     println!("{}", event);
//! }
//! ```

use std::fmt;

use kanal::{Receiver, Sender};
use tracing::trace;

/// Events posted by filters to their graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphEvent {
    /// A renderer has presented the last sample of its stream.
    Complete {
        /// The renderer that completed.
        filter: String,
    },

    /// Streaming failed and cannot continue.
    ErrorAbort {
        /// The filter reporting the failure.
        filter: String,
        /// The error message.
        message: String,
    },

    /// Custom filter-defined event.
    Custom {
        /// The posting filter.
        filter: String,
        /// Event name.
        name: String,
        /// Event payload (opaque bytes).
        payload: Vec<u8>,
    },
}

impl GraphEvent {
    /// Name of the filter that posted the event.
    pub fn filter(&self) -> &str {
        match self {
            GraphEvent::Complete { filter }
            | GraphEvent::ErrorAbort { filter, .. }
            | GraphEvent::Custom { filter, .. } => filter,
        }
    }
}

impl fmt::Display for GraphEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphEvent::Complete { filter } => write!(f, "Complete: {}", filter),
            GraphEvent::ErrorAbort { filter, message } => {
                write!(f, "ErrorAbort in {}: {}", filter, message)
            }
            GraphEvent::Custom {
                filter,
                name,
                payload,
            } => write!(f, "Custom {} from {} ({} bytes)", name, filter, payload.len()),
        }
    }
}

/// Receives events posted by filters.
pub trait EventSink: Send + Sync {
    fn notify(&self, event: GraphEvent);
}

/// An [`EventSink`] that forwards events into a channel.
#[derive(Clone)]
pub struct ChannelEventSink {
    sender: Sender<GraphEvent>,
}

impl ChannelEventSink {
    /// Sink with an unbounded queue.
    pub fn unbounded() -> (Self, Receiver<GraphEvent>) {
        let (sender, receiver) = kanal::unbounded();
        (Self { sender }, receiver)
    }

    /// Sink with a bounded queue. Events are dropped when the queue is full,
    /// so posting never blocks a streaming thread.
    pub fn bounded(capacity: usize) -> (Self, Receiver<GraphEvent>) {
        let (sender, receiver) = kanal::bounded(capacity);
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn notify(&self, event: GraphEvent) {
        match self.sender.try_send(event) {
            Ok(true) => {}
            Ok(false) => trace!("graph event queue full, event dropped"),
            Err(_) => trace!("graph event receiver closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_delivers() {
        let (sink, events) = ChannelEventSink::unbounded();
        sink.notify(GraphEvent::Complete {
            filter: "renderer".into(),
        });
        let event = events.try_recv().unwrap().unwrap();
        assert_eq!(event.filter(), "renderer");
        assert_eq!(event.to_string(), "Complete: renderer");
    }

    #[test]
    fn test_bounded_sink_never_blocks() {
        let (sink, events) = ChannelEventSink::bounded(1);
        for _ in 0..3 {
            sink.notify(GraphEvent::Complete {
                filter: "r".into(),
            });
        }
        assert!(events.try_recv().unwrap().is_some());
        assert!(events.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_closed_receiver_is_ignored() {
        let (sink, events) = ChannelEventSink::unbounded();
        drop(events);
        sink.notify(GraphEvent::ErrorAbort {
            filter: "r".into(),
            message: "boom".into(),
        });
    }
}
