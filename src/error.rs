//! Error types for strmbase.

use thiserror::Error;

/// Result type alias using strmbase's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by pins, filters, allocators and clocks.
///
/// Transient flow-control outcomes (a flushed delivery, an intermediate state
/// query) are not errors; see [`Delivery`](crate::filter::Delivery) and
/// [`StateQuery`](crate::filter::StateQuery).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The operation needs the filter to be stopped.
    #[error("filter is not stopped")]
    NotStopped,

    /// The operation is not valid in the filter's current state.
    #[error("operation not valid while {0}")]
    WrongState(crate::filter::FilterState),

    /// The pin already has a peer.
    #[error("pin is already connected")]
    AlreadyConnected,

    /// The pin has no peer.
    #[error("pin is not connected")]
    NotConnected,

    /// The pins cannot be connected in this direction.
    #[error("pin direction does not allow this operation")]
    WrongDirection,

    /// No media type could be agreed between the two pins.
    #[error("no acceptable media type between {output} and {input}")]
    NoAcceptableFormats {
        /// Output (source) pin name.
        output: String,
        /// Input (sink) pin name.
        input: String,
    },

    /// The pin rejected the proposed media type.
    #[error("media type not accepted")]
    TypeNotAccepted,

    /// The sink pin does not supply an allocator.
    #[error("pin does not supply an allocator")]
    NoAllocator,

    /// Buffers were requested from a decommitted allocator.
    #[error("allocator is not committed")]
    NotCommitted,

    /// Allocator failure.
    #[error("allocator error: {0}")]
    Allocator(String),

    /// A bounded wait expired.
    #[error("operation timed out")]
    Timeout,

    /// The capability is not provided by this object.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// An argument was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The filter's pin set changed since the enumerator was created.
    #[error("enumerator is out of sync with its filter")]
    EnumOutOfSync,

    /// The pin outlived the filter that owns it.
    #[error("pin's filter has been released")]
    FilterReleased,

    /// Reference clock failure.
    #[error("clock error: {0}")]
    Clock(String),

    /// A filter hook reported a failure.
    #[error("{0}")]
    Hook(String),
}

impl Error {
    /// Returns true for errors that only mean "this media type did not work".
    ///
    /// Connection negotiation moves on to the next candidate type for these
    /// and aborts on anything else.
    pub fn is_format_rejection(&self) -> bool {
        matches!(
            self,
            Error::TypeNotAccepted | Error::NoAcceptableFormats { .. }
        )
    }

    /// Create a hook error from any displayable value.
    pub fn hook(message: impl std::fmt::Display) -> Self {
        Error::Hook(message.to_string())
    }
}
