//! Error tiers for values and handles crossing the bridge.
//!
//! Every failure that leaves the bridge is one of these variants, folded
//! into [`BridgeError`] so callers on either side receive a value (or its
//! message) instead of an unwinding panic.

use thiserror::Error;

use crate::handle::HandleKind;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Structured-value bytes that could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The bytes are not a well-formed structured value.
    #[error("Malformed structured value: {0}")]
    Json(#[from] serde_json::Error),

    /// A boundary string was not valid UTF-8.
    #[error("Invalid UTF-8 in boundary string: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// The value decoded but has the wrong shape.
    #[error("Expected {expected}, found {found}")]
    UnexpectedShape { expected: &'static str, found: String },

    /// A canned query URI could not be parsed.
    #[error("Malformed query URI '{uri}': {message}")]
    Uri { uri: String, message: String },
}

impl DecodeError {
    /// Create a shape mismatch error.
    pub fn shape(expected: &'static str, found: impl Into<String>) -> Self {
        Self::UnexpectedShape {
            expected,
            found: found.into(),
        }
    }
}

/// A typed value that has no structured-value representation.
#[derive(Debug, Error)]
#[error("Value cannot be encoded: {message}")]
pub struct EncodeError {
    pub message: String,
}

impl From<serde_json::Error> for EncodeError {
    fn from(e: serde_json::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

/// Misuse of a reply or of a request-scoped object.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    /// The reply already reached a terminal state.
    #[error("Reply is already {state}; cannot {operation}")]
    ReplyClosed {
        state: &'static str,
        operation: &'static str,
    },

    /// A result attribute was requested that was never set.
    #[error("Result has no attribute '{key}'")]
    MissingAttribute { key: String },

    /// The payload is structurally valid but not acceptable here.
    #[error("Invalid payload: {message}")]
    InvalidPayload { message: String },

    /// A preview may register its column layouts once.
    #[error("Column layouts were already registered for this preview")]
    LayoutAlreadyRegistered,

    /// Layouts describe widgets pushed after them.
    #[error("Column layouts must be registered before any widget is pushed")]
    LayoutAfterWidgets,

    /// A column index beyond the columns added so far.
    #[error("Column {index} out of range (layout has {count} columns)")]
    ColumnOutOfRange { index: usize, count: usize },

    /// More columns added than the layout declares.
    #[error("Layout has room for {capacity} columns")]
    TooManyColumns { capacity: usize },

    /// A filter option id the filter does not define.
    #[error("Filter '{filter}' has no option '{option}'")]
    UnknownOption { filter: String, option: String },

    /// A filter value outside of its permitted range.
    #[error("Value {value} is outside the range of filter '{filter}'")]
    OutOfRange { filter: String, value: f64 },

    /// Child widgets are only valid on expandable widgets.
    #[error("Widget '{id}' of type '{widget_type}' cannot hold child widgets")]
    NotExpandable { id: String, widget_type: String },

    /// Perform-query responses must carry their query.
    #[error("A perform-query activation response requires a query")]
    QueryResponseWithoutQuery,
}

impl RequestError {
    /// Create an invalid payload error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            message: message.into(),
        }
    }
}

/// An operation that the host does not offer at its version.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// The host is older than the bridge supports.
    #[error("Host version {found} is older than the required {required}")]
    VersionTooOld { found: String, required: String },

    /// The host lacks a specific operation.
    #[error("{capability} is not supported by the host: {detail}")]
    Unsupported {
        capability: &'static str,
        detail: String,
    },
}

/// A failure reported by the host itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Host failure: {message}")]
pub struct HostError {
    pub message: String,
}

impl HostError {
    /// Create a host error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Misuse of handle slots or adapter lifecycles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// Initializing a slot that already holds a reference.
    #[error("Handle slot already holds a {kind} reference")]
    SlotOccupied { kind: String },

    /// Reading a slot that holds nothing.
    #[error("Handle slot is empty")]
    EmptySlot,

    /// The slot names an object that was already released.
    #[error("Handle {id} is not live")]
    StaleHandle { id: u64 },

    /// The slot holds a different kind of object.
    #[error("Expected a {expected} handle, found {found}")]
    KindMismatch {
        expected: HandleKind,
        found: HandleKind,
    },

    /// The slot carries a tag no kind uses.
    #[error("Unknown handle kind tag {tag}")]
    UnknownKind { tag: u64 },

    /// A lifecycle step invoked out of order.
    #[error("Cannot {operation} while {state}")]
    InvalidTransition {
        state: &'static str,
        operation: &'static str,
    },
}

/// Any failure surfaced across the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Host(#[from] HostError),

    /// A failure raised by embedding scope logic.
    #[error("{message}")]
    Scope { message: String },
}

impl BridgeError {
    /// Create an error raised by scope logic.
    pub fn scope(message: impl Into<String>) -> Self {
        Self::Scope {
            message: message.into(),
        }
    }

    /// The single message handed across the boundary.
    pub fn boundary_message(&self) -> String {
        match self {
            Self::Scope { message } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Whether this error came from misusing a request-scoped object.
    pub fn is_request_error(&self) -> bool {
        matches!(self, Self::Request(_))
    }
}
