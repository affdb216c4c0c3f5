//! Host side of scopebridge.
//!
//! This crate defines the contract of the native scope host and the bridge
//! objects that satisfy it: lifecycle adapters that cross into scope logic,
//! native reply objects enforcing the reply protocol, handle-based reply and
//! registration marshaling, cancellation, and the scope entry adapter. A C
//! ABI exposes the handle-based entry points, and [`memory`] provides an
//! in-process host.

pub mod ffi;
pub mod marshal;
pub mod memory;
mod adapter;
mod cancel;
mod host;
mod native;
mod objects;
mod reply;
mod scope;

pub use adapter::{ActivationAdapter, ActivationMode, AdapterState, PreviewAdapter, QueryAdapter};
pub use cancel::{CancelObserver, CancelSignal};
pub use host::{
    ActivationQueryBase, HostCapabilities, HostRuntime, HostVersion, PreviewQueryBase,
    PreviewReplySink, ScopeEntry, SearchQueryBase, SearchReplySink,
};
pub use native::{NativePreviewReply, NativeSearchReply, ReplyState};
pub use objects::{CategoryHandle, DepartmentHandle, ResultHandle, ScopeMetadataHandle};
pub use reply::{PreviewReply, SearchReply};
pub use scope::{ActionPerformer, Activator, Scope, ScopeAdapter, ScopeBase};
