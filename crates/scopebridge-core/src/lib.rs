//! Core types for scopebridge.
//!
//! This crate provides the values that cross the bridge between a native
//! scope host and an embedding runtime: the boundary codec, opaque handle
//! slots, and the domain records scopes exchange with the host.

pub mod codec;
mod activation;
mod department;
mod error;
mod filters;
mod handle;
mod metadata;
mod preview;
mod query;
mod result;
mod value;

pub use activation::{ActivationResponse, ActivationStatus};
pub use department::{Department, DepartmentRef};
pub use error::{
    BridgeError, BridgeResult, CapabilityError, DecodeError, EncodeError, HostError,
    LifecycleError, RequestError,
};
pub use filters::{
    DISPLAY_PRIMARY, Filter, FilterBase, FilterOption, OptionSelectorFilter, RadioButtonsFilter,
    RangeInputFilter, RatingFilter, SliderType, SwitchFilter, ValueSliderFilter,
};
pub use handle::{HandleKind, HandleSlot, HandleTable, OwnedHandle, Shared, Tracked};
pub use metadata::{
    ActionMetadata, ConnectivityStatus, Location, QueryMetadata, ScopeMetadata,
    ScopeMetadataBuilder, SearchMetadata,
};
pub use preview::{ColumnLayout, EXPANDABLE_WIDGET, PreviewWidget};
pub use query::{CannedQuery, FilterState};
pub use result::{Category, DEFAULT_RENDERER, ResultRef, ScopeResult};
pub use value::Value;
