//! The contract of the native scope host.
//!
//! The host is a closed collaborator: it constructs query objects through
//! a [`ScopeEntry`], runs them on its own worker threads, and consumes the
//! reply stream through the sink traits below.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use scopebridge_core::{
    ActionMetadata, ActivationResponse, BridgeResult, CannedQuery, CapabilityError, Category,
    ColumnLayout, DecodeError, DepartmentRef, Filter, FilterState, HostError, PreviewWidget,
    ResultRef, ScopeMetadata, ScopeResult, SearchMetadata, Value,
};

/// Host library version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostVersion {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

impl HostVersion {
    /// Oldest host the bridge runs against.
    pub const MINIMUM: Self = Self::new(0, 6, 15);

    /// First host able to receive filter definitions.
    pub const FILTERS: Self = Self::new(0, 6, 10);

    pub const fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
        }
    }
}

impl fmt::Display for HostVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}

impl FromStr for HostVersion {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.').map(str::parse::<u32>);
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(Ok(major)), Some(Ok(minor)), micro, None) => {
                let micro = match micro {
                    Some(Ok(m)) => m,
                    None => 0,
                    Some(Err(_)) => return Err(DecodeError::shape("version major.minor[.micro]", s)),
                };
                Ok(Self::new(major, minor, micro))
            }
            _ => Err(DecodeError::shape("version major.minor[.micro]", s)),
        }
    }
}

/// What the running host offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapabilities {
    pub version: HostVersion,
    pub push_filters: bool,
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self {
            version: HostVersion::MINIMUM,
            push_filters: true,
        }
    }
}

impl HostCapabilities {
    pub fn new(version: HostVersion) -> Self {
        Self {
            version,
            push_filters: version >= HostVersion::FILTERS,
        }
    }

    /// Disable filter pushes regardless of version.
    pub fn without_filters(mut self) -> Self {
        self.push_filters = false;
        self
    }

    /// Check the host is recent enough to run scopes at all.
    pub fn check_supported(&self) -> Result<(), CapabilityError> {
        if self.version < HostVersion::MINIMUM {
            return Err(CapabilityError::VersionTooOld {
                found: self.version.to_string(),
                required: HostVersion::MINIMUM.to_string(),
            });
        }
        Ok(())
    }

    /// Check filter definitions may be pushed.
    pub fn check_filters(&self) -> Result<(), CapabilityError> {
        if !self.push_filters || self.version < HostVersion::FILTERS {
            return Err(CapabilityError::Unsupported {
                capability: "push_filters",
                detail: format!("host version {}", self.version),
            });
        }
        Ok(())
    }
}

/// Receives the output of one search.
pub trait SearchReplySink: Send + Sync {
    fn register_category(&self, category: &Category) -> Result<(), HostError>;

    fn register_departments(&self, root: &DepartmentRef) -> Result<(), HostError>;

    fn push(&self, result: &ScopeResult) -> Result<(), HostError>;

    fn push_filters(&self, filters: &[Filter], state: &FilterState) -> Result<(), HostError>;

    /// The search completed; no further calls follow.
    fn finished(&self);

    /// The search failed; no further calls follow.
    fn error(&self, message: &str);
}

/// Receives the output of one preview.
pub trait PreviewReplySink: Send + Sync {
    fn register_layout(&self, layouts: &[ColumnLayout]) -> Result<(), HostError>;

    fn push_widgets(&self, widgets: &[PreviewWidget]) -> Result<(), HostError>;

    fn push_attribute(&self, key: &str, value: &Value) -> Result<(), HostError>;

    /// The preview completed; no further calls follow.
    fn finished(&self);

    /// The preview failed; no further calls follow.
    fn error(&self, message: &str);
}

/// A search the host runs on one of its worker threads.
pub trait SearchQueryBase: Send + Sync {
    /// Run to completion, streaming into `reply`.
    fn run(&self, reply: Arc<dyn SearchReplySink>);

    /// Request early termination. May arrive from any thread, at any time.
    fn cancelled(&self);
}

/// A preview the host runs on one of its worker threads.
pub trait PreviewQueryBase: Send + Sync {
    /// Run to completion, streaming into `reply`.
    fn run(&self, reply: Arc<dyn PreviewReplySink>);

    /// Request early termination. May arrive from any thread, at any time.
    fn cancelled(&self);
}

/// A synchronous activation or widget action.
pub trait ActivationQueryBase: Send + Sync {
    fn activate(&self) -> BridgeResult<ActivationResponse>;
}

/// What the host registers for each scope it runs.
pub trait ScopeEntry: Send + Sync {
    fn start(&self, scope_id: &str, runtime: Arc<dyn HostRuntime>) -> BridgeResult<()>;

    fn stop(&self);

    fn search(&self, query: CannedQuery, metadata: SearchMetadata) -> Box<dyn SearchQueryBase>;

    fn preview(&self, result: ResultRef, metadata: ActionMetadata) -> Box<dyn PreviewQueryBase>;

    fn activate(&self, result: ResultRef, metadata: ActionMetadata) -> Box<dyn ActivationQueryBase>;

    fn perform_action(
        &self,
        result: ResultRef,
        metadata: ActionMetadata,
        widget_id: &str,
        action_id: &str,
    ) -> Box<dyn ActivationQueryBase>;
}

/// Per-scope services the host provides while a scope is started.
pub trait HostRuntime: Send + Sync {
    fn capabilities(&self) -> HostCapabilities;

    fn scope_directory(&self) -> PathBuf;

    fn cache_directory(&self) -> PathBuf;

    fn tmp_directory(&self) -> PathBuf;

    /// The scope's settings as a structured value.
    fn settings(&self) -> Value;

    /// Every scope known to the host registry.
    fn registry(&self) -> Result<Vec<ScopeMetadata>, HostError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse_and_order() {
        let version: HostVersion = "0.6.15".parse().unwrap();
        assert_eq!(version, HostVersion::MINIMUM);
        assert!("0.6".parse::<HostVersion>().unwrap() < HostVersion::FILTERS);
        assert!("1.x.0".parse::<HostVersion>().is_err());
        assert!("1.2.3.4".parse::<HostVersion>().is_err());
    }

    #[test]
    fn test_capability_checks() {
        let old = HostCapabilities::new(HostVersion::new(0, 6, 9));
        assert!(matches!(
            old.check_supported(),
            Err(CapabilityError::VersionTooOld { .. })
        ));
        assert!(old.check_filters().is_err());

        let current = HostCapabilities::new(HostVersion::new(1, 0, 0));
        assert!(current.check_supported().is_ok());
        assert!(current.check_filters().is_ok());
        assert!(current.without_filters().check_filters().is_err());
    }
}
