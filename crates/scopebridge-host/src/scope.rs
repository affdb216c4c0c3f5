//! Scope logic and the entry adapter the host registers.

use std::path::PathBuf;
use std::sync::Arc;

use scopebridge_core::{
    ActionMetadata, ActivationResponse, BridgeResult, CannedQuery, HandleTable, LifecycleError,
    ResultRef, SearchMetadata, Shared, Value, codec,
};
use serde::de::DeserializeOwned;

use crate::adapter::{ActivationAdapter, ActivationMode, PreviewAdapter, QueryAdapter};
use crate::cancel::CancelObserver;
use crate::host::{
    ActivationQueryBase, HostCapabilities, HostRuntime, PreviewQueryBase, ScopeEntry,
    SearchQueryBase,
};
use crate::objects::{ResultHandle, ScopeMetadataHandle};
use crate::reply::{PreviewReply, SearchReply};

/// Logic implementing one scope.
///
/// `search` and `preview` stream into their reply and should return soon
/// after `cancel` reports cancellation. Leaving the reply open is fine: the
/// adapter finishes it. Returning an error reports it on the reply.
pub trait Scope: Send + Sync {
    /// Called once the host starts the scope.
    fn start(&self, _base: &Arc<ScopeBase>) -> BridgeResult<()> {
        Ok(())
    }

    fn stop(&self) {}

    fn search(
        &self,
        query: &CannedQuery,
        metadata: &SearchMetadata,
        reply: &SearchReply,
        cancel: &CancelObserver,
    ) -> BridgeResult<()>;

    fn preview(
        &self,
        result: &ResultHandle,
        metadata: &ActionMetadata,
        reply: &PreviewReply,
        cancel: &CancelObserver,
    ) -> BridgeResult<()>;

    /// Handles activation of results; `None` answers every activation as not handled.
    fn activator(&self) -> Option<&dyn Activator> {
        None
    }

    /// Handles preview widget actions; `None` answers every action as not handled.
    fn action_performer(&self) -> Option<&dyn ActionPerformer> {
        None
    }
}

pub trait Activator: Send + Sync {
    fn activate(&self, result: &ResultHandle, metadata: &ActionMetadata) -> BridgeResult<ActivationResponse>;
}

pub trait ActionPerformer: Send + Sync {
    fn perform_action(
        &self,
        result: &ResultHandle,
        metadata: &ActionMetadata,
        widget_id: &str,
        action_id: &str,
    ) -> BridgeResult<ActivationResponse>;
}

/// Host services available to a started scope.
pub struct ScopeBase {
    scope_id: String,
    runtime: Arc<dyn HostRuntime>,
    table: Arc<HandleTable>,
}

impl std::fmt::Debug for ScopeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeBase")
            .field("scope_id", &self.scope_id)
            .finish()
    }
}

impl ScopeBase {
    pub fn new(scope_id: impl Into<String>, runtime: Arc<dyn HostRuntime>, table: Arc<HandleTable>) -> Self {
        Self {
            scope_id: scope_id.into(),
            runtime,
            table,
        }
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    pub fn capabilities(&self) -> HostCapabilities {
        self.runtime.capabilities()
    }

    pub fn scope_directory(&self) -> PathBuf {
        self.runtime.scope_directory()
    }

    pub fn cache_directory(&self) -> PathBuf {
        self.runtime.cache_directory()
    }

    pub fn tmp_directory(&self) -> PathBuf {
        self.runtime.tmp_directory()
    }

    pub fn settings(&self) -> Value {
        self.runtime.settings().sanitized()
    }

    /// Settings decoded into a typed struct.
    pub fn settings_as<T: DeserializeOwned>(&self) -> BridgeResult<T> {
        Ok(codec::from_value(&self.settings())?)
    }

    /// Every scope in the host registry, one handle each.
    pub fn list_registry_scopes(&self) -> BridgeResult<Vec<ScopeMetadataHandle>> {
        let entries = self.runtime.registry().inspect_err(|e| {
            tracing::warn!(target: "scope", "registry listing for {} failed: {}", self.scope_id, e);
        })?;
        entries
            .into_iter()
            .map(|metadata| Ok(ScopeMetadataHandle::new(&self.table, metadata)?))
            .collect()
    }

    pub fn table(&self) -> &Arc<HandleTable> {
        &self.table
    }
}

/// The object registered with the host for one scope.
pub struct ScopeAdapter {
    scope: Arc<dyn Scope>,
    table: Arc<HandleTable>,
    base: Shared<Option<Arc<ScopeBase>>>,
}

impl std::fmt::Debug for ScopeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeAdapter")
            .field("base", &*self.base.read())
            .finish()
    }
}

impl ScopeAdapter {
    /// Register `scope` against the process-wide handle table.
    pub fn new(scope: Arc<dyn Scope>) -> Self {
        Self::with_table(scope, HandleTable::global())
    }

    pub fn with_table(scope: Arc<dyn Scope>, table: Arc<HandleTable>) -> Self {
        Self {
            scope,
            table,
            base: Shared::new(None),
        }
    }

    pub fn table(&self) -> &Arc<HandleTable> {
        &self.table
    }

    /// The scope base while started.
    pub fn base(&self) -> Option<Arc<ScopeBase>> {
        self.base.read().clone()
    }

    pub fn is_started(&self) -> bool {
        self.base.read().is_some()
    }

    fn capabilities(&self) -> HostCapabilities {
        self.base
            .read()
            .as_ref()
            .map(|base| base.capabilities())
            .unwrap_or_default()
    }

    pub fn search_adapter(&self, query: CannedQuery, metadata: SearchMetadata) -> QueryAdapter {
        QueryAdapter::new(
            self.scope.clone(),
            self.table.clone(),
            self.capabilities(),
            query,
            metadata,
        )
    }

    pub fn preview_adapter(&self, result: ResultRef, metadata: ActionMetadata) -> PreviewAdapter {
        PreviewAdapter::new(self.scope.clone(), self.table.clone(), result, metadata)
    }

    pub fn activation_adapter(
        &self,
        result: ResultRef,
        metadata: ActionMetadata,
        mode: ActivationMode,
    ) -> ActivationAdapter {
        ActivationAdapter::new(self.scope.clone(), self.table.clone(), result, metadata, mode)
    }
}

impl ScopeEntry for ScopeAdapter {
    fn start(&self, scope_id: &str, runtime: Arc<dyn HostRuntime>) -> BridgeResult<()> {
        let mut started = self.base.write();
        if started.is_some() {
            return Err(LifecycleError::InvalidTransition {
                state: "started",
                operation: "start",
            }
            .into());
        }
        let capabilities = runtime.capabilities();
        capabilities.check_supported()?;
        if capabilities.check_filters().is_err() {
            tracing::warn!(target: "scope", "host {} cannot receive filters", capabilities.version);
        }

        let base = Arc::new(ScopeBase::new(scope_id, runtime, self.table.clone()));
        self.scope.start(&base)?;
        *started = Some(base);
        tracing::info!(target: "scope", "started {} on host {}", scope_id, capabilities.version);
        Ok(())
    }

    fn stop(&self) {
        let base = self.base.write().take();
        if let Some(base) = base {
            self.scope.stop();
            tracing::info!(target: "scope", "stopped {}", base.scope_id());
        }
    }

    fn search(&self, query: CannedQuery, metadata: SearchMetadata) -> Box<dyn SearchQueryBase> {
        Box::new(self.search_adapter(query, metadata))
    }

    fn preview(&self, result: ResultRef, metadata: ActionMetadata) -> Box<dyn PreviewQueryBase> {
        Box::new(self.preview_adapter(result, metadata))
    }

    fn activate(&self, result: ResultRef, metadata: ActionMetadata) -> Box<dyn ActivationQueryBase> {
        Box::new(self.activation_adapter(result, metadata, ActivationMode::Activate))
    }

    fn perform_action(
        &self,
        result: ResultRef,
        metadata: ActionMetadata,
        widget_id: &str,
        action_id: &str,
    ) -> Box<dyn ActivationQueryBase> {
        Box::new(self.activation_adapter(
            result,
            metadata,
            ActivationMode::PerformAction {
                widget_id: widget_id.to_string(),
                action_id: action_id.to_string(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use scopebridge_core::{BridgeError, CapabilityError, ScopeMetadata};

    use super::*;
    use crate::host::HostVersion;
    use crate::memory::MemoryHost;

    struct Idle;

    impl Scope for Idle {
        fn search(
            &self,
            _query: &CannedQuery,
            _metadata: &SearchMetadata,
            _reply: &SearchReply,
            _cancel: &CancelObserver,
        ) -> BridgeResult<()> {
            Ok(())
        }

        fn preview(
            &self,
            _result: &ResultHandle,
            _metadata: &ActionMetadata,
            _reply: &PreviewReply,
            _cancel: &CancelObserver,
        ) -> BridgeResult<()> {
            Ok(())
        }
    }

    fn adapter() -> ScopeAdapter {
        ScopeAdapter::with_table(Arc::new(Idle), Arc::new(HandleTable::new()))
    }

    #[test]
    fn test_start_rejects_old_host() {
        let host = MemoryHost::new().with_capabilities(HostCapabilities::new(HostVersion::new(0, 6, 2)));
        let err = adapter().start("idle", Arc::new(host)).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Capability(CapabilityError::VersionTooOld { .. })
        ));
    }

    #[test]
    fn test_start_stop() {
        let adapter = adapter();
        let host = MemoryHost::new().with_scope_directory("/srv/scopes/idle");
        adapter.start("idle", Arc::new(host.clone())).unwrap();
        assert!(adapter.start("idle", Arc::new(host)).is_err());

        let base = adapter.base().unwrap();
        assert_eq!(base.scope_directory(), PathBuf::from("/srv/scopes/idle"));

        adapter.stop();
        assert!(!adapter.is_started());
        adapter.stop();
    }

    #[test]
    fn test_concurrent_starts_start_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        #[derive(Default)]
        struct Counting(AtomicUsize);

        impl Scope for Counting {
            fn start(&self, _base: &Arc<ScopeBase>) -> BridgeResult<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(20));
                Ok(())
            }

            fn search(
                &self,
                _query: &CannedQuery,
                _metadata: &SearchMetadata,
                _reply: &SearchReply,
                _cancel: &CancelObserver,
            ) -> BridgeResult<()> {
                Ok(())
            }

            fn preview(
                &self,
                _result: &ResultHandle,
                _metadata: &ActionMetadata,
                _reply: &PreviewReply,
                _cancel: &CancelObserver,
            ) -> BridgeResult<()> {
                Ok(())
            }
        }

        let scope = Arc::new(Counting::default());
        let adapter = ScopeAdapter::with_table(scope.clone(), Arc::new(HandleTable::new()));
        let outcomes: Vec<bool> = std::thread::scope(|s| {
            let starts: Vec<_> = (0..4)
                .map(|_| s.spawn(|| adapter.start("counting", Arc::new(MemoryHost::new())).is_ok()))
                .collect();
            starts.into_iter().map(|t| t.join().unwrap()).collect()
        });

        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
        assert_eq!(scope.0.load(Ordering::SeqCst), 1);
        assert!(adapter.is_started());
    }

    #[test]
    fn test_registry_listing() {
        let adapter = adapter();
        let entries = vec![
            ScopeMetadata::builder().scope_id("a").build().unwrap(),
            ScopeMetadata::builder().scope_id("b").build().unwrap(),
        ];
        adapter
            .start("idle", Arc::new(MemoryHost::new().with_registry(entries)))
            .unwrap();

        let listed = adapter.base().unwrap().list_registry_scopes().unwrap();
        let ids: Vec<String> = listed
            .iter()
            .map(|h| h.metadata().unwrap().scope_id.clone())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(adapter.table().len(), 2);
        drop(listed);
        assert!(adapter.table().is_empty());
    }

    #[test]
    fn test_registry_failure_is_host_error() {
        let adapter = adapter();
        let host = MemoryHost::new().with_registry_error("offline");
        adapter.start("idle", Arc::new(host)).unwrap();
        let err = adapter.base().unwrap().list_registry_scopes().unwrap_err();
        assert!(matches!(err, BridgeError::Host(_)));
    }
}
