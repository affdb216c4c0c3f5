//! Error types for scripted scopes.

use std::path::PathBuf;

use scopebridge_core::BridgeError;
use thiserror::Error;

/// Result type for scope loading.
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors that can occur while discovering and loading scopes.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Scope directory or entry script not found.
    #[error("Scope not found: {path}")]
    NotFound { path: PathBuf },

    /// Failed to load a scope.
    #[error("Failed to load scope '{name}': {message}")]
    LoadError { name: String, message: String },

    /// A scope function failed while running.
    #[error("Scope '{name}' failed: {message}")]
    ExecutionError { name: String, message: String },

    /// Invalid scope configuration.
    #[error("Invalid configuration: {message}")]
    ConfigError { message: String },

    /// The manifest names a runtime that is not registered.
    #[error("Runtime not available: {runtime}")]
    RuntimeNotAvailable { runtime: String },

    /// The scope needs a newer host than the one it runs on.
    #[error("Scope '{name}' requires host {required}, running {found}")]
    IncompatibleHost {
        name: String,
        required: String,
        found: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bridge error.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl PluginError {
    pub(crate) fn load(name: impl Into<String>, e: impl std::fmt::Display) -> Self {
        Self::LoadError {
            name: name.into(),
            message: e.to_string(),
        }
    }
}
