//! Error taxonomy for the engine.
//!
//! Errors are cheap to clone: a materialization failure is recorded once
//! and handed to every thread waiting on the affected symbols.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JitError {
    /// The engine could not be built as configured.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A strong definition collided with an existing strong one.
    #[error("duplicate symbol '{name}' in dylib '{dylib}'")]
    DuplicateSymbol { name: String, dylib: String },

    /// No definition, pending module, or generator supplied the name.
    #[error("symbol not found: '{name}'")]
    Unresolved { name: String },

    /// Lowering a module to native code failed.
    #[error("compilation of module '{module}' failed: {reason}")]
    Compilation { module: String, reason: String },

    /// Mapping, patching, or sealing executable memory failed.
    #[error("link error: {0}")]
    Link(String),

    /// The session has been torn down; no further operations are valid.
    #[error("session terminated")]
    SessionTerminated,

    /// Teardown itself went wrong (work still in flight).
    #[error("teardown failed: {0}")]
    Teardown(String),
}

impl JitError {
    pub fn unresolved(name: impl Into<String>) -> Self {
        JitError::Unresolved { name: name.into() }
    }

    pub fn compilation(module: impl Into<String>, reason: impl Into<String>) -> Self {
        JitError::Compilation {
            module: module.into(),
            reason: reason.into(),
        }
    }
}
