//! Engine configuration types.

/// Configuration for a [`JitEngine`](crate::engine::JitEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Run the optimization pipeline before compiling each module.
    /// The pipeline is advisory: disabling it still produces correct code.
    pub optimize: bool,
    /// Install a generator on the main namespace that resolves names
    /// against symbols already loaded in the host process (via dlsym).
    pub host_symbols: bool,
    /// Name of the main symbol namespace.
    pub main_dylib_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            optimize: true,
            host_symbols: true,
            main_dylib_name: "main".to_string(),
        }
    }
}

impl EngineConfig {
    /// Configuration with the optimizer disabled (baseline compilation).
    pub fn without_optimizer() -> Self {
        Self {
            optimize: false,
            ..Self::default()
        }
    }
}
