//! Host target detection and module target checking.

use crate::error::JitError;
use crate::ir::{Arch, Module, TargetTriple};

/// The target the engine generates code for. Detected once at engine
/// construction; engine creation fails on unsupported hosts.
#[derive(Debug, Clone, Copy)]
pub struct HostTarget {
    triple: TargetTriple,
}

impl HostTarget {
    /// Detect the host. Fails with a configuration error when the host
    /// platform is unknown or has no code generator.
    pub fn detect() -> Result<HostTarget, JitError> {
        let triple = TargetTriple::host().ok_or_else(|| {
            JitError::Configuration("host platform is not supported".to_string())
        })?;
        // Single-target engine: x86-64 System V is the only backend.
        if triple.arch != Arch::X86_64 {
            return Err(JitError::Configuration(format!(
                "no code generator for host target {}",
                triple
            )));
        }
        Ok(HostTarget { triple })
    }

    pub fn triple(&self) -> TargetTriple {
        self.triple
    }

    /// Reject modules declared for a different target. A mismatch is an
    /// error, never a silent fallback.
    pub fn check_module(&self, module: &Module) -> Result<(), JitError> {
        if module.target() != self.triple {
            return Err(JitError::compilation(
                module.name(),
                format!(
                    "module targets {}, engine targets {}",
                    module.target(),
                    self.triple
                ),
            ));
        }
        Ok(())
    }
}
