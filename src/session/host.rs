//! Host process symbol lookup via the dynamic loader.

use std::ffi::CString;

use super::dylib::DefinitionGenerator;

/// Resolves names against the symbols visible in the host process
/// (libc, the executable itself, anything already dlopen'd).
pub struct HostProcessGenerator;

impl DefinitionGenerator for HostProcessGenerator {
    fn try_resolve(&self, name: &str) -> Option<u64> {
        let cname = CString::new(name).ok()?;
        let addr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, cname.as_ptr()) };
        if addr.is_null() {
            None
        } else {
            Some(addr as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_libc_symbol() {
        let addr = HostProcessGenerator.try_resolve("getpid");
        assert!(addr.is_some());
        assert_ne!(addr.unwrap(), 0);
    }

    #[test]
    fn test_unknown_symbol_is_none() {
        assert!(HostProcessGenerator
            .try_resolve("definitely_not_a_symbol_in_this_process")
            .is_none());
    }

    #[test]
    fn test_interior_nul_is_none() {
        assert!(HostProcessGenerator.try_resolve("bad\0name").is_none());
    }
}
