//! Executable memory management using mmap.
//!
//! A block is mapped read+write, filled and patched, then sealed
//! read+execute. Sealed blocks are never written again and never unmapped
//! before session teardown: code in a block may still be executing on
//! another thread, so mid-session reuse of freed pages would be a
//! dangling-call hazard.

use std::ptr::NonNull;

use crate::error::JitError;

/// A page-aligned block of memory holding JIT-compiled code.
pub struct ExecutableMemory {
    ptr: NonNull<u8>,
    size: usize,
    sealed: bool,
}

impl ExecutableMemory {
    /// Map a writable (not yet executable) block of at least `size` bytes.
    pub fn new(size: usize) -> Result<Self, JitError> {
        if size == 0 {
            return Err(JitError::Link("cannot map an empty code block".to_string()));
        }
        let page = page_size();
        let aligned = (size + page - 1) & !(page - 1);

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                aligned,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(JitError::Link(format!(
                "mmap of {} bytes failed",
                aligned
            )));
        }
        let ptr = NonNull::new(ptr as *mut u8)
            .ok_or_else(|| JitError::Link("mmap returned null".to_string()))?;

        Ok(Self {
            ptr,
            size: aligned,
            sealed: false,
        })
    }

    /// Base address of the mapping.
    pub fn base(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Copy bytes into the block. Fails once sealed or out of bounds.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), JitError> {
        if self.sealed {
            return Err(JitError::Link(
                "write to sealed executable memory".to_string(),
            ));
        }
        if offset + data.len() > self.size {
            return Err(JitError::Link(format!(
                "write of {} bytes at {} overflows {}-byte block",
                data.len(),
                offset,
                self.size
            )));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    /// Flip the block read+execute. No further writes are possible.
    pub fn seal(&mut self) -> Result<(), JitError> {
        if self.sealed {
            return Ok(());
        }
        let rc = unsafe {
            libc::mprotect(
                self.ptr.as_ptr() as *mut libc::c_void,
                self.size,
                libc::PROT_READ | libc::PROT_EXEC,
            )
        };
        if rc != 0 {
            return Err(JitError::Link("mprotect(RX) failed".to_string()));
        }
        self.sealed = true;
        Ok(())
    }

    /// Read bytes back out (the mapping stays readable after sealing).
    pub fn read(&self, offset: usize, out: &mut [u8]) {
        assert!(offset + out.len() <= self.size);
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), out.as_mut_ptr(), out.len());
        }
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
        }
    }
}

// The block owns its mapping; sealed code is immutable and may be executed
// from any thread.
unsafe impl Send for ExecutableMemory {}
unsafe impl Sync for ExecutableMemory {}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
