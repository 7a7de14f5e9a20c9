//! Executable memory management using mmap.
//!
//! Code is written while the mapping is read+write, then the whole mapping
//! is flipped to read+exec. The mapping is never writable and executable at
//! the same time.

use std::ptr::NonNull;

use thiserror::Error;

/// Error type for memory operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("memory allocation failed")]
    AllocationFailed,
    #[error("memory protection change failed")]
    ProtectionFailed,
    #[error("invalid memory size")]
    InvalidSize,
}

/// A block of executable memory allocated via mmap.
pub struct ExecutableMemory {
    ptr: NonNull<u8>,
    size: usize,
    executable: bool,
}

impl ExecutableMemory {
    /// Allocate a writable (not yet executable) block of at least `size` bytes.
    pub fn new(size: usize) -> Result<Self, MemoryError> {
        if size == 0 {
            return Err(MemoryError::InvalidSize);
        }

        let page_size = Self::page_size();
        let aligned_size = (size + page_size - 1) & !(page_size - 1);
        let ptr = Self::mmap_alloc(aligned_size)?;
        tracing::trace!(size = aligned_size, "mapped code region");

        Ok(Self {
            ptr,
            size: aligned_size,
            executable: false,
        })
    }

    /// Map `code` and make it executable in one step.
    pub fn from_code(code: &[u8]) -> Result<Self, MemoryError> {
        let mut mem = Self::new(code.len())?;
        mem.write(0, code)?;
        mem.make_executable()?;
        Ok(mem)
    }

    fn page_size() -> usize {
        // SAFETY: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 { size as usize } else { 4096 }
    }

    fn mmap_alloc(size: usize) -> Result<NonNull<u8>, MemoryError> {
        // SAFETY: anonymous private mapping, no file descriptor involved.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(MemoryError::AllocationFailed);
        }

        NonNull::new(ptr as *mut u8).ok_or(MemoryError::AllocationFailed)
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Size of the mapping (page aligned).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Write bytes at `offset`. Fails once the memory is executable.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), MemoryError> {
        if self.executable {
            return Err(MemoryError::ProtectionFailed);
        }
        if offset.checked_add(data.len()).is_none_or(|end| end > self.size) {
            return Err(MemoryError::InvalidSize);
        }

        // SAFETY: bounds checked above; the mapping is writable.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    /// Flip the mapping to read+exec.
    pub fn make_executable(&mut self) -> Result<(), MemoryError> {
        if self.executable {
            return Ok(());
        }

        // SAFETY: ptr/size describe a mapping we own.
        let result = unsafe {
            libc::mprotect(
                self.ptr.as_ptr() as *mut libc::c_void,
                self.size,
                libc::PROT_READ | libc::PROT_EXEC,
            )
        };
        if result != 0 {
            return Err(MemoryError::ProtectionFailed);
        }

        self.executable = true;
        Ok(())
    }

    pub fn is_executable(&self) -> bool {
        self.executable
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        // SAFETY: the mapping is owned by self and unmapped exactly once.
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
        }
    }
}

// The mapping is immutable once executable and owned exclusively.
unsafe impl Send for ExecutableMemory {}
unsafe impl Sync for ExecutableMemory {}
