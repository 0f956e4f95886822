//! Thin, panic-free wrappers over the raw syscalls the doubly-mapped
//! channel needs, in the same style as a syscall FFI boundary: every
//! fallible call returns `std::io::Result` built from `Error::last_os_error`,
//! nothing is hidden behind an abstraction the caller can't see through.

#[cfg(unix)]
pub mod mmap;

use std::sync::OnceLock;

/// The platform's virtual-memory page size, queried once and cached.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        #[cfg(unix)]
        {
            let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            if size > 0 {
                size as usize
            } else {
                4096
            }
        }
        #[cfg(not(unix))]
        {
            4096
        }
    })
}
