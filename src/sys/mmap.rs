//! Raw `mmap`/`munmap`/`memfd_create` wrappers, unix-only.

use std::ffi::CStr;
use std::fs::File;
use std::io::{Error, Result};
use std::os::fd::{AsRawFd, FromRawFd};

pub fn memfd_create(name: &CStr, flags: u32) -> Result<File> {
    let fd = unsafe { libc::memfd_create(name.as_ptr(), flags as _) };
    if fd != -1 {
        Ok(unsafe { File::from_raw_fd(fd) })
    } else {
        Err(Error::last_os_error())
    }
}

pub fn ftruncate(file: &File, len: i64) -> Result<()> {
    let result = unsafe { libc::ftruncate(file.as_raw_fd(), len) };
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

/// Maps `len` bytes of `file` at `offset` into the address space, preferring
/// `addr` (used with `MAP_FIXED` to land a mirror mapping exactly where the
/// caller wants it).
///
/// # Safety
/// `addr` (when non-null and `flags` includes `MAP_FIXED`) must name
/// address space the caller owns and is prepared to have overwritten.
pub unsafe fn mmap_file(addr: *mut u8, len: usize, prot: i32, flags: i32, file: &File, offset: i64) -> Result<*mut u8> {
    let ptr = libc::mmap(addr as _, len, prot, flags, file.as_raw_fd(), offset);
    if ptr != libc::MAP_FAILED {
        Ok(ptr as *mut u8)
    } else {
        Err(Error::last_os_error())
    }
}

/// Reserves `len` bytes of anonymous address space (`PROT_NONE`), for a
/// caller that is about to carve it up with fixed file-backed mappings.
pub fn mmap_reserve(len: usize) -> Result<*mut u8> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_NONE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr != libc::MAP_FAILED {
        Ok(ptr as *mut u8)
    } else {
        Err(Error::last_os_error())
    }
}

/// # Safety
/// `ptr`/`len` must describe a mapping this process owns and no longer
/// references.
pub unsafe fn munmap(ptr: *mut u8, len: usize) -> Result<()> {
    let result = libc::munmap(ptr as _, len);
    if result != -1 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}
