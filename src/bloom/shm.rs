//! Named POSIX shared-memory segments.
//!
//! The filter's bit vector lives in a segment created with `shm_open` and
//! mapped with `memmap2`, so any number of workers can attach to the same
//! bits by name. The creator owns the segment and unlinks it on drop;
//! attached handles only unmap.
//!
//! The mapping is exposed as `&[AtomicU8]`. All mutation goes through
//! relaxed atomic byte ops, which is enough for the filter's monotone
//! 0 to 1 bit sets.

use std::ffi::CString;
use std::fs::File;
use std::os::fd::FromRawFd;
use std::sync::atomic::AtomicU8;

use memmap2::MmapMut;

use crate::error::{MarkdupsError, Result};

/// A named shared-memory segment mapped into this process.
#[derive(Debug)]
pub struct SharedMemory {
    name: String,
    map: MmapMut,
    owner: bool,
}

fn shm_error(name: &str, source: std::io::Error) -> MarkdupsError {
    MarkdupsError::SharedMemory {
        name: name.to_string(),
        source,
    }
}

fn open_segment(name: &str, oflag: libc::c_int) -> Result<File> {
    let cname =
        CString::new(name).map_err(|_| shm_error(name, std::io::Error::other("NUL in name")))?;
    // Safety: cname is a valid NUL-terminated string.
    let fd = unsafe { libc::shm_open(cname.as_ptr(), oflag, 0o600 as libc::mode_t) };
    if fd < 0 {
        return Err(shm_error(name, std::io::Error::last_os_error()));
    }
    // Safety: fd is a freshly opened descriptor we own.
    Ok(unsafe { File::from_raw_fd(fd) })
}

impl SharedMemory {
    /// Create a segment of `len` bytes. Fails if the name already exists.
    ///
    /// Fresh segments are zero-filled by the kernel, so the bit vector
    /// starts cleared without an explicit pass.
    pub fn create(name: &str, len: usize) -> Result<Self> {
        let file = open_segment(name, libc::O_CREAT | libc::O_EXCL | libc::O_RDWR)?;
        file.set_len(len as u64).map_err(|e| shm_error(name, e))?;
        // Safety: the file is a private shm segment sized above; the map
        // stays valid for the life of `map` independent of `file`.
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(|e| shm_error(name, e))?;
        Ok(Self {
            name: name.to_string(),
            map,
            owner: true,
        })
    }

    /// Attach to an existing segment by name. Does not clear the bits.
    pub fn attach(name: &str) -> Result<Self> {
        let file = open_segment(name, libc::O_RDWR)?;
        // Safety: maps the whole existing segment read-write.
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(|e| shm_error(name, e))?;
        Ok(Self {
            name: name.to_string(),
            map,
            owner: false,
        })
    }

    /// Segment name, usable by other parties to attach.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// View the mapping as atomic bytes shared across attached instances.
    pub fn as_atomic_bytes(&self) -> &[AtomicU8] {
        // Safety: AtomicU8 has the same size and alignment as u8, and the
        // mapping outlives the returned slice (tied to &self).
        unsafe {
            std::slice::from_raw_parts(self.map.as_ptr() as *const AtomicU8, self.map.len())
        }
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        if !self.owner {
            return;
        }
        if let Ok(cname) = CString::new(self.name.as_str()) {
            // Safety: unlinking by name; the mapping itself is released
            // by MmapMut's own drop.
            unsafe {
                libc::shm_unlink(cname.as_ptr());
            }
        }
    }
}
