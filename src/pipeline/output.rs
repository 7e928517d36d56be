//! Shared output descriptor with single-syscall writes.
//!
//! All pipeline tasks write to the same file descriptor. Each logical
//! unit (one header line, one complete qname group) goes out in a single
//! write(2), which POSIX makes atomic on pipes for lengths up to
//! PIPE_BUF. Buffered stdout would interleave partial lines across
//! writers, so it is never used here.

use std::io;
use std::os::fd::RawFd;

/// Copyable handle to an output descriptor. The caller keeps the
/// underlying file open for as long as any task holds a handle.
#[derive(Debug, Clone, Copy)]
pub struct OutputFd {
    fd: RawFd,
}

impl OutputFd {
    pub fn new(fd: RawFd) -> Self {
        Self { fd }
    }

    /// Write the whole buffer with write(2), retrying only on EINTR or a
    /// short write. Groups larger than PIPE_BUF may interleave with
    /// other writers when the output is a pipe; ordinary paired groups
    /// are far below that bound.
    pub fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut rest = buf;
        while !rest.is_empty() {
            // Safety: rest points into a live buffer of the given length.
            let n = unsafe {
                libc::write(
                    self.fd,
                    rest.as_ptr() as *const libc::c_void,
                    rest.len(),
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            rest = &rest[n as usize..];
        }
        Ok(())
    }
}
