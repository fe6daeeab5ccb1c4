// src/resolve.rs
use std::fs;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use libc::c_void;

use crate::syscalls;

/// Longest resolved path accepted; anything longer is rejected before it
/// reaches the filesystem.
pub const MAX_PATH_LEN: usize = 200;

/// Outcome of resolving a request target against the document root.
/// Variants map one-to-one onto response statuses.
#[derive(Debug)]
pub enum Resolution {
    /// Target opened and mapped; ready for a 200 with a zero-copy body.
    File(MappedFile),
    /// Target does not exist (or the path exceeded `MAX_PATH_LEN`).
    NotFound,
    /// Target exists but is not world-readable.
    Forbidden,
    /// Target is a directory, or the path tries to escape the root.
    BadRequest,
    /// Open or mapping failure after a successful stat.
    Internal,
}

/// Resolve a validated URL path under `root`.
///
/// Check order follows stat → permission → directory → open, so a
/// non-world-readable directory reports forbidden rather than bad
/// request.
pub fn resolve(root: &Path, url: &str) -> Resolution {
    if url.split('/').any(|seg| seg == "..") {
        return Resolution::BadRequest;
    }

    let full = root.join(url.trim_start_matches('/'));
    if full.as_os_str().len() > MAX_PATH_LEN {
        return Resolution::NotFound;
    }

    let meta = match fs::metadata(&full) {
        Ok(meta) => meta,
        Err(_) => return Resolution::NotFound,
    };
    if meta.permissions().mode() & 0o004 == 0 {
        return Resolution::Forbidden;
    }
    if meta.is_dir() {
        return Resolution::BadRequest;
    }

    match MappedFile::open(&full, meta.size() as usize) {
        Ok(mapped) => Resolution::File(mapped),
        Err(e) => {
            tracing::warn!(path = %full.display(), error = %e, "failed to map target");
            Resolution::Internal
        }
    }
}

/// Read-only memory view of a target file. Owned by a connection from
/// successful resolution until its response is fully flushed or the
/// connection aborts; dropping it releases the mapping exactly once.
///
/// Empty files carry no kernel mapping (a zero-length mmap is invalid).
pub struct MappedFile {
    ptr: *mut c_void,
    len: usize,
}

// The mapping is read-only and the pointer is never aliased mutably, so
// moving it to a worker thread is sound.
unsafe impl Send for MappedFile {}

impl std::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedFile").field("len", &self.len).finish()
    }
}

impl MappedFile {
    pub fn open(path: &Path, len: usize) -> io::Result<Self> {
        let file = fs::File::open(path)?;
        if len == 0 {
            return Ok(Self {
                ptr: std::ptr::null_mut(),
                len: 0,
            });
        }
        let ptr = syscalls::map_readonly(file.as_raw_fd(), len)?;
        // The descriptor can be dropped; the mapping outlives it.
        Ok(Self { ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.ptr.is_null() {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
        }
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            syscalls::unmap(self.ptr, self.len);
        }
    }
}
