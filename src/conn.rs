// src/conn.rs
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::path::Path;

use crate::http;
use crate::parser::{ParseOutcome, RequestParser};
use crate::resolve::{self, MappedFile, Resolution};
use crate::response::ResponseWriter;
use crate::syscalls;

pub const READ_BUF_SIZE: usize = 2048;
pub const WRITE_BUF_SIZE: usize = 1024;

/// How a thread relinquishes a connection it owns. Every code path that
/// finishes touching a connection must hand one of these to
/// [`crate::reactor::Handle::release`]; a missed handoff stalls the
/// connection forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum After {
    /// Await more request bytes: re-arm one-shot read interest.
    Read,
    /// The kernel send buffer filled up: re-arm one-shot write interest.
    Write,
    /// Response fully flushed on a persistent connection: reset for the
    /// next request and re-arm for read.
    NextRequest,
    /// Close the socket and free the slot.
    Teardown,
}

/// Per-socket state, reused across requests while the connection is
/// persistent. Mutated only by whichever thread currently holds the
/// socket's one-shot readiness token.
pub struct Connection {
    pub fd: RawFd,
    pub peer: SocketAddr,
    pub read_buf: [u8; READ_BUF_SIZE],
    /// Bytes received so far; the parser's cursors trail it.
    pub read_end: usize,
    pub parser: RequestParser,
    write_buf: [u8; WRITE_BUF_SIZE],
    /// Valid header-byte prefix of `write_buf`.
    write_end: usize,
    /// Running send offset across both pending segments.
    bytes_sent: usize,
    /// Mapped response body, held from resolution until the write
    /// completes or the connection aborts.
    mapped: Option<MappedFile>,
}

impl Connection {
    pub fn new(fd: RawFd, peer: SocketAddr) -> Self {
        Self {
            fd,
            peer,
            read_buf: [0; READ_BUF_SIZE],
            read_end: 0,
            parser: RequestParser::new(),
            write_buf: [0; WRITE_BUF_SIZE],
            write_end: 0,
            bytes_sent: 0,
            mapped: None,
        }
    }

    /// Prepare for the next request on a persistent connection. Stale
    /// buffer bytes are not zeroed; the cursors gate what is visible.
    pub fn reset(&mut self) {
        self.parser.reset();
        self.read_end = 0;
        self.write_end = 0;
        self.bytes_sent = 0;
        self.mapped = None;
    }

    /// Worker entry point: drive the parser over the buffered bytes,
    /// then build and attempt to send a response.
    pub fn process(&mut self, root: &Path) -> After {
        let read_end = self.read_end;
        match self.parser.advance(&mut self.read_buf, read_end) {
            ParseOutcome::Incomplete => After::Read,
            ParseOutcome::BadRequest => self.respond_error(400),
            ParseOutcome::Complete => self.respond(root),
        }
    }

    fn respond(&mut self, root: &Path) -> After {
        let resolved = match self.parser.url.as_str(&self.read_buf) {
            None => Err(400),
            Some(url) => match resolve::resolve(root, url) {
                Resolution::File(mapped) => Ok((mapped, http::mime_type(url))),
                Resolution::NotFound => Err(404),
                Resolution::Forbidden => Err(403),
                Resolution::BadRequest => Err(400),
                Resolution::Internal => Err(500),
            },
        };

        match resolved {
            Ok((mapped, mime)) => {
                let keep_alive = self.parser.keep_alive;
                let mut w = ResponseWriter::new(&mut self.write_buf);
                if !w.head(200, mime, mapped.len(), keep_alive) {
                    return After::Teardown;
                }
                self.write_end = w.len();
                self.bytes_sent = 0;
                self.mapped = Some(mapped);
                tracing::debug!(fd = self.fd, peer = %self.peer, status = 200, "serving file");
                self.write_some()
            }
            Err(status) => self.respond_error(status),
        }
    }

    fn respond_error(&mut self, status: u16) -> After {
        // Protocol errors end the connection after the response even
        // when the client asked for keep-alive.
        if status == 400 {
            self.parser.keep_alive = false;
        }
        let keep_alive = self.parser.keep_alive;
        let body = http::error_body(status);

        let mut w = ResponseWriter::new(&mut self.write_buf);
        if !(w.head(status, "text/html", body.len(), keep_alive) && w.body(body)) {
            return After::Teardown;
        }
        self.write_end = w.len();
        self.bytes_sent = 0;
        self.mapped = None;
        tracing::debug!(fd = self.fd, peer = %self.peer, status, "serving error page");
        self.write_some()
    }

    /// Flush the pending segments with vectored writes until done or the
    /// socket stops accepting bytes. Safe to call again on
    /// write-readiness; `bytes_sent` persists across attempts.
    pub fn write_some(&mut self) -> After {
        let file_len = self.mapped.as_ref().map_or(0, |m| m.len());
        let total = self.write_end + file_len;

        while self.bytes_sent < total {
            let mut iovs: [libc::iovec; 2] = unsafe { std::mem::zeroed() };
            let mut count = 0;

            if self.bytes_sent < self.write_end {
                iovs[count] = libc::iovec {
                    iov_base: self.write_buf[self.bytes_sent..].as_ptr() as *mut _,
                    iov_len: self.write_end - self.bytes_sent,
                };
                count += 1;
            }
            if let Some(mapped) = &self.mapped {
                let file_off = self.bytes_sent.saturating_sub(self.write_end);
                if file_off < mapped.len() {
                    iovs[count] = libc::iovec {
                        iov_base: unsafe { mapped.as_slice().as_ptr().add(file_off) } as *mut _,
                        iov_len: mapped.len() - file_off,
                    };
                    count += 1;
                }
            }

            match syscalls::writev_fd(self.fd, &iovs[..count]) {
                Ok(0) => return After::Write,
                Ok(n) => self.bytes_sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return After::Write,
                Err(e) => {
                    tracing::debug!(fd = self.fd, error = %e, "send failed");
                    self.mapped = None;
                    return After::Teardown;
                }
            }
        }

        // Fully flushed; the mapped view is released here.
        self.mapped = None;
        if self.parser.keep_alive {
            After::NextRequest
        } else {
            After::Teardown
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.fd >= 0 {
            syscalls::close_fd(self.fd);
        }
    }
}
