// src/reactor.rs
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::ServerConfig;
use crate::conn::{After, Connection, READ_BUF_SIZE};
use crate::error::MazurkaResult;
use crate::pool::{Task, ThreadPool};
use crate::slab::ConnectionTable;
use crate::syscalls::{
    self, EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLRDHUP, Epoll, epoll_event,
};

const LISTENER_TOKEN: u64 = u64::MAX;
const MAX_EVENTS: usize = 1024;
/// The wait is sliced only so the loop can observe the shutdown flag;
/// between slices it blocks until readiness.
const WAIT_TIMEOUT_MS: i32 = 500;

/// Interest-management handle shared between the reactor and the pool's
/// workers. Cheap to clone.
#[derive(Clone)]
pub struct Handle {
    epoll: Arc<Epoll>,
    table: Arc<ConnectionTable>,
}

impl Handle {
    /// The single ownership-relinquish point. Every thread that finishes
    /// with a connection hands it back through here; keeping re-arm and
    /// teardown in one place is what makes the handoff protocol hold
    /// everywhere instead of by convention at each call site.
    pub fn release(&self, fd: RawFd, generation: u32, after: After) {
        let token = ConnectionTable::token(fd, generation);
        let rearmed = match after {
            After::Read => self.epoll.rearm(fd, token, EPOLLIN),
            After::Write => self.epoll.rearm(fd, token, EPOLLOUT),
            After::NextRequest => {
                self.table.with(fd, generation, |conn| conn.reset());
                self.epoll.rearm(fd, token, EPOLLIN)
            }
            After::Teardown => {
                self.teardown(fd, generation);
                return;
            }
        };
        if let Err(e) = rearmed {
            tracing::debug!(fd, error = %e, "re-arm failed, closing");
            self.teardown(fd, generation);
        }
    }

    /// Remove from epoll, free the slot, close the socket.
    pub fn teardown(&self, fd: RawFd, generation: u32) {
        if let Some(removed) = self.table.remove(fd, generation) {
            self.epoll.delete(fd).ok();
            tracing::debug!(fd, peer = %removed.peer, "connection closed");
            // Dropping the connection closes the descriptor.
        }
    }
}

/// Queued unit of work: one connection that became readable. Carries the
/// handle it must use to relinquish ownership when done.
struct ProcessTask {
    handle: Handle,
    root: Arc<PathBuf>,
    fd: RawFd,
    generation: u32,
}

impl Task for ProcessTask {
    fn run(self) {
        let after = self
            .handle
            .table
            .with(self.fd, self.generation, |conn| conn.process(&self.root));
        match after {
            Some(after) => self.handle.release(self.fd, self.generation, after),
            // Stale task: the connection was torn down and possibly
            // reused after this was queued. Nothing to do.
            None => {}
        }
    }
}

/// Single-threaded readiness multiplexer over the listening socket and
/// all connection sockets.
pub struct Reactor {
    epoll: Arc<Epoll>,
    listen_fd: RawFd,
    table: Arc<ConnectionTable>,
    pool: ThreadPool<ProcessTask>,
    root: Arc<PathBuf>,
    max_connections: usize,
    shutdown: Arc<AtomicBool>,
}

impl Reactor {
    pub fn new(config: &ServerConfig, shutdown: Arc<AtomicBool>) -> MazurkaResult<Self> {
        let listen_fd =
            syscalls::create_listen_socket(&config.host, config.port, config.backlog)?;
        let epoll = Arc::new(Epoll::new()?);
        // Listener stays level-triggered without one-shot; it is owned
        // by the reactor thread alone and never handed off.
        epoll.add(listen_fd, LISTENER_TOKEN, EPOLLIN, false)?;

        // Slot indexes are descriptor values, which run slightly ahead
        // of the connection count (listener, epoll, stdio).
        let table = Arc::new(ConnectionTable::new(config.max_connections + 64));
        let pool = ThreadPool::new(config.workers, config.queue_capacity)?;

        Ok(Self {
            epoll,
            listen_fd,
            table,
            pool,
            root: Arc::new(config.document_root.clone()),
            max_connections: config.max_connections,
            shutdown,
        })
    }

    pub fn local_port(&self) -> MazurkaResult<u16> {
        Ok(syscalls::local_port(self.listen_fd)?)
    }

    fn handle(&self) -> Handle {
        Handle {
            epoll: Arc::clone(&self.epoll),
            table: Arc::clone(&self.table),
        }
    }

    /// Block on readiness and dispatch until asked to stop. A failure of
    /// the wait itself is fatal; per-socket failures never abort the
    /// loop. Connections have no idle timeout — a silent peer holds its
    /// slot until it closes, which a real deployment would bound here.
    pub fn run(&mut self) -> MazurkaResult<()> {
        let mut events = vec![epoll_event { events: 0, u64: 0 }; MAX_EVENTS];

        while !self.shutdown.load(Ordering::Acquire) {
            let ready = self.epoll.wait(&mut events, WAIT_TIMEOUT_MS)?;

            for i in 0..ready {
                let token = events[i].u64;
                let flags = events[i].events;

                if token == LISTENER_TOKEN {
                    self.accept_pending();
                    continue;
                }

                let (fd, generation) = ConnectionTable::untoken(token);
                if flags & (EPOLLRDHUP | EPOLLHUP | EPOLLERR) as u32 != 0 {
                    self.handle().teardown(fd, generation);
                } else if flags & EPOLLIN as u32 != 0 {
                    self.on_readable(fd, generation);
                } else if flags & EPOLLOUT as u32 != 0 {
                    self.on_writable(fd, generation);
                }
            }
        }

        self.pool.shutdown();
        Ok(())
    }

    /// Accept until the queue is drained, rejecting connections beyond
    /// the configured limit.
    fn accept_pending(&self) {
        loop {
            match syscalls::accept_connection(self.listen_fd) {
                Ok(Some((fd, peer))) => {
                    if self.table.active() >= self.max_connections {
                        tracing::warn!(fd, %peer, "connection limit reached, rejecting");
                        syscalls::close_fd(fd);
                        continue;
                    }
                    let Some(generation) = self.table.insert(fd, Connection::new(fd, peer))
                    else {
                        // The rejected connection was dropped inside
                        // insert, which already closed the descriptor.
                        tracing::warn!(fd, %peer, "no slot for descriptor, rejecting");
                        continue;
                    };
                    let token = ConnectionTable::token(fd, generation);
                    if let Err(e) = self.epoll.add(fd, token, EPOLLIN, true) {
                        tracing::warn!(fd, error = %e, "failed to arm accepted socket");
                        self.handle().teardown(fd, generation);
                        continue;
                    }
                    tracing::debug!(fd, %peer, active = self.table.active(), "accepted");
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    /// Drain the socket into the connection's read buffer, then hand the
    /// connection to the pool. The drain happens on the reactor thread;
    /// protocol interpretation happens on a worker.
    fn on_readable(&self, fd: RawFd, generation: u32) {
        enum Drain {
            Submit,
            Rearm,
            Close,
        }

        let verdict = self.table.with(fd, generation, |conn| {
            // A re-armed read with the buffer already full means the
            // request outgrew the buffer; nothing more can arrive.
            if conn.read_end >= READ_BUF_SIZE {
                return Drain::Close;
            }
            let mut received = false;
            while conn.read_end < READ_BUF_SIZE {
                match syscalls::read_fd(fd, &mut conn.read_buf[conn.read_end..]) {
                    Ok(0) => return Drain::Close,
                    Ok(n) => {
                        conn.read_end += n;
                        received = true;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        tracing::debug!(fd, error = %e, "receive failed");
                        return Drain::Close;
                    }
                }
            }
            if received { Drain::Submit } else { Drain::Rearm }
        });

        match verdict {
            Some(Drain::Submit) => {
                let task = ProcessTask {
                    handle: self.handle(),
                    root: Arc::clone(&self.root),
                    fd,
                    generation,
                };
                if !self.pool.submit(task) {
                    // Backpressure: the queue is full. The readiness
                    // event cannot be honored, so the connection goes.
                    tracing::warn!(fd, "worker pool saturated, dropping connection");
                    self.handle().teardown(fd, generation);
                }
            }
            Some(Drain::Rearm) => self.handle().release(fd, generation, After::Read),
            Some(Drain::Close) => self.handle().teardown(fd, generation),
            None => {}
        }
    }

    /// Resume a partially flushed response.
    fn on_writable(&self, fd: RawFd, generation: u32) {
        if let Some(after) = self.table.with(fd, generation, |conn| conn.write_some()) {
            self.handle().release(fd, generation, after);
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        syscalls::close_fd(self.listen_fd);
        // Remaining connections close their sockets as the table drops.
    }
}
