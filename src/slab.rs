// src/slab.rs
use std::os::fd::RawFd;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::conn::Connection;

/// One connection slot. The generation counter is bumped on every
/// insert, so a token minted for a previous occupant of the slot can be
/// detected and rejected instead of silently applying to its successor.
#[derive(Default)]
struct Slot {
    generation: u32,
    conn: Option<Box<Connection>>,
}

/// Arena of connection slots keyed by socket descriptor.
///
/// The per-slot mutex is uncontended by protocol: the one-shot readiness
/// handoff guarantees at most one thread works on a connection at any
/// instant. The lock turns that convention into something the compiler
/// can check.
pub struct ConnectionTable {
    slots: Box<[Mutex<Slot>]>,
    active: AtomicUsize,
}

impl ConnectionTable {
    /// Allocate the slot array once at startup. `capacity` bounds the
    /// highest usable descriptor value, not just the connection count.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Mutex::new(Slot::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            active: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Live connections across the whole table.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Pack a slot reference into an epoll token.
    pub fn token(fd: RawFd, generation: u32) -> u64 {
        ((generation as u64) << 32) | (fd as u32 as u64)
    }

    pub fn untoken(token: u64) -> (RawFd, u32) {
        (token as u32 as RawFd, (token >> 32) as u32)
    }

    fn slot(&self, fd: RawFd) -> Option<&Mutex<Slot>> {
        if fd < 0 {
            return None;
        }
        self.slots.get(fd as usize)
    }

    /// Install a connection in the slot for `fd`, returning the slot's
    /// new generation. `None` when the descriptor exceeds the table or
    /// the slot is somehow still occupied.
    pub fn insert(&self, fd: RawFd, conn: Connection) -> Option<u32> {
        let slot = self.slot(fd)?;
        let mut s = lock(slot);
        if s.conn.is_some() {
            return None;
        }
        s.generation = s.generation.wrapping_add(1);
        s.conn = Some(Box::new(conn));
        self.active.fetch_add(1, Ordering::Relaxed);
        Some(s.generation)
    }

    /// Run `f` on the connection for `(fd, generation)`. A stale
    /// generation means the connection was torn down (and the slot
    /// possibly reused) after the reference was minted; the call is a
    /// no-op then.
    pub fn with<R>(
        &self,
        fd: RawFd,
        generation: u32,
        f: impl FnOnce(&mut Connection) -> R,
    ) -> Option<R> {
        let slot = self.slot(fd)?;
        let mut s = lock(slot);
        if s.generation != generation {
            return None;
        }
        let conn = s.conn.as_deref_mut()?;
        Some(f(conn))
    }

    /// Free the slot, handing the connection back to the caller (whose
    /// drop closes the socket).
    pub fn remove(&self, fd: RawFd, generation: u32) -> Option<Box<Connection>> {
        let slot = self.slot(fd)?;
        let mut s = lock(slot);
        if s.generation != generation {
            return None;
        }
        let conn = s.conn.take()?;
        self.active.fetch_sub(1, Ordering::Relaxed);
        Some(conn)
    }
}

fn lock(slot: &Mutex<Slot>) -> std::sync::MutexGuard<'_, Slot> {
    // A worker that panicked mid-request poisons only its own slot;
    // keep serving with whatever state it left.
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
