//! Serial allocation.

use std::collections::HashSet;

use parking_lot::Mutex;

/// Allocates per-connection unique 32-bit call serials.
///
/// Serial `0` is reserved by the wire protocol and is pre-marked used so it
/// can never be issued. Allocation scans forward from a monotonically
/// advancing hint, wrapping past `u32::MAX` back to `1`; the whole scan
/// happens under one lock hold, so concurrent callers always observe
/// disjoint results.
#[derive(Debug)]
pub struct SerialGenerator {
    state: Mutex<SerialState>,
}

#[derive(Debug)]
struct SerialState {
    next: u32,
    used: HashSet<u32>,
}

impl SerialGenerator {
    pub fn new() -> Self {
        let mut used = HashSet::new();
        used.insert(0);
        Self {
            state: Mutex::new(SerialState { next: 1, used }),
        }
    }

    /// Allocate a serial not currently in use and mark it used.
    ///
    /// The scan is bounded by the number of outstanding serials, never by
    /// I/O.
    pub fn get_serial(&self) -> u32 {
        let mut state = self.state.lock();
        let mut candidate = state.next;
        while state.used.contains(&candidate) {
            candidate = candidate.checked_add(1).unwrap_or(1);
        }
        state.used.insert(candidate);
        state.next = candidate.checked_add(1).unwrap_or(1);
        candidate
    }

    /// Release a serial for reuse. Serial `0` stays reserved; retiring it
    /// is a no-op.
    pub fn retire_serial(&self, serial: u32) {
        if serial == 0 {
            return;
        }
        self.state.lock().used.remove(&serial);
    }
}

impl Default for SerialGenerator {
    fn default() -> Self {
        Self::new()
    }
}
