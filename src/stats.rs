//! Per-status request and byte counters.
//!
//! Both halves of the tool keep the same counters: how many responses each
//! HTTP status produced and how many body bytes went with them. Workers
//! bump the counters from many tasks at once; a reporter drains them once a
//! second. Slots are plain atomics, so recording never blocks a request.

use std::sync::atomic::{AtomicU64, Ordering};

/// One slot per HTTP status code.
const STATUS_SLOTS: usize = 600;

/// Lock-free per-status counters.
pub struct StatsCollector {
    nreq: [AtomicU64; STATUS_SLOTS],
    nbytes: [AtomicU64; STATUS_SLOTS],
}

impl StatsCollector {
    pub fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const ZERO: AtomicU64 = AtomicU64::new(0);
        Self {
            nreq: [ZERO; STATUS_SLOTS],
            nbytes: [ZERO; STATUS_SLOTS],
        }
    }

    /// Count one response with the given status and body size.
    ///
    /// Statuses outside the slot range are dropped.
    pub fn record(&self, status: u16, bytes: u64) {
        let slot = status as usize;
        if slot < STATUS_SLOTS {
            self.nreq[slot].fetch_add(1, Ordering::Relaxed);
            self.nbytes[slot].fetch_add(bytes, Ordering::Relaxed);
        }
    }

    /// Reset every slot, returning (status, requests, bytes) for the slots
    /// that saw requests.
    pub fn drain(&self) -> Vec<(u16, u64, u64)> {
        let mut out = Vec::new();
        for slot in 0..STATUS_SLOTS {
            let nreq = self.nreq[slot].swap(0, Ordering::Relaxed);
            // Both counters reset together, skipped slots included.
            let nbytes = self.nbytes[slot].swap(0, Ordering::Relaxed);
            if nreq == 0 {
                continue;
            }
            out.push((slot as u16, nreq, nbytes));
        }
        out
    }

    /// Drain into one aligned report line, or `None` when nothing happened.
    pub fn report_line(&self) -> Option<String> {
        let drained = self.drain();
        if drained.is_empty() {
            return None;
        }
        let parts: Vec<String> = drained
            .iter()
            .map(|(status, nreq, nbytes)| format!("{status:>3}: {nreq:>6} {nbytes:>9}"))
            .collect();
        Some(parts.join("  "))
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}
