//! Interrupt-to-task hand-off.
//!
//! An interrupt handler should do as little as possible. [`PendingSignals`]
//! records which bits fired and lets a worker pick them up later. Repeated
//! signals on the same bit coalesce into one.

use core::sync::atomic::{AtomicU32, Ordering};

use log::warn;
use mif_abi::BitIndex;

use crate::IrqHandler;

/// Set of bits that have fired since the last [`take`](Self::take).
#[derive(Debug, Default)]
pub struct PendingSignals {
    bits: AtomicU32,
}

impl PendingSignals {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    /// Mark `bit` as fired.
    pub fn post(&self, bit: BitIndex) {
        if bit as u32 >= u32::BITS {
            warn!("pending: ignoring out-of-range bit {}", bit);
            return;
        }
        self.bits.fetch_or(1 << bit, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.bits.load(Ordering::Acquire) != 0
    }

    /// Atomically take and clear all pending bits.
    pub fn take(&self) -> u32 {
        self.bits.swap(0, Ordering::Acquire)
    }

    /// Take all pending bits and iterate them lowest first.
    pub fn drain(&self) -> Drain {
        Drain { bits: self.take() }
    }
}

impl IrqHandler for PendingSignals {
    fn handle_irq(&self, bit: BitIndex) {
        self.post(bit);
    }
}

/// Iterator returned by [`PendingSignals::drain`].
pub struct Drain {
    bits: u32,
}

impl Iterator for Drain {
    type Item = BitIndex;

    fn next(&mut self) -> Option<BitIndex> {
        if self.bits == 0 {
            return None;
        }
        let bit = self.bits.trailing_zeros();
        self.bits &= self.bits - 1;
        Some(bit as BitIndex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IntrBits, RemoteScope};
    use alloc::sync::Arc;
    use alloc::vec::Vec;

    #[test]
    fn test_signals_coalesce() {
        let pending = PendingSignals::new();
        assert!(!pending.is_pending());

        pending.post(3);
        pending.post(3);
        pending.post(1);
        assert!(pending.is_pending());
        assert_eq!(pending.take(), 0b1010);
        assert_eq!(pending.take(), 0);
        assert!(!pending.is_pending());
    }

    #[test]
    fn test_drain_lowest_first() {
        let pending = PendingSignals::new();
        pending.post(15);
        pending.post(0);
        pending.post(7);

        let drained: Vec<_> = pending.drain().collect();
        assert_eq!(drained, [0, 7, 15]);
        assert_eq!(pending.drain().count(), 0);
    }

    #[test]
    fn test_out_of_range_bit_ignored() {
        let pending = PendingSignals::new();
        pending.post(32);
        assert!(!pending.is_pending());
    }

    #[test]
    fn test_as_irq_handler() {
        let bits = IntrBits::new(RemoteScope::PerTarget);
        let pending = Arc::new(PendingSignals::new());
        let a = bits.alloc_toward_host(pending.clone()).unwrap();
        let b = bits.alloc_toward_host(pending.clone()).unwrap();

        bits.raise(b);
        bits.raise(a);
        bits.raise(b);
        let drained: Vec<_> = pending.drain().collect();
        assert_eq!(drained, [a, b]);
    }
}
