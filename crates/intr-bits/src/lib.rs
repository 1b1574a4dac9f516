//! Doorbell interrupt bit allocator.
//!
//! Each direction of the link has its own register of
//! [`INTR_BITS_PER_REGISTER`] doorbell bits:
//!
//! - **toward host**: the remote core sets a bit, the host takes an interrupt
//!   and dispatches it to whatever handler claimed that bit.
//! - **toward remote**: the host sets a bit to wake the firmware. Bit 0 of
//!   every toward-remote register is reserved for forcing a firmware panic and
//!   is never handed out.
//!
//! Toward-remote bits are namespaced by target class (see [`RemoteScope`]).

#![no_std]

extern crate alloc;

pub mod pending;

use alloc::sync::Arc;
use core::fmt;

use log::{debug, trace, warn};
use mif_abi::{
    BitIndex, INTR_BITS_PER_REGISTER, RESERVED_PANIC_WLAN, RESERVED_PANIC_WPAN, Target,
    TargetClass,
};
use spinning_top::Spinlock;

pub use pending::PendingSignals;

/// Receives toward-host interrupts for a claimed bit.
///
/// Called from interrupt context, so implementations must not block.
pub trait IrqHandler: Send + Sync {
    fn handle_irq(&self, bit: BitIndex);
}

impl<F> IrqHandler for F
where
    F: Fn(BitIndex) + Send + Sync,
{
    fn handle_irq(&self, bit: BitIndex) {
        self(bit)
    }
}

/// Errors from bit allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrBitError {
    /// Every non-reserved bit in the namespace is taken.
    Exhausted,
    /// Bit index beyond the register width.
    OutOfRange,
    /// Freeing a bit that is not currently allocated.
    NotAllocated,
    /// Freeing a bit that is permanently reserved.
    Reserved,
}

impl fmt::Display for IntrBitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntrBitError::Exhausted => write!(f, "no free interrupt bit"),
            IntrBitError::OutOfRange => write!(f, "interrupt bit out of range"),
            IntrBitError::NotAllocated => write!(f, "interrupt bit not allocated"),
            IntrBitError::Reserved => write!(f, "interrupt bit is reserved"),
        }
    }
}

/// How toward-remote bits are namespaced within one allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteScope {
    /// One namespace per target class. The FlexiMAC cores share the WLAN
    /// namespace.
    PerTarget,
    /// A single namespace; the target argument is ignored. Used when each
    /// subsystem owns its own allocator.
    Single,
}

const REGISTER_MASK: u32 = (1 << INTR_BITS_PER_REGISTER) - 1;

fn bit_mask(bit: BitIndex) -> u32 {
    1 << bit
}

fn find_first_clear(bitmap: u32, reserved: u32) -> Option<BitIndex> {
    let free = !(bitmap | reserved) & REGISTER_MASK;
    if free == 0 {
        None
    } else {
        Some(free.trailing_zeros() as BitIndex)
    }
}

fn check_range(bit: BitIndex) -> Result<(), IntrBitError> {
    if (bit as usize) < INTR_BITS_PER_REGISTER {
        Ok(())
    } else {
        Err(IntrBitError::OutOfRange)
    }
}

struct State {
    toward_host: u32,
    handlers: [Option<Arc<dyn IrqHandler>>; INTR_BITS_PER_REGISTER],
    toward_remote: [u32; TargetClass::COUNT],
}

/// Allocator for one link's doorbell bits.
pub struct IntrBits {
    scope: RemoteScope,
    state: Spinlock<State>,
}

impl IntrBits {
    pub fn new(scope: RemoteScope) -> Self {
        Self {
            scope,
            state: Spinlock::new(State {
                toward_host: 0,
                handlers: [const { None }; INTR_BITS_PER_REGISTER],
                toward_remote: [0; TargetClass::COUNT],
            }),
        }
    }

    pub fn scope(&self) -> RemoteScope {
        self.scope
    }

    fn namespace(&self, target: Target) -> usize {
        match self.scope {
            RemoteScope::PerTarget => target.class().index(),
            RemoteScope::Single => 0,
        }
    }

    fn reserved_mask(&self, target: Target) -> u32 {
        match (self.scope, target.class()) {
            (RemoteScope::PerTarget, TargetClass::Wlan) => bit_mask(RESERVED_PANIC_WLAN),
            (RemoteScope::PerTarget, TargetClass::Wpan) => bit_mask(RESERVED_PANIC_WPAN),
            // One namespace serves whichever subsystem owns this instance.
            (RemoteScope::Single, _) => bit_mask(RESERVED_PANIC_WLAN) | bit_mask(RESERVED_PANIC_WPAN),
        }
    }

    /// Whether `bit` is permanently reserved in `target`'s namespace.
    pub fn is_reserved(&self, bit: BitIndex, target: Target) -> bool {
        check_range(bit).is_ok() && self.reserved_mask(target) & bit_mask(bit) != 0
    }

    /// Claim the lowest free toward-host bit and route its interrupts to
    /// `handler`.
    pub fn alloc_toward_host(&self, handler: Arc<dyn IrqHandler>) -> Result<BitIndex, IntrBitError> {
        let mut state = self.state.lock();
        let bit = find_first_clear(state.toward_host, 0).ok_or(IntrBitError::Exhausted)?;
        state.toward_host |= bit_mask(bit);
        state.handlers[bit as usize] = Some(handler);
        drop(state);

        debug!("intr: toward-host bit {} allocated", bit);
        Ok(bit)
    }

    /// Release a toward-host bit and drop its handler.
    pub fn free_toward_host(&self, bit: BitIndex) -> Result<(), IntrBitError> {
        check_range(bit)?;
        let mut state = self.state.lock();
        if state.toward_host & bit_mask(bit) == 0 {
            return Err(IntrBitError::NotAllocated);
        }
        state.toward_host &= !bit_mask(bit);
        let handler = state.handlers[bit as usize].take();
        drop(state);
        // Handler destructors run outside the lock.
        drop(handler);

        debug!("intr: toward-host bit {} freed", bit);
        Ok(())
    }

    /// Claim the lowest free, non-reserved toward-remote bit for `target`.
    pub fn alloc_toward_remote(&self, target: Target) -> Result<BitIndex, IntrBitError> {
        let ns = self.namespace(target);
        let reserved = self.reserved_mask(target);
        let mut state = self.state.lock();
        let bit = find_first_clear(state.toward_remote[ns], reserved).ok_or(IntrBitError::Exhausted)?;
        state.toward_remote[ns] |= bit_mask(bit);
        drop(state);

        debug!("intr: toward-remote bit {} allocated for {:?}", bit, target);
        Ok(bit)
    }

    /// Release a toward-remote bit. Reserved bits are refused.
    pub fn free_toward_remote(&self, bit: BitIndex, target: Target) -> Result<(), IntrBitError> {
        check_range(bit)?;
        if self.is_reserved(bit, target) {
            warn!("intr: refusing to free reserved bit {} for {:?}", bit, target);
            return Err(IntrBitError::Reserved);
        }

        let ns = self.namespace(target);
        let mut state = self.state.lock();
        if state.toward_remote[ns] & bit_mask(bit) == 0 {
            return Err(IntrBitError::NotAllocated);
        }
        state.toward_remote[ns] &= !bit_mask(bit);
        drop(state);

        debug!("intr: toward-remote bit {} freed for {:?}", bit, target);
        Ok(())
    }

    /// Dispatch a toward-host interrupt on `bit`.
    ///
    /// Returns false if nobody owns the bit. The handler runs without the
    /// allocator lock held, so it may itself allocate or free bits.
    pub fn raise(&self, bit: BitIndex) -> bool {
        let handler = if check_range(bit).is_ok() {
            self.state.lock().handlers[bit as usize].clone()
        } else {
            None
        };

        match handler {
            Some(handler) => {
                trace!("intr: dispatching toward-host bit {}", bit);
                handler.handle_irq(bit);
                true
            }
            None => {
                warn!("intr: spurious interrupt on toward-host bit {}", bit);
                false
            }
        }
    }

    pub fn free_toward_host_count(&self) -> usize {
        let state = self.state.lock();
        INTR_BITS_PER_REGISTER - state.toward_host.count_ones() as usize
    }

    /// Toward-remote bits still available to [`alloc_toward_remote`](Self::alloc_toward_remote).
    pub fn free_toward_remote_count(&self, target: Target) -> usize {
        let ns = self.namespace(target);
        let taken = self.state.lock().toward_remote[ns] | self.reserved_mask(target);
        INTR_BITS_PER_REGISTER - (taken & REGISTER_MASK).count_ones() as usize
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicUsize, Ordering};

    fn noop() -> Arc<dyn IrqHandler> {
        Arc::new(|_bit: BitIndex| {})
    }

    #[test]
    fn test_toward_host_allocates_lowest_first() {
        let bits = IntrBits::new(RemoteScope::PerTarget);
        assert_eq!(bits.alloc_toward_host(noop()), Ok(0));
        assert_eq!(bits.alloc_toward_host(noop()), Ok(1));
        assert_eq!(bits.free_toward_host_count(), INTR_BITS_PER_REGISTER - 2);

        bits.free_toward_host(0).unwrap();
        assert_eq!(bits.alloc_toward_host(noop()), Ok(0));
    }

    #[test]
    fn test_toward_host_exhaustion() {
        let bits = IntrBits::new(RemoteScope::PerTarget);
        for expected in 0..INTR_BITS_PER_REGISTER {
            assert_eq!(bits.alloc_toward_host(noop()), Ok(expected as BitIndex));
        }
        assert_eq!(bits.alloc_toward_host(noop()), Err(IntrBitError::Exhausted));
        assert_eq!(bits.free_toward_host_count(), 0);
    }

    #[test]
    fn test_free_errors() {
        let bits = IntrBits::new(RemoteScope::PerTarget);
        assert_eq!(bits.free_toward_host(3), Err(IntrBitError::NotAllocated));
        assert_eq!(bits.free_toward_host(16), Err(IntrBitError::OutOfRange));
        assert_eq!(
            bits.free_toward_remote(5, Target::Wlan),
            Err(IntrBitError::NotAllocated)
        );
        assert_eq!(
            bits.free_toward_remote(200, Target::Wlan),
            Err(IntrBitError::OutOfRange)
        );

        let bit = bits.alloc_toward_host(noop()).unwrap();
        bits.free_toward_host(bit).unwrap();
        assert_eq!(bits.free_toward_host(bit), Err(IntrBitError::NotAllocated));
    }

    #[test]
    fn test_reserved_remote_bit_is_never_handed_out() {
        let bits = IntrBits::new(RemoteScope::PerTarget);
        assert_eq!(
            bits.free_toward_remote_count(Target::Wlan),
            INTR_BITS_PER_REGISTER - 1
        );

        let mut got = Vec::new();
        while let Ok(bit) = bits.alloc_toward_remote(Target::Wlan) {
            got.push(bit);
        }
        assert_eq!(got.len(), INTR_BITS_PER_REGISTER - 1);
        assert!(!got.contains(&RESERVED_PANIC_WLAN));
        assert_eq!(got[0], 1);
        assert_eq!(bits.free_toward_remote_count(Target::Wlan), 0);
    }

    #[test]
    fn test_reserved_bit_cannot_be_freed() {
        let bits = IntrBits::new(RemoteScope::PerTarget);
        let before = bits.free_toward_remote_count(Target::Wpan);
        assert_eq!(
            bits.free_toward_remote(RESERVED_PANIC_WPAN, Target::Wpan),
            Err(IntrBitError::Reserved)
        );
        assert_eq!(bits.free_toward_remote_count(Target::Wpan), before);
        assert!(bits.is_reserved(0, Target::Fxm2));
        assert!(!bits.is_reserved(1, Target::Fxm2));
    }

    #[test]
    fn test_per_target_namespaces() {
        let bits = IntrBits::new(RemoteScope::PerTarget);
        assert_eq!(bits.alloc_toward_remote(Target::Wlan), Ok(1));
        assert_eq!(bits.alloc_toward_remote(Target::Wpan), Ok(1));
        // FlexiMAC shares the WLAN register.
        assert_eq!(bits.alloc_toward_remote(Target::Fxm1), Ok(2));
        assert_eq!(bits.alloc_toward_remote(Target::Fxm2), Ok(3));

        assert_eq!(
            bits.free_toward_remote_count(Target::Wlan),
            INTR_BITS_PER_REGISTER - 4
        );
        assert_eq!(
            bits.free_toward_remote_count(Target::Wpan),
            INTR_BITS_PER_REGISTER - 2
        );

        // Wrong namespace.
        assert_eq!(
            bits.free_toward_remote(3, Target::Wpan),
            Err(IntrBitError::NotAllocated)
        );
        bits.free_toward_remote(3, Target::Fxm1).unwrap();
    }

    #[test]
    fn test_single_scope_ignores_target() {
        let bits = IntrBits::new(RemoteScope::Single);
        assert_eq!(bits.alloc_toward_remote(Target::Wlan), Ok(1));
        assert_eq!(bits.alloc_toward_remote(Target::Wpan), Ok(2));
        assert_eq!(
            bits.free_toward_remote_count(Target::Fxm1),
            INTR_BITS_PER_REGISTER - 3
        );
        bits.free_toward_remote(1, Target::Wpan).unwrap();
        assert_eq!(bits.scope(), RemoteScope::Single);
    }

    #[test]
    fn test_raise_dispatches_to_handler() {
        let bits = IntrBits::new(RemoteScope::PerTarget);
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let bit = bits
            .alloc_toward_host(Arc::new(move |b: BitIndex| {
                assert_eq!(b, 0);
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        assert!(bits.raise(bit));
        assert!(bits.raise(bit));
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        bits.free_toward_host(bit).unwrap();
        assert!(!bits.raise(bit));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(!bits.raise(99));
    }

    #[test]
    fn test_handler_may_reenter_allocator() {
        let bits = Arc::new(IntrBits::new(RemoteScope::PerTarget));
        let inner = bits.clone();
        let bit = bits
            .alloc_toward_host(Arc::new(move |b: BitIndex| {
                inner.free_toward_host(b).unwrap();
            }))
            .unwrap();

        assert!(bits.raise(bit));
        assert_eq!(bits.free_toward_host_count(), INTR_BITS_PER_REGISTER);
    }

    #[test]
    fn test_concurrent_allocations_are_distinct() {
        let bits = Arc::new(IntrBits::new(RemoteScope::PerTarget));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let bits = bits.clone();
                std::thread::spawn(move || {
                    (0..3)
                        .map(|_| bits.alloc_toward_remote(Target::Wlan).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<BitIndex> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 12);
    }
}
