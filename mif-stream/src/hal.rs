//! Hardware signaling.

use mif_abi::{BitIndex, Target};

/// Rings doorbell bits.
///
/// A stream passes whichever bit plays the role being signalled, so this is
/// called with toward-remote and toward-host bits alike. The platform
/// implements it on top of the MIF interrupt registers. It is
/// called from whatever context performed the stream operation, including
/// interrupt handlers, so it must not block.
pub trait Doorbell: Send + Sync {
    /// Assert doorbell `bit` for `target`.
    fn irq_bit_set(&self, bit: BitIndex, target: Target);
}
