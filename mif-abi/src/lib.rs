//! Shared definitions between the host driver and the remote firmware.
//!
//! Everything in this crate is part of the contract with the other side of
//! the shared-memory link: interrupt bit numbering, the reserved panic bits,
//! stream direction values, and the configuration records the host writes
//! into shared memory for the firmware to pick up.

#![no_std]

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

// =============================================================================
// Interrupt bits
// =============================================================================

/// Index of a doorbell bit within one interrupt register.
pub type BitIndex = u8;

/// Number of doorbell bits in each interrupt register (per namespace).
pub const INTR_BITS_PER_REGISTER: usize = 16;

/// Toward-remote bit 0 of the WLAN register is reserved for forcing a
/// firmware panic, either from the host manager or the gdb monitor stack.
pub const RESERVED_PANIC_WLAN: BitIndex = 0;

/// Toward-remote bit 0 of the WPAN register, reserved for the same purpose.
pub const RESERVED_PANIC_WPAN: BitIndex = 0;

// =============================================================================
// Stream constants
// =============================================================================

/// Fill value for a fresh inbound buffer. Chosen non-zero so uninitialised
/// slots can be told apart from zeroed packet data.
pub const POISON_BYTE: u8 = 0xff;

// =============================================================================
// Targets
// =============================================================================

/// Remote core a channel talks to.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// WLAN firmware core.
    Wlan = 0,
    /// WPAN (Bluetooth / 802.15.4) firmware core.
    Wpan = 1,
    /// First FlexiMAC core.
    Fxm1 = 2,
    /// Second FlexiMAC core.
    Fxm2 = 3,
}

impl Target {
    /// All targets, in discriminant order.
    pub const ALL: [Target; 4] = [Target::Wlan, Target::Wpan, Target::Fxm1, Target::Fxm2];

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Target::Wlan),
            1 => Some(Target::Wpan),
            2 => Some(Target::Fxm1),
            3 => Some(Target::Fxm2),
            _ => None,
        }
    }

    /// Interrupt register this target's doorbells live in.
    ///
    /// The FlexiMAC cores share the WLAN register.
    pub fn class(self) -> TargetClass {
        match self {
            Target::Wpan => TargetClass::Wpan,
            Target::Wlan | Target::Fxm1 | Target::Fxm2 => TargetClass::Wlan,
        }
    }
}

/// Group of targets that share one interrupt register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetClass {
    Wlan = 0,
    Wpan = 1,
}

impl TargetClass {
    /// Number of target classes.
    pub const COUNT: usize = 2;

    pub fn index(self) -> usize {
        self as usize
    }
}

// =============================================================================
// Stream direction
// =============================================================================

/// Which way data flows through a stream.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Remote produces, host consumes.
    InboundToHost = 0,
    /// Host produces, remote consumes.
    OutboundFromHost = 1,
}

impl Direction {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Direction::InboundToHost),
            1 => Some(Direction::OutboundFromHost),
            _ => None,
        }
    }
}

// =============================================================================
// Configuration records
// =============================================================================

/// Location of a packet buffer inside shared memory.
///
/// All `*_loc` fields are byte offsets from the start of the shared region.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct BufferConf {
    /// Offset of the first packet slot.
    pub buffer_loc: u32,
    /// Number of packet slots.
    pub num_packets: u32,
    /// Size of each slot in bytes.
    pub packet_size: u32,
    /// Offset of the consumer cursor (`u32`).
    pub read_index_loc: u32,
    /// Offset of the producer cursor (`u32`).
    pub write_index_loc: u32,
    /// Offset of the per-slot length table (`num_packets` x `u32`).
    pub length_table_loc: u32,
}

/// Stream description handed to the firmware.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct StreamConf {
    pub buf_conf: BufferConf,
    /// Bit the consumer kicks after freeing slots.
    pub read_bit_idx: u8,
    /// Bit the producer kicks after publishing a packet.
    pub write_bit_idx: u8,
    pub _reserved: [u8; 2],
}
