//! Packet streams between the host and a remote firmware core.
//!
//! A [`Link`] owns the memory shared with the firmware, the doorbell
//! interrupt bit allocators and the [`Doorbell`] used to ring the remote side.
//! A [`StreamChannel`] is one direction of packet flow over a link: a ring
//! buffer in shared memory plus two doorbell bits, one kicked when a packet is
//! written and one kicked when packets have been consumed.

#![no_std]

extern crate alloc;

pub mod config;
pub mod error;
pub mod hal;
pub mod link;
pub mod stream;

pub use config::{DEFAULT_SHARED_MEMORY_SIZE, LinkConfig, SubsystemLayout};
pub use error::StreamError;
pub use hal::Doorbell;
pub use link::Link;
pub use stream::{SignalKind, StreamChannel, StreamParams};

pub use intr_bits::{IntrBits, IrqHandler, PendingSignals};
pub use mif_abi::{BitIndex, BufferConf, Direction, StreamConf, Target};
pub use packet_buffer::PacketHandle;
