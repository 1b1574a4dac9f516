//! The shared-memory link to the firmware.

use alloc::sync::Arc;

use intr_bits::{IntrBits, RemoteScope};
use log::{debug, trace};
use mif_abi::{BitIndex, Target, TargetClass};
use packet_buffer::RegionPool;

use crate::config::{LinkConfig, SubsystemLayout};
use crate::error::StreamError;
use crate::hal::Doorbell;

enum Allocators {
    Combined(IntrBits),
    /// Indexed by [`TargetClass::index`].
    Independent([IntrBits; TargetClass::COUNT]),
}

/// Everything a stream channel needs from the link: shared memory, doorbell
/// bit allocators and the doorbell itself.
///
/// Channels hold only a weak reference, so dropping the last `Arc<Link>`
/// tears the link down even while channels are still open.
pub struct Link {
    config: LinkConfig,
    shared_memory: RegionPool,
    allocators: Allocators,
    doorbell: Arc<dyn Doorbell>,
}

impl Link {
    pub fn new(config: LinkConfig, doorbell: Arc<dyn Doorbell>) -> Result<Arc<Self>, StreamError> {
        config.validate()?;

        let allocators = match config.layout {
            SubsystemLayout::Combined => Allocators::Combined(IntrBits::new(RemoteScope::PerTarget)),
            SubsystemLayout::Independent => Allocators::Independent([
                IntrBits::new(RemoteScope::Single),
                IntrBits::new(RemoteScope::Single),
            ]),
        };

        debug!(
            "mif link: {} bytes of shared memory, {:?} allocators",
            config.shared_memory_size, config.layout
        );

        Ok(Arc::new(Self {
            config,
            shared_memory: RegionPool::new(config.shared_memory_size),
            allocators,
            doorbell,
        }))
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// The interrupt bit allocator serving `target`.
    pub fn intrbit(&self, target: Target) -> &IntrBits {
        match &self.allocators {
            Allocators::Combined(bits) => bits,
            Allocators::Independent(per_class) => &per_class[target.class().index()],
        }
    }

    pub fn shared_memory(&self) -> &RegionPool {
        &self.shared_memory
    }

    pub fn doorbell(&self) -> &dyn Doorbell {
        &*self.doorbell
    }

    /// Entry point for a toward-host interrupt from `target` on `bit`.
    ///
    /// Returns false if no channel owns the bit.
    pub fn handle_irq(&self, target: Target, bit: BitIndex) -> bool {
        trace!("mif link: irq from {:?} on bit {}", target, bit);
        self.intrbit(target).raise(bit)
    }
}
