//! Link configuration.

use packet_buffer::REGION_ALIGN;

use crate::error::StreamError;

/// Default size of the memory shared with the firmware.
pub const DEFAULT_SHARED_MEMORY_SIZE: usize = 256 * 1024;

/// How doorbell bit allocators are laid out across subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsystemLayout {
    /// One allocator for the whole link, with a toward-remote namespace per
    /// target class.
    Combined,
    /// WLAN and WPAN each get their own allocator. The FlexiMAC cores use the
    /// WLAN one.
    Independent,
}

impl Default for SubsystemLayout {
    fn default() -> Self {
        if cfg!(feature = "independent-subsystem") {
            SubsystemLayout::Independent
        } else {
            SubsystemLayout::Combined
        }
    }
}

/// Configuration for a [`Link`](crate::Link).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    /// Bytes of shared memory. Offsets into it are advertised as `u32`.
    pub shared_memory_size: usize,
    pub layout: SubsystemLayout,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            shared_memory_size: DEFAULT_SHARED_MEMORY_SIZE,
            layout: SubsystemLayout::default(),
        }
    }
}

impl LinkConfig {
    pub fn with_shared_memory_size(mut self, size: usize) -> Self {
        self.shared_memory_size = size;
        self
    }

    pub fn with_layout(mut self, layout: SubsystemLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Check that the configuration describes a usable link.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.shared_memory_size < REGION_ALIGN {
            log::error!(
                "link config: shared memory of {} bytes is below the minimum of {}",
                self.shared_memory_size,
                REGION_ALIGN
            );
            return Err(StreamError::InvalidArgument);
        }
        if u32::try_from(self.shared_memory_size).is_err() {
            log::error!(
                "link config: shared memory of {} bytes is not addressable by the firmware",
                self.shared_memory_size
            );
            return Err(StreamError::InvalidArgument);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = LinkConfig::default();
        assert_eq!(config.shared_memory_size, DEFAULT_SHARED_MEMORY_SIZE);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_default_layout_follows_feature() {
        let expected = if cfg!(feature = "independent-subsystem") {
            SubsystemLayout::Independent
        } else {
            SubsystemLayout::Combined
        };
        assert_eq!(LinkConfig::default().layout, expected);
    }

    #[test]
    fn test_rejects_bad_sizes() {
        let tiny = LinkConfig::default().with_shared_memory_size(REGION_ALIGN - 1);
        assert_eq!(tiny.validate(), Err(StreamError::InvalidArgument));

        let zero = LinkConfig::default().with_shared_memory_size(0);
        assert_eq!(zero.validate(), Err(StreamError::InvalidArgument));
    }

    #[test]
    fn test_builder() {
        let config = LinkConfig::default()
            .with_shared_memory_size(4096)
            .with_layout(SubsystemLayout::Independent);
        assert_eq!(config.shared_memory_size, 4096);
        assert_eq!(config.layout, SubsystemLayout::Independent);
    }
}
