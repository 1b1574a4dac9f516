//! A fixed-capacity circular packet buffer in shared memory.
//!
//! The buffer is a single-producer/single-consumer ring of fixed-size slots.
//! One side of the link writes packets, the other reads them; each side holds
//! its own [`PacketBuffer`] view of the same [`Region`]. The owner creates
//! the ring with [`PacketBuffer::init`]; the peer reconstructs it from the
//! advertised [`BufferConf`] with [`PacketBuffer::attach`].
//!
//! Region layout:
//!
//! ```text
//! +0   read cursor   (u32, written by the consumer)
//! +4   write cursor  (u32, written by the producer)
//! +8   length table  (slot_count x u32)
//! ...  padding to 64 bytes
//! +D   data area     (slot_count x slot_size)
//! ```
//!
//! Cursors run over `0..2 * slot_count` so that a full ring and an empty ring
//! are distinguishable without sacrificing a slot.

#![no_std]

extern crate alloc;

pub mod region;

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use mif_abi::BufferConf;

pub use region::{REGION_ALIGN, Region, RegionPool};

use region::align_up;

const READ_INDEX_OFFSET: usize = 0;
const WRITE_INDEX_OFFSET: usize = 4;
const LENGTH_TABLE_OFFSET: usize = 8;

/// Error type for packet buffer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// Every slot holds an unread packet.
    Full,
    /// Packet does not fit in one slot.
    TooLarge,
    /// Zero-length packets are not allowed.
    Empty,
    /// Slot count or slot size is zero, or the buffer would not be addressable.
    InvalidGeometry,
    /// The shared memory pool has no room for the buffer.
    OutOfMemory,
    /// A location lies outside the shared memory pool.
    OutOfBounds,
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            BufferError::Full => "packet buffer full",
            BufferError::TooLarge => "packet larger than slot",
            BufferError::Empty => "empty packet",
            BufferError::InvalidGeometry => "invalid buffer geometry",
            BufferError::OutOfMemory => "out of shared memory",
            BufferError::OutOfBounds => "location outside shared memory",
        };
        f.write_str(msg)
    }
}

/// Reference to an unread packet, obtained from [`PacketBuffer::peek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHandle {
    index: u32,
}

impl PacketHandle {
    /// Position of the packet in cursor space.
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// Byte offsets of a ring inside its region.
#[derive(Debug, Clone, Copy)]
struct Geometry {
    data_offset: usize,
    total: usize,
}

impl Geometry {
    fn new(slot_count: u32, slot_size: u32) -> Result<Self, BufferError> {
        if slot_count == 0 || slot_size == 0 {
            return Err(BufferError::InvalidGeometry);
        }
        let table_len = (slot_count as usize)
            .checked_mul(4)
            .ok_or(BufferError::InvalidGeometry)?;
        let data_offset = LENGTH_TABLE_OFFSET
            .checked_add(table_len)
            .and_then(|end| align_up(end, REGION_ALIGN))
            .ok_or(BufferError::InvalidGeometry)?;
        let total = (slot_count as usize)
            .checked_mul(slot_size as usize)
            .and_then(|data_len| data_len.checked_add(data_offset))
            .ok_or(BufferError::InvalidGeometry)?;

        // Locations are advertised as u32 offsets.
        if u32::try_from(total).is_err() {
            return Err(BufferError::InvalidGeometry);
        }

        Ok(Self { data_offset, total })
    }
}

/// One side's view of a circular packet buffer.
pub struct PacketBuffer {
    /// Shared memory holding cursors, length table and slots.
    region: Region,
    slot_count: u32,
    slot_size: u32,
    geometry: Geometry,
}

impl PacketBuffer {
    /// Allocate a ring of `slot_count` slots of `slot_size` bytes from `pool`.
    ///
    /// Cursors and the length table are zeroed; slot contents are left as
    /// found. The memory goes back to the pool when the buffer is dropped.
    pub fn init(slot_count: u32, slot_size: u32, pool: &RegionPool) -> Result<Self, BufferError> {
        let geometry = Geometry::new(slot_count, slot_size)?;
        let region = pool.alloc(geometry.total).ok_or(BufferError::OutOfMemory)?;

        if u32::try_from(region.offset() + geometry.total).is_err() {
            return Err(BufferError::OutOfBounds);
        }

        // Nobody else knows about the region yet.
        unsafe { region.fill(0, geometry.data_offset, 0) };

        log::debug!(
            "packet buffer: {} x {} bytes at {:#x}",
            slot_count,
            slot_size,
            region.offset()
        );

        Ok(Self {
            region,
            slot_count,
            slot_size,
            geometry,
        })
    }

    /// Attach to a ring that another party initialised, using the locations
    /// it advertised.
    ///
    /// # Safety
    ///
    /// `conf` must describe a ring created by [`init`](Self::init) in `pool`
    /// that is still alive. The two views must keep to their roles: only one
    /// of them writes packets and only the other reads them, and neither may
    /// touch the ring while its owner is still initialising or poisoning it.
    pub unsafe fn attach(pool: &RegionPool, conf: &BufferConf) -> Result<Self, BufferError> {
        let geometry = Geometry::new(conf.num_packets, conf.packet_size)?;
        let base = conf.read_index_loc as usize;

        if base % 4 != 0
            || conf.write_index_loc as usize != base + WRITE_INDEX_OFFSET
            || conf.length_table_loc as usize != base + LENGTH_TABLE_OFFSET
            || conf.buffer_loc as usize != base + geometry.data_offset
        {
            return Err(BufferError::InvalidGeometry);
        }

        let region = pool
            .view(base, geometry.total)
            .ok_or(BufferError::OutOfBounds)?;

        Ok(Self {
            region,
            slot_count: conf.num_packets,
            slot_size: conf.packet_size,
            geometry,
        })
    }

    /// Give the buffer's memory back to the pool.
    pub fn release(self) {
        log::debug!("packet buffer: release at {:#x}", self.region.offset());
    }

    /// Locations of this ring, for the remote side.
    pub fn config(&self) -> BufferConf {
        // init/attach checked that every offset fits in a u32.
        let base = self.region.offset() as u32;
        BufferConf {
            buffer_loc: base + self.geometry.data_offset as u32,
            num_packets: self.slot_count,
            packet_size: self.slot_size,
            read_index_loc: base + READ_INDEX_OFFSET as u32,
            write_index_loc: base + WRITE_INDEX_OFFSET as u32,
            length_table_loc: base + LENGTH_TABLE_OFFSET as u32,
        }
    }

    /// Size of one slot in bytes.
    pub fn slot_size(&self) -> u32 {
        self.slot_size
    }

    /// Number of slots.
    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    /// Number of packets written but not yet consumed.
    pub fn pending(&self) -> u32 {
        self.distance(self.read_cursor(), self.write_cursor())
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    pub fn is_full(&self) -> bool {
        self.pending() >= self.slot_count
    }

    /// Fill the whole data area with `value`.
    ///
    /// Meant for the owner, before the ring is advertised to the peer.
    pub fn poison(&mut self, value: u8) {
        let data_len = self.geometry.total - self.geometry.data_offset;
        unsafe { self.region.fill(self.geometry.data_offset, data_len, value) };
    }

    /// Write one packet into the next free slot.
    pub fn write(&mut self, data: &[u8]) -> Result<(), BufferError> {
        self.write_gather(&[data])
    }

    /// Write the concatenation of `fragments` as one packet.
    pub fn write_gather(&mut self, fragments: &[&[u8]]) -> Result<(), BufferError> {
        let total = fragments
            .iter()
            .try_fold(0usize, |acc, fragment| acc.checked_add(fragment.len()))
            .ok_or(BufferError::TooLarge)?;
        if total == 0 {
            return Err(BufferError::Empty);
        }
        if total > self.slot_size as usize {
            return Err(BufferError::TooLarge);
        }

        let write = self.write_cursor();
        let read = self.read_index().load(Ordering::Acquire) % self.span();
        if self.distance(read, write) >= self.slot_count {
            return Err(BufferError::Full);
        }

        let slot = write % self.slot_count;
        let mut offset = self.slot_offset(slot);
        for fragment in fragments {
            // The slot is between the cursors on the producer side, so the
            // consumer is not looking at it.
            unsafe { self.region.write_at(offset, fragment) };
            offset += fragment.len();
        }
        self.length(slot).store(total as u32, Ordering::Relaxed);

        // Publish the packet.
        self.write_index()
            .store(self.advance(write), Ordering::Release);
        Ok(())
    }

    /// Copy the oldest unread packet into `out` and consume it.
    ///
    /// A packet longer than `out` is truncated. Returns the number of bytes
    /// copied, or 0 if nothing is pending (or `out` is empty, in which case
    /// nothing is consumed). Use [`read_packet`](Self::read_packet) to tell an
    /// empty slot apart from an empty ring.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        self.read_packet(out).unwrap_or(0)
    }

    /// Like [`read`](Self::read), but returns `None` when no slot was
    /// consumed.
    ///
    /// `Some(0)` means a slot was consumed whose length entry was zero. The
    /// peer writes the length table, so this can happen even though
    /// [`write`](Self::write) never produces such a packet.
    pub fn read_packet(&mut self, out: &mut [u8]) -> Option<usize> {
        if out.is_empty() {
            return None;
        }

        let read = self.read_cursor();
        let write = self.write_index().load(Ordering::Acquire) % self.span();
        if read == write {
            return None;
        }

        let slot = read % self.slot_count;
        let len = self.packet_len(slot).min(out.len());
        unsafe { self.region.read_at(self.slot_offset(slot), &mut out[..len]) };

        // Hand the slot back to the producer.
        self.read_index()
            .store(self.advance(read), Ordering::Release);
        Some(len)
    }

    /// Find the packet after `prev` without consuming anything.
    ///
    /// With `None`, returns the oldest unread packet. Returns `None` when there
    /// is nothing (more) to look at.
    pub fn peek(&self, prev: Option<PacketHandle>) -> Option<PacketHandle> {
        let index = match prev {
            None => self.read_cursor(),
            Some(handle) => self.advance(handle.index),
        };
        let handle = PacketHandle { index };
        self.is_unread(handle).then_some(handle)
    }

    /// In-place contents of a peeked packet.
    ///
    /// Returns `None` if the handle no longer refers to an unread packet.
    pub fn payload(&self, handle: PacketHandle) -> Option<&[u8]> {
        if !self.is_unread(handle) {
            return None;
        }
        let slot = handle.index % self.slot_count;
        let len = self.packet_len(slot);
        // Unread slots are not touched by the producer until we advance.
        Some(unsafe { self.region.bytes(self.slot_offset(slot), len) })
    }

    /// Consume every packet up to and including `handle`.
    ///
    /// Returns the number of packets consumed; 0 if the handle was stale.
    pub fn peek_complete(&mut self, handle: PacketHandle) -> usize {
        if !self.is_unread(handle) {
            return 0;
        }
        let consumed = self.distance(self.read_cursor(), handle.index) + 1;
        self.read_index()
            .store(self.advance(handle.index), Ordering::Release);
        consumed as usize
    }

    /// Dump cursor state at the given log level.
    pub fn log(&self, level: log::Level) {
        log::log!(
            level,
            "packet buffer @{:#x}: {} x {} bytes, read={} write={} pending={}",
            self.region.offset(),
            self.slot_count,
            self.slot_size,
            self.read_cursor(),
            self.write_cursor(),
            self.pending()
        );
    }

    fn span(&self) -> u32 {
        // Geometry limits slot_count far below 2^31.
        self.slot_count * 2
    }

    fn advance(&self, index: u32) -> u32 {
        index.wrapping_add(1) % self.span()
    }

    fn distance(&self, from: u32, to: u32) -> u32 {
        to.wrapping_add(self.span()).wrapping_sub(from) % self.span()
    }

    fn is_unread(&self, handle: PacketHandle) -> bool {
        let read = self.read_cursor();
        let write = self.write_cursor();
        handle.index < self.span() && self.distance(read, handle.index) < self.distance(read, write)
    }

    fn read_index(&self) -> &AtomicU32 {
        self.region.atomic_u32(READ_INDEX_OFFSET)
    }

    fn write_index(&self) -> &AtomicU32 {
        self.region.atomic_u32(WRITE_INDEX_OFFSET)
    }

    fn read_cursor(&self) -> u32 {
        self.read_index().load(Ordering::Acquire) % self.span()
    }

    fn write_cursor(&self) -> u32 {
        self.write_index().load(Ordering::Acquire) % self.span()
    }

    fn length(&self, slot: u32) -> &AtomicU32 {
        self.region
            .atomic_u32(LENGTH_TABLE_OFFSET + slot as usize * 4)
    }

    fn packet_len(&self, slot: u32) -> usize {
        // The length table is shared memory; never trust it past a slot.
        (self.length(slot).load(Ordering::Relaxed) as usize).min(self.slot_size as usize)
    }

    fn slot_offset(&self, slot: u32) -> usize {
        self.geometry.data_offset + slot as usize * self.slot_size as usize
    }
}
