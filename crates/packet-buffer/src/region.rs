//! Shared memory carved into regions.
//!
//! A [`RegionPool`] is one contiguous block of memory visible to both the host
//! and the remote core. Buffers are placed in it with a first-fit allocator;
//! the offset of each [`Region`] is what gets advertised to the remote side.
//!
//! Regions are handed out on 64-byte boundaries so that anything placed at the
//! start of a region (cursors, tables) is naturally aligned.

use alloc::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::ptr::{self, NonNull};
use core::sync::atomic::AtomicU32;

use spinning_top::Spinlock;

/// Alignment of every region handed out by a pool.
pub const REGION_ALIGN: usize = 64;

pub(crate) fn align_up(value: usize, align: usize) -> Option<usize> {
    Some(value.checked_add(align - 1)? & !(align - 1))
}

struct PoolInner {
    base: NonNull<u8>,
    layout: Layout,
    /// Live allocations: offset -> length.
    allocations: Spinlock<BTreeMap<usize, usize>>,
}

// The block is plain shared memory; all mutable access goes through regions,
// which document their own synchronisation requirements.
unsafe impl Send for PoolInner {}
unsafe impl Sync for PoolInner {}

impl PoolInner {
    fn len(&self) -> usize {
        self.layout.size()
    }

    fn release(&self, offset: usize) {
        if self.allocations.lock().remove(&offset).is_none() {
            log::error!("region pool: release of unknown region at {:#x}", offset);
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}

/// A block of shared memory that buffers are allocated from.
pub struct RegionPool {
    inner: Arc<PoolInner>,
}

impl RegionPool {
    /// Allocate a zeroed pool of `size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "RegionPool size must be > 0");
        let layout = match Layout::from_size_align(size, REGION_ALIGN) {
            Ok(layout) => layout,
            Err(_) => panic!("RegionPool size {size} is not representable"),
        };
        let ptr = unsafe { alloc_zeroed(layout) };
        let Some(base) = NonNull::new(ptr) else {
            handle_alloc_error(layout);
        };
        Self {
            inner: Arc::new(PoolInner {
                base,
                layout,
                allocations: Spinlock::new(BTreeMap::new()),
            }),
        }
    }

    /// Total size of the pool in bytes.
    pub fn capacity(&self) -> usize {
        self.inner.len()
    }

    /// Bytes not currently claimed by a region (including alignment padding).
    pub fn available(&self) -> usize {
        let allocations = self.inner.allocations.lock();
        let used: usize = allocations
            .values()
            .map(|&len| align_up(len, REGION_ALIGN).unwrap_or(usize::MAX))
            .fold(0usize, |acc, len| acc.saturating_add(len));
        self.capacity().saturating_sub(used)
    }

    /// Number of live regions.
    pub fn region_count(&self) -> usize {
        self.inner.allocations.lock().len()
    }

    /// Allocate a region of `len` bytes using first-fit.
    ///
    /// Returns `None` if `len` is zero or no gap is large enough. The contents
    /// of a reused region are whatever its previous owner left behind.
    pub fn alloc(&self, len: usize) -> Option<Region> {
        if len == 0 {
            return None;
        }

        let mut allocations = self.inner.allocations.lock();
        let mut cursor = 0usize;
        let mut found = None;

        for (&offset, &used) in allocations.iter() {
            if offset - cursor >= len {
                found = Some(cursor);
                break;
            }
            cursor = align_up(offset + used, REGION_ALIGN)?;
        }

        let offset = match found {
            Some(offset) => offset,
            None if self.capacity().saturating_sub(cursor) >= len => cursor,
            None => return None,
        };

        allocations.insert(offset, len);
        Some(Region {
            pool: self.inner.clone(),
            offset,
            len,
            owned: true,
        })
    }

    /// Borrow a window of the pool without taking ownership of it.
    ///
    /// This is how the remote side of a buffer is reconstructed from the
    /// offsets it was told about. Dropping a view never frees anything.
    pub fn view(&self, offset: usize, len: usize) -> Option<Region> {
        let end = offset.checked_add(len)?;
        if len == 0 || end > self.capacity() {
            return None;
        }
        Some(Region {
            pool: self.inner.clone(),
            offset,
            len,
            owned: false,
        })
    }
}

/// A window into a [`RegionPool`].
///
/// An owned region gives its bytes back to the pool when dropped. The pool's
/// memory stays alive for as long as any region refers to it.
pub struct Region {
    pool: Arc<PoolInner>,
    offset: usize,
    len: usize,
    owned: bool,
}

impl Region {
    /// Offset of this region from the start of the pool.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether dropping this region returns it to the pool.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    fn ptr(&self, off: usize, len: usize) -> *mut u8 {
        assert!(
            off.checked_add(len).is_some_and(|end| end <= self.len),
            "range {off}+{len} out of bounds (len={})",
            self.len
        );
        unsafe { self.pool.base.as_ptr().add(self.offset + off) }
    }

    /// A `u32` cursor stored at `off`.
    ///
    /// # Panics
    ///
    /// Panics if `off` is out of bounds or not 4-byte aligned within the pool.
    pub fn atomic_u32(&self, off: usize) -> &AtomicU32 {
        assert!(
            (self.offset + off) % 4 == 0,
            "atomic offset {off} is not 4-byte aligned"
        );
        let ptr = self.ptr(off, 4);
        unsafe { AtomicU32::from_ptr(ptr.cast()) }
    }

    /// Fill `len` bytes at `off` with `value`.
    ///
    /// # Safety
    ///
    /// Nobody else may be reading or writing that range concurrently.
    pub unsafe fn fill(&self, off: usize, len: usize, value: u8) {
        let ptr = self.ptr(off, len);
        unsafe { ptr::write_bytes(ptr, value, len) };
    }

    /// Copy `src` into the region at `off`.
    ///
    /// # Safety
    ///
    /// Nobody else may be reading or writing that range concurrently.
    pub unsafe fn write_at(&self, off: usize, src: &[u8]) {
        let ptr = self.ptr(off, src.len());
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), ptr, src.len()) };
    }

    /// Copy bytes at `off` into `dst`.
    ///
    /// # Safety
    ///
    /// Nobody may be writing that range concurrently.
    pub unsafe fn read_at(&self, off: usize, dst: &mut [u8]) {
        let ptr = self.ptr(off, dst.len());
        unsafe { ptr::copy_nonoverlapping(ptr, dst.as_mut_ptr(), dst.len()) };
    }

    /// Borrow `len` bytes at `off` in place.
    ///
    /// # Safety
    ///
    /// Nobody may write that range while the returned slice is alive.
    pub unsafe fn bytes(&self, off: usize, len: usize) -> &[u8] {
        let ptr = self.ptr(off, len);
        unsafe { core::slice::from_raw_parts(ptr, len) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if self.owned {
            self.pool.release(self.offset);
        }
    }
}
