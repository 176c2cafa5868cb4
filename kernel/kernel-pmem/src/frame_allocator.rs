//! The frame allocator.

use alloc::vec::Vec;
use kernel_addresses::{PageSize, PhysicalAddress, PhysicalPage, Size2M, Size4K};
use kernel_sync::SpinLock;
use kernel_vmem::{FrameAlloc, PhysMapper, phys};

/// Freshly allocated frames are filled with this before being handed out,
/// so stale-content bugs surface as a recognizable pattern.
pub const ALLOC_JUNK: u8 = 0x05;

/// Freed frames are filled with this, so use-after-free bugs surface too.
pub const FREE_JUNK: u8 = 0x01;

/// Superframes carved out at construction when the caller does not say.
pub const DEFAULT_SUPERFRAME_CAPACITY: usize = 16;

/// Where RAM (and the kernel image) starts on the boards we care about.
pub const KERNEL_BASE: u64 = 0x8000_0000;

/// End of the default 128 MiB RAM window.
pub const PHYS_TOP: u64 = KERNEL_BASE + 128 * 1024 * 1024;

struct SuperframePool {
    slots: Vec<PhysicalPage<Size2M>>,
    capacity: usize,
}

/// Frame allocator over one contiguous physical range.
///
/// Free-list metadata lives in the two `Vec`s here, never inside the free
/// frames themselves, so the junk fills cannot clobber allocator state. Both
/// pools carry their own lock; fills happen outside the critical sections.
///
/// Alignment of freed frames is guaranteed by the page types; freeing
/// outside the managed range panics.
pub struct FrameAllocator<'m, M: PhysMapper> {
    mapper: &'m M,
    start: PhysicalAddress,
    end: PhysicalAddress,
    frames: SpinLock<Vec<PhysicalPage<Size4K>>>,
    superframes: SpinLock<SuperframePool>,
}

impl<'m, M: PhysMapper> FrameAllocator<'m, M> {
    /// Carve `[start, end)` into free frames.
    ///
    /// One pass from the bottom: every superframe-aligned spot with a whole
    /// superframe remaining goes to the superframe pool until it holds
    /// `superframe_capacity` entries; everything else becomes ordinary
    /// frames. `start` is rounded up to a page boundary first.
    pub fn new(
        mapper: &'m M,
        start: PhysicalAddress,
        end: PhysicalAddress,
        superframe_capacity: usize,
    ) -> Self {
        let start = start.align_up::<Size4K>();
        let mut frames = Vec::new();
        let mut slots = Vec::with_capacity(superframe_capacity);
        let mut at = start;
        while at + Size4K::SIZE <= end {
            if slots.len() < superframe_capacity
                && at.is_aligned::<Size2M>()
                && end - at >= Size2M::SIZE
            {
                slots.push(PhysicalPage::containing(at));
                at += Size2M::SIZE;
            } else {
                frames.push(PhysicalPage::containing(at));
                at += Size4K::SIZE;
            }
        }
        // pop from the low end first
        frames.reverse();
        slots.reverse();
        log::info!(
            "managing {start}..{end}: {} frames, {} superframes",
            frames.len(),
            slots.len()
        );
        Self {
            mapper,
            start,
            end,
            frames: SpinLock::new(frames),
            superframes: SpinLock::new(SuperframePool {
                slots,
                capacity: superframe_capacity,
            }),
        }
    }

    /// Ordinary frames currently free.
    pub fn free_frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    /// Superframes currently pooled.
    pub fn free_superframe_count(&self) -> usize {
        self.superframes.lock().slots.len()
    }

    /// Upper bound of the superframe pool.
    pub fn superframe_capacity(&self) -> usize {
        self.superframes.lock().capacity
    }

    fn check_managed(&self, base: PhysicalAddress, len: u64) {
        assert!(
            base >= self.start && base.as_u64() + len <= self.end.as_u64(),
            "free outside the managed range: {base}"
        );
    }
}

impl<M: PhysMapper> FrameAlloc for FrameAllocator<'_, M> {
    fn alloc_frame(&self) -> Option<PhysicalPage<Size4K>> {
        let frame = self.frames.lock().pop()?;
        unsafe { phys::fill_frame(self.mapper, frame, ALLOC_JUNK) };
        Some(frame)
    }

    fn free_frame(&self, frame: PhysicalPage<Size4K>) {
        self.check_managed(frame.base(), Size4K::SIZE);
        unsafe { phys::fill_frame(self.mapper, frame, FREE_JUNK) };
        self.frames.lock().push(frame);
    }

    fn alloc_superframe(&self) -> Option<PhysicalPage<Size2M>> {
        let frame = self.superframes.lock().slots.pop()?;
        unsafe { phys::fill_superframe(self.mapper, frame, ALLOC_JUNK) };
        Some(frame)
    }

    fn free_superframe(&self, frame: PhysicalPage<Size2M>) {
        self.check_managed(frame.base(), Size2M::SIZE);
        unsafe { phys::fill_superframe(self.mapper, frame, FREE_JUNK) };
        let mut pool = self.superframes.lock();
        assert!(
            pool.slots.len() < pool.capacity,
            "free_superframe: pool overflow at {frame}"
        );
        pool.slots.push(frame);
    }
}
