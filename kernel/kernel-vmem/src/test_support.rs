//! In-memory physical RAM for host tests: a contiguous run of 4 KiB-aligned
//! frames posing as the physical range starting at [`BASE`], plus a trivial
//! free-list allocator over it.

use crate::{FrameAlloc, PhysMapper};
use core::cell::{RefCell, UnsafeCell};
use kernel_addresses::{PageSize, PhysicalAddress, PhysicalPage, Size2M, Size4K};

/// Where the fake physical range starts; superframe-aligned.
pub const BASE: u64 = 0x8000_0000;

#[repr(C, align(4096))]
struct Frame(UnsafeCell<[u8; Size4K::SIZE as usize]>);

/// Fake physical memory. Frame `n` backs physical page `BASE + n * 4096`.
pub struct Arena {
    frames: Vec<Frame>,
}

impl Arena {
    pub fn new(frames: usize) -> Self {
        let mut backing = Vec::with_capacity(frames);
        for _ in 0..frames {
            backing.push(Frame(UnsafeCell::new([0; Size4K::SIZE as usize])));
        }
        Self { frames: backing }
    }

    /// Backing arena sized for `supers` superframes plus `frames` frames.
    pub fn for_pool(supers: usize, frames: usize) -> Self {
        Self::new(supers * (Size2M::SIZE / Size4K::SIZE) as usize + frames)
    }
}

impl PhysMapper for Arena {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let off = pa.as_u64() - BASE;
        let index = (off >> Size4K::SHIFT) as usize;
        let in_frame = (off & (Size4K::SIZE - 1)) as usize;
        let ptr = unsafe { self.frames[index].0.get().cast::<u8>().add(in_frame) };
        unsafe { &mut *ptr.cast::<T>() }
    }
}

/// Free-list allocator over the arena range: `supers` superframes starting
/// at [`BASE`], then `frames` 4 KiB frames directly after them.
pub struct TestAlloc {
    frames: RefCell<Vec<PhysicalPage<Size4K>>>,
    superframes: RefCell<Vec<PhysicalPage<Size2M>>>,
}

impl TestAlloc {
    pub fn new(supers: usize, frames: usize) -> Self {
        let mut superframes = Vec::new();
        let mut free = Vec::new();
        let mut pa = PhysicalAddress::new(BASE);
        for _ in 0..supers {
            superframes.push(PhysicalPage::<Size2M>::containing(pa));
            pa += Size2M::SIZE;
        }
        for _ in 0..frames {
            free.push(PhysicalPage::<Size4K>::containing(pa));
            pa += Size4K::SIZE;
        }
        // hand out low addresses first
        free.reverse();
        superframes.reverse();
        Self {
            frames: RefCell::new(free),
            superframes: RefCell::new(superframes),
        }
    }

    pub fn free_frames(&self) -> usize {
        self.frames.borrow().len()
    }

    pub fn free_superframes(&self) -> usize {
        self.superframes.borrow().len()
    }
}

impl FrameAlloc for TestAlloc {
    fn alloc_frame(&self) -> Option<PhysicalPage<Size4K>> {
        self.frames.borrow_mut().pop()
    }

    fn free_frame(&self, frame: PhysicalPage<Size4K>) {
        self.frames.borrow_mut().push(frame);
    }

    fn alloc_superframe(&self) -> Option<PhysicalPage<Size2M>> {
        self.superframes.borrow_mut().pop()
    }

    fn free_superframe(&self, frame: PhysicalPage<Size2M>) {
        self.superframes.borrow_mut().push(frame);
    }
}
