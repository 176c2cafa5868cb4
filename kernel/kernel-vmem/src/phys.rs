//! Byte-level access to physical frames through a [`PhysMapper`].
//!
//! Superframe variants work in 4 KiB steps so a mapper only ever has to
//! produce pointers that are valid within a single frame.

use crate::PhysMapper;
use kernel_addresses::{PageSize, PhysicalAddress, PhysicalPage, Size2M, Size4K};

/// View `len` bytes of physical memory as a mutable slice.
///
/// # Safety
///
/// `pa..pa + len` must lie inside memory covered by `mapper`, must not cross
/// out of the region the mapper can translate contiguously, and no other
/// reference to those bytes may be live.
#[must_use]
pub unsafe fn bytes_mut<'a, M: PhysMapper>(
    mapper: &M,
    pa: PhysicalAddress,
    len: usize,
) -> &'a mut [u8] {
    let first: &mut u8 = unsafe { mapper.phys_to_mut(pa) };
    unsafe { core::slice::from_raw_parts_mut(core::ptr::from_mut(first), len) }
}

/// Fill a frame with `byte`.
///
/// # Safety
/// `frame` must be covered by `mapper` and free of live references.
pub unsafe fn fill_frame<M: PhysMapper>(mapper: &M, frame: PhysicalPage<Size4K>, byte: u8) {
    unsafe { bytes_mut(mapper, frame.base(), Size4K::SIZE as usize) }.fill(byte);
}

/// Zero a frame.
///
/// # Safety
/// See [`fill_frame`].
pub unsafe fn zero_frame<M: PhysMapper>(mapper: &M, frame: PhysicalPage<Size4K>) {
    unsafe { fill_frame(mapper, frame, 0) };
}

/// Copy one frame onto another. The frames must be distinct.
///
/// # Safety
/// Both frames must be covered by `mapper` and free of live references.
pub unsafe fn copy_frame<M: PhysMapper>(
    mapper: &M,
    dst: PhysicalPage<Size4K>,
    src: PhysicalPage<Size4K>,
) {
    debug_assert!(dst != src);
    let len = Size4K::SIZE as usize;
    let src_ptr: *const u8 = unsafe { mapper.phys_to_mut::<u8>(src.base()) };
    let dst_ptr: *mut u8 = unsafe { mapper.phys_to_mut::<u8>(dst.base()) };
    unsafe { core::ptr::copy_nonoverlapping(src_ptr, dst_ptr, len) };
}

/// Fill a whole superframe with `byte`.
///
/// # Safety
/// See [`fill_frame`].
pub unsafe fn fill_superframe<M: PhysMapper>(mapper: &M, frame: PhysicalPage<Size2M>, byte: u8) {
    for n in 0..Size2M::SIZE / Size4K::SIZE {
        unsafe { fill_frame(mapper, frame.subpage(n), byte) };
    }
}

/// Zero a whole superframe.
///
/// # Safety
/// See [`fill_frame`].
pub unsafe fn zero_superframe<M: PhysMapper>(mapper: &M, frame: PhysicalPage<Size2M>) {
    unsafe { fill_superframe(mapper, frame, 0) };
}

/// Copy one superframe onto another. The superframes must be distinct.
///
/// # Safety
/// See [`copy_frame`].
pub unsafe fn copy_superframe<M: PhysMapper>(
    mapper: &M,
    dst: PhysicalPage<Size2M>,
    src: PhysicalPage<Size2M>,
) {
    for n in 0..Size2M::SIZE / Size4K::SIZE {
        unsafe { copy_frame(mapper, dst.subpage(n), src.subpage(n)) };
    }
}
