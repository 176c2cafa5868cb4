//! Copies between kernel buffers and user address spaces, plus the
//! demand-paging fault handler the copies lean on.

use crate::address_space::AddressSpace;
use crate::{FrameAlloc, MAX_VA, PagePerm, PhysMapper, phys};
use kernel_addresses::{PageSize, PhysicalAddress, Size4K, VirtualAddress, VirtualPage};

/// Failure of a cross-space copy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CopyError {
    /// The user address left the addressable span.
    #[error("address {0} is outside the addressable span")]
    OutOfRange(VirtualAddress),
    /// The destination page is not writable from user mode.
    #[error("page at {0} is not writable")]
    NotWritable(VirtualAddress),
    /// The source page is not mapped (string copies never fault pages in).
    #[error("page at {0} is not mapped")]
    NotMapped(VirtualAddress),
    /// Populating a missing page failed.
    #[error("demand paging at {va} failed: {source}")]
    Fault {
        va: VirtualAddress,
        source: FaultError,
    },
    /// No NUL terminator within the destination buffer.
    #[error("no string terminator within {0} bytes")]
    UnterminatedString(usize),
}

/// Failure to demand-populate a page.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FaultError {
    /// The faulting address lies at or beyond the user image size.
    #[error("{0} is beyond the user image")]
    OutOfBounds(VirtualAddress),
    /// The page already translates; the fault is not ours to repair.
    #[error("{0} is already mapped")]
    AlreadyMapped(VirtualAddress),
    /// No frame available for the new page.
    #[error("out of memory")]
    OutOfMemory,
}

impl<M: PhysMapper> AddressSpace<'_, M> {
    /// Populate the unmapped page containing `va` with a zeroed frame mapped
    /// `R|W|U`, returning the frame's base.
    ///
    /// Addresses at or beyond [`size`](Self::size) and already-mapped pages
    /// are rejected without touching the allocator; the trap dispatcher
    /// turns those into a fatal signal for the process.
    pub fn handle_fault<A: FrameAlloc>(
        &self,
        alloc: &A,
        va: VirtualAddress,
        is_write: bool,
    ) -> Result<PhysicalAddress, FaultError> {
        if va.as_u64() >= self.size() {
            return Err(FaultError::OutOfBounds(va));
        }
        let page = VirtualPage::<Size4K>::containing(va);
        if self.is_mapped(page.base()) {
            return Err(FaultError::AlreadyMapped(va));
        }
        let frame = alloc.alloc_frame().ok_or(FaultError::OutOfMemory)?;
        unsafe { phys::zero_frame(self.mapper(), frame) };
        let perm = PagePerm::R | PagePerm::W | PagePerm::U;
        if self
            .map_range(alloc, page.base(), Size4K::SIZE, frame.base(), perm)
            .is_err()
        {
            alloc.free_frame(frame);
            return Err(FaultError::OutOfMemory);
        }
        log::trace!(
            "demand-paged {} (write={is_write}) -> {}",
            page.base(),
            frame.base()
        );
        Ok(frame.base())
    }

    /// Copy `src` into this space at `dst`, page by page.
    ///
    /// Unmapped pages below the image size are populated on the fly; a page
    /// without user write permission fails the copy.
    pub fn copy_out<A: FrameAlloc>(
        &self,
        alloc: &A,
        dst: VirtualAddress,
        src: &[u8],
    ) -> Result<(), CopyError> {
        let mut remaining = src;
        let mut dst_va = dst;
        while !remaining.is_empty() {
            if dst_va.as_u64() >= MAX_VA {
                return Err(CopyError::OutOfRange(dst_va));
            }
            let page = VirtualPage::<Size4K>::containing(dst_va);
            let page_pa = match self.translate(page.base()) {
                Some((pa, perm)) => {
                    if !perm.contains(PagePerm::W) {
                        return Err(CopyError::NotWritable(dst_va));
                    }
                    pa
                }
                None => self
                    .handle_fault(alloc, page.base(), true)
                    .map_err(|source| CopyError::Fault { va: dst_va, source })?,
            };
            let offset = dst_va.offset_in::<Size4K>();
            let n = usize::min((Size4K::SIZE - offset) as usize, remaining.len());
            let (chunk, rest) = remaining.split_at(n);
            unsafe { phys::bytes_mut(self.mapper(), page_pa + offset, n) }.copy_from_slice(chunk);
            remaining = rest;
            dst_va = page.base() + Size4K::SIZE;
        }
        Ok(())
    }

    /// Copy from this space at `src` into `dst`, page by page.
    ///
    /// Unmapped pages below the image size are populated on the fly (they
    /// read back as zeroes); no write permission is required.
    pub fn copy_in<A: FrameAlloc>(
        &self,
        alloc: &A,
        dst: &mut [u8],
        src: VirtualAddress,
    ) -> Result<(), CopyError> {
        let mut remaining = &mut dst[..];
        let mut src_va = src;
        while !remaining.is_empty() {
            if src_va.as_u64() >= MAX_VA {
                return Err(CopyError::OutOfRange(src_va));
            }
            let page = VirtualPage::<Size4K>::containing(src_va);
            let page_pa = match self.translate(page.base()) {
                Some((pa, _)) => pa,
                None => self
                    .handle_fault(alloc, page.base(), false)
                    .map_err(|source| CopyError::Fault { va: src_va, source })?,
            };
            let offset = src_va.offset_in::<Size4K>();
            let n = usize::min((Size4K::SIZE - offset) as usize, remaining.len());
            let (chunk, rest) = core::mem::take(&mut remaining).split_at_mut(n);
            chunk.copy_from_slice(unsafe { phys::bytes_mut(self.mapper(), page_pa + offset, n) });
            remaining = rest;
            src_va = page.base() + Size4K::SIZE;
        }
        Ok(())
    }

    /// Copy a NUL-terminated string from this space at `src` into `dst`,
    /// returning its length (terminator excluded).
    ///
    /// Unlike the bulk copies this never populates pages: an unmapped source
    /// page is an error. When `dst` fills up before a terminator shows, the
    /// copy fails with the prefix left in `dst`.
    pub fn copy_in_str(&self, dst: &mut [u8], src: VirtualAddress) -> Result<usize, CopyError> {
        let mut copied = 0_usize;
        let mut src_va = src;
        while copied < dst.len() {
            if src_va.as_u64() >= MAX_VA {
                return Err(CopyError::OutOfRange(src_va));
            }
            let page = VirtualPage::<Size4K>::containing(src_va);
            let (page_pa, _) = self
                .translate(page.base())
                .ok_or(CopyError::NotMapped(src_va))?;
            let offset = src_va.offset_in::<Size4K>();
            let n = usize::min((Size4K::SIZE - offset) as usize, dst.len() - copied);
            let bytes = unsafe { phys::bytes_mut(self.mapper(), page_pa + offset, n) };
            for &byte in bytes.iter() {
                dst[copied] = byte;
                if byte == 0 {
                    return Ok(copied);
                }
                copied += 1;
            }
            src_va = page.base() + Size4K::SIZE;
        }
        Err(CopyError::UnterminatedString(dst.len()))
    }
}
