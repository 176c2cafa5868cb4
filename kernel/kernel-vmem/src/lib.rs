//! # Virtual Memory Support
//!
//! RISC-V Sv39 paging for a hobby kernel: page tables, a three-level walker,
//! a mapping engine with 2 MiB superpage support, address-space lifecycle,
//! and user-memory copy routines with demand paging.
//!
//! ## What you get
//! - A page-table entry model ([`Pte`], [`PteKind`]) and a 4 KiB-aligned
//!   [`PageTable`] wrapper with index helpers.
//! - Caller-facing permissions ([`PagePerm`]) decoupled from the raw entry
//!   encoding.
//! - A tiny allocator/mapper interface ([`FrameAlloc`], [`PhysMapper`]) so
//!   the engine works against real RAM in a kernel and against an in-memory
//!   arena in host tests.
//! - [`AddressSpace`]: mapping, unmapping, superpage demotion, grow/shrink,
//!   duplication, teardown, and the `satp` image for activation.
//! - Cross-space copies (`copy_out`, `copy_in`, `copy_in_str`) and the
//!   demand-paging fault handler.
//!
//! ## Sv39 Virtual Address → Physical Address Walk
//!
//! Each 39-bit virtual address is divided into four fields:
//!
//! ```text
//! | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! | VPN[2]| VPN[1]| VPN[0]| Offset |
//! ```
//!
//! The hardware uses the three VPN fields as indices into three levels of
//! page tables, each level containing 512 (2⁹) entries of 8 bytes each:
//!
//! ```text
//!  level 2  →  level 1  →  level 0  →  physical page
//!    │           │           │
//!    │           │           └───► leaf → maps a 4 KiB page
//!    │           └───────────────► leaf → maps a 2 MiB superpage
//!    └───────────────────────────► (leaves here would map 1 GiB; not used)
//! ```
//!
//! An entry is a **leaf** when it is valid and any of `R`/`W`/`X` is set; a
//! valid entry with none of them points at the next-level table. The walk
//! starts at the root table named by the `satp` CSR.
//!
//! Addresses at or above [`MAX_VA`] (bit 38 and up) are rejected everywhere;
//! they would require sign extension and are reserved for the other half of
//! the address space.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod address_space;
mod page_table;
pub mod phys;
mod pte;
#[cfg(test)]
pub(crate) mod test_support;
mod uaccess;

pub use address_space::{
    AddressSpace, DemoteError, DuplicateError, GrowError, MapError, SuperpageMapError,
};
pub use page_table::{ENTRY_COUNT, LEVELS, PageTable, ROOT_LEVEL, VpnIndex};
pub use pte::{Pte, PteKind};
pub use uaccess::{CopyError, FaultError};

use kernel_addresses::{PhysicalAddress, PhysicalPage, Size2M, Size4K};

/// One past the highest virtual address the engine will touch.
///
/// Sv39 spans 39 bits; staying below bit 38 keeps every address in the
/// lower, sign-extension-free half.
pub const MAX_VA: u64 = 1 << 38;

/// `satp` mode field selecting Sv39 translation.
pub const SATP_MODE_SV39: u64 = 8 << 60;

bitflags::bitflags! {
    /// Access permissions for a mapping, independent of the entry encoding.
    ///
    /// A leaf must grant at least one of `R`/`W`/`X`; `U` additionally opens
    /// the mapping to user mode.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct PagePerm: u8 {
        /// Readable.
        const R = 1 << 0;
        /// Writable.
        const W = 1 << 1;
        /// Executable.
        const X = 1 << 2;
        /// User-accessible.
        const U = 1 << 3;
    }
}

/// Physical frame source used by the mapping engine.
///
/// Implementations are shared across cores and lock internally; all methods
/// take `&self`.
pub trait FrameAlloc {
    /// A 4 KiB frame, or `None` when physical memory is exhausted.
    fn alloc_frame(&self) -> Option<PhysicalPage<Size4K>>;

    /// Return a frame previously handed out by [`alloc_frame`](Self::alloc_frame).
    fn free_frame(&self, frame: PhysicalPage<Size4K>);

    /// A 2 MiB physically contiguous superframe, or `None` when the pool is
    /// empty. Callers fall back to 4 KiB frames on `None`.
    fn alloc_superframe(&self) -> Option<PhysicalPage<Size2M>>;

    /// Return a superframe previously handed out by
    /// [`alloc_superframe`](Self::alloc_superframe).
    fn free_superframe(&self, frame: PhysicalPage<Size2M>);
}

/// Translates physical addresses into dereferenceable pointers.
///
/// In the kernel this is a direct-map window; host tests back it with an
/// in-memory arena.
pub trait PhysMapper {
    /// # Safety
    ///
    /// `pa` must point at live, `T`-aligned memory covered by this mapper,
    /// and the caller must not create aliasing references to it.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}
