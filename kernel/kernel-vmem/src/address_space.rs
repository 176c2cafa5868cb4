//! Address spaces: the walker, the mapping engine, and lifecycle.

use crate::page_table::{ENTRY_COUNT, PageTable, ROOT_LEVEL, VpnIndex};
use crate::pte::{Pte, PteKind};
use crate::{FrameAlloc, MAX_VA, PagePerm, PhysMapper, SATP_MODE_SV39, phys};
use alloc::vec::Vec;
use kernel_addresses::{
    PageSize, PhysicalAddress, PhysicalPage, Size2M, Size4K, VirtualAddress,
};

/// Failure to establish a 4 KiB mapping.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    /// A table frame for the chain could not be allocated.
    #[error("out of memory extending the page-table chain")]
    OutOfMemory,
}

/// Failure to establish a 2 MiB mapping.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SuperpageMapError {
    /// The level-1 slot already translates; the caller falls back to 4 KiB
    /// pages.
    #[error("level-1 slot already occupied")]
    SlotOccupied,
    /// A table frame for the chain could not be allocated.
    #[error("out of memory extending the page-table chain")]
    OutOfMemory,
}

/// Failure to split a superpage into 4 KiB mappings.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DemoteError {
    /// No superpage leaf translates the address.
    #[error("no superpage mapped at {0}")]
    NoSuperpage(VirtualAddress),
    /// The child table could not be allocated.
    #[error("out of memory allocating the child table")]
    OutOfMemory,
}

/// Failure to grow a space.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrowError {
    /// The requested size does not fit below [`MAX_VA`].
    #[error("requested size {0:#x} exceeds the addressable span")]
    TooLarge(u64),
    /// Physical memory ran out; the space was rolled back to its old size.
    #[error("out of memory")]
    OutOfMemory,
}

/// Failure to duplicate a space.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DuplicateError {
    /// Physical memory ran out; the partial copy was torn down.
    #[error("out of memory")]
    OutOfMemory,
}

/// A resolved position in the tree: one entry of one table.
#[derive(Debug, Copy, Clone)]
struct Slot {
    table: PhysicalPage<Size4K>,
    index: VpnIndex,
    level: usize,
}

/// One Sv39 translation tree plus the size bookkeeping for a user image.
///
/// The space borrows its [`PhysMapper`] and is handed a [`FrameAlloc`] per
/// operation; it owns no global state. `size` is the one-past-the-end of the
/// user image: the fault handler populates pages below it on demand, and
/// [`grow`](Self::grow)/[`shrink`](Self::shrink) move it.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalPage<Size4K>,
    size: u64,
    large_fallbacks: u64,
    mapper: &'m M,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// An empty space with a zeroed root table; `None` when no frame is
    /// available for the root.
    pub fn new<A: FrameAlloc>(mapper: &'m M, alloc: &A) -> Option<Self> {
        let root = alloc.alloc_frame()?;
        let table: &mut PageTable = unsafe { mapper.phys_to_mut(root.base()) };
        table.zero();
        Some(Self {
            root,
            size: 0,
            large_fallbacks: 0,
            mapper,
        })
    }

    /// The root table frame.
    #[must_use]
    pub const fn root(&self) -> PhysicalPage<Size4K> {
        self.root
    }

    /// One past the highest user address.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// How often a superpage request degraded to 4 KiB pages over the
    /// lifetime of this space.
    #[must_use]
    pub const fn large_page_fallbacks(&self) -> u64 {
        self.large_fallbacks
    }

    /// The `satp` image selecting this space under Sv39.
    #[must_use]
    pub const fn satp_value(&self) -> u64 {
        SATP_MODE_SV39 | (self.root.base().as_u64() >> Size4K::SHIFT)
    }

    /// Point the current hart at this space.
    ///
    /// # Safety
    ///
    /// The tree must map everything the hart is about to touch, including
    /// the code performing the switch.
    #[cfg(target_arch = "riscv64")]
    pub unsafe fn activate(&self) {
        unsafe {
            core::arch::asm!(
                "sfence.vma zero, zero",
                "csrw satp, {satp}",
                "sfence.vma zero, zero",
                satp = in(reg) self.satp_value(),
            );
        }
    }

    pub(crate) const fn mapper(&self) -> &'m M {
        self.mapper
    }

    fn table_mut(&self, page: PhysicalPage<Size4K>) -> &'m mut PageTable {
        // Safety: table frames only ever come from the frame allocator and
        // stay private to this tree.
        unsafe { self.mapper.phys_to_mut(page.base()) }
    }

    fn read(&self, slot: Slot) -> Pte {
        self.table_mut(slot.table).get(slot.index)
    }

    fn write(&self, slot: Slot, entry: Pte) {
        self.table_mut(slot.table).set(slot.index, entry);
    }

    /// Descend to `target_level`, allocating and linking missing tables.
    ///
    /// `None` when `va` is out of range or a table frame cannot be
    /// allocated. A leaf above the target is a corrupted tree and panics.
    fn walk_create<A: FrameAlloc>(
        &self,
        alloc: &A,
        va: VirtualAddress,
        target_level: usize,
    ) -> Option<Slot> {
        if va.as_u64() >= MAX_VA {
            return None;
        }
        let mut table = self.root;
        let mut level = ROOT_LEVEL;
        while level > target_level {
            let index = VpnIndex::of(va, level);
            table = match self.table_mut(table).get(index).kind() {
                Some(PteKind::Table(child)) => child,
                Some(PteKind::Leaf(_)) => {
                    panic!("walk: leaf at level {level} above target {target_level}")
                }
                None => {
                    let frame = alloc.alloc_frame()?;
                    self.table_mut(frame).zero();
                    self.table_mut(table).set(index, Pte::make_table(frame));
                    frame
                }
            };
            level -= 1;
        }
        Some(Slot {
            table,
            index: VpnIndex::of(va, target_level),
            level: target_level,
        })
    }

    /// Non-allocating descent to `target_level`.
    ///
    /// With `stop_at_leaf`, a leaf encountered above the target is returned
    /// as the slot (its `level` tells the span); otherwise such a leaf, a
    /// missing table, or an out-of-range address all yield `None`.
    fn walk(&self, va: VirtualAddress, target_level: usize, stop_at_leaf: bool) -> Option<Slot> {
        if va.as_u64() >= MAX_VA {
            return None;
        }
        let mut table = self.root;
        let mut level = ROOT_LEVEL;
        while level > target_level {
            let index = VpnIndex::of(va, level);
            match self.table_mut(table).get(index).kind() {
                Some(PteKind::Table(child)) => table = child,
                Some(PteKind::Leaf(_)) if stop_at_leaf => {
                    return Some(Slot {
                        table,
                        index,
                        level,
                    });
                }
                Some(PteKind::Leaf(_)) | None => return None,
            }
            level -= 1;
        }
        Some(Slot {
            table,
            index: VpnIndex::of(va, target_level),
            level: target_level,
        })
    }

    /// Map `size` bytes of 4 KiB pages starting at `va → pa`.
    ///
    /// No rollback on failure: the caller unmaps whatever was established.
    ///
    /// # Panics
    /// Panics on an unaligned or empty range, a range crossing [`MAX_VA`],
    /// or an already-valid leaf (remap).
    pub fn map_range<A: FrameAlloc>(
        &self,
        alloc: &A,
        va: VirtualAddress,
        size: u64,
        pa: PhysicalAddress,
        perm: PagePerm,
    ) -> Result<(), MapError> {
        assert!(size > 0, "map_range: empty range at {va}");
        assert!(
            va.is_aligned::<Size4K>() && pa.is_aligned::<Size4K>() && size % Size4K::SIZE == 0,
            "map_range: unaligned {va} -> {pa} ({size:#x} bytes)"
        );
        assert!(
            va.as_u64() + size <= MAX_VA,
            "map_range: {va} + {size:#x} beyond the addressable span"
        );
        for n in 0..size / Size4K::SIZE {
            let page_va = va + n * Size4K::SIZE;
            let slot = self
                .walk_create(alloc, page_va, 0)
                .ok_or(MapError::OutOfMemory)?;
            assert!(!self.read(slot).valid(), "map_range: remap at {page_va}");
            self.write(slot, Pte::make_leaf(pa + n * Size4K::SIZE, perm));
        }
        Ok(())
    }

    /// [`map_range`](Self::map_range) for mappings that must not fail, such
    /// as the kernel direct map at startup.
    ///
    /// # Panics
    /// Panics when the mapping cannot be established.
    pub fn map_fixed<A: FrameAlloc>(
        &self,
        alloc: &A,
        va: VirtualAddress,
        size: u64,
        pa: PhysicalAddress,
        perm: PagePerm,
    ) {
        if let Err(err) = self.map_range(alloc, va, size, pa, perm) {
            panic!("map_fixed: {err} at {va}");
        }
    }

    /// Install a single 2 MiB leaf at level 1.
    ///
    /// An occupied slot is reported as [`SuperpageMapError::SlotOccupied`]
    /// rather than panicking, so callers can degrade to 4 KiB pages.
    ///
    /// # Panics
    /// Panics on unaligned addresses.
    pub fn map_superpage<A: FrameAlloc>(
        &self,
        alloc: &A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        perm: PagePerm,
    ) -> Result<(), SuperpageMapError> {
        assert!(
            va.is_aligned::<Size2M>() && pa.is_aligned::<Size2M>(),
            "map_superpage: unaligned {va} -> {pa}"
        );
        assert!(
            va.as_u64() + Size2M::SIZE <= MAX_VA,
            "map_superpage: {va} beyond the addressable span"
        );
        let slot = self
            .walk_create(alloc, va, 1)
            .ok_or(SuperpageMapError::OutOfMemory)?;
        if self.read(slot).valid() {
            return Err(SuperpageMapError::SlotOccupied);
        }
        self.write(slot, Pte::make_leaf(pa, perm));
        Ok(())
    }

    /// Replace the superpage leaf covering `va` with a child table of 512
    /// equivalent 4 KiB leaves (same frames, same permissions).
    ///
    /// The translated range is unchanged afterwards; the superpage has
    /// merely become individually unmappable.
    pub fn demote<A: FrameAlloc>(
        &self,
        alloc: &A,
        va: VirtualAddress,
    ) -> Result<(), DemoteError> {
        let aligned = va.align_down::<Size2M>();
        let slot = self
            .walk(aligned, 1, false)
            .ok_or(DemoteError::NoSuperpage(va))?;
        let entry = self.read(slot);
        if !entry.is_leaf() {
            return Err(DemoteError::NoSuperpage(va));
        }
        let perm = entry.perm();
        let base = PhysicalPage::<Size2M>::containing(entry.physical_address());
        let frame = alloc.alloc_frame().ok_or(DemoteError::OutOfMemory)?;
        let child = self.table_mut(frame);
        child.zero();
        for n in 0..ENTRY_COUNT {
            child.set(
                VpnIndex::new(n),
                Pte::make_leaf(base.subpage(n as u64).base(), perm),
            );
        }
        self.write(slot, Pte::make_table(frame));
        Ok(())
    }

    /// Remove `pages` 4 KiB pages of translation starting at `va`.
    ///
    /// A superpage wholly inside the range is removed in one step (and its
    /// superframe released when `release` is set); a superpage partially
    /// covered is demoted first. Unmapped holes are skipped silently.
    ///
    /// # Panics
    /// Panics on an unaligned `va` and when a partially covered superpage
    /// cannot be demoted; unmapping must not fail halfway.
    pub fn unmap_range<A: FrameAlloc>(
        &self,
        alloc: &A,
        va: VirtualAddress,
        pages: u64,
        release: bool,
    ) {
        assert!(va.is_aligned::<Size4K>(), "unmap_range: unaligned {va}");
        let end = va + pages * Size4K::SIZE;
        let mut a = va;
        while a < end {
            if let Some(slot) = self.walk(a, 1, false) {
                let entry = self.read(slot);
                if entry.is_leaf() {
                    if a.is_aligned::<Size2M>() && end - a >= Size2M::SIZE {
                        self.write(slot, Pte::INVALID);
                        if release {
                            alloc.free_superframe(PhysicalPage::containing(
                                entry.physical_address(),
                            ));
                        }
                        a += Size2M::SIZE;
                        continue;
                    }
                    if let Err(err) = self.demote(alloc, a) {
                        panic!("unmap_range: demotion at {a} failed: {err}");
                    }
                }
            }
            if let Some(slot) = self.walk(a, 0, false) {
                let entry = self.read(slot);
                if entry.valid() {
                    assert!(entry.is_leaf(), "unmap_range: non-leaf at level 0");
                    self.write(slot, Pte::INVALID);
                    if release {
                        alloc.free_frame(PhysicalPage::containing(entry.physical_address()));
                    }
                }
            }
            a += Size4K::SIZE;
        }
    }

    /// Physical 4 KiB page containing `va` plus the leaf permissions, with
    /// no user-mode requirement. Superpage leaves keep the sub-superpage
    /// position of `va`.
    pub(crate) fn resolve_page(
        &self,
        va: VirtualAddress,
    ) -> Option<(PhysicalPage<Size4K>, PagePerm)> {
        let slot = self.walk(va, 0, true)?;
        let entry = self.read(slot);
        if !entry.is_leaf() {
            return None;
        }
        let page = match slot.level {
            0 => PhysicalPage::containing(entry.physical_address()),
            1 => {
                let superpage = PhysicalPage::<Size2M>::containing(entry.physical_address());
                superpage.subpage(va.offset_in::<Size2M>() >> Size4K::SHIFT)
            }
            level => panic!("translate: unexpected leaf at level {level}"),
        };
        Some((page, entry.perm()))
    }

    /// Whether any leaf translates `va`.
    #[must_use]
    pub fn is_mapped(&self, va: VirtualAddress) -> bool {
        self.resolve_page(va).is_some()
    }

    /// Exact physical address of `va` plus the leaf permissions, restricted
    /// to user-accessible mappings.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<(PhysicalAddress, PagePerm)> {
        let (page, perm) = self.resolve_page(va)?;
        if !perm.contains(PagePerm::U) {
            return None;
        }
        Some((page.at_offset(va.offset_in::<Size4K>()), perm))
    }

    fn note_fallback(&mut self, va: VirtualAddress, reason: impl core::fmt::Display) {
        self.large_fallbacks += 1;
        log::debug!("superpage fallback at {va}: {reason}");
    }

    /// Extend the user image to `new_size` bytes, zero-filling new memory.
    ///
    /// Superframe-aligned offsets with a full superpage remaining are backed
    /// by superframes mapped `R|W|U` (plus `extra`); everything else gets
    /// 4 KiB pages mapped `R|U` (plus `extra`). Superframe exhaustion or an
    /// occupied level-1 slot degrades to 4 KiB pages.
    ///
    /// Sizes at or below the current one are a no-op; on failure the space
    /// is rolled back to its old size.
    pub fn grow<A: FrameAlloc>(
        &mut self,
        alloc: &A,
        new_size: u64,
        extra: PagePerm,
    ) -> Result<u64, GrowError> {
        if new_size > MAX_VA {
            return Err(GrowError::TooLarge(new_size));
        }
        if new_size <= self.size {
            return Ok(self.size);
        }
        let mut a = VirtualAddress::new(self.size).align_up::<Size4K>();
        let end = VirtualAddress::new(new_size);
        while a < end {
            if a.is_aligned::<Size2M>() && end - a >= Size2M::SIZE {
                if let Some(superframe) = alloc.alloc_superframe() {
                    unsafe { phys::zero_superframe(self.mapper, superframe) };
                    let perm = PagePerm::R | PagePerm::W | PagePerm::U | extra;
                    match self.map_superpage(alloc, a, superframe.base(), perm) {
                        Ok(()) => {
                            a += Size2M::SIZE;
                            continue;
                        }
                        Err(err) => {
                            alloc.free_superframe(superframe);
                            self.note_fallback(a, err);
                        }
                    }
                } else {
                    self.note_fallback(a, "superframe pool exhausted");
                }
            }
            let Some(frame) = alloc.alloc_frame() else {
                log::warn!("out of frames growing to {new_size:#x}; rolling back");
                self.rollback(alloc, a);
                return Err(GrowError::OutOfMemory);
            };
            unsafe { phys::zero_frame(self.mapper, frame) };
            let perm = PagePerm::R | PagePerm::U | extra;
            if self
                .map_range(alloc, a, Size4K::SIZE, frame.base(), perm)
                .is_err()
            {
                alloc.free_frame(frame);
                log::warn!("out of table frames growing to {new_size:#x}; rolling back");
                self.rollback(alloc, a);
                return Err(GrowError::OutOfMemory);
            }
            a += Size4K::SIZE;
        }
        self.size = new_size;
        Ok(new_size)
    }

    /// Undo a partial [`grow`](Self::grow): release everything mapped since
    /// the old size. `self.size` still holds the old size here.
    fn rollback<A: FrameAlloc>(&self, alloc: &A, reached: VirtualAddress) {
        let from = VirtualAddress::new(self.size).align_up::<Size4K>();
        if reached > from {
            self.unmap_range(alloc, from, (reached - from) / Size4K::SIZE, true);
        }
    }

    /// Shrink the user image to `new_size` bytes, releasing the frames
    /// between the page-rounded bounds. Never fails; sizes at or above the
    /// current one are a no-op. Returns the resulting size.
    pub fn shrink<A: FrameAlloc>(&mut self, alloc: &A, new_size: u64) -> u64 {
        if new_size >= self.size {
            return self.size;
        }
        let from = VirtualAddress::new(new_size).align_up::<Size4K>();
        let to = VirtualAddress::new(self.size).align_up::<Size4K>();
        if to > from {
            self.unmap_range(alloc, from, (to - from) / Size4K::SIZE, true);
        }
        self.size = new_size;
        new_size
    }

    /// Release the whole space: every user page below `size`, then every
    /// table in the tree, root included.
    ///
    /// Table teardown is iterative over an explicit worklist; after the user
    /// pages are gone only table pointers may remain, so finding a leaf
    /// panics.
    pub fn destroy<A: FrameAlloc>(self, alloc: &A) {
        let pages = self.size.div_ceil(Size4K::SIZE);
        if pages > 0 {
            self.unmap_range(alloc, VirtualAddress::new(0), pages, true);
        }
        let mut worklist: Vec<PhysicalPage<Size4K>> = Vec::new();
        worklist.push(self.root);
        while let Some(page) = worklist.pop() {
            let table = self.table_mut(page);
            for n in 0..ENTRY_COUNT {
                match table.get(VpnIndex::new(n)).kind() {
                    Some(PteKind::Table(child)) => worklist.push(child),
                    Some(PteKind::Leaf(pa)) => panic!("destroy: leaf {pa} left behind"),
                    None => {}
                }
            }
            alloc.free_frame(page);
        }
    }

    /// A deep copy of this space: same layout, same bytes, same permissions,
    /// zero shared frames.
    ///
    /// Superpages are copied wholesale into fresh superframes when the pool
    /// permits, and degrade to per-page copies otherwise (counted by
    /// [`large_page_fallbacks`](Self::large_page_fallbacks) on the copy).
    /// On failure the partial copy is destroyed.
    pub fn duplicate<A: FrameAlloc>(&self, alloc: &A) -> Result<Self, DuplicateError> {
        let mut copy = Self::new(self.mapper, alloc).ok_or(DuplicateError::OutOfMemory)?;
        let end = VirtualAddress::new(self.size);
        let mut a = VirtualAddress::new(0);
        while a < end {
            if a.is_aligned::<Size2M>() && end - a >= Size2M::SIZE {
                if let Some(slot) = self.walk(a, 1, false) {
                    let entry = self.read(slot);
                    if entry.is_leaf() {
                        if let Some(superframe) = alloc.alloc_superframe() {
                            let src = PhysicalPage::<Size2M>::containing(entry.physical_address());
                            unsafe { phys::copy_superframe(self.mapper, superframe, src) };
                            match copy.map_superpage(alloc, a, superframe.base(), entry.perm()) {
                                Ok(()) => {
                                    a += Size2M::SIZE;
                                    continue;
                                }
                                Err(err) => {
                                    alloc.free_superframe(superframe);
                                    copy.note_fallback(a, err);
                                }
                            }
                        } else {
                            copy.note_fallback(a, "superframe pool exhausted");
                        }
                        // degrade to per-page copies of this superpage
                    }
                }
            }
            if let Some((src_page, perm)) = self.resolve_page(a) {
                let Some(frame) = alloc.alloc_frame() else {
                    return Err(Self::abandon(copy, alloc, a));
                };
                unsafe { phys::copy_frame(self.mapper, frame, src_page) };
                if copy
                    .map_range(alloc, a, Size4K::SIZE, frame.base(), perm)
                    .is_err()
                {
                    alloc.free_frame(frame);
                    return Err(Self::abandon(copy, alloc, a));
                }
            }
            a += Size4K::SIZE;
        }
        copy.size = self.size;
        Ok(copy)
    }

    /// Tear down a partial duplicate populated up to (not including)
    /// `reached`.
    fn abandon<A: FrameAlloc>(
        mut copy: Self,
        alloc: &A,
        reached: VirtualAddress,
    ) -> DuplicateError {
        copy.size = reached.as_u64();
        copy.destroy(alloc);
        DuplicateError::OutOfMemory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Arena, BASE, TestAlloc};

    fn va(addr: u64) -> VirtualAddress {
        VirtualAddress::new(addr)
    }

    #[test]
    fn map_then_translate_with_offset() {
        let arena = Arena::new(16);
        let alloc = TestAlloc::new(0, 16);
        let space = AddressSpace::new(&arena, &alloc).unwrap();

        let frame = alloc.alloc_frame().unwrap();
        space
            .map_range(
                &alloc,
                va(0x4000),
                Size4K::SIZE,
                frame.base(),
                PagePerm::R | PagePerm::W | PagePerm::U,
            )
            .unwrap();

        let (pa, perm) = space.translate(va(0x4321)).unwrap();
        assert_eq!(pa, frame.base() + 0x321);
        assert_eq!(perm, PagePerm::R | PagePerm::W | PagePerm::U);
        assert!(space.is_mapped(va(0x4000)));
        assert!(!space.is_mapped(va(0x5000)));
    }

    #[test]
    fn translate_requires_user_access() {
        let arena = Arena::new(16);
        let alloc = TestAlloc::new(0, 16);
        let space = AddressSpace::new(&arena, &alloc).unwrap();

        let frame = alloc.alloc_frame().unwrap();
        space
            .map_range(
                &alloc,
                va(0x4000),
                Size4K::SIZE,
                frame.base(),
                PagePerm::R | PagePerm::W,
            )
            .unwrap();

        assert!(space.is_mapped(va(0x4000)));
        assert!(space.translate(va(0x4000)).is_none());
    }

    #[test]
    #[should_panic(expected = "remap")]
    fn remapping_a_page_panics() {
        let arena = Arena::new(16);
        let alloc = TestAlloc::new(0, 16);
        let space = AddressSpace::new(&arena, &alloc).unwrap();

        let pa = PhysicalAddress::new(BASE);
        space
            .map_range(&alloc, va(0), Size4K::SIZE, pa, PagePerm::R)
            .unwrap();
        let _ = space.map_range(&alloc, va(0), Size4K::SIZE, pa, PagePerm::R);
    }

    #[test]
    fn map_reports_table_exhaustion() {
        let arena = Arena::new(4);
        let alloc = TestAlloc::new(0, 1);
        let space = AddressSpace::new(&arena, &alloc).unwrap();

        // the root frame took the only frame; the chain cannot be built
        let result = space.map_range(
            &alloc,
            va(0),
            Size4K::SIZE,
            PhysicalAddress::new(BASE),
            PagePerm::R,
        );
        assert_eq!(result, Err(MapError::OutOfMemory));
    }

    #[test]
    fn superpage_translation_keeps_the_offset() {
        let arena = Arena::for_pool(1, 8);
        let alloc = TestAlloc::new(1, 8);
        let space = AddressSpace::new(&arena, &alloc).unwrap();

        let superframe = alloc.alloc_superframe().unwrap();
        let base = va(2 * Size2M::SIZE);
        space
            .map_superpage(
                &alloc,
                base,
                superframe.base(),
                PagePerm::R | PagePerm::W | PagePerm::U,
            )
            .unwrap();

        let probe = base + 5 * Size4K::SIZE + 7;
        let (pa, _) = space.translate(probe).unwrap();
        assert_eq!(pa, superframe.base() + 5 * Size4K::SIZE + 7);
    }

    #[test]
    fn occupied_slot_fails_superpage_mapping_softly() {
        let arena = Arena::for_pool(1, 8);
        let alloc = TestAlloc::new(1, 8);
        let space = AddressSpace::new(&arena, &alloc).unwrap();

        let frame = alloc.alloc_frame().unwrap();
        space
            .map_range(
                &alloc,
                va(Size2M::SIZE),
                Size4K::SIZE,
                frame.base(),
                PagePerm::R | PagePerm::U,
            )
            .unwrap();

        let superframe = alloc.alloc_superframe().unwrap();
        let result = space.map_superpage(&alloc, va(Size2M::SIZE), superframe.base(), PagePerm::R);
        assert_eq!(result, Err(SuperpageMapError::SlotOccupied));
    }

    #[test]
    fn demotion_preserves_frames_and_permissions() {
        let arena = Arena::for_pool(1, 8);
        let alloc = TestAlloc::new(1, 8);
        let space = AddressSpace::new(&arena, &alloc).unwrap();

        let superframe = alloc.alloc_superframe().unwrap();
        let perm = PagePerm::R | PagePerm::X | PagePerm::U;
        space
            .map_superpage(&alloc, va(0), superframe.base(), perm)
            .unwrap();

        let before = alloc.free_frames();
        space.demote(&alloc, va(0x1000)).unwrap();
        assert_eq!(alloc.free_frames(), before - 1);

        for n in [0_u64, 1, 255, 511] {
            let (pa, got) = space.translate(va(n * Size4K::SIZE)).unwrap();
            assert_eq!(pa, superframe.base() + n * Size4K::SIZE);
            assert_eq!(got, perm);
        }

        // pages are individually unmappable now
        space.unmap_range(&alloc, va(0), 1, true);
        assert!(!space.is_mapped(va(0)));
        assert!(space.is_mapped(va(0x1000)));
    }

    #[test]
    fn demotion_without_a_superpage_fails() {
        let arena = Arena::new(8);
        let alloc = TestAlloc::new(0, 8);
        let space = AddressSpace::new(&arena, &alloc).unwrap();

        assert_eq!(
            space.demote(&alloc, va(0)),
            Err(DemoteError::NoSuperpage(va(0)))
        );
    }

    #[test]
    fn unmapping_holes_is_silent() {
        let arena = Arena::new(8);
        let alloc = TestAlloc::new(0, 8);
        let space = AddressSpace::new(&arena, &alloc).unwrap();

        let before = alloc.free_frames();
        space.unmap_range(&alloc, va(0), 64, true);
        assert_eq!(alloc.free_frames(), before);
    }

    #[test]
    fn failed_grow_rolls_back_and_stays_usable() {
        let arena = Arena::new(8);
        let alloc = TestAlloc::new(0, 5);
        let mut space = AddressSpace::new(&arena, &alloc).unwrap();

        // 4 frames left; three pages need 2 table frames + 3 data frames
        let err = space.grow(&alloc, 3 * Size4K::SIZE, PagePerm::W).unwrap_err();
        assert_eq!(err, GrowError::OutOfMemory);
        assert_eq!(space.size(), 0);
        assert!(!space.is_mapped(va(0)));
        // both data frames came back; the two table frames stay in the tree
        assert_eq!(alloc.free_frames(), 2);

        // the retained chain makes a smaller grow succeed
        assert_eq!(space.grow(&alloc, Size4K::SIZE, PagePerm::W), Ok(Size4K::SIZE));
        assert!(space.is_mapped(va(0)));
    }

    #[test]
    fn duplicate_shares_no_frames() {
        let arena = Arena::new(40);
        let alloc = TestAlloc::new(0, 40);
        let mut space = AddressSpace::new(&arena, &alloc).unwrap();
        space.grow(&alloc, 2 * Size4K::SIZE, PagePerm::W).unwrap();
        space.copy_out(&alloc, va(100), b"duplicate me").unwrap();

        let copy = space.duplicate(&alloc).unwrap();
        assert_eq!(copy.size(), space.size());

        let (original, _) = space.translate(va(100)).unwrap();
        let (duplicated, _) = copy.translate(va(100)).unwrap();
        assert_ne!(original, duplicated);

        let mut buf = [0_u8; 12];
        copy.copy_in(&alloc, &mut buf, va(100)).unwrap();
        assert_eq!(&buf, b"duplicate me");
    }

    #[test]
    fn duplicate_failure_returns_everything() {
        let arena = Arena::new(16);
        let alloc = TestAlloc::new(0, 10);
        let mut space = AddressSpace::new(&arena, &alloc).unwrap();
        space.grow(&alloc, 4 * Size4K::SIZE, PagePerm::empty()).unwrap();

        let before = alloc.free_frames();
        // not enough frames for root + chain + four data pages
        assert!(matches!(
            space.duplicate(&alloc),
            Err(DuplicateError::OutOfMemory)
        ));
        assert_eq!(alloc.free_frames(), before);
    }

    #[test]
    fn destroy_returns_every_frame() {
        let arena = Arena::for_pool(1, 30);
        let alloc = TestAlloc::new(1, 30);
        let mut space = AddressSpace::new(&arena, &alloc).unwrap();

        space
            .grow(&alloc, Size2M::SIZE + 2 * Size4K::SIZE, PagePerm::W)
            .unwrap();
        assert_eq!(alloc.free_superframes(), 0);
        assert!(alloc.free_frames() < 30);

        space.destroy(&alloc);
        assert_eq!(alloc.free_frames(), 30);
        assert_eq!(alloc.free_superframes(), 1);
    }

    #[test]
    fn satp_encodes_mode_and_root() {
        let arena = Arena::new(4);
        let alloc = TestAlloc::new(0, 4);
        let space = AddressSpace::new(&arena, &alloc).unwrap();

        let satp = space.satp_value();
        assert_eq!(satp >> 60, 8);
        assert_eq!((satp & ((1 << 44) - 1)) << 12, space.root().base().as_u64());
    }
}
