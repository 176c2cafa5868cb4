//! Page-table entry encoding.

use crate::PagePerm;
use bitfield_struct::bitfield;
use kernel_addresses::{PageSize, PhysicalAddress, PhysicalPage, Size4K};

/// A single Sv39 page-table entry.
///
/// Valid entries with any of `R`/`W`/`X` set are leaves; valid entries with
/// none of them point at the next-level table. The physical page number
/// occupies bits 10..=53.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Pte {
    /// Entry participates in translation at all.
    pub valid: bool,
    /// Loads allowed through this leaf.
    pub readable: bool,
    /// Stores allowed through this leaf.
    pub writable: bool,
    /// Instruction fetches allowed through this leaf.
    pub executable: bool,
    /// Accessible in user mode.
    pub user: bool,
    /// Translation valid in all address spaces (kernel mappings).
    pub global: bool,
    /// Set by hardware on first access.
    pub accessed: bool,
    /// Set by hardware on first write.
    pub dirty: bool,
    /// Software-defined (RSW); ignored by hardware.
    #[bits(2)]
    pub software: u8,
    /// Physical page number (bits 10..=53).
    #[bits(44)]
    ppn: u64,
    /// Reserved; must stay zero.
    #[bits(10)]
    reserved: u16,
}

/// What a valid entry maps.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PteKind {
    /// Pointer to the next-level table.
    Table(PhysicalPage<Size4K>),
    /// Leaf translation; the span depends on the level the entry sits at.
    Leaf(PhysicalAddress),
}

impl Pte {
    /// The all-zero, non-translating entry.
    pub const INVALID: Self = Self::new();

    /// A non-leaf entry pointing at `child`.
    #[must_use]
    pub const fn make_table(child: PhysicalPage<Size4K>) -> Self {
        Self::new()
            .with_valid(true)
            .with_ppn(child.base().as_u64() >> Size4K::SHIFT)
    }

    /// A leaf entry mapping `pa` with `perm`.
    ///
    /// `perm` must grant at least one of `R`/`W`/`X`; a permission-less leaf
    /// would decode as a table pointer.
    #[must_use]
    pub fn make_leaf(pa: PhysicalAddress, perm: PagePerm) -> Self {
        debug_assert!(pa.is_aligned::<Size4K>());
        debug_assert!(perm.intersects(PagePerm::R | PagePerm::W | PagePerm::X));
        Self::new()
            .with_valid(true)
            .with_readable(perm.contains(PagePerm::R))
            .with_writable(perm.contains(PagePerm::W))
            .with_executable(perm.contains(PagePerm::X))
            .with_user(perm.contains(PagePerm::U))
            .with_ppn(pa.as_u64() >> Size4K::SHIFT)
    }

    /// The mapped physical address (page-aligned).
    #[inline]
    #[must_use]
    pub const fn physical_address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.ppn() << Size4K::SHIFT)
    }

    /// Valid and granting at least one access kind.
    #[inline]
    #[must_use]
    pub const fn is_leaf(self) -> bool {
        self.valid() && (self.readable() || self.writable() || self.executable())
    }

    /// Classify a valid entry; `None` when invalid.
    #[must_use]
    pub fn kind(self) -> Option<PteKind> {
        if !self.valid() {
            return None;
        }
        if self.is_leaf() {
            Some(PteKind::Leaf(self.physical_address()))
        } else {
            Some(PteKind::Table(PhysicalPage::containing(
                self.physical_address(),
            )))
        }
    }

    /// The caller-facing permission view of a leaf.
    #[must_use]
    pub fn perm(self) -> PagePerm {
        let mut perm = PagePerm::empty();
        if self.readable() {
            perm |= PagePerm::R;
        }
        if self.writable() {
            perm |= PagePerm::W;
        }
        if self.executable() {
            perm |= PagePerm::X;
        }
        if self.user() {
            perm |= PagePerm::U;
        }
        perm
    }
}
