//! Page tables and virtual-page-number indexing.

use crate::pte::Pte;
use kernel_addresses::{PageSize, Size4K, VirtualAddress};

/// Entries per table (2⁹).
pub const ENTRY_COUNT: usize = 512;

/// Translation levels in Sv39.
pub const LEVELS: usize = 3;

/// The level the root table sits at; leaves at level 1 map superpages.
pub const ROOT_LEVEL: usize = 2;

/// One table of any level, exactly one 4 KiB frame.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [Pte; ENTRY_COUNT],
}

const _: () = assert!(core::mem::size_of::<PageTable>() == Size4K::SIZE as usize);

impl PageTable {
    #[inline]
    #[must_use]
    pub const fn get(&self, index: VpnIndex) -> Pte {
        self.entries[index.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, index: VpnIndex, entry: Pte) {
        self.entries[index.as_usize()] = entry;
    }

    /// Reset every entry to non-translating.
    pub const fn zero(&mut self) {
        self.entries = [Pte::INVALID; ENTRY_COUNT];
    }
}

/// An index into one table level, guaranteed to be below [`ENTRY_COUNT`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VpnIndex(usize);

impl VpnIndex {
    /// The VPN field of `va` for `level` (0, 1, or 2).
    #[inline]
    #[must_use]
    pub const fn of(va: VirtualAddress, level: usize) -> Self {
        debug_assert!(level < LEVELS);
        Self(((va.as_u64() >> (Size4K::SHIFT + 9 * level as u32)) & 0x1ff) as usize)
    }

    /// Wrap a raw index.
    ///
    /// # Panics
    /// Panics when `index` is out of range.
    #[inline]
    #[must_use]
    pub const fn new(index: usize) -> Self {
        assert!(index < ENTRY_COUNT);
        Self(index)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_addresses::PageSize;

    #[test]
    fn vpn_fields_split_correctly() {
        // VPN[2] = 3, VPN[1] = 5, VPN[0] = 7, offset = 0x123
        let va = VirtualAddress::new((3 << 30) | (5 << 21) | (7 << 12) | 0x123);
        assert_eq!(VpnIndex::of(va, 2).as_usize(), 3);
        assert_eq!(VpnIndex::of(va, 1).as_usize(), 5);
        assert_eq!(VpnIndex::of(va, 0).as_usize(), 7);
    }

    #[test]
    fn indices_stay_in_range() {
        let va = VirtualAddress::new(crate::MAX_VA - 1);
        for level in 0..LEVELS {
            assert!(VpnIndex::of(va, level).as_usize() < ENTRY_COUNT);
        }
    }

    #[test]
    fn table_is_one_frame() {
        assert_eq!(core::mem::size_of::<PageTable>(), Size4K::SIZE as usize);
        assert_eq!(core::mem::align_of::<PageTable>(), Size4K::SIZE as usize);
    }

    #[test]
    #[should_panic(expected = "index < ENTRY_COUNT")]
    fn out_of_range_index_is_rejected() {
        let _ = VpnIndex::new(ENTRY_COUNT);
    }
}
