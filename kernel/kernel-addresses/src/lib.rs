//! # Strongly Typed Memory Addresses
//!
//! Newtypes for physical and virtual addresses plus page-granular wrappers,
//! so that address kinds and page sizes cannot be mixed up silently:
//!
//! - [`PhysicalAddress`] / [`VirtualAddress`]: plain `u64` wrappers with
//!   alignment and page helpers.
//! - [`PhysicalPage<S>`] / [`VirtualPage<S>`]: addresses that are known to be
//!   aligned to the page size `S`.
//! - [`PageSize`]: sealed marker trait with [`Size4K`] (a translation page)
//!   and [`Size2M`] (a superpage, the span of one level-1 table entry).
//!
//! All types are `#[repr(transparent)]`, `Copy`, and comparable; conversions
//! that could lose information (constructing a page from an unaligned
//! address) either truncate explicitly ([`containing`](PhysicalPage::containing))
//! or assert ([`from_aligned`](PhysicalPage::from_aligned)).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![forbid(unsafe_code)]

use core::fmt;
use core::marker::PhantomData;
use core::ops::{Add, AddAssign, Sub};

mod sealed {
    pub trait Sealed {}
}

/// Marker trait for the supported translation granularities.
pub trait PageSize:
    sealed::Sealed + Copy + Clone + Eq + PartialEq + Ord + PartialOrd + core::hash::Hash
{
    /// Page span in bytes.
    const SIZE: u64;
    /// `log2(SIZE)`.
    const SHIFT: u32;
    /// Human-readable size, for diagnostics.
    const NAME: &'static str;
}

/// 4 KiB page (a level-0 leaf).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size4K;
impl sealed::Sealed for Size4K {}
impl PageSize for Size4K {
    const SIZE: u64 = 4096;
    const SHIFT: u32 = 12;
    const NAME: &'static str = "4KiB";
}

/// 2 MiB superpage (a level-1 leaf; 512 contiguous 4 KiB pages).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size2M;
impl sealed::Sealed for Size2M {}
impl PageSize for Size2M {
    const SIZE: u64 = 2 * 1024 * 1024;
    const SHIFT: u32 = 21;
    const NAME: &'static str = "2MiB";
}

impl fmt::Debug for Size4K {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Self::NAME)
    }
}

impl fmt::Debug for Size2M {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Self::NAME)
    }
}

macro_rules! address_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[repr(transparent)]
        #[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(u64);

        impl $name {
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            #[inline]
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }

            /// Round down to the nearest `S` boundary.
            #[inline]
            #[must_use]
            pub const fn align_down<S: PageSize>(self) -> Self {
                Self(self.0 & !(S::SIZE - 1))
            }

            /// Round up to the nearest `S` boundary.
            ///
            /// Wraps at the top of the address space like the underlying
            /// integer would; callers stay far below that.
            #[inline]
            #[must_use]
            pub const fn align_up<S: PageSize>(self) -> Self {
                Self((self.0.wrapping_add(S::SIZE - 1)) & !(S::SIZE - 1))
            }

            /// Offset into the surrounding `S` page.
            #[inline]
            #[must_use]
            pub const fn offset_in<S: PageSize>(self) -> u64 {
                self.0 & (S::SIZE - 1)
            }

            #[inline]
            #[must_use]
            pub const fn is_aligned<S: PageSize>(self) -> bool {
                self.offset_in::<S>() == 0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl Add<u64> for $name {
            type Output = Self;
            #[inline]
            fn add(self, rhs: u64) -> Self {
                Self(self.0 + rhs)
            }
        }

        impl AddAssign<u64> for $name {
            #[inline]
            fn add_assign(&mut self, rhs: u64) {
                self.0 += rhs;
            }
        }

        impl Sub for $name {
            type Output = u64;
            #[inline]
            fn sub(self, rhs: Self) -> u64 {
                self.0 - rhs.0
            }
        }
    };
}

address_type! {
    /// An address in physical RAM.
    PhysicalAddress
}

address_type! {
    /// An address in some translated address space.
    VirtualAddress
}

macro_rules! page_type {
    ($(#[$doc:meta])* $name:ident, $addr:ident) => {
        $(#[$doc])*
        #[repr(transparent)]
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name<S: PageSize> {
            base: u64,
            _size: PhantomData<S>,
        }

        impl<S: PageSize> $name<S> {
            /// The page containing `addr` (truncates the offset).
            #[inline]
            #[must_use]
            pub const fn containing(addr: $addr) -> Self {
                Self {
                    base: addr.align_down::<S>().as_u64(),
                    _size: PhantomData,
                }
            }

            /// Wrap an address that must already be `S`-aligned.
            ///
            /// # Panics
            /// Panics when `addr` carries a page offset.
            #[inline]
            #[must_use]
            pub fn from_aligned(addr: $addr) -> Self {
                assert!(
                    addr.is_aligned::<S>(),
                    "{addr} is not {} aligned",
                    S::NAME
                );
                Self::containing(addr)
            }

            /// First address of the page.
            #[inline]
            #[must_use]
            pub const fn base(self) -> $addr {
                $addr::new(self.base)
            }

            /// Address `offset` bytes into the page; `offset` must stay
            /// within the page span.
            #[inline]
            #[must_use]
            pub const fn at_offset(self, offset: u64) -> $addr {
                debug_assert!(offset < S::SIZE);
                $addr::new(self.base + offset)
            }

            /// The page `n` spans further up.
            #[inline]
            #[must_use]
            pub const fn step(self, n: u64) -> Self {
                Self {
                    base: self.base + n * S::SIZE,
                    _size: PhantomData,
                }
            }
        }

        impl $name<Size2M> {
            /// The `n`-th 4 KiB page inside this superpage.
            #[inline]
            #[must_use]
            pub const fn subpage(self, n: u64) -> $name<Size4K> {
                debug_assert!(n < Size2M::SIZE / Size4K::SIZE);
                $name {
                    base: self.base + n * Size4K::SIZE,
                    _size: PhantomData,
                }
            }
        }

        impl<S: PageSize> fmt::Debug for $name<S> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(
                    f,
                    concat!(stringify!($name), "<{}>({:#x})"),
                    S::NAME,
                    self.base
                )
            }
        }

        impl<S: PageSize> fmt::Display for $name<S> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.base)
            }
        }
    };
}

page_type! {
    /// A physical frame of span `S`.
    PhysicalPage,
    PhysicalAddress
}

page_type! {
    /// A virtual page of span `S`.
    VirtualPage,
    VirtualAddress
}
