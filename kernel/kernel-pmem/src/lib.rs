//! # Physical Memory Management
//!
//! The frame allocator backing every address space: a locked free list of
//! 4 KiB frames plus a small, separately locked pool of physically
//! contiguous 2 MiB superframes carved out of the managed range at startup.
//!
//! The allocator is an explicit object implementing
//! [`kernel_vmem::FrameAlloc`]; it is constructed once over the RAM range
//! left after the kernel image and passed by reference to everything that
//! needs frames.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod frame_allocator;

pub use frame_allocator::{
    ALLOC_JUNK, DEFAULT_SUPERFRAME_CAPACITY, FREE_JUNK, FrameAllocator, KERNEL_BASE, PHYS_TOP,
};
