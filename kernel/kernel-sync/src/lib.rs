//! # Kernel Synchronization Primitives
//!
//! A minimal spin mutex for kernel data that is shared across cores and only
//! ever held for short, bounded critical sections (free-list push/pop and the
//! like). No interrupt masking here; callers that take a lock from interrupt
//! context must mask interrupts themselves.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
