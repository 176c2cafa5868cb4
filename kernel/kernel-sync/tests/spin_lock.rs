use kernel_sync::SpinLock;
use std::panic;

#[test]
fn guard_releases_on_drop() {
    let lock = SpinLock::new(0_u32);

    {
        let mut guard = lock.lock();
        *guard = 7;
    }

    // The drop above must have released the lock.
    {
        let mut guard = lock.lock();
        *guard *= 6;
        assert_eq!(*guard, 42);
    }
}

#[test]
fn try_lock_fails_while_held() {
    let lock = SpinLock::new('x');

    let first = lock.try_lock();
    assert!(first.is_some());
    assert!(lock.try_lock().is_none());

    drop(first);
    assert!(lock.try_lock().is_some());
}

#[test]
fn with_lock_releases_afterwards() {
    let lock = SpinLock::new(Vec::new());
    lock.with_lock(|v| v.push(1));
    lock.with_lock(|v| v.push(2));
    assert_eq!(lock.with_lock(|v| v.len()), 2);
}

#[test]
fn get_mut_and_into_inner() {
    let mut lock = SpinLock::new(vec![1, 2]);
    lock.get_mut().push(3);
    assert_eq!(lock.into_inner(), vec![1, 2, 3]);
}

#[test]
fn contended_counter_is_exact() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    let threads = 8;
    let iters = 4_000;

    let lock = Arc::new(SpinLock::new(0_usize));
    let inside = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let mut handles = Vec::with_capacity(threads);
    for _ in 0..threads {
        let lock = Arc::clone(&lock);
        let inside = Arc::clone(&inside);
        let start = Arc::clone(&start);
        handles.push(thread::spawn(move || {
            start.wait();
            for _ in 0..iters {
                lock.with_lock(|v| {
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0, "lock not exclusive");
                    *v += 1;
                    inside.fetch_sub(1, Ordering::SeqCst);
                });
                thread::yield_now();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(lock.with_lock(|v| *v), threads * iters);
    assert_eq!(inside.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[test]
fn panic_inside_critical_section_unlocks() {
    let lock = SpinLock::new(0_u32);

    let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        lock.with_lock(|v| {
            *v = 99;
            panic!("boom");
        });
    }));
    assert!(result.is_err());

    // The unwound guard must have released the lock.
    assert_eq!(lock.with_lock(|v| *v), 99);
}

#[test]
fn spinlock_is_sync_for_send_payload() {
    fn takes_sync<S: Sync>(_s: &S) {}
    let lock = SpinLock::new(0_u8);
    takes_sync(&lock);
}
