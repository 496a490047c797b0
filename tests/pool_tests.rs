//! Concurrent tests for `PoolAllocator`.
//!
//! ```bash
//! cargo nextest run --test pool_tests --release
//! ```

#![allow(clippy::pedantic)]
#![expect(clippy::unwrap_used)]

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use taskweave::{CountingResource, Handle, PoolAllocator, PoolError, PoolOptions, SystemResource};

#[test]
fn test_exhaustion_is_distinct_from_oom() {
    common::init_tracing();

    const K: u32 = 16;
    let pool: PoolAllocator<u64> = PoolAllocator::new(PoolOptions::new(K).max_slabs(1)).unwrap();

    let results = common::run_concurrently(K as usize + 1, |i| pool.construct(i as u64));

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let exhausted: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();

    assert_eq!(ok, K as usize);
    assert_eq!(exhausted, vec![&PoolError::Exhausted { max_slabs: 1 }]);
    assert_eq!(pool.slab_count(), 1);
}

#[test]
fn test_racing_growth_respects_slab_limit() {
    common::init_tracing();

    let pool: PoolAllocator<usize> = PoolAllocator::new(PoolOptions::new(8).max_slabs(4)).unwrap();

    let results = common::run_concurrently(16, |t| {
        (0..4)
            .map(|i| pool.construct(t * 4 + i).is_ok())
            .filter(|ok| *ok)
            .count()
    });

    assert_eq!(results.iter().sum::<usize>(), 32);
    assert_eq!(pool.slab_count(), 4);
    assert_eq!(pool.live_count(), 32);
    assert_eq!(pool.free_slots(), 0);
}

#[test]
fn test_concurrent_construct_get_destroy() {
    common::init_tracing();

    const THREADS: usize = 8;
    const PER_THREAD: usize = 2_000;

    let pool: PoolAllocator<(usize, usize)> = PoolAllocator::new(PoolOptions::new(64)).unwrap();

    common::run_concurrently(THREADS, |t| {
        let mut mine: Vec<Handle> = Vec::new();
        for i in 0..PER_THREAD {
            mine.push(pool.construct((t, i)).unwrap());

            if i % 3 == 2 {
                let h = mine.swap_remove(i % mine.len());
                // SAFETY: `h` is ours and live.
                unsafe { pool.destroy(h) };
            }
        }

        for &h in &mine {
            // SAFETY: Every handle in `mine` is live and owned by this thread.
            let (owner, _) = unsafe { *pool.get(h) };
            assert_eq!(owner, t, "handle {h:?} aliased another thread's object");
        }
        for h in mine {
            // SAFETY: As above.
            unsafe { pool.destroy(h) };
        }
    });

    assert_eq!(pool.live_count(), 0);
    assert_eq!(pool.free_slots(), pool.capacity());
}

#[test]
fn test_refill_after_full_destroy() {
    const N: u32 = 32;
    let pool: PoolAllocator<u32> = PoolAllocator::new(PoolOptions::new(N).max_slabs(1)).unwrap();

    let first: Vec<_> = (0..N).map(|i| pool.construct(i).unwrap()).collect();
    for &h in &first {
        // SAFETY: Live, destroyed once.
        unsafe { pool.destroy(h) };
    }

    let second: Vec<_> = (0..N).map(|i| pool.construct(i + 100).unwrap()).collect();
    let distinct: HashSet<_> = second.iter().copied().collect();
    assert_eq!(distinct.len(), N as usize);

    for (i, &h) in second.iter().enumerate() {
        // SAFETY: Live.
        assert_eq!(unsafe { *pool.get(h) }, i as u32 + 100);
    }
    assert!(pool.construct(0).is_err());
}

#[test]
fn test_teardown_drops_live_objects_and_returns_memory() {
    struct Counted(Arc<AtomicUsize>);
    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    let drops = Arc::new(AtomicUsize::new(0));
    let res = Arc::new(CountingResource::new(SystemResource));
    {
        let pool: PoolAllocator<Counted> =
            PoolAllocator::new(PoolOptions::new(4).resource(res.clone())).unwrap();

        let handles: Vec<_> = (0..10)
            .map(|_| pool.construct(Counted(Arc::clone(&drops))).unwrap())
            .collect();

        // Punch holes so the free lists are non-trivial at teardown.
        for h in [handles[1], handles[4], handles[5], handles[9]] {
            // SAFETY: Live, destroyed once.
            unsafe { pool.destroy(h) };
        }
        assert_eq!(drops.load(Ordering::Relaxed), 4);
    }

    assert_eq!(drops.load(Ordering::Relaxed), 10);
    let stats = res.stats();
    assert_eq!(stats.live_bytes, 0);
    assert_eq!(stats.allocations, stats.deallocations);
}
