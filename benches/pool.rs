//! Benchmarks for `PoolAllocator` using Divan.
//!
//! ```bash
//! cargo bench --bench pool                      # default allocator
//! cargo bench --bench pool --features mimalloc  # mimalloc-backed slabs
//! ```

#![expect(clippy::unwrap_used)]

use divan::{Bencher, black_box};
use taskweave::{PoolAllocator, PoolOptions};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    divan::main();
}

fn options(slab_capacity: u32) -> PoolOptions {
    let options = PoolOptions::new(slab_capacity);
    #[cfg(feature = "mimalloc")]
    let options = options.resource(std::sync::Arc::new(taskweave::alloc::MimallocResource));
    options
}

// =============================================================================
// Single-threaded
// =============================================================================

#[divan::bench_group]
mod single_thread {
    use super::{Bencher, PoolAllocator, black_box, options};

    /// Construct + destroy on a warm pool (free-list head reuse).
    #[divan::bench(args = [16, 128, 1024])]
    fn construct_destroy(bencher: Bencher, slab_capacity: u32) {
        let pool: PoolAllocator<[u64; 4]> = PoolAllocator::new(options(slab_capacity)).unwrap();
        let warm = pool.construct([0; 4]).unwrap();

        bencher.bench_local(|| {
            let h = pool.construct(black_box([1, 2, 3, 4])).unwrap();
            // SAFETY: Fresh handle, destroyed once.
            unsafe { pool.destroy(h) };
        });

        // SAFETY: Live.
        unsafe { pool.destroy(warm) };
    }

    /// Destroy into the middle of a long free list (sorted insert walk).
    #[divan::bench(args = [16, 128, 1024])]
    fn destroy_sorted_insert(bencher: Bencher, slab_capacity: u32) {
        bencher
            .with_inputs(|| {
                let pool: PoolAllocator<u64> =
                    PoolAllocator::new(options(slab_capacity).max_slabs(1)).unwrap();
                let handles: Vec<_> = (0..u64::from(slab_capacity))
                    .map(|i| pool.construct(i).unwrap())
                    .collect();
                // Free every other slot so the list is half full.
                for h in handles.iter().step_by(2) {
                    // SAFETY: Live, destroyed once.
                    unsafe { pool.destroy(*h) };
                }
                let last = handles[handles.len() - 1];
                (pool, last)
            })
            .bench_local_values(|(pool, last)| {
                // SAFETY: `last` is odd-indexed (or the only slot) and live.
                unsafe { pool.destroy(last) };
                pool
            });
    }

    #[divan::bench]
    fn get(bencher: Bencher) {
        let pool: PoolAllocator<u64> = PoolAllocator::new(options(128)).unwrap();
        let handles: Vec<_> = (0..1000).map(|i| pool.construct(i).unwrap()).collect();
        let mut i = 0;

        bencher.bench_local(|| {
            i = (i + 1) % handles.len();
            // SAFETY: Live.
            black_box(unsafe { *pool.get(handles[i]) })
        });
    }
}

// =============================================================================
// Contended
// =============================================================================

#[divan::bench_group]
mod contended {
    use super::{Bencher, PoolAllocator, black_box, options};

    /// Every thread churns construct/destroy on one shared pool.
    #[divan::bench(threads = [1, 2, 4, 8], args = [64, 1024])]
    fn construct_destroy(bencher: Bencher, slab_capacity: u32) {
        let pool: PoolAllocator<u64> = PoolAllocator::new(options(slab_capacity)).unwrap();

        bencher.bench(|| {
            let h = pool.construct(black_box(7)).unwrap();
            // SAFETY: Fresh handle owned by this iteration.
            unsafe { pool.destroy(h) };
        });
    }
}
