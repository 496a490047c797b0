//! Benchmarks for `RingBuffer` using Divan.
//!
//! Run with: `cargo bench --bench ring`

#![expect(clippy::unwrap_used)]

use std::hint;
use std::thread;

use divan::counter::ItemsCount;
use divan::{Bencher, black_box};
use taskweave::{Handle, RingBuffer};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    divan::main();
}

/// Push immediately followed by pull on one thread (uncontended cursors).
#[divan::bench(args = [8, 64, 1024])]
fn push_pull_same_thread(bencher: Bencher, capacity: u32) {
    let mut ring: RingBuffer<Handle> = RingBuffer::with_capacity(capacity).unwrap();
    let (mut tx, mut rx) = ring.split();

    bencher.bench_local(|| {
        tx.try_push(black_box(Handle::from_raw(7)));
        black_box(rx.try_pull())
    });
}

/// Fill then drain the whole ring.
#[divan::bench(args = [64, 1024])]
fn fill_drain(bencher: Bencher, capacity: u32) {
    let mut ring: RingBuffer<u64> = RingBuffer::with_capacity(capacity).unwrap();
    let (mut tx, mut rx) = ring.split();

    bencher.counter(ItemsCount::new(capacity)).bench_local(|| {
        for i in 0..u64::from(capacity) {
            tx.try_push(i);
        }
        while let Some(v) = rx.try_pull() {
            black_box(v);
        }
    });
}

/// Stream `COUNT` elements from a producer thread to the bench thread.
#[divan::bench(args = [16, 256, 4096])]
fn cross_thread_stream(bencher: Bencher, capacity: u32) {
    const COUNT: u32 = 10_000;

    bencher.counter(ItemsCount::new(COUNT)).bench_local(|| {
        let mut ring: RingBuffer<u32> = RingBuffer::with_capacity(capacity).unwrap();
        let (mut tx, mut rx) = ring.split();

        thread::scope(|s| {
            s.spawn(|| {
                for v in 0..COUNT {
                    while !tx.try_push(v) {
                        hint::spin_loop();
                    }
                }
            });

            let mut received = 0;
            while received < COUNT {
                if let Some(v) = rx.try_pull() {
                    black_box(v);
                    received += 1;
                } else {
                    hint::spin_loop();
                }
            }
        });
    });
}
