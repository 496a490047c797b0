//! Pool and ready-ring contention profiling.
//!
//! Drives a shared `PoolAllocator` from many threads (construct, touch,
//! destroy) and streams handles through a `RingBuffer`, reporting latency
//! outliers, exhaustion retries and memory high-water marks. With tracing
//! enabled, slab growth / exhaustion events from the crate and slow ops from
//! this binary go to a JSON log.
//!
//! Run with:
//! ```bash
//! # Without tracing (fast, just stats)
//! cargo run --release --bin pool_contention
//!
//! # With tracing (writes to logs/pool_contention.json)
//! RUST_LOG=taskweave=debug,pool_contention=warn cargo run --release --features "mimalloc,tracing" --bin pool_contention
//!
//! # View slow operations:
//! rg "SLOW_OP" logs/pool_contention.json
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]

use std::hint;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use taskweave::alloc::AllocStats;
use taskweave::{CountingResource, Handle, PoolAllocator, PoolError, PoolOptions, RingBuffer, SystemResource};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[cfg(feature = "tracing")]
type TracingGuard = tracing_appender::non_blocking::WorkerGuard;

#[cfg(not(feature = "tracing"))]
type TracingGuard = ();

/// Ops slower than this are reported individually.
const SLOW_OP_NS: u64 = 1_000_000;

// =============================================================================
// Tracing Initialization (JSON to file)
// =============================================================================

#[cfg(feature = "tracing")]
fn init_json_tracing() -> TracingGuard {
    use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

    let log_dir = "logs";
    let filter_str = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "taskweave=warn,pool_contention=warn".to_string());

    let _ = std::fs::create_dir_all(log_dir);

    let file_appender = tracing_appender::rolling::never(log_dir, "pool_contention.json");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_thread_ids(true)
        .with_target(true)
        .with_line_number(true)
        .with_ansi(false)
        .json()
        .with_filter(EnvFilter::try_new(&filter_str).unwrap_or_else(|_| EnvFilter::new("warn")));

    let _ = tracing_subscriber::registry().with(file_layer).try_init();

    println!("Tracing enabled: logs/pool_contention.json (filter: {filter_str})");

    guard
}

#[cfg(not(feature = "tracing"))]
fn init_json_tracing() -> TracingGuard {
    println!("Tracing disabled (compile with --features tracing)");
}

// =============================================================================
// Operation Stats
// =============================================================================

/// Per-thread latency statistics.
#[derive(Default)]
struct ThreadOpStats {
    ops: u64,
    total_ns: u64,
    max_op_ns: u64,
    slow_ops: u64,
    /// `construct` calls that hit the slab limit and had to retry.
    exhausted_retries: u64,
}

impl ThreadOpStats {
    const fn record_op(&mut self, op_ns: u64) {
        self.ops += 1;
        self.total_ns += op_ns;
        if op_ns > self.max_op_ns {
            self.max_op_ns = op_ns;
        }
        if op_ns > SLOW_OP_NS {
            self.slow_ops += 1;
        }
    }

    const fn merge(&mut self, other: &Self) {
        self.ops += other.ops;
        self.total_ns += other.total_ns;
        if other.max_op_ns > self.max_op_ns {
            self.max_op_ns = other.max_op_ns;
        }
        self.slow_ops += other.slow_ops;
        self.exhausted_retries += other.exhausted_retries;
    }

    fn avg_ns(&self) -> f64 {
        if self.ops == 0 {
            0.0
        } else {
            self.total_ns as f64 / self.ops as f64
        }
    }
}

// =============================================================================
// Pool Churn
// =============================================================================

struct PoolConfig {
    threads: usize,
    ops_per_thread: usize,
    slab_capacity: u32,
    max_slabs: u32,
    /// Handles each thread keeps alive before it starts destroying.
    window: usize,
}

struct PoolRun {
    elapsed: Duration,
    stats: ThreadOpStats,
    slabs: usize,
    memory: AllocStats,
}

/// Fixed-size object so slab sizing is realistic.
struct Task {
    id: u64,
    _scratch: [u64; 7],
}

fn run_pool(config: &PoolConfig) -> PoolRun {
    let resource = Arc::new(CountingResource::new(SystemResource));
    let pool: Arc<PoolAllocator<Task>> = Arc::new(
        PoolAllocator::new(
            PoolOptions::new(config.slab_capacity)
                .max_slabs(config.max_slabs)
                .resource(resource.clone()),
        )
        .unwrap(),
    );

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let pool = Arc::clone(&pool);
            let ops = config.ops_per_thread;
            let window = config.window;

            thread::spawn(move || {
                let mut stats = ThreadOpStats::default();
                let mut live: Vec<Handle> = Vec::with_capacity(window);

                for i in 0..ops {
                    let id = (t * ops + i) as u64;
                    let op_start = Instant::now();

                    let h = loop {
                        match pool.construct(Task { id, _scratch: [0; 7] }) {
                            Ok(h) => break h,
                            Err(PoolError::Exhausted { .. }) => {
                                stats.exhausted_retries += 1;
                                // Make room from our own window, or wait for others.
                                if let Some(old) = live.pop() {
                                    // SAFETY: Owned by this thread, destroyed once.
                                    unsafe { pool.destroy(old) };
                                } else {
                                    hint::spin_loop();
                                }
                            }
                            Err(e) => panic!("{e}"),
                        }
                    };

                    let op_ns = op_start.elapsed().as_nanos() as u64;
                    stats.record_op(op_ns);

                    if op_ns > SLOW_OP_NS * 100 {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            thread = t,
                            op_index = i,
                            elapsed_ms = op_ns as f64 / 1_000_000.0,
                            "SLOW_OP"
                        );

                        #[cfg(not(feature = "tracing"))]
                        eprintln!(
                            "[T{t:02}] SLOW_OP: i={i} took {:.2}ms",
                            op_ns as f64 / 1_000_000.0
                        );
                    }

                    // SAFETY: Just constructed, owned by this thread.
                    assert_eq!(unsafe { pool.get(h) }.id, id);
                    live.push(h);

                    if live.len() > window {
                        let old = live.swap_remove(i % live.len());
                        // SAFETY: Owned by this thread, destroyed once.
                        unsafe { pool.destroy(old) };
                    }
                }

                for h in live {
                    // SAFETY: As above.
                    unsafe { pool.destroy(h) };
                }
                stats
            })
        })
        .collect();

    let mut merged = ThreadOpStats::default();
    for h in handles {
        merged.merge(&h.join().unwrap());
    }
    let elapsed = start.elapsed();
    let slabs = pool.slab_count();

    drop(pool);

    PoolRun {
        elapsed,
        stats: merged,
        slabs,
        memory: resource.stats(),
    }
}

fn print_pool(config: &PoolConfig, run: &PoolRun) {
    let total_ops = config.threads * config.ops_per_thread;
    let ops_per_sec = total_ops as f64 / run.elapsed.as_secs_f64();

    println!("\n{}", "=".repeat(80));
    println!(
        "POOL: {} threads x {} constructs (slab capacity {}, max {} slabs, window {})",
        config.threads, config.ops_per_thread, config.slab_capacity, config.max_slabs, config.window
    );
    println!("{}", "=".repeat(80));

    println!("\n--- Timing ---");
    println!("Elapsed:     {:?}", run.elapsed);
    println!("Throughput:  {ops_per_sec:.0} constructs/sec");

    println!("\n--- Construct Latency ---");
    println!("Avg:         {:.0} ns", run.stats.avg_ns());
    println!("Max:         {:.2} ms", run.stats.max_op_ns as f64 / 1_000_000.0);
    println!("Slow >1ms:   {}", run.stats.slow_ops);
    println!("Exhausted:   {} retries", run.stats.exhausted_retries);

    println!("\n--- Memory ---");
    println!("Slabs:       {}", run.slabs);
    println!("Peak bytes:  {}", run.memory.peak_bytes);
    println!("Allocations: {}", run.memory.allocations);

    if run.memory.live_bytes != 0 {
        println!("\n!!! {} bytes still live after pool drop", run.memory.live_bytes);
    }
}

// =============================================================================
// Ring Throughput
// =============================================================================

fn run_ring(capacity: u32, count: u32) -> (Duration, u64) {
    let mut ring: RingBuffer<Handle> = RingBuffer::with_capacity(capacity).unwrap();
    let (mut tx, mut rx) = ring.split();
    let mut empty_spins = 0u64;

    let start = Instant::now();
    thread::scope(|s| {
        s.spawn(|| {
            for raw in 0..count {
                while !tx.try_push(Handle::from_raw(raw)) {
                    hint::spin_loop();
                }
            }
        });

        let mut expected = 0;
        while expected < count {
            match rx.try_pull() {
                Some(h) => {
                    assert_eq!(h.raw(), expected, "ring reordered elements");
                    expected += 1;
                }
                None => {
                    empty_spins += 1;
                    hint::spin_loop();
                }
            }
        }
    });

    (start.elapsed(), empty_spins)
}

// =============================================================================
// Main
// =============================================================================

fn main() {
    let _guard = init_json_tracing();

    println!("Pool / Ring Contention Profiling");
    println!("================================\n");

    let configs = [
        PoolConfig {
            threads: 8,
            ops_per_thread: 200_000,
            slab_capacity: 128,
            max_slabs: 64,
            window: 16,
        },
        PoolConfig {
            threads: 16,
            ops_per_thread: 100_000,
            slab_capacity: 64,
            max_slabs: 4,
            window: 32,
        },
    ];

    for config in &configs {
        let mut runs: Vec<PoolRun> = Vec::new();
        for run in 1..=5 {
            print!("  Pool run {run}/5... ");
            std::io::Write::flush(&mut std::io::stdout()).unwrap();

            let result = run_pool(config);
            println!("{:?}", result.elapsed);
            runs.push(result);
        }

        let slowest = runs.iter().max_by_key(|r| r.elapsed.as_nanos()).unwrap();
        print_pool(config, slowest);
    }

    println!("\n{}", "=".repeat(80));
    println!("RING: 1 producer, 1 consumer");
    println!("{}", "=".repeat(80));
    for capacity in [16, 256, 4096] {
        let count = 2_000_000;
        let (elapsed, empty_spins) = run_ring(capacity, count);
        println!(
            "capacity {capacity:>5}: {:>8.0} handles/ms, consumer empty spins {empty_spins}",
            f64::from(count) / (elapsed.as_secs_f64() * 1000.0)
        );
    }
}
