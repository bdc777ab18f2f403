//! avpipe - micro-benchmarks for the buffering and scheduling primitives
//!
//! Architecture:
//! - RingBuffer: two-segment copies, no per-byte wrap checks
//! - Producer/Consumer: SPSC halves with Acquire/Release counters
//! - WorkerPool: mutex + condvar queue, tasks run outside the lock

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use avpipe::{PoolError, RingBuffer, ShutdownMode, WorkerPool};

fn main() {
    env_logger::init();

    println!("🚀 avpipe primitives - benchmark run");
    println!("====================================\n");

    if let Err(e) = benchmark_ring_buffer() {
        eprintln!("❌ ring buffer benchmark failed: {}", e);
    }

    if let Err(e) = benchmark_spsc() {
        eprintln!("❌ SPSC benchmark failed: {}", e);
    }

    if let Err(e) = benchmark_worker_pool() {
        eprintln!("❌ worker pool benchmark failed: {}", e);
    }

    println!("\n✅ All benchmarks complete!");
    println!("\nTo run a full pipeline: cargo run --release --bin avpipe_pipeline");
}

fn benchmark_ring_buffer() -> Result<(), avpipe::BufferError> {
    println!("📊 Ring Buffer Benchmark (single owner)");
    println!("---------------------------------------");

    const ITERATIONS: usize = 1_000_000;
    const CHUNK: usize = 188; // MPEG-TS packet

    let mut rb = RingBuffer::new(64 * 1024)?;
    let chunk = [0x47u8; CHUNK];
    let mut out = [0u8; CHUNK];

    let start = Instant::now();
    for _ in 0..ITERATIONS {
        if rb.space() < CHUNK {
            rb.drain(rb.size());
        }
        rb.write(&chunk);
    }
    let write_duration = start.elapsed();

    rb.reset();
    let start = Instant::now();
    for _ in 0..ITERATIONS {
        if rb.size() < CHUNK {
            while rb.space() >= CHUNK {
                rb.write(&chunk);
            }
        }
        rb.read(&mut out);
    }
    let read_duration = start.elapsed();

    let write_ns = write_duration.as_nanos() as f64 / ITERATIONS as f64;
    let read_ns = read_duration.as_nanos() as f64 / ITERATIONS as f64;

    println!("  Chunk size: {} bytes", CHUNK);
    println!("  Operations: {}", ITERATIONS);
    println!("  Write latency: {:.2} ns/op", write_ns);
    println!("  Read latency:  {:.2} ns/op (includes refills)", read_ns);
    println!(
        "  Write throughput: {:.2} MB/sec\n",
        (ITERATIONS * CHUNK) as f64 / write_duration.as_secs_f64() / 1_000_000.0
    );
    Ok(())
}

fn benchmark_spsc() -> Result<(), Box<dyn std::error::Error>> {
    println!("📊 SPSC Benchmark (producer thread -> consumer thread)");
    println!("-----------------------------------------------------");

    const TOTAL: usize = 256 * 1024 * 1024;
    const CHUNK: usize = 4096;

    let (mut producer, mut consumer) = RingBuffer::new(256 * 1024)?.into_split();

    let start = Instant::now();
    let writer = thread::spawn(move || {
        let chunk = [0xA5u8; CHUNK];
        let mut sent = 0;
        while sent < TOTAL {
            if producer.space() < CHUNK {
                std::hint::spin_loop();
                continue;
            }
            sent += producer.write(&chunk);
        }
    });

    let mut received = 0;
    let mut xor = 0u8;
    while received < TOTAL {
        let available = consumer.size();
        if available == 0 {
            std::hint::spin_loop();
            continue;
        }
        received += consumer.read_with(available, |bytes| {
            xor = bytes.iter().fold(xor, |acc, &b| acc ^ b);
        });
    }
    let duration = start.elapsed();

    writer.join().map_err(|_| "writer thread panicked")?;

    println!("  Transferred: {} MB", TOTAL / (1024 * 1024));
    println!(
        "  Throughput:  {:.2} GB/sec (xor {:#04x})\n",
        TOTAL as f64 / duration.as_secs_f64() / 1_000_000_000.0,
        xor
    );
    Ok(())
}

fn benchmark_worker_pool() -> Result<(), PoolError> {
    println!("📊 Worker Pool Benchmark (submit + execute)");
    println!("------------------------------------------");

    const TASKS: u64 = 200_000;

    let pool = WorkerPool::new(4, 256)?;
    let done = Arc::new(AtomicU64::new(0));
    let mut retries = 0u64;

    let start = Instant::now();
    for i in 0..TASKS {
        loop {
            let done = Arc::clone(&done);
            match pool.execute(move || {
                done.fetch_add(i & 1, Ordering::Relaxed);
            }) {
                Ok(()) => break,
                Err(e) if e.is_transient() => {
                    retries += 1;
                    thread::yield_now();
                }
                Err(e) => return Err(e),
            }
        }
    }
    pool.shutdown(ShutdownMode::Leisurely)?;
    let duration = start.elapsed();

    let per_task_ns = duration.as_nanos() as f64 / TASKS as f64;
    println!("  Tasks: {} on {} workers", TASKS, pool.thread_count());
    println!("  Queue grew to: {} slots", pool.queue_size());
    println!("  QueueFull retries: {}", retries);
    println!("  Latency: {:.2} ns/task", per_task_ns);
    println!(
        "  Throughput: {:.2} M tasks/sec (checksum {})",
        TASKS as f64 / duration.as_secs_f64() / 1_000_000.0,
        done.load(Ordering::Relaxed)
    );
    Ok(())
}
