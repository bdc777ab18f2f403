//! avpipe pipeline - synthetic demux -> decode run
//!
//! A demuxer thread writes length-prefixed packets into the write half of a
//! ring buffer. The main thread inspects each header with `peek`, waits until
//! the whole packet is buffered, drains it and hands the payload to a worker
//! pool for "decoding" (a checksum). Decoded results come back over a
//! channel passed as each task's output slot.
//!
//! Usage:
//!   cargo run --release --bin avpipe_pipeline [OPTIONS]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use avpipe::{
    Backing, BufferConfig, PoolConfig, PoolError, Producer, RingBuffer, ShutdownMode, WorkerPool,
};
use log::{debug, error, info, warn};

const HEADER_LEN: usize = 4;

/// Pipeline configuration
struct PipelineConfig {
    packets: u64,
    max_payload: usize,
    buffer_capacity: usize,
    workers: usize,
    queue_size: usize,
    mmap: bool,
    verbose: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let pool = PoolConfig::from_env();
        let buffer = BufferConfig::from_env();
        Self {
            packets: 100_000,
            max_payload: 1024,
            buffer_capacity: buffer.capacity,
            workers: pool.thread_count,
            queue_size: pool.queue_size,
            mmap: buffer.backing == Backing::Mapped,
            verbose: false,
        }
    }
}

/// Pipeline statistics
struct PipelineStats {
    packets_demuxed: AtomicU64,
    packets_submitted: AtomicU64,
    bytes_demuxed: AtomicU64,
    producer_stalls: AtomicU64,
    queue_full_retries: AtomicU64,
}

impl PipelineStats {
    fn new() -> Self {
        Self {
            packets_demuxed: AtomicU64::new(0),
            packets_submitted: AtomicU64::new(0),
            bytes_demuxed: AtomicU64::new(0),
            producer_stalls: AtomicU64::new(0),
            queue_full_retries: AtomicU64::new(0),
        }
    }

    fn print_stats(&self, elapsed: Duration, decoded: u64) {
        let demuxed = self.packets_demuxed.load(Ordering::Relaxed);
        let submitted = self.packets_submitted.load(Ordering::Relaxed);
        let bytes = self.bytes_demuxed.load(Ordering::Relaxed);
        let stalls = self.producer_stalls.load(Ordering::Relaxed);
        let retries = self.queue_full_retries.load(Ordering::Relaxed);

        println!("\n📊 Pipeline Stats ({:.2}s)", elapsed.as_secs_f64());
        println!("   Packets demuxed:   {}", demuxed);
        println!("   Packets submitted: {}", submitted);
        println!("   Packets decoded:   {}", decoded);
        println!(
            "   Throughput:        {:.2} MB/sec",
            bytes as f64 / elapsed.as_secs_f64() / 1_000_000.0
        );
        println!("   Producer stalls:   {}", stalls);
        println!("   QueueFull retries: {}", retries);
    }
}

/// Deterministic payload generator (xorshift64)
struct PacketSource {
    state: u64,
    max_payload: usize,
}

impl PacketSource {
    fn new(seed: u64, max_payload: usize) -> Self {
        Self {
            state: seed | 1,
            max_payload,
        }
    }

    fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    fn next_packet(&mut self) -> Vec<u8> {
        let len = 1 + (self.next_u64() as usize % self.max_payload);
        let seed = self.next_u64();
        let mut packet = Vec::with_capacity(HEADER_LEN + len);
        packet.extend_from_slice(&(len as u32).to_le_bytes());
        packet.extend((0..len).map(|i| (seed as usize).wrapping_add(i) as u8));
        packet
    }
}

fn checksum(payload: &[u8]) -> u32 {
    payload
        .iter()
        .fold(1u32, |acc, &b| acc.wrapping_mul(31).wrapping_add(b as u32))
}

fn run_demuxer(
    mut producer: Producer,
    packets: u64,
    max_payload: usize,
    stats: Arc<PipelineStats>,
) {
    let mut source = PacketSource::new(0x9E37_79B9_7F4A_7C15, max_payload);

    for _ in 0..packets {
        let packet = source.next_packet();
        while producer.space() < packet.len() {
            stats.producer_stalls.fetch_add(1, Ordering::Relaxed);
            thread::yield_now();
        }
        producer.write(&packet);

        stats.packets_demuxed.fetch_add(1, Ordering::Relaxed);
        stats
            .bytes_demuxed
            .fetch_add(packet.len() as u64, Ordering::Relaxed);
    }
    debug!("demuxer finished after {} packets", packets);
}

fn decode(payload: Arc<Vec<u8>>, out: mpsc::Sender<u32>) {
    // Receiver gone means the run was aborted
    let _ = out.send(checksum(&payload));
}

fn run_pipeline(config: PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let pool_config = PoolConfig::new()
        .thread_count(config.workers)
        .queue_size(config.queue_size)
        .thread_name("decode");
    let pool = WorkerPool::with_config(&pool_config)?;

    let backing = if config.mmap {
        Backing::Mapped
    } else {
        Backing::Heap
    };
    let buffer_config = BufferConfig::new(config.buffer_capacity).backing(backing);
    let mut buffer = RingBuffer::with_config(&buffer_config)?;
    // A single packet must always fit
    buffer.grow(HEADER_LEN + config.max_payload)?;
    let (producer, mut consumer) = buffer.into_split();

    info!(
        "pipeline: {} packets, {} workers, queue {}, buffer {} bytes ({:?})",
        config.packets,
        pool.thread_count(),
        pool.queue_size(),
        consumer.capacity(),
        backing
    );

    let stats = Arc::new(PipelineStats::new());
    let start = Instant::now();

    let demuxer = {
        let stats = Arc::clone(&stats);
        let packets = config.packets;
        let max_payload = config.max_payload;
        thread::Builder::new()
            .name("demux".to_string())
            .spawn(move || run_demuxer(producer, packets, max_payload, stats))?
    };

    let (result_tx, result_rx) = mpsc::channel();
    let mut expected = 0u64;
    let mut header = [0u8; HEADER_LEN];

    while stats.packets_submitted.load(Ordering::Relaxed) < config.packets {
        if consumer.size() < HEADER_LEN {
            thread::yield_now();
            continue;
        }

        consumer.peek(&mut header);
        let len = u32::from_le_bytes(header) as usize;
        if consumer.size() < HEADER_LEN + len {
            thread::yield_now();
            continue;
        }

        consumer.drain(HEADER_LEN);
        let mut payload = vec![0u8; len];
        consumer.read(&mut payload);
        expected = expected.wrapping_add(checksum(&payload) as u64);

        let payload = Arc::new(payload);
        loop {
            match pool.submit_with(decode, Arc::clone(&payload), result_tx.clone()) {
                Ok(()) => break,
                Err(PoolError::QueueFull { .. }) => {
                    stats.queue_full_retries.fetch_add(1, Ordering::Relaxed);
                    thread::yield_now();
                }
                Err(e) => return Err(e.into()),
            }
        }
        stats.packets_submitted.fetch_add(1, Ordering::Relaxed);
    }
    drop(result_tx);

    if demuxer.join().is_err() {
        error!("demuxer thread panicked");
    }
    pool.shutdown(ShutdownMode::Leisurely)?;
    if pool.destroy().is_err() {
        warn!("worker pool still had live workers after shutdown");
    }

    let (decoded, total) = result_rx
        .iter()
        .fold((0u64, 0u64), |(n, sum), c| (n + 1, sum.wrapping_add(c as u64)));

    stats.print_stats(start.elapsed(), decoded);
    if decoded != config.packets || total != expected {
        return Err(format!(
            "decoded {} of {} packets, checksum {:#x} != {:#x}",
            decoded, config.packets, total, expected
        )
        .into());
    }

    println!("\n✅ All packets decoded intact");
    Ok(())
}

fn parse_args() -> PipelineConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = PipelineConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--packets" | "-n" => {
                if i + 1 < args.len() {
                    config.packets = args[i + 1].parse().unwrap_or(config.packets);
                    i += 1;
                }
            }
            "--max-payload" => {
                if i + 1 < args.len() {
                    config.max_payload = args[i + 1].parse().unwrap_or(config.max_payload).max(1);
                    i += 1;
                }
            }
            "--buffer" | "-b" => {
                if i + 1 < args.len() {
                    config.buffer_capacity = args[i + 1].parse().unwrap_or(config.buffer_capacity);
                    i += 1;
                }
            }
            "--workers" | "-w" => {
                if i + 1 < args.len() {
                    config.workers = args[i + 1].parse().unwrap_or(config.workers);
                    i += 1;
                }
            }
            "--queue" | "-q" => {
                if i + 1 < args.len() {
                    config.queue_size = args[i + 1].parse().unwrap_or(config.queue_size);
                    i += 1;
                }
            }
            "--mmap" => {
                config.mmap = true;
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--help" | "-h" => {
                println!("avpipe pipeline - synthetic demux -> decode run\n");
                println!("Usage: avpipe_pipeline [OPTIONS]\n");
                println!("Options:");
                println!("  -n, --packets <N>       Packets to push through (default: 100000)");
                println!("      --max-payload <B>   Largest payload in bytes (default: 1024)");
                println!("  -b, --buffer <BYTES>    Ring buffer capacity (default: AVPIPE_BUFFER_CAPACITY or 65536)");
                println!("  -w, --workers <N>       Decode workers (default: AVPIPE_THREADS or CPU count)");
                println!("  -q, --queue <N>         Initial task queue size (default: AVPIPE_QUEUE_SIZE or 64)");
                println!("      --mmap              Back the ring buffer with an anonymous mapping");
                println!("  -v, --verbose           Debug logging");
                println!("  -h, --help              Show this help");
                std::process::exit(0);
            }
            other => {
                eprintln!("⚠️ Ignoring unknown argument: {}", other);
            }
        }
        i += 1;
    }

    config
}

fn main() {
    let config = parse_args();

    let level = if config.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    if let Err(e) = run_pipeline(config) {
        eprintln!("❌ Pipeline error: {}", e);
        std::process::exit(1);
    }
}
