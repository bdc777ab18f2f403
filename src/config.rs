//! Construction parameters for pools and buffers
//!
//! Both configs have sensible defaults and can be overridden from the
//! environment:
//!
//! | Variable | Field |
//! |---|---|
//! | `AVPIPE_THREADS` | [`PoolConfig::thread_count`] |
//! | `AVPIPE_QUEUE_SIZE` | [`PoolConfig::queue_size`] |
//! | `AVPIPE_MAX_QUEUE_SIZE` | [`PoolConfig::max_queue_size`] |
//! | `AVPIPE_BUFFER_CAPACITY` | [`BufferConfig::capacity`] |
//! | `AVPIPE_BUFFER_MMAP` | [`BufferConfig::backing`] (`1`/`true`/`yes`/`on` selects mmap) |

use std::str::FromStr;

use crate::core::Backing;
use crate::error::{PoolError, PoolResult};

/// Upper bound on worker threads per pool.
pub const MAX_THREADS: usize = 100;

/// Hard ceiling on the task queue length, including growth.
pub const MAX_QUEUE: usize = 1024;

pub const DEFAULT_QUEUE_SIZE: usize = 64;
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// Parse environment variable `key` as `T`, or return `default`.
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Configuration for a [`WorkerPool`](crate::pool::WorkerPool)
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads, fixed for the pool's lifetime
    pub thread_count: usize,

    /// Initial task queue length
    pub queue_size: usize,

    /// Length the queue may grow to before submissions get `QueueFull`
    pub max_queue_size: usize,

    /// Prefix for worker thread names
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let num_cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            thread_count: num_cpus.min(MAX_THREADS),
            queue_size: DEFAULT_QUEUE_SIZE,
            max_queue_size: MAX_QUEUE,
            thread_name: "avpipe".to_string(),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, overridden by `AVPIPE_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            thread_count: env_get("AVPIPE_THREADS", defaults.thread_count),
            queue_size: env_get("AVPIPE_QUEUE_SIZE", defaults.queue_size),
            max_queue_size: env_get("AVPIPE_MAX_QUEUE_SIZE", defaults.max_queue_size),
            thread_name: defaults.thread_name,
        }
    }

    pub fn thread_count(mut self, n: usize) -> Self {
        self.thread_count = n;
        self
    }

    pub fn queue_size(mut self, n: usize) -> Self {
        self.queue_size = n;
        self
    }

    pub fn max_queue_size(mut self, n: usize) -> Self {
        self.max_queue_size = n;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> PoolResult<()> {
        if self.thread_count == 0 || self.thread_count > MAX_THREADS {
            return Err(PoolError::InvalidParameters(
                "thread_count must be in 1..=MAX_THREADS",
            ));
        }
        if self.queue_size == 0 || self.queue_size > MAX_QUEUE {
            return Err(PoolError::InvalidParameters(
                "queue_size must be in 1..=MAX_QUEUE",
            ));
        }
        if self.max_queue_size < self.queue_size || self.max_queue_size > MAX_QUEUE {
            return Err(PoolError::InvalidParameters(
                "max_queue_size must be in queue_size..=MAX_QUEUE",
            ));
        }
        Ok(())
    }
}

/// Configuration for a [`RingBuffer`](crate::core::RingBuffer)
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Initial capacity in bytes; only `grow`/`resize` change it afterwards
    pub capacity: usize,
    pub backing: Backing,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUFFER_CAPACITY,
            backing: Backing::Heap,
        }
    }
}

impl BufferConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        let backing = if env_get_bool("AVPIPE_BUFFER_MMAP", false) {
            Backing::Mapped
        } else {
            Backing::Heap
        };
        Self {
            capacity: env_get("AVPIPE_BUFFER_CAPACITY", DEFAULT_BUFFER_CAPACITY),
            backing,
        }
    }

    pub fn backing(mut self, backing: Backing) -> Self {
        self.backing = backing;
        self
    }
}
