//! Error types for the buffering and scheduling primitives
//!
//! Each component has its own error enum. Contract violations (reading past
//! `size()`, writing past `space()`) are not errors: they panic.

use std::io;

use thiserror::Error;

/// Errors raised by [`RingBuffer`](crate::core::RingBuffer) construction and growth.
#[derive(Error, Debug)]
pub enum BufferError {
    /// The backing storage could not be allocated. The buffer, if any, is unchanged.
    #[error("failed to allocate {requested} bytes of ring buffer storage")]
    Allocation { requested: usize },

    /// The requested capacity does not fit in `usize`.
    #[error("requested ring buffer capacity overflows usize")]
    CapacityOverflow,

    /// Anonymous mapping for mmap-backed storage failed.
    #[error("failed to map ring buffer storage: {0}")]
    Mmap(#[from] io::Error),
}

/// Errors raised by [`WorkerPool`](crate::pool::WorkerPool).
#[derive(Error, Debug)]
pub enum PoolError {
    /// Construction argument out of range.
    #[error("invalid pool parameters: {0}")]
    InvalidParameters(&'static str),

    /// The task queue is at its ceiling. Retry, drop or block in the caller.
    #[error("task queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },

    /// The pool has begun shutting down and no longer accepts tasks.
    #[error("worker pool is shutting down")]
    ShuttingDown,

    /// `shutdown` was already called on this pool.
    #[error("worker pool is already shutting down")]
    AlreadyShuttingDown,

    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(#[source] io::Error),

    /// One or more worker threads terminated abnormally (a task panicked).
    #[error("{failed} worker thread(s) terminated abnormally")]
    ThreadFailure { failed: usize },
}

impl PoolError {
    /// Whether the caller may retry the same operation later.
    pub fn is_transient(&self) -> bool {
        matches!(self, PoolError::QueueFull { .. })
    }
}

pub type BufferResult<T> = Result<T, BufferError>;
pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_queue_full_is_transient() {
        assert!(PoolError::QueueFull { capacity: 8 }.is_transient());
        assert!(!PoolError::ShuttingDown.is_transient());
        assert!(!PoolError::AlreadyShuttingDown.is_transient());
        assert!(!PoolError::InvalidParameters("x").is_transient());
    }

    #[test]
    fn test_error_messages() {
        let err = BufferError::Allocation { requested: 64 };
        assert_eq!(
            err.to_string(),
            "failed to allocate 64 bytes of ring buffer storage"
        );

        let err = PoolError::QueueFull { capacity: 1024 };
        assert_eq!(err.to_string(), "task queue is full (1024 pending)");
    }
}
