//! avpipe - buffering and scheduling primitives for media pipelines
//!
//! Architecture:
//! - [`core::RingBuffer`]: circular byte FIFO between demuxer and decoder
//!   stages, splittable into SPSC halves
//! - [`pool::WorkerPool`]: fixed set of OS threads draining a bounded,
//!   growable FIFO task queue with non-blocking admission
//!
//! The two are independent; a pool task may read from or write into a
//! buffer owned by the caller.

pub mod config;
pub mod core;
pub mod error;
pub mod pool;

pub use crate::config::{BufferConfig, PoolConfig, MAX_QUEUE, MAX_THREADS};
pub use crate::core::{Backing, Consumer, Producer, RingBuffer};
pub use crate::error::{BufferError, PoolError};
pub use crate::pool::{ShutdownMode, Task, WorkerPool};
