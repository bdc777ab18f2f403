//! Core module: circular byte FIFO for producer/consumer byte streams
//!
//! Design:
//! - Two-segment transfers: no per-byte wraparound checks
//! - Transform callbacks: the same primitive copies, decodes or converts
//! - SPSC split: one writer thread and one reader thread, no locks

mod ring_buffer;
mod storage;

pub use ring_buffer::{Consumer, Producer, RingBuffer};
pub use storage::Backing;
