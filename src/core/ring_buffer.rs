//! Circular byte FIFO with wrap-aware cursors
//!
//! Every logical transfer is split into at most two physical segments (up to
//! the end of storage, then from the start), so there is no per-byte
//! wraparound check. Reads and writes can go through a caller-supplied
//! closure instead of a plain copy, which lets the same wraparound logic
//! drive decompression, decryption or sample conversion.
//!
//! Each cursor is tracked twice:
//! - a physical position in `[0, capacity)`, owned by the side that moves it
//! - a 64-bit monotonically increasing count, published with Release and
//!   observed with Acquire by the other side
//!
//! `write_count - read_count` (wrapping) is the number of unread bytes.
//!
//! A [`RingBuffer`] is single-owner. [`RingBuffer::into_split`] turns it into
//! a [`Producer`] and a [`Consumer`] that may live on two different threads.

use std::fmt;
use std::io;
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::trace;

use super::storage::{Backing, Storage};
use crate::config::BufferConfig;
use crate::error::{BufferError, BufferResult};

/// Keeps the two counters on separate cache lines (64 bytes on x86-64)
#[repr(C, align(64))]
struct CacheLinePadded<T> {
    value: T,
}

impl<T> CacheLinePadded<T> {
    const fn new(value: T) -> Self {
        Self { value }
    }
}

/// Storage plus the two published counters.
///
/// Methods here take the caller's physical cursor explicitly. Write-side
/// methods must only be called by the unique writer and read-side methods by
/// the unique reader; `RingBuffer` (`&mut self`) and the non-`Clone`
/// `Producer`/`Consumer` pair uphold that.
struct Region {
    storage: Storage,
    capacity: usize,
    // Consumer side
    read_count: CacheLinePadded<AtomicU64>,
    // Producer side
    write_count: CacheLinePadded<AtomicU64>,
}

impl Region {
    fn new(storage: Storage) -> Self {
        Self {
            capacity: storage.len(),
            storage,
            read_count: CacheLinePadded::new(AtomicU64::new(0)),
            write_count: CacheLinePadded::new(AtomicU64::new(0)),
        }
    }

    #[inline(always)]
    fn size(&self) -> usize {
        let write = self.write_count.value.load(Ordering::Acquire);
        let read = self.read_count.value.load(Ordering::Acquire);
        // Never more than capacity, so the cast cannot truncate
        write.wrapping_sub(read) as usize
    }

    #[inline(always)]
    fn space(&self) -> usize {
        self.capacity - self.size()
    }

    #[inline(always)]
    fn wrap(&self, pos: usize) -> usize {
        if pos >= self.capacity {
            pos - self.capacity
        } else {
            pos
        }
    }

    fn reset(&self) {
        self.read_count.value.store(0, Ordering::Release);
        self.write_count.value.store(0, Ordering::Release);
    }

    /// Hand free space to `func` segment by segment until `len` bytes were
    /// produced or `func` returns 0. Returns the number of bytes written.
    fn fill<F>(&self, pos: &mut usize, len: usize, mut func: F) -> usize
    where
        F: FnMut(&mut [u8]) -> usize,
    {
        let space = self.space();
        assert!(
            len <= space,
            "ring buffer write of {len} bytes exceeds free space {space}"
        );

        let mut remaining = len;
        while remaining > 0 {
            let chunk = (self.capacity - *pos).min(remaining);

            // SAFETY: [pos, pos + chunk) lies inside storage and inside the
            // free region, which only the writer touches until write_count
            // is published below.
            let dst =
                unsafe { slice::from_raw_parts_mut(self.storage.as_ptr().add(*pos), chunk) };
            let n = func(dst).min(chunk);
            if n == 0 {
                break;
            }

            *pos = self.wrap(*pos + n);
            remaining -= n;
        }

        let written = len - remaining;
        let count = self.write_count.value.load(Ordering::Relaxed);
        // Release: bytes above are visible before the reader sees the count
        self.write_count
            .value
            .store(count.wrapping_add(written as u64), Ordering::Release);

        written
    }

    fn check_readable(&self, offset: usize, len: usize) {
        let size = self.size();
        assert!(
            offset.checked_add(len).map_or(false, |end| end <= size),
            "ring buffer access of {len} bytes at offset {offset} exceeds {size} unread bytes"
        );
    }

    /// Feed `len` unread bytes starting at physical `pos` to `func`, in at
    /// most two segments.
    fn visit<F>(&self, mut pos: usize, len: usize, mut func: F)
    where
        F: FnMut(&[u8]),
    {
        let mut remaining = len;
        while remaining > 0 {
            let chunk = (self.capacity - pos).min(remaining);

            // SAFETY: the caller checked [pos, pos + len) is unread data,
            // which the writer does not touch until read_count moves past it.
            let src = unsafe { slice::from_raw_parts(self.storage.as_ptr().add(pos), chunk) };
            func(src);

            pos = self.wrap(pos + chunk);
            remaining -= chunk;
        }
    }

    fn consume(&self, pos: &mut usize, len: usize) {
        self.check_readable(0, len);
        *pos = self.wrap(*pos + len);

        let count = self.read_count.value.load(Ordering::Relaxed);
        // Release: reads of the drained bytes finish before the writer may reuse them
        self.read_count
            .value
            .store(count.wrapping_add(len as u64), Ordering::Release);
    }

    fn read_with<F>(&self, pos: &mut usize, len: usize, func: F) -> usize
    where
        F: FnMut(&[u8]),
    {
        self.check_readable(0, len);
        self.visit(*pos, len, func);
        self.consume(pos, len);
        len
    }

    fn peek_at_with<F>(&self, pos: usize, offset: usize, len: usize, func: F) -> usize
    where
        F: FnMut(&[u8]),
    {
        self.check_readable(offset, len);
        self.visit(self.wrap(pos + offset), len, func);
        len
    }

    fn position(&self, pos: usize, offset: isize) -> usize {
        let distance = offset.unsigned_abs();
        assert!(
            distance < self.capacity,
            "offset {offset} out of range for capacity {}",
            self.capacity
        );

        if offset >= 0 {
            self.wrap(pos + distance)
        } else if distance > pos {
            self.capacity - (distance - pos)
        } else {
            pos - distance
        }
    }

    fn byte_at(&self, pos: usize, offset: usize) -> u8 {
        self.check_readable(offset, 1);
        let index = self.wrap(pos + offset);
        // SAFETY: index < capacity and the byte is unread
        unsafe { *self.storage.as_ptr().add(index) }
    }

    fn as_slices(&self, pos: usize) -> (&[u8], &[u8]) {
        let len = self.size();
        let first = (self.capacity - pos).min(len);
        // SAFETY: both slices cover unread bytes only, which the writer
        // leaves alone while the reader holds a borrow.
        unsafe {
            let base = self.storage.as_ptr();
            (
                slice::from_raw_parts(base.add(pos), first),
                slice::from_raw_parts(base, len - first),
            )
        }
    }
}

/// Copy from `src`, advancing through it on every call.
fn copy_from(mut src: &[u8]) -> impl FnMut(&mut [u8]) -> usize + '_ {
    move |dst| {
        let n = dst.len().min(src.len());
        dst[..n].copy_from_slice(&src[..n]);
        src = &src[n..];
        n
    }
}

/// Copy into `dst`, advancing through it on every call.
fn copy_into(dst: &mut [u8]) -> impl FnMut(&[u8]) + '_ {
    let mut dst = dst;
    move |src| {
        let (head, tail) = std::mem::take(&mut dst).split_at_mut(src.len());
        head.copy_from_slice(src);
        dst = tail;
    }
}

/// Circular byte buffer with independent read and write cursors.
///
/// Not `Clone`: the storage has exactly one owner.
pub struct RingBuffer {
    region: Region,
    read_pos: usize,
    write_pos: usize,
}

impl RingBuffer {
    /// Create a heap-backed buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> BufferResult<Self> {
        Self::with_backing(capacity, Backing::Heap)
    }

    /// Create a buffer holding `count` elements of `element_size` bytes each.
    pub fn with_elements(count: usize, element_size: usize) -> BufferResult<Self> {
        let capacity = count
            .checked_mul(element_size)
            .ok_or(BufferError::CapacityOverflow)?;
        Self::new(capacity)
    }

    /// Create a buffer backed by an anonymous memory mapping.
    pub fn mapped(capacity: usize) -> BufferResult<Self> {
        Self::with_backing(capacity, Backing::Mapped)
    }

    pub fn with_config(config: &BufferConfig) -> BufferResult<Self> {
        Self::with_backing(config.capacity, config.backing)
    }

    fn with_backing(capacity: usize, backing: Backing) -> BufferResult<Self> {
        let storage = Storage::allocate(capacity, backing)?;
        Ok(Self {
            region: Region::new(storage),
            read_pos: 0,
            write_pos: 0,
        })
    }

    /// Empty the buffer without releasing storage.
    pub fn reset(&mut self) {
        self.region.reset();
        self.read_pos = 0;
        self.write_pos = 0;
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.region.capacity
    }

    /// Number of unread bytes.
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.region.size()
    }

    /// Number of bytes that can be written without overwriting unread data.
    #[inline(always)]
    pub fn space(&self) -> usize {
        self.region.space()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.space() == 0
    }

    pub fn backing(&self) -> Backing {
        self.region.storage.backing()
    }

    /// Copy all of `src` into the buffer.
    ///
    /// # Panics
    /// Panics if `src.len() > self.space()`.
    pub fn write(&mut self, src: &[u8]) -> usize {
        self.region.fill(&mut self.write_pos, src.len(), copy_from(src))
    }

    /// Let `func` produce up to `len` bytes directly into free space.
    ///
    /// `func` receives each contiguous free segment and returns how many
    /// bytes it produced; returning 0 stops the transfer early. Returns the
    /// total number of bytes written.
    ///
    /// # Panics
    /// Panics if `len > self.space()`.
    pub fn write_with<F>(&mut self, len: usize, func: F) -> usize
    where
        F: FnMut(&mut [u8]) -> usize,
    {
        self.region.fill(&mut self.write_pos, len, func)
    }

    /// Move `dst.len()` bytes out of the buffer.
    ///
    /// # Panics
    /// Panics if `dst.len() > self.size()`.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let len = dst.len();
        self.region.read_with(&mut self.read_pos, len, copy_into(dst))
    }

    /// Consume `len` bytes, handing each contiguous segment to `func`.
    pub fn read_with<F>(&mut self, len: usize, func: F) -> usize
    where
        F: FnMut(&[u8]),
    {
        self.region.read_with(&mut self.read_pos, len, func)
    }

    /// Like [`read`](Self::read) but leaves the bytes in the buffer.
    pub fn peek(&self, dst: &mut [u8]) -> usize {
        self.peek_at(dst, 0)
    }

    pub fn peek_with<F>(&self, len: usize, func: F) -> usize
    where
        F: FnMut(&[u8]),
    {
        self.peek_at_with(0, len, func)
    }

    /// Copy `dst.len()` bytes starting `offset` bytes past the read cursor.
    ///
    /// # Panics
    /// Panics if `offset + dst.len() > self.size()`.
    pub fn peek_at(&self, dst: &mut [u8], offset: usize) -> usize {
        let len = dst.len();
        self.region
            .peek_at_with(self.read_pos, offset, len, copy_into(dst))
    }

    pub fn peek_at_with<F>(&self, offset: usize, len: usize, func: F) -> usize
    where
        F: FnMut(&[u8]),
    {
        self.region.peek_at_with(self.read_pos, offset, len, func)
    }

    /// Discard `len` unread bytes without copying them.
    ///
    /// # Panics
    /// Panics if `len > self.size()`.
    pub fn drain(&mut self, len: usize) {
        self.region.consume(&mut self.read_pos, len);
    }

    /// Physical storage index of the byte `offset` bytes from the read cursor.
    ///
    /// Negative offsets look back into already consumed bytes. Valid until
    /// the next mutating call.
    ///
    /// # Panics
    /// Panics if `|offset| >= self.capacity()`.
    pub fn peek_position(&self, offset: isize) -> usize {
        self.region.position(self.read_pos, offset)
    }

    /// The unread byte `offset` bytes past the read cursor.
    pub fn byte_at(&self, offset: usize) -> u8 {
        self.region.byte_at(self.read_pos, offset)
    }

    /// Unread bytes as two slices, in order, the second empty unless the
    /// data wraps.
    pub fn as_slices(&self) -> (&[u8], &[u8]) {
        self.region.as_slices(self.read_pos)
    }

    /// Make sure at least `additional` bytes can be written.
    ///
    /// Grows to `max(size + additional, 2 * capacity)` when needed. On
    /// failure the buffer is unchanged.
    pub fn grow(&mut self, additional: usize) -> BufferResult<()> {
        let needed = self
            .size()
            .checked_add(additional)
            .ok_or(BufferError::CapacityOverflow)?;

        let old = self.capacity();
        if old < needed {
            self.resize(needed.max(old.saturating_mul(2)))
        } else {
            Ok(())
        }
    }

    /// Reallocate to `new_capacity` bytes. Never shrinks.
    ///
    /// Unread bytes are moved to the start of the new storage. On failure the
    /// buffer is unchanged.
    pub fn resize(&mut self, new_capacity: usize) -> BufferResult<()> {
        let old = self.capacity();
        if new_capacity <= old {
            return Ok(());
        }

        let resized = Region::new(Storage::allocate(new_capacity, self.backing())?);
        let len = self.size();
        let mut write_pos = 0;
        self.peek_with(len, |chunk| {
            resized.fill(&mut write_pos, chunk.len(), copy_from(chunk));
        });

        trace!("ring buffer resized {} -> {} bytes ({} unread)", old, new_capacity, len);

        self.region = resized;
        self.read_pos = 0;
        self.write_pos = write_pos;
        Ok(())
    }

    /// Split into a writer half and a reader half for use on two threads.
    pub fn into_split(self) -> (Producer, Consumer) {
        let region = Arc::new(self.region);
        (
            Producer {
                region: Arc::clone(&region),
                write_pos: self.write_pos,
            },
            Consumer {
                region,
                read_pos: self.read_pos,
            },
        )
    }

    /// Reunite two halves of the same buffer. Hands them back if they came
    /// from different buffers.
    pub fn rejoin(producer: Producer, consumer: Consumer) -> Result<Self, (Producer, Consumer)> {
        if !Arc::ptr_eq(&producer.region, &consumer.region) {
            return Err((producer, consumer));
        }

        let Producer { region, write_pos } = producer;
        let Consumer {
            region: other,
            read_pos,
        } = consumer;
        drop(other);

        match Arc::into_inner(region) {
            Some(region) => Ok(Self {
                region,
                read_pos,
                write_pos,
            }),
            None => unreachable!("split halves are the only owners of their region"),
        }
    }
}

impl fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .field("backing", &self.backing())
            .finish()
    }
}

/// Writes as much as fits; returns `Ok(0)` when full.
impl io::Write for RingBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len().min(self.space());
        Ok(RingBuffer::write(self, &buf[..n]))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reads what is available; returns `Ok(0)` when empty.
impl io::Read for RingBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.size());
        Ok(RingBuffer::read(self, &mut buf[..n]))
    }
}

/// Write half of a split [`RingBuffer`].
pub struct Producer {
    region: Arc<Region>,
    write_pos: usize,
}

impl Producer {
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.region.capacity
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.region.size()
    }

    #[inline(always)]
    pub fn space(&self) -> usize {
        self.region.space()
    }

    /// See [`RingBuffer::write`].
    pub fn write(&mut self, src: &[u8]) -> usize {
        self.region.fill(&mut self.write_pos, src.len(), copy_from(src))
    }

    /// See [`RingBuffer::write_with`].
    pub fn write_with<F>(&mut self, len: usize, func: F) -> usize
    where
        F: FnMut(&mut [u8]) -> usize,
    {
        self.region.fill(&mut self.write_pos, len, func)
    }
}

impl io::Write for Producer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len().min(self.space());
        Ok(Producer::write(self, &buf[..n]))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("capacity", &self.capacity())
            .field("space", &self.space())
            .finish()
    }
}

/// Read half of a split [`RingBuffer`].
pub struct Consumer {
    region: Arc<Region>,
    read_pos: usize,
}

impl Consumer {
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.region.capacity
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.region.size()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let len = dst.len();
        self.region.read_with(&mut self.read_pos, len, copy_into(dst))
    }

    pub fn read_with<F>(&mut self, len: usize, func: F) -> usize
    where
        F: FnMut(&[u8]),
    {
        self.region.read_with(&mut self.read_pos, len, func)
    }

    pub fn peek(&self, dst: &mut [u8]) -> usize {
        self.peek_at(dst, 0)
    }

    pub fn peek_with<F>(&self, len: usize, func: F) -> usize
    where
        F: FnMut(&[u8]),
    {
        self.region.peek_at_with(self.read_pos, 0, len, func)
    }

    pub fn peek_at(&self, dst: &mut [u8], offset: usize) -> usize {
        let len = dst.len();
        self.region
            .peek_at_with(self.read_pos, offset, len, copy_into(dst))
    }

    pub fn peek_at_with<F>(&self, offset: usize, len: usize, func: F) -> usize
    where
        F: FnMut(&[u8]),
    {
        self.region.peek_at_with(self.read_pos, offset, len, func)
    }

    pub fn drain(&mut self, len: usize) {
        self.region.consume(&mut self.read_pos, len);
    }

    pub fn peek_position(&self, offset: isize) -> usize {
        self.region.position(self.read_pos, offset)
    }

    pub fn byte_at(&self, offset: usize) -> u8 {
        self.region.byte_at(self.read_pos, offset)
    }

    pub fn as_slices(&self) -> (&[u8], &[u8]) {
        self.region.as_slices(self.read_pos)
    }
}

impl io::Read for Consumer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.size());
        Ok(Consumer::read(self, &mut buf[..n]))
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .finish()
    }
}
