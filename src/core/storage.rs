//! Owned byte region backing a ring buffer
//!
//! Two backings are available:
//! - Heap: a zeroed boxed slice, allocated fallibly
//! - Mapped: an anonymous private mapping, useful for multi-megabyte
//!   buffers that should be paged in lazily by the kernel
//!
//! The region is held as a raw pointer for its whole lifetime so the split
//! producer/consumer halves can address disjoint parts of it concurrently.

use std::ptr::NonNull;

use memmap2::{MmapMut, MmapOptions};

use crate::error::{BufferError, BufferResult};

/// Where a ring buffer's bytes live.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Backing {
    #[default]
    Heap,
    Mapped,
}

enum Kind {
    Heap,
    // Never read, only kept alive until drop unmaps it
    Mapped(#[allow(dead_code)] MmapMut),
}

pub(crate) struct Storage {
    ptr: NonNull<u8>,
    len: usize,
    kind: Kind,
}

// SAFETY: Storage exclusively owns its region; the raw pointer is never
// shared outside the owning ring buffer.
unsafe impl Send for Storage {}
unsafe impl Sync for Storage {}

impl Storage {
    /// Allocate `len` zeroed bytes. Leaves nothing behind on failure.
    pub(crate) fn allocate(len: usize, backing: Backing) -> BufferResult<Self> {
        match backing {
            // A zero-length anonymous map is rejected by mmap(2)
            Backing::Mapped if len > 0 => Self::mapped(len),
            _ => Self::heap(len),
        }
    }

    fn heap(len: usize) -> BufferResult<Self> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| BufferError::Allocation { requested: len })?;
        bytes.resize(len, 0u8);

        let raw = Box::into_raw(bytes.into_boxed_slice());
        // SAFETY: Box::into_raw never returns null
        let ptr = unsafe { NonNull::new_unchecked(raw as *mut u8) };

        Ok(Self {
            ptr,
            len,
            kind: Kind::Heap,
        })
    }

    fn mapped(len: usize) -> BufferResult<Self> {
        let mut mmap = MmapOptions::new().len(len).map_anon()?;
        let ptr =
            NonNull::new(mmap.as_mut_ptr()).ok_or(BufferError::Allocation { requested: len })?;

        Ok(Self {
            ptr,
            len,
            kind: Kind::Mapped(mmap),
        })
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn backing(&self) -> Backing {
        match self.kind {
            Kind::Heap => Backing::Heap,
            Kind::Mapped(_) => Backing::Mapped,
        }
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let Kind::Heap = self.kind {
            // SAFETY: ptr/len came from Box::into_raw in `heap`
            unsafe {
                let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
                drop(Box::from_raw(slice));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_storage_is_zeroed() {
        let storage = Storage::allocate(128, Backing::Heap).unwrap();
        assert_eq!(storage.len(), 128);
        assert_eq!(storage.backing(), Backing::Heap);

        let bytes = unsafe { std::slice::from_raw_parts(storage.as_ptr(), storage.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_mapped_storage() {
        let storage = Storage::allocate(4096, Backing::Mapped).unwrap();
        assert_eq!(storage.len(), 4096);
        assert_eq!(storage.backing(), Backing::Mapped);

        unsafe {
            *storage.as_ptr().add(4095) = 0xAB;
            assert_eq!(*storage.as_ptr().add(4095), 0xAB);
        }
    }

    #[test]
    fn test_zero_length_mapping_falls_back_to_heap() {
        let storage = Storage::allocate(0, Backing::Mapped).unwrap();
        assert_eq!(storage.len(), 0);
        assert_eq!(storage.backing(), Backing::Heap);
    }

    #[test]
    fn test_oversized_heap_allocation_fails() {
        let result = Storage::allocate(usize::MAX, Backing::Heap);
        assert!(matches!(
            result,
            Err(BufferError::Allocation { requested: usize::MAX })
        ));
    }
}
