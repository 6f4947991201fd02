//! Owned memory buffers tagged with their storage location.
//!
//! A `MemoryBuffer` is a fixed-size, zero-initialized byte allocation that
//! lives on the host heap, in CUDA device memory, or in unified memory.
//! Unified buffers are host-addressable but are published to consumers as
//! device storage, matching the observable behavior of CUDA managed memory.

use std::cell::UnsafeCell;

use cudarc::driver::{CudaContext, CudaSlice};
use thiserror::Error;

/// Errors from buffer allocation and transfer.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("CUDA driver error: {0}")]
    Driver(#[from] cudarc::driver::DriverError),
    #[error("device memory requested on a host-only stream")]
    DeviceMemoryUnavailable,
}

/// Where a buffer's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryType {
    /// Pageable host memory.
    Host,
    /// CUDA device memory, not host-addressable.
    Device,
    /// Host-addressable memory visible to the device.
    Unified,
}

pub(crate) struct DeviceAllocation {
    pub(crate) slice: CudaSlice<u8>,
    /// Raw device pointer, captured once at allocation time. The slice
    /// owns the allocation so the pointer stays valid for the buffer's
    /// lifetime.
    pub(crate) ptr: u64,
}

/// Heap bytes stored as `u64` words so the base pointer is aligned for
/// any element type the binding layer stores (f32, i32, f16, voxel structs).
/// The words sit in `UnsafeCell` so borrowed tensors and pixel views can
/// write through pointers obtained from a shared buffer reference.
pub(crate) struct HeapStorage {
    words: Vec<UnsafeCell<u64>>,
    len: usize,
}

impl HeapStorage {
    pub(crate) fn zeroed(len: usize) -> Self {
        Self {
            words: std::iter::repeat_with(|| UnsafeCell::new(0))
                .take(len.div_ceil(8))
                .collect(),
            len,
        }
    }

    /// Base pointer, valid for reads and writes for the storage's
    /// lifetime. Concurrent access discipline is the caller's contract.
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.words.as_ptr() as *mut u8
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.as_ptr(), self.len) }
    }
}

pub(crate) enum Storage {
    Heap(HeapStorage),
    Device(DeviceAllocation),
}

/// Owned, fixed-size byte storage.
///
/// Buffers are created through a [`TransferStream`](crate::TransferStream)
/// so that device allocations are always tied to an explicit stream.
pub struct MemoryBuffer {
    pub(crate) storage: Storage,
    memory_type: MemoryType,
    len: usize,
}

impl MemoryBuffer {
    pub(crate) fn zeroed_heap(len: usize, memory_type: MemoryType) -> Self {
        Self {
            storage: Storage::Heap(HeapStorage::zeroed(len)),
            memory_type,
            len,
        }
    }

    /// Wrap host bytes as a Host or Unified buffer.
    pub fn from_host_bytes(bytes: &[u8], memory_type: MemoryType) -> Self {
        assert!(
            memory_type != MemoryType::Device,
            "device buffers are allocated through a stream"
        );
        let mut storage = HeapStorage::zeroed(bytes.len());
        storage.bytes_mut().copy_from_slice(bytes);
        Self {
            storage: Storage::Heap(storage),
            memory_type,
            len: bytes.len(),
        }
    }

    pub(crate) fn from_device(alloc: DeviceAllocation, len: usize) -> Self {
        Self {
            storage: Storage::Device(alloc),
            memory_type: MemoryType::Device,
            len,
        }
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    /// Whether the bytes can be dereferenced from the host.
    pub fn is_host_accessible(&self) -> bool {
        matches!(self.storage, Storage::Heap(_))
    }

    /// Raw pointer to the first byte. For host-accessible buffers the
    /// pointer is valid for writes; for device buffers it is a device
    /// pointer and must not be dereferenced on the host.
    pub fn as_ptr(&self) -> *const u8 {
        match &self.storage {
            Storage::Heap(heap) => heap.as_ptr(),
            Storage::Device(alloc) => alloc.ptr as *const u8,
        }
    }

    /// Host view of the bytes, if host-accessible.
    pub fn host_bytes(&self) -> Option<&[u8]> {
        match &self.storage {
            Storage::Heap(heap) => Some(heap.bytes()),
            Storage::Device(_) => None,
        }
    }

    /// Mutable host view of the bytes, if host-accessible.
    pub fn host_bytes_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.storage {
            Storage::Heap(heap) => Some(heap.bytes_mut()),
            Storage::Device(_) => None,
        }
    }
}

// Device pointers move freely between threads; synchronization is the
// stream's concern.
unsafe impl Send for MemoryBuffer {}

/// Check if CUDA is available on this system.
///
/// The driver library is loaded lazily, so probing for it can panic on
/// machines without CUDA installed.
pub fn is_cuda_available() -> bool {
    std::panic::catch_unwind(|| CudaContext::new(0).is_ok()).unwrap_or(false)
}
