//! Explicit transfer streams.
//!
//! Every allocation and copy in the binding layer goes through a
//! `TransferStream` handle passed in by the caller. Nothing reads ambient
//! or thread-local stream state, so tests can inject a mock stream and
//! assert synchronization behavior.
//!
//! Two implementations are provided:
//! - `HostStream`: immediate memcpy, no-op synchronize, host/unified only
//! - `CudaTransferStream`: a `cudarc` stream; copies touching device
//!   storage are asynchronous until `synchronize` is called

use std::sync::Arc;

use cudarc::driver::{CudaContext, CudaStream, DevicePtr};

use crate::memory::{DeviceAllocation, MemoryBuffer, MemoryError, MemoryType, Storage};

/// An explicit allocation and copy stream.
///
/// Offsets and lengths are in bytes. Out-of-bounds accesses are caller
/// bugs and panic.
pub trait TransferStream {
    /// Allocate a zero-initialized buffer of `len` bytes.
    fn alloc_zeroed(&self, len: usize, memory_type: MemoryType) -> Result<MemoryBuffer, MemoryError>;

    /// Copy `src` into `dst` starting at `dst_offset`.
    fn write(&self, dst: &mut MemoryBuffer, dst_offset: usize, src: &[u8])
        -> Result<(), MemoryError>;

    /// Copy `dst.len()` bytes out of `src` starting at `src_offset`.
    fn read(&self, src: &MemoryBuffer, src_offset: usize, dst: &mut [u8])
        -> Result<(), MemoryError>;

    /// Copy one whole buffer into another of equal length.
    fn copy(&self, src: &MemoryBuffer, dst: &mut MemoryBuffer) -> Result<(), MemoryError>;

    /// Block until all copies issued on this stream have completed.
    fn synchronize(&self) -> Result<(), MemoryError>;
}

/// Host-only stream. Copies complete before the call returns.
pub struct HostStream;

fn alloc_heap(len: usize, memory_type: MemoryType) -> MemoryBuffer {
    MemoryBuffer::zeroed_heap(len, memory_type)
}

impl TransferStream for HostStream {
    fn alloc_zeroed(&self, len: usize, memory_type: MemoryType) -> Result<MemoryBuffer, MemoryError> {
        match memory_type {
            MemoryType::Host | MemoryType::Unified => Ok(alloc_heap(len, memory_type)),
            MemoryType::Device => Err(MemoryError::DeviceMemoryUnavailable),
        }
    }

    fn write(
        &self,
        dst: &mut MemoryBuffer,
        dst_offset: usize,
        src: &[u8],
    ) -> Result<(), MemoryError> {
        match dst.host_bytes_mut() {
            Some(bytes) => {
                bytes[dst_offset..dst_offset + src.len()].copy_from_slice(src);
                Ok(())
            }
            None => Err(MemoryError::DeviceMemoryUnavailable),
        }
    }

    fn read(
        &self,
        src: &MemoryBuffer,
        src_offset: usize,
        dst: &mut [u8],
    ) -> Result<(), MemoryError> {
        match src.host_bytes() {
            Some(bytes) => {
                dst.copy_from_slice(&bytes[src_offset..src_offset + dst.len()]);
                Ok(())
            }
            None => Err(MemoryError::DeviceMemoryUnavailable),
        }
    }

    fn copy(&self, src: &MemoryBuffer, dst: &mut MemoryBuffer) -> Result<(), MemoryError> {
        assert_eq!(src.len(), dst.len(), "copy requires equal buffer lengths");
        match src.host_bytes() {
            Some(bytes) => self.write(dst, 0, bytes),
            None => Err(MemoryError::DeviceMemoryUnavailable),
        }
    }

    fn synchronize(&self) -> Result<(), MemoryError> {
        Ok(())
    }
}

/// CUDA-backed transfer stream.
pub struct CudaTransferStream {
    /// Context kept alive for the stream's lifetime.
    #[allow(dead_code)]
    ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
}

impl CudaTransferStream {
    /// Create a stream on the default CUDA device.
    pub fn new() -> Result<Self, MemoryError> {
        Self::with_device_id(0)
    }

    /// Create a stream on a specific CUDA device.
    pub fn with_device_id(device_id: usize) -> Result<Self, MemoryError> {
        let ctx = CudaContext::new(device_id)?;
        let stream = ctx.default_stream();
        Ok(Self { ctx, stream })
    }
}

impl TransferStream for CudaTransferStream {
    fn alloc_zeroed(&self, len: usize, memory_type: MemoryType) -> Result<MemoryBuffer, MemoryError> {
        match memory_type {
            MemoryType::Host | MemoryType::Unified => Ok(alloc_heap(len, memory_type)),
            MemoryType::Device => {
                let slice = self.stream.alloc_zeros::<u8>(len)?;
                let ptr = {
                    let (ptr, _record) = slice.device_ptr(&self.stream);
                    ptr as u64
                };
                Ok(MemoryBuffer::from_device(DeviceAllocation { slice, ptr }, len))
            }
        }
    }

    fn write(
        &self,
        dst: &mut MemoryBuffer,
        dst_offset: usize,
        src: &[u8],
    ) -> Result<(), MemoryError> {
        match &mut dst.storage {
            Storage::Heap(heap) => {
                heap.bytes_mut()[dst_offset..dst_offset + src.len()].copy_from_slice(src);
                Ok(())
            }
            Storage::Device(alloc) => {
                let mut view = alloc.slice.slice_mut(dst_offset..dst_offset + src.len());
                self.stream.memcpy_htod(src, &mut view)?;
                Ok(())
            }
        }
    }

    fn read(
        &self,
        src: &MemoryBuffer,
        src_offset: usize,
        dst: &mut [u8],
    ) -> Result<(), MemoryError> {
        match &src.storage {
            Storage::Heap(heap) => {
                dst.copy_from_slice(&heap.bytes()[src_offset..src_offset + dst.len()]);
                Ok(())
            }
            Storage::Device(alloc) => {
                let view = alloc.slice.slice(src_offset..src_offset + dst.len());
                self.stream.memcpy_dtoh(&view, dst)?;
                Ok(())
            }
        }
    }

    fn copy(&self, src: &MemoryBuffer, dst: &mut MemoryBuffer) -> Result<(), MemoryError> {
        assert_eq!(src.len(), dst.len(), "copy requires equal buffer lengths");
        match (&src.storage, &mut dst.storage) {
            (Storage::Heap(s), Storage::Heap(d)) => {
                d.bytes_mut().copy_from_slice(s.bytes());
                Ok(())
            }
            (Storage::Heap(s), Storage::Device(d)) => {
                let src_bytes = s.bytes();
                let mut view = d.slice.slice_mut(0..src_bytes.len());
                self.stream.memcpy_htod(src_bytes, &mut view)?;
                Ok(())
            }
            (Storage::Device(s), Storage::Heap(d)) => {
                self.stream.memcpy_dtoh(&s.slice, d.bytes_mut())?;
                Ok(())
            }
            (Storage::Device(s), Storage::Device(d)) => {
                self.stream.memcpy_dtod(&s.slice, &mut d.slice)?;
                Ok(())
            }
        }
    }

    fn synchronize(&self) -> Result<(), MemoryError> {
        self.stream.synchronize()?;
        Ok(())
    }
}
