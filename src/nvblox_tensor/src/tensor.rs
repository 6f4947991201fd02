//! A minimal dense tensor over host, device, or unified storage.
//!
//! This is the currency of the binding layer: every conversion either
//! consumes one of these or produces one. Strides are in bytes, which lets
//! a wrapped voxel block expose a sub-range of each voxel (the color case)
//! without copying.
//!
//! Owned tensors carry their own `MemoryBuffer`. Borrowed tensors wrap
//! storage owned elsewhere (a layer block, a mesh buffer) and carry the
//! lifetime of that borrow.

use std::marker::PhantomData;

use bytemuck::Pod;
use cuda_memory::{MemoryBuffer, MemoryError, MemoryType, TransferStream};

use crate::device::{device_tag_for, DeviceTag};

/// Element types the binding layer traffics in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    U8,
    I32,
    F16,
    F32,
}

impl DType {
    /// Element size in bytes.
    pub fn size(self) -> usize {
        match self {
            DType::U8 => 1,
            DType::I32 | DType::F32 => 4,
            DType::F16 => 2,
        }
    }
}

enum Storage {
    Owned(MemoryBuffer),
    Borrowed { ptr: *mut u8, host_accessible: bool },
    /// Zero-element tensors allocate nothing.
    Empty,
}

/// A dense tensor with byte strides.
pub struct Tensor<'a> {
    storage: Storage,
    shape: Vec<usize>,
    strides: Vec<usize>,
    dtype: DType,
    device: DeviceTag,
    _source: PhantomData<&'a [u8]>,
}

// Like the buffers underneath, tensors move between threads; aliasing
// discipline on borrowed views is the caller's contract.
unsafe impl Send for Tensor<'_> {}

/// Canonical row-major byte strides for a shape.
pub fn contiguous_byte_strides(shape: &[usize], dtype: DType) -> Vec<usize> {
    let mut strides = vec![0; shape.len()];
    let mut stride = dtype.size();
    for (i, &dim) in shape.iter().enumerate().rev() {
        strides[i] = stride;
        stride *= dim;
    }
    strides
}

impl Tensor<'_> {
    /// Allocate a zero-filled contiguous tensor.
    pub fn zeros(
        shape: &[usize],
        dtype: DType,
        memory_type: MemoryType,
        stream: &dyn TransferStream,
    ) -> Result<Tensor<'static>, MemoryError> {
        let numel: usize = shape.iter().product();
        let buffer = stream.alloc_zeroed(numel * dtype.size(), memory_type)?;
        Ok(Tensor {
            storage: Storage::Owned(buffer),
            shape: shape.to_vec(),
            strides: contiguous_byte_strides(shape, dtype),
            dtype,
            device: device_tag_for(memory_type),
            _source: PhantomData,
        })
    }

    /// Build a host tensor from existing elements.
    ///
    /// Panics if the data length does not match the shape or `T` does not
    /// match the element size of `dtype`.
    pub fn from_vec<T: Pod>(data: &[T], shape: &[usize], dtype: DType) -> Tensor<'static> {
        assert_eq!(
            std::mem::size_of::<T>(),
            dtype.size(),
            "element type does not match dtype size"
        );
        let numel: usize = shape.iter().product();
        assert_eq!(data.len(), numel, "data length does not match shape");
        let buffer = MemoryBuffer::from_host_bytes(bytemuck::cast_slice(data), MemoryType::Host);
        Tensor {
            storage: Storage::Owned(buffer),
            shape: shape.to_vec(),
            strides: contiguous_byte_strides(shape, dtype),
            dtype,
            device: DeviceTag::Host,
            _source: PhantomData,
        }
    }

    /// An owned, storage-free tensor of shape `[0, cols]`, tagged with the
    /// device its absent elements would live on.
    pub fn empty_2d(cols: usize, dtype: DType, device: DeviceTag) -> Tensor<'static> {
        let shape = vec![0, cols];
        let strides = contiguous_byte_strides(&shape, dtype);
        Tensor {
            storage: Storage::Empty,
            shape,
            strides,
            dtype,
            device,
            _source: PhantomData,
        }
    }

    /// Wrap raw storage owned elsewhere.
    ///
    /// # Safety
    ///
    /// `ptr` must point to storage covering every element reachable through
    /// `shape` and `strides`, and must stay valid and unmoved for the
    /// returned lifetime. `host_accessible` must be false for pointers that
    /// cannot be dereferenced on the host.
    pub unsafe fn from_raw_parts<'b>(
        ptr: *mut u8,
        shape: Vec<usize>,
        strides: Vec<usize>,
        dtype: DType,
        device: DeviceTag,
        host_accessible: bool,
    ) -> Tensor<'b> {
        Tensor {
            storage: Storage::Borrowed {
                ptr,
                host_accessible,
            },
            shape,
            strides,
            dtype,
            device,
            _source: PhantomData,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Byte strides per dimension.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> DeviceTag {
        self.device
    }

    pub fn element_size(&self) -> usize {
        self.dtype.size()
    }

    /// Whether the strides are the canonical dense row-major layout.
    pub fn is_contiguous(&self) -> bool {
        self.strides == contiguous_byte_strides(&self.shape, self.dtype)
    }

    /// Whether elements can be read and written from the host.
    pub fn is_host_accessible(&self) -> bool {
        match &self.storage {
            Storage::Owned(buffer) => buffer.is_host_accessible(),
            Storage::Borrowed {
                host_accessible, ..
            } => *host_accessible,
            Storage::Empty => true,
        }
    }

    /// Memory type of the backing storage. Borrowed storage reports the
    /// type implied by its device tag.
    pub fn memory_type(&self) -> MemoryType {
        match &self.storage {
            Storage::Owned(buffer) => buffer.memory_type(),
            Storage::Borrowed { .. } | Storage::Empty => match self.device {
                DeviceTag::Host => MemoryType::Host,
                DeviceTag::Device => MemoryType::Device,
            },
        }
    }

    /// Raw pointer to the first element.
    pub fn data_ptr(&self) -> *const u8 {
        match &self.storage {
            Storage::Owned(buffer) => buffer.as_ptr(),
            Storage::Borrowed { ptr, .. } => *ptr,
            Storage::Empty => std::ptr::null(),
        }
    }

    /// Backing buffer, for owned tensors.
    pub fn buffer(&self) -> Option<&MemoryBuffer> {
        match &self.storage {
            Storage::Owned(buffer) => Some(buffer),
            _ => None,
        }
    }

    /// Mutable backing buffer, for owned tensors.
    pub fn buffer_mut(&mut self) -> Option<&mut MemoryBuffer> {
        match &mut self.storage {
            Storage::Owned(buffer) => Some(buffer),
            _ => None,
        }
    }

    fn byte_offset(&self, index: &[usize]) -> usize {
        assert_eq!(
            index.len(),
            self.rank(),
            "index rank does not match tensor rank"
        );
        let mut offset = 0;
        for (axis, (&i, &dim)) in index.iter().zip(self.shape.iter()).enumerate() {
            assert!(i < dim, "index {i} out of bounds for axis {axis} (size {dim})");
            offset += i * self.strides[axis];
        }
        offset
    }

    fn host_ptr(&self) -> *mut u8 {
        match &self.storage {
            Storage::Owned(buffer) => {
                if !buffer.is_host_accessible() {
                    panic!("tensor storage is not host-accessible");
                }
                // Heap storage is interiorly mutable, so the raw pointer
                // is valid for writes even through a shared borrow.
                buffer.as_ptr() as *mut u8
            }
            Storage::Borrowed {
                ptr,
                host_accessible,
            } => {
                if !host_accessible {
                    panic!("tensor storage is not host-accessible");
                }
                *ptr
            }
            Storage::Empty => panic!("empty tensor has no storage"),
        }
    }

    /// Read one element. Requires host-accessible storage.
    pub fn at<T: Pod>(&self, index: &[usize]) -> T {
        assert_eq!(
            std::mem::size_of::<T>(),
            self.dtype.size(),
            "element type does not match dtype size"
        );
        let offset = self.byte_offset(index);
        unsafe { (self.host_ptr().add(offset) as *const T).read_unaligned() }
    }

    /// Write one element. Requires host-accessible storage.
    pub fn set<T: Pod>(&mut self, index: &[usize], value: T) {
        assert_eq!(
            std::mem::size_of::<T>(),
            self.dtype.size(),
            "element type does not match dtype size"
        );
        let offset = self.byte_offset(index);
        unsafe { (self.host_ptr().add(offset) as *mut T).write_unaligned(value) }
    }

    /// View all elements of a contiguous host-accessible tensor.
    pub fn as_slice<T: Pod>(&self) -> &[T] {
        assert!(self.is_contiguous(), "as_slice requires a contiguous tensor");
        assert_eq!(
            std::mem::size_of::<T>(),
            self.dtype.size(),
            "element type does not match dtype size"
        );
        if self.numel() == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.host_ptr() as *const T, self.numel()) }
    }
}
