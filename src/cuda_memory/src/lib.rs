//! Host, device, and unified memory buffers for GPU mapping pipelines.
//!
//! This crate provides the memory plumbing shared by the tensor binding
//! layer:
//! - `MemoryType` tags and owned `MemoryBuffer` storage
//! - The `TransferStream` trait for explicit, injectable copy streams
//! - A host-only stream and a CUDA-backed stream built on `cudarc`
//!
//! # Example
//!
//! ```ignore
//! use cuda_memory::{HostStream, MemoryType, TransferStream};
//!
//! let stream = HostStream;
//! let mut buf = stream.alloc_zeroed(1024, MemoryType::Unified)?;
//! stream.write(&mut buf, 0, &[1u8; 16])?;
//! stream.synchronize()?;
//! ```

pub mod memory;
pub mod stream;

pub use memory::{is_cuda_available, MemoryBuffer, MemoryError, MemoryType};
pub use stream::{CudaTransferStream, HostStream, TransferStream};

/// Print only when the `test-verbose` feature is enabled.
#[macro_export]
macro_rules! test_println {
    ($($arg:tt)*) => {
        if cfg!(feature = "test-verbose") {
            println!($($arg)*);
        }
    };
}
