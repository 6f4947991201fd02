//! Borrowed typed pixel views over tensor storage.
//!
//! A view reinterprets a contiguous rank 2 or rank 3 device tensor as a
//! rows x cols grid of packed pixels, folding the channel dimension into
//! the pixel type. Views never copy and never own; they are the write
//! target the engine renders into and the read source it integrates from.

use std::marker::PhantomData;
use std::mem::size_of;

use bytemuck::Pod;

use crate::check::{check_contiguous, check_on_device, check_rank_in};
use crate::tensor::Tensor;

/// A borrowed rows x cols grid of `T` pixels.
///
/// The lifetime ties the view to the tensor it was taken from. Writes
/// through a view alias the tensor's storage; synchronization between the
/// view and other users of that storage is the caller's contract.
pub struct PixelView<'a, T> {
    rows: usize,
    cols: usize,
    ptr: *mut T,
    host_accessible: bool,
    _source: PhantomData<&'a mut [T]>,
}

impl<T: Pod> PixelView<'_, T> {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn as_ptr(&self) -> *const T {
        self.ptr
    }

    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.ptr
    }

    fn host_offset(&self, row: usize, col: usize) -> *mut T {
        assert!(
            self.host_accessible,
            "pixel view storage is not host-accessible"
        );
        assert!(row < self.rows && col < self.cols, "pixel index out of bounds");
        unsafe { self.ptr.add(row * self.cols + col) }
    }

    /// Read one pixel. Requires host-accessible storage.
    pub fn at(&self, row: usize, col: usize) -> T {
        unsafe { self.host_offset(row, col).read() }
    }

    /// Write one pixel. Requires host-accessible storage.
    pub fn set(&mut self, row: usize, col: usize, value: T) {
        unsafe { self.host_offset(row, col).write(value) }
    }
}

/// A pixel view plus an optional mask of the same extent.
///
/// Mask semantics (which value means "keep") belong to the consumer.
pub struct MaskedPixelView<'a, T> {
    pub frame: PixelView<'a, T>,
    pub mask: Option<PixelView<'a, u8>>,
}

/// Reinterpret a tensor as a grid of `T` pixels.
///
/// Panics unless the tensor is rank 2 or 3, contiguous, device-tagged,
/// and its channel count times element size equals `size_of::<T>()`.
pub fn pixel_view_from_tensor<'a, T: Pod>(tensor: &'a Tensor, arg: &str) -> PixelView<'a, T> {
    check_rank_in(tensor, &[2, 3], arg);
    check_contiguous(tensor, arg);
    check_on_device(tensor, arg);

    let channels = if tensor.rank() == 3 {
        tensor.shape()[2]
    } else {
        1
    };
    let pixel_bytes = channels * tensor.element_size();
    if pixel_bytes != size_of::<T>() {
        panic!(
            "{arg}: {channels} channels of {:?} make a {pixel_bytes} byte pixel, \
             expected {} bytes",
            tensor.dtype(),
            size_of::<T>()
        );
    }

    PixelView {
        rows: tensor.shape()[0],
        cols: tensor.shape()[1],
        ptr: tensor.data_ptr() as *mut T,
        host_accessible: tensor.is_host_accessible(),
        _source: PhantomData,
    }
}

/// Build a pixel view plus an optional `u8` mask view of equal extent.
pub fn masked_pixel_view_from_tensor<'a, T: Pod>(
    tensor: &'a Tensor,
    mask: Option<&'a Tensor>,
    arg: &str,
    mask_arg: &str,
) -> MaskedPixelView<'a, T> {
    let frame = pixel_view_from_tensor::<T>(tensor, arg);
    let mask = mask.map(|m| {
        let mask_view = pixel_view_from_tensor::<u8>(m, mask_arg);
        if mask_view.rows() != frame.rows() || mask_view.cols() != frame.cols() {
            panic!(
                "{mask_arg}: mask extent {}x{} does not match {arg} extent {}x{}",
                mask_view.rows(),
                mask_view.cols(),
                frame.rows(),
                frame.cols()
            );
        }
        mask_view
    });
    MaskedPixelView { frame, mask }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DType;
    use crate::voxel::Rgba;
    use cuda_memory::{HostStream, MemoryType};

    #[test]
    fn test_depth_view_over_unified_tensor() {
        let stream = HostStream;
        let mut tensor = Tensor::zeros(&[3, 4], DType::F32, MemoryType::Unified, &stream)
            .expect("Failed to allocate");
        tensor.set(&[1, 2], 2.5f32);

        let view = pixel_view_from_tensor::<f32>(&tensor, "depth_frame");
        assert_eq!(view.rows(), 3);
        assert_eq!(view.cols(), 4);
        assert_eq!(view.at(1, 2), 2.5);
    }

    #[test]
    fn test_color_view_folds_channels() {
        let stream = HostStream;
        let tensor = Tensor::zeros(&[2, 2, 4], DType::U8, MemoryType::Unified, &stream)
            .expect("Failed to allocate");

        let mut view = pixel_view_from_tensor::<Rgba>(&tensor, "color_frame");
        view.set(
            1,
            0,
            Rgba {
                r: 10,
                g: 20,
                b: 30,
                a: 255,
            },
        );
        assert_eq!(tensor.at::<u8>(&[1, 0, 0]), 10);
        assert_eq!(tensor.at::<u8>(&[1, 0, 2]), 30);
        assert_eq!(tensor.at::<u8>(&[1, 0, 3]), 255);
    }

    #[test]
    fn test_view_write_through_shared_borrow_lands_in_storage() {
        let stream = HostStream;
        let tensor = Tensor::zeros(&[2, 2], DType::F32, MemoryType::Unified, &stream)
            .expect("Failed to allocate");

        // The render path binds the target tensor immutably and writes
        // through the view; the write must land in the backing buffer.
        let shared = &tensor;
        let mut view = pixel_view_from_tensor::<f32>(shared, "depth_frame");
        view.set(0, 1, 3.5);

        assert_eq!(shared.at::<f32>(&[0, 1]), 3.5);
        let bytes = tensor.buffer().unwrap().host_bytes().unwrap();
        assert_eq!(&bytes[4..8], &3.5f32.to_ne_bytes());
    }

    #[test]
    #[should_panic(expected = "byte pixel")]
    fn test_view_rejects_wrong_pixel_size() {
        let stream = HostStream;
        let tensor = Tensor::zeros(&[2, 2, 3], DType::U8, MemoryType::Unified, &stream)
            .expect("Failed to allocate");
        let _ = pixel_view_from_tensor::<Rgba>(&tensor, "color_frame");
    }

    #[test]
    #[should_panic(expected = "depth_frame: expected a device tensor")]
    fn test_view_rejects_host_tensor() {
        let tensor = Tensor::from_vec(&[0f32; 4], &[2, 2], DType::F32);
        let _ = pixel_view_from_tensor::<f32>(&tensor, "depth_frame");
    }

    #[test]
    fn test_masked_view_accepts_matching_mask() {
        let stream = HostStream;
        let frame = Tensor::zeros(&[2, 3], DType::F32, MemoryType::Unified, &stream).unwrap();
        let mask = Tensor::zeros(&[2, 3], DType::U8, MemoryType::Unified, &stream).unwrap();
        let masked =
            masked_pixel_view_from_tensor::<f32>(&frame, Some(&mask), "depth_frame", "mask");
        assert!(masked.mask.is_some());
    }

    #[test]
    #[should_panic(expected = "mask extent 2x2 does not match")]
    fn test_masked_view_rejects_extent_mismatch() {
        let stream = HostStream;
        let frame = Tensor::zeros(&[2, 3], DType::F32, MemoryType::Unified, &stream).unwrap();
        let mask = Tensor::zeros(&[2, 2], DType::U8, MemoryType::Unified, &stream).unwrap();
        let _ = masked_pixel_view_from_tensor::<f32>(&frame, Some(&mask), "depth_frame", "mask");
    }
}
