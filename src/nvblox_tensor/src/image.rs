//! Native image containers and tensor conversion.
//!
//! Each image kind has a fixed dtype and channel count:
//! - depth: rank 2 f32
//! - color: rank 3 u8, four channels
//! - mono: rank 2 u8
//! - feature: rank 3 f16, `FEATURE_ARRAY_NUM_ELEMENTS` channels
//!
//! Import and export always copy the full frame; zero-copy paths go
//! through [`pixel_view_from_tensor`](crate::view::pixel_view_from_tensor)
//! instead.

use std::marker::PhantomData;
use std::mem::size_of;

use anyhow::Result;
use bytemuck::Pod;
use cuda_memory::{MemoryBuffer, MemoryError, MemoryType, TransferStream};

use crate::check::{check_contiguous, check_dim, check_dtype, check_rank};
use crate::device::memory_type_for;
use crate::tensor::{DType, Tensor};
use crate::voxel::{FeatureArray, Rgba, FEATURE_ARRAY_NUM_ELEMENTS};

/// Pixel types an image can hold, with their tensor representation.
pub trait ImagePixel: Pod {
    /// Element type of the tensor representation.
    const DTYPE: DType;
    /// Channels in the tensor representation. One channel means rank 2.
    const CHANNELS: usize;
}

impl ImagePixel for f32 {
    const DTYPE: DType = DType::F32;
    const CHANNELS: usize = 1;
}

impl ImagePixel for u8 {
    const DTYPE: DType = DType::U8;
    const CHANNELS: usize = 1;
}

impl ImagePixel for Rgba {
    const DTYPE: DType = DType::U8;
    const CHANNELS: usize = 4;
}

impl ImagePixel for FeatureArray {
    const DTYPE: DType = DType::F16;
    const CHANNELS: usize = FEATURE_ARRAY_NUM_ELEMENTS;
}

/// A dense rows x cols image of `P` pixels.
pub struct Image<P: ImagePixel> {
    rows: usize,
    cols: usize,
    buffer: MemoryBuffer,
    _pixel: PhantomData<P>,
}

pub type DepthImage = Image<f32>;
pub type MonoImage = Image<u8>;
pub type ColorImage = Image<Rgba>;
pub type FeatureImage = Image<FeatureArray>;

impl<P: ImagePixel> Image<P> {
    /// Allocate a zero-filled image.
    pub fn zeroed(
        rows: usize,
        cols: usize,
        memory_type: MemoryType,
        stream: &dyn TransferStream,
    ) -> Result<Self, MemoryError> {
        let buffer = stream.alloc_zeroed(rows * cols * size_of::<P>(), memory_type)?;
        Ok(Self {
            rows,
            cols,
            buffer,
            _pixel: PhantomData,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn memory_type(&self) -> MemoryType {
        self.buffer.memory_type()
    }

    pub fn buffer(&self) -> &MemoryBuffer {
        &self.buffer
    }

    /// Host view of the pixels, if host-accessible.
    pub fn as_slice(&self) -> Option<&[P]> {
        self.buffer.host_bytes().map(bytemuck::cast_slice)
    }

    /// Mutable host view of the pixels, if host-accessible.
    pub fn as_mut_slice(&mut self) -> Option<&mut [P]> {
        self.buffer.host_bytes_mut().map(bytemuck::cast_slice_mut)
    }

    /// Read one pixel. Requires host-accessible storage.
    pub fn at(&self, row: usize, col: usize) -> P {
        assert!(row < self.rows && col < self.cols, "pixel index out of bounds");
        match self.as_slice() {
            Some(pixels) => pixels[row * self.cols + col],
            None => panic!("image storage is not host-accessible"),
        }
    }

    /// Write one pixel. Requires host-accessible storage.
    pub fn set(&mut self, row: usize, col: usize, value: P) {
        assert!(row < self.rows && col < self.cols, "pixel index out of bounds");
        let cols = self.cols;
        match self.as_mut_slice() {
            Some(pixels) => pixels[row * cols + col] = value,
            None => panic!("image storage is not host-accessible"),
        }
    }
}

/// Memory type an imported tensor's pixels should land in.
///
/// Owned tensors keep their storage's type (unified stays unified);
/// borrowed storage falls back to the device-tag mapping.
fn import_memory_type(tensor: &Tensor) -> MemoryType {
    match tensor.buffer() {
        Some(buffer) => buffer.memory_type(),
        None => memory_type_for(tensor.device()),
    }
}

fn image_from_tensor<P: ImagePixel>(
    tensor: &Tensor,
    stream: &dyn TransferStream,
    arg: &str,
) -> Result<Image<P>> {
    let rows = tensor.shape()[0];
    let cols = tensor.shape()[1];
    let mut image = Image::<P>::zeroed(rows, cols, import_memory_type(tensor), stream)?;
    if let Some(buffer) = tensor.buffer() {
        stream.copy(buffer, &mut image.buffer)?;
    } else if tensor.is_host_accessible() {
        let bytes = unsafe {
            std::slice::from_raw_parts(tensor.data_ptr(), tensor.numel() * tensor.element_size())
        };
        stream.write(&mut image.buffer, 0, bytes)?;
    } else {
        panic!("{arg}: cannot import from a borrowed device view");
    }
    stream.synchronize()?;
    Ok(image)
}

fn image_to_tensor<P: ImagePixel>(
    image: &Image<P>,
    stream: &dyn TransferStream,
) -> Result<Tensor<'static>> {
    let shape: Vec<usize> = if P::CHANNELS == 1 {
        vec![image.rows, image.cols]
    } else {
        vec![image.rows, image.cols, P::CHANNELS]
    };
    let mut tensor = Tensor::zeros(&shape, P::DTYPE, image.memory_type(), stream)?;
    let Some(buffer) = tensor.buffer_mut() else {
        unreachable!("freshly allocated tensor owns its storage");
    };
    stream.copy(&image.buffer, buffer)?;
    stream.synchronize()?;
    Ok(tensor)
}

/// Allocate a zero-filled rank 2 f32 depth tensor.
pub fn alloc_depth_image_tensor(
    rows: usize,
    cols: usize,
    memory_type: MemoryType,
    stream: &dyn TransferStream,
) -> Result<Tensor<'static>> {
    Ok(Tensor::zeros(&[rows, cols], DType::F32, memory_type, stream)?)
}

/// Allocate a zero-filled rank 3 u8 color tensor with four channels.
pub fn alloc_color_image_tensor(
    rows: usize,
    cols: usize,
    memory_type: MemoryType,
    stream: &dyn TransferStream,
) -> Result<Tensor<'static>> {
    Ok(Tensor::zeros(
        &[rows, cols, Rgba::CHANNELS],
        DType::U8,
        memory_type,
        stream,
    )?)
}

/// Allocate a zero-filled rank 2 u8 mono tensor.
pub fn alloc_mono_image_tensor(
    rows: usize,
    cols: usize,
    memory_type: MemoryType,
    stream: &dyn TransferStream,
) -> Result<Tensor<'static>> {
    Ok(Tensor::zeros(&[rows, cols], DType::U8, memory_type, stream)?)
}

/// Allocate a zero-filled rank 3 f16 feature tensor with the fixed
/// feature channel count.
pub fn alloc_feature_image_tensor(
    rows: usize,
    cols: usize,
    memory_type: MemoryType,
    stream: &dyn TransferStream,
) -> Result<Tensor<'static>> {
    Ok(Tensor::zeros(
        &[rows, cols, FEATURE_ARRAY_NUM_ELEMENTS],
        DType::F16,
        memory_type,
        stream,
    )?)
}

/// Copy a rank 2 f32 tensor into a depth image.
pub fn depth_image_from_tensor(
    tensor: &Tensor,
    stream: &dyn TransferStream,
) -> Result<DepthImage> {
    check_rank(tensor, 2, "depth_frame");
    check_dtype(tensor, DType::F32, "depth_frame");
    check_contiguous(tensor, "depth_frame");
    image_from_tensor(tensor, stream, "depth_frame")
}

/// Copy a rank 3 u8 tensor with four channels into a color image.
pub fn color_image_from_tensor(
    tensor: &Tensor,
    stream: &dyn TransferStream,
) -> Result<ColorImage> {
    check_rank(tensor, 3, "color_frame");
    check_dim(tensor, 2, Rgba::CHANNELS, "color_frame");
    check_dtype(tensor, DType::U8, "color_frame");
    check_contiguous(tensor, "color_frame");
    image_from_tensor(tensor, stream, "color_frame")
}

/// Copy a rank 2 u8 tensor into a mono image.
pub fn mono_image_from_tensor(tensor: &Tensor, stream: &dyn TransferStream) -> Result<MonoImage> {
    check_rank(tensor, 2, "mono_frame");
    check_dtype(tensor, DType::U8, "mono_frame");
    check_contiguous(tensor, "mono_frame");
    image_from_tensor(tensor, stream, "mono_frame")
}

/// Copy a rank 3 f16 tensor with the fixed feature channel count into a
/// feature image.
pub fn feature_image_from_tensor(
    tensor: &Tensor,
    stream: &dyn TransferStream,
) -> Result<FeatureImage> {
    check_rank(tensor, 3, "feature_frame");
    check_dim(tensor, 2, FEATURE_ARRAY_NUM_ELEMENTS, "feature_frame");
    check_dtype(tensor, DType::F16, "feature_frame");
    check_contiguous(tensor, "feature_frame");
    image_from_tensor(tensor, stream, "feature_frame")
}

/// Copy a depth image out into a freshly allocated tensor.
pub fn depth_image_to_tensor(
    image: &DepthImage,
    stream: &dyn TransferStream,
) -> Result<Tensor<'static>> {
    image_to_tensor(image, stream)
}

/// Copy a color image out into a freshly allocated tensor.
pub fn color_image_to_tensor(
    image: &ColorImage,
    stream: &dyn TransferStream,
) -> Result<Tensor<'static>> {
    image_to_tensor(image, stream)
}

/// Copy a mono image out into a freshly allocated tensor.
pub fn mono_image_to_tensor(
    image: &MonoImage,
    stream: &dyn TransferStream,
) -> Result<Tensor<'static>> {
    image_to_tensor(image, stream)
}

/// Copy a feature image out into a freshly allocated tensor.
pub fn feature_image_to_tensor(
    image: &FeatureImage,
    stream: &dyn TransferStream,
) -> Result<Tensor<'static>> {
    image_to_tensor(image, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuda_memory::HostStream;

    #[test]
    fn test_depth_import_export_roundtrip() {
        let stream = HostStream;
        let mut tensor = Tensor::zeros(&[2, 3], DType::F32, MemoryType::Unified, &stream).unwrap();
        tensor.set(&[0, 0], 1.5f32);
        tensor.set(&[1, 2], 4.25f32);

        let image = depth_image_from_tensor(&tensor, &stream).expect("Import failed");
        assert_eq!(image.rows(), 2);
        assert_eq!(image.cols(), 3);
        assert_eq!(image.memory_type(), MemoryType::Unified);
        assert_eq!(image.at(1, 2), 4.25);

        let out = depth_image_to_tensor(&image, &stream).expect("Export failed");
        assert_eq!(out.shape(), &[2, 3]);
        assert_eq!(out.at::<f32>(&[0, 0]), 1.5);
        assert_eq!(out.at::<f32>(&[1, 2]), 4.25);
    }

    #[test]
    #[should_panic(expected = "depth_frame: expected a rank 2 tensor, got rank 3")]
    fn test_depth_import_rejects_rank_3() {
        let stream = HostStream;
        let tensor = Tensor::zeros(&[2, 3, 1], DType::F32, MemoryType::Unified, &stream).unwrap();
        let _ = depth_image_from_tensor(&tensor, &stream);
    }

    #[test]
    #[should_panic(expected = "color_frame: expected size 4 on axis 2")]
    fn test_color_import_rejects_three_channels() {
        let stream = HostStream;
        let tensor = Tensor::zeros(&[2, 2, 3], DType::U8, MemoryType::Unified, &stream).unwrap();
        let _ = color_image_from_tensor(&tensor, &stream);
    }

    #[test]
    fn test_color_roundtrip_keeps_alpha() {
        let stream = HostStream;
        let mut tensor = alloc_color_image_tensor(1, 2, MemoryType::Unified, &stream).unwrap();
        tensor.set(&[0, 1, 0], 9u8);
        tensor.set(&[0, 1, 3], 128u8);

        let image = color_image_from_tensor(&tensor, &stream).unwrap();
        let pixel = image.at(0, 1);
        assert_eq!(pixel.r, 9);
        assert_eq!(pixel.a, 128);

        let out = color_image_to_tensor(&image, &stream).unwrap();
        assert_eq!(out.shape(), &[1, 2, 4]);
        assert_eq!(out.at::<u8>(&[0, 1, 3]), 128);
    }

    #[test]
    fn test_mono_import() {
        let stream = HostStream;
        let mut tensor = Tensor::zeros(&[2, 2], DType::U8, MemoryType::Unified, &stream).unwrap();
        tensor.set(&[1, 1], 255u8);
        let image = mono_image_from_tensor(&tensor, &stream).unwrap();
        assert_eq!(image.at(1, 1), 255);
        assert_eq!(image.at(0, 0), 0);
    }

    #[test]
    fn test_feature_import_checks_channel_count() {
        let stream = HostStream;
        let tensor = Tensor::zeros(
            &[2, 2, FEATURE_ARRAY_NUM_ELEMENTS],
            DType::F16,
            MemoryType::Unified,
            &stream,
        )
        .unwrap();
        let image = feature_image_from_tensor(&tensor, &stream).unwrap();
        assert_eq!(image.rows(), 2);

        let out = feature_image_to_tensor(&image, &stream).unwrap();
        assert_eq!(out.shape(), &[2, 2, FEATURE_ARRAY_NUM_ELEMENTS]);
        assert_eq!(out.dtype(), DType::F16);
    }

    #[test]
    fn test_alloc_depth_tensor_shape() {
        let stream = HostStream;
        let tensor = alloc_depth_image_tensor(4, 6, MemoryType::Unified, &stream).unwrap();
        assert_eq!(tensor.shape(), &[4, 6]);
        assert_eq!(tensor.dtype(), DType::F32);
        assert!(tensor.is_contiguous());
    }
}
