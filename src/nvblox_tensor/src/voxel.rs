//! Voxel structs and their per-kind tensor layout descriptors.
//!
//! Block wrapping exposes raw voxel storage as strided tensors, so the
//! layouts here are derived from the real struct layouts and pinned down
//! with compile-time assertions rather than hand-written offsets.

use std::mem::{offset_of, size_of};

use bytemuck::{Pod, Zeroable};
use half::f16;

use crate::tensor::DType;

/// Voxels per block edge. Blocks are cubes of `8^3` voxels.
pub const VOXELS_PER_SIDE: usize = 8;

/// Voxels per block.
pub const VOXELS_PER_BLOCK: usize = VOXELS_PER_SIDE * VOXELS_PER_SIDE * VOXELS_PER_SIDE;

/// Feature channels carried per feature voxel and per mesh vertex feature.
pub const FEATURE_ARRAY_NUM_ELEMENTS: usize = 32;

/// A packed RGB triple. Also the vertex appearance type of color meshes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// A color image pixel. Four channels, alpha included.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// Truncated signed distance voxel.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct TsdfVoxel {
    pub distance: f32,
    pub weight: f32,
}

/// Color voxel. The compiler inserts one byte of padding between the RGB
/// triple and the weight; the pad is explicit here so the struct stays Pod.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct ColorVoxel {
    pub rgb: Rgb,
    _pad: u8,
    pub weight: f32,
}

impl ColorVoxel {
    pub fn new(rgb: Rgb, weight: f32) -> Self {
        Self {
            rgb,
            _pad: 0,
            weight,
        }
    }
}

/// Fixed-width half-precision feature vector.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct FeatureArray(pub [f16; FEATURE_ARRAY_NUM_ELEMENTS]);

/// Feature voxel: the feature vector followed by its integration weight.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct FeatureVoxel {
    pub features: FeatureArray,
    pub weight: f16,
}

const _: () = assert!(size_of::<TsdfVoxel>() == 8);
const _: () = assert!(size_of::<ColorVoxel>() == 8);
const _: () = assert!(offset_of!(ColorVoxel, rgb) == 0);
const _: () = assert!(offset_of!(ColorVoxel, weight) == 4);
const _: () = assert!(size_of::<FeatureVoxel>() == 2 * (FEATURE_ARRAY_NUM_ELEMENTS + 1));
const _: () = assert!(offset_of!(FeatureVoxel, weight) == 2 * FEATURE_ARRAY_NUM_ELEMENTS);

/// The voxel kinds a layer can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoxelKind {
    Tsdf,
    Color,
    Feature,
}

/// How a block of one voxel kind is exposed as a `[8, 8, 8, channels]`
/// tensor over the raw voxel storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTensorLayout {
    /// Channels exposed per voxel.
    pub channels: usize,
    /// Element type of the exposed channels.
    pub dtype: DType,
    /// Bytes between consecutive voxels.
    pub voxel_stride: usize,
    /// Bytes between consecutive channels within a voxel.
    pub channel_stride: usize,
}

impl VoxelKind {
    /// Bytes occupied by one voxel of this kind.
    pub fn voxel_size_bytes(self) -> usize {
        match self {
            VoxelKind::Tsdf => size_of::<TsdfVoxel>(),
            VoxelKind::Color => size_of::<ColorVoxel>(),
            VoxelKind::Feature => size_of::<FeatureVoxel>(),
        }
    }

    /// Bytes occupied by one block of this kind.
    pub fn block_size_bytes(self) -> usize {
        VOXELS_PER_BLOCK * self.voxel_size_bytes()
    }

    /// Tensor layout of a wrapped block.
    ///
    /// TSDF exposes distance and weight, feature voxels expose the feature
    /// channels plus the weight. Color exposes only the three RGB bytes,
    /// striding over the pad byte and the weight.
    pub fn layout(self) -> BlockTensorLayout {
        match self {
            VoxelKind::Tsdf => BlockTensorLayout {
                channels: 2,
                dtype: DType::F32,
                voxel_stride: size_of::<TsdfVoxel>(),
                channel_stride: size_of::<f32>(),
            },
            VoxelKind::Color => BlockTensorLayout {
                channels: 3,
                dtype: DType::U8,
                voxel_stride: size_of::<ColorVoxel>(),
                channel_stride: 1,
            },
            VoxelKind::Feature => BlockTensorLayout {
                channels: FEATURE_ARRAY_NUM_ELEMENTS + 1,
                dtype: DType::F16,
                voxel_stride: size_of::<FeatureVoxel>(),
                channel_stride: size_of::<f16>(),
            },
        }
    }
}

impl BlockTensorLayout {
    /// Byte strides of the wrapped `[8, 8, 8, channels]` tensor.
    pub fn block_byte_strides(&self) -> [usize; 4] {
        let side = VOXELS_PER_SIDE;
        [
            side * side * self.voxel_stride,
            side * self.voxel_stride,
            self.voxel_stride,
            self.channel_stride,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tsdf_layout_is_dense() {
        let layout = VoxelKind::Tsdf.layout();
        // Two f32 channels back to back, no gaps between voxels.
        assert_eq!(layout.channels * layout.channel_stride, layout.voxel_stride);
        assert_eq!(layout.block_byte_strides(), [512, 64, 8, 4]);
    }

    #[test]
    fn test_color_layout_skips_pad_and_weight() {
        let layout = VoxelKind::Color.layout();
        assert_eq!(layout.channels, 3);
        // 3 exposed bytes inside an 8 byte voxel.
        assert!(layout.channels * layout.channel_stride < layout.voxel_stride);
        assert_eq!(layout.block_byte_strides(), [512, 64, 8, 1]);
    }

    #[test]
    fn test_feature_layout_includes_weight_channel() {
        let layout = VoxelKind::Feature.layout();
        assert_eq!(layout.channels, FEATURE_ARRAY_NUM_ELEMENTS + 1);
        assert_eq!(layout.channels * layout.channel_stride, layout.voxel_stride);
    }

    #[test]
    fn test_color_voxel_weight_follows_pad() {
        let voxel = ColorVoxel::new(Rgb::new(1, 2, 3), 0.5);
        let bytes = bytemuck::bytes_of(&voxel);
        assert_eq!(&bytes[0..3], &[1, 2, 3]);
        assert_eq!(&bytes[4..8], &0.5f32.to_ne_bytes());
    }
}
