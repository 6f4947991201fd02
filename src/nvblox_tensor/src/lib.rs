//! Tensor binding layer for a GPU voxel mapping engine.
//!
//! This library sits between a host tensor environment and an nvblox-style
//! mapping core. It converts between dense tensors and the engine's native
//! types without owning any mapping math itself:
//! - Image buffer conversion (depth, color, mono, feature images)
//! - Pose and camera intrinsics conversion
//! - Borrowed typed pixel views over tensor storage
//! - Zero-copy wrapping of voxel blocks and mesh buffers as tensors
//! - A multi-map facade that marshals tensor inputs to engine calls
//!
//! # Usage
//!
//! ```ignore
//! use cuda_memory::CudaTransferStream;
//! use nvblox_tensor::Mapper;
//!
//! let stream = CudaTransferStream::new()?;
//! let mut mapper = Mapper::new(engines, stream);
//! mapper.add_depth_frame(0, &depth, &pose, &intrinsics)?;
//! mapper.update_mesh(0)?;
//! let (vertices, triangles, colors) = mapper.mesh_tensors(0)?;
//! ```

pub mod check;
pub mod device;
pub mod engine;
pub mod image;
pub mod layer;
pub mod mapper;
pub mod mesh;
pub mod params;
pub mod tensor;
pub mod transforms;
pub mod view;
pub mod voxel;

pub use device::{device_tag_for, memory_type_for, DeviceTag};
pub use engine::MappingEngine;
pub use image::{
    alloc_color_image_tensor, alloc_depth_image_tensor, alloc_feature_image_tensor,
    alloc_mono_image_tensor, color_image_from_tensor, color_image_to_tensor,
    depth_image_from_tensor, depth_image_to_tensor, feature_image_from_tensor,
    feature_image_to_tensor, mono_image_from_tensor, mono_image_to_tensor, ColorImage,
    DepthImage, FeatureImage, Image, ImagePixel, MonoImage,
};
pub use layer::{
    index_from_tensor, tensor_from_block, tensor_from_index, BlockIndex, LayerVoxel,
    VoxelBlockLayer,
};
pub use mapper::Mapper;
pub use mesh::{
    triangles_tensor, vertex_appearances_tensor, vertices_tensor, Mesh, MeshBlock,
    VertexAppearance,
};
pub use params::{
    EsdfIntegratorParams, MapperParams, MeshIntegratorParams, ParseParamError,
    ProjectiveIntegratorParams, ViewCalculatorParams, WeightingFunctionType, WorkspaceBoundsType,
};
pub use tensor::{DType, Tensor};
pub use transforms::{camera_from_intrinsics_tensor, transform_from_tensor, Camera, Transform};
pub use view::{
    masked_pixel_view_from_tensor, pixel_view_from_tensor, MaskedPixelView, PixelView,
};
pub use voxel::{
    ColorVoxel, FeatureArray, FeatureVoxel, Rgb, Rgba, TsdfVoxel, VoxelKind,
    FEATURE_ARRAY_NUM_ELEMENTS, VOXELS_PER_SIDE,
};

/// Print only when the `test-verbose` feature is enabled.
#[macro_export]
macro_rules! test_println {
    ($($arg:tt)*) => {
        if cfg!(feature = "test-verbose") {
            println!($($arg)*);
        }
    };
}
