//! The seam between the binding layer and a reconstruction engine.
//!
//! Everything above this trait is tensor marshalling; everything below it
//! is integration, meshing, and rendering. A GPU-backed implementation
//! drives real kernels; tests substitute a recording mock.
//!
//! Poses are layer-from-camera transforms. Render targets are pixel views
//! the caller has already validated and sized.

use std::path::Path;

use anyhow::Result;

use crate::image::{ColorImage, DepthImage, FeatureImage, MonoImage};
use crate::layer::VoxelBlockLayer;
use crate::mesh::{Mesh, VertexAppearance};
use crate::params::MapperParams;
use crate::transforms::{Camera, Transform};
use crate::view::PixelView;
use crate::voxel::{ColorVoxel, FeatureArray, FeatureVoxel, Rgba, TsdfVoxel};

pub trait MappingEngine {
    /// Per-vertex attribute the engine's mesher produces.
    type MeshAppearance: VertexAppearance;

    fn integrate_depth(
        &mut self,
        depth: &DepthImage,
        pose: &Transform,
        camera: &Camera,
    ) -> Result<()>;

    fn integrate_color(
        &mut self,
        color: &ColorImage,
        pose: &Transform,
        camera: &Camera,
    ) -> Result<()>;

    /// Integrate a feature frame, optionally restricted by a mask.
    fn integrate_features(
        &mut self,
        features: &FeatureImage,
        mask: Option<&MonoImage>,
        pose: &Transform,
        camera: &Camera,
    ) -> Result<()>;

    fn update_mesh(&mut self) -> Result<()>;

    fn update_esdf(&mut self) -> Result<()>;

    /// Sample tsdf distances at layer-frame points.
    fn query_tsdf(&self, points: &[[f32; 3]]) -> Result<Vec<f32>>;

    /// Sample esdf distances at layer-frame points.
    fn query_esdf(&self, points: &[[f32; 3]]) -> Result<Vec<f32>>;

    /// Sample feature vectors at layer-frame points.
    fn query_features(&self, points: &[[f32; 3]]) -> Result<Vec<FeatureArray>>;

    /// Ray cast a synthetic depth frame into `depth_out`.
    fn render_depth(
        &self,
        camera: &Camera,
        pose: &Transform,
        depth_out: &mut PixelView<'_, f32>,
        max_ray_length_m: f32,
        truncation_distance_m: f32,
    ) -> Result<()>;

    /// Ray cast synthetic depth and color frames in one pass.
    fn render_rgbd(
        &self,
        camera: &Camera,
        pose: &Transform,
        depth_out: &mut PixelView<'_, f32>,
        color_out: &mut PixelView<'_, Rgba>,
        max_ray_length_m: f32,
        truncation_distance_m: f32,
    ) -> Result<()>;

    fn tsdf_layer(&self) -> &VoxelBlockLayer<TsdfVoxel>;

    /// The color layer, if this engine integrates color.
    fn color_layer(&self) -> Option<&VoxelBlockLayer<ColorVoxel>>;

    /// The feature layer, if this engine integrates features.
    fn feature_layer(&self) -> Option<&VoxelBlockLayer<FeatureVoxel>>;

    /// The mesh from the last `update_mesh` call.
    fn mesh(&self) -> &Mesh<Self::MeshAppearance>;

    fn params(&self) -> &MapperParams;

    fn set_params(&mut self, params: MapperParams);

    fn voxel_size(&self) -> f32;

    fn save(&self, path: &Path) -> Result<()>;

    fn load(&mut self, path: &Path) -> Result<()>;
}
