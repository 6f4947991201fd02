//! Multi-map facade over a set of mapping engines.
//!
//! The mapper owns N engines plus one transfer stream and marshals every
//! tensor argument to and from engine calls. Frame inputs that are not on
//! the GPU are logged and skipped rather than rejected; shape, type, and
//! layout violations panic.
//!
//! All poses are layer-from-camera transforms expressed as row-major
//! `[4, 4]` f32 tensors.

use std::path::Path;

use anyhow::Result;
use cuda_memory::{MemoryType, TransferStream};
use half::f16;
use tracing::debug;

use crate::check::{all_on_device, check_dim, check_dtype, check_rank};
use crate::engine::MappingEngine;
use crate::image::{
    alloc_color_image_tensor, alloc_depth_image_tensor, color_image_from_tensor,
    depth_image_from_tensor, feature_image_from_tensor, mono_image_from_tensor,
};
use crate::layer::VoxelBlockLayer;
use crate::mesh::{triangles_tensor, vertex_appearances_tensor, vertices_tensor};
use crate::params::MapperParams;
use crate::tensor::{DType, Tensor};
use crate::transforms::{camera_from_intrinsics_tensor, transform_from_tensor};
use crate::view::pixel_view_from_tensor;
use crate::voxel::{
    ColorVoxel, FeatureVoxel, Rgba, TsdfVoxel, FEATURE_ARRAY_NUM_ELEMENTS,
};

/// Truncation band half-width used for rendering, in voxels.
const RENDER_TRUNCATION_VOX: f32 = 4.0;

/// A set of independent maps sharing one transfer stream.
pub struct Mapper<E: MappingEngine, S: TransferStream> {
    engines: Vec<E>,
    stream: S,
}

impl<E: MappingEngine, S: TransferStream> Mapper<E, S> {
    pub fn new(engines: Vec<E>, stream: S) -> Self {
        Self { engines, stream }
    }

    pub fn num_mappers(&self) -> usize {
        self.engines.len()
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    /// The engine behind a map. Panics if `mapper_id` is out of range.
    pub fn engine(&self, mapper_id: usize) -> &E {
        self.check_mapper_id(mapper_id);
        &self.engines[mapper_id]
    }

    pub fn engine_mut(&mut self, mapper_id: usize) -> &mut E {
        self.check_mapper_id(mapper_id);
        &mut self.engines[mapper_id]
    }

    fn check_mapper_id(&self, mapper_id: usize) {
        assert!(
            mapper_id < self.engines.len(),
            "mapper_id {mapper_id} out of range for {} mappers",
            self.engines.len()
        );
    }

    /// Integrate a depth frame. Skips frames that are not on the GPU.
    pub fn add_depth_frame(
        &mut self,
        mapper_id: usize,
        depth_frame: &Tensor,
        pose: &Tensor,
        intrinsics: &Tensor,
    ) -> Result<()> {
        self.check_mapper_id(mapper_id);
        if !all_on_device(&[(depth_frame, "depth_frame")]) {
            return Ok(());
        }
        let depth = depth_image_from_tensor(depth_frame, &self.stream)?;
        let pose = transform_from_tensor(pose);
        let camera = camera_from_intrinsics_tensor(intrinsics, depth.rows(), depth.cols());
        debug!(mapper_id, rows = depth.rows(), cols = depth.cols(), "integrating depth frame");
        self.engines[mapper_id].integrate_depth(&depth, &pose, &camera)
    }

    /// Integrate a color frame. Skips frames that are not on the GPU.
    pub fn add_color_frame(
        &mut self,
        mapper_id: usize,
        color_frame: &Tensor,
        pose: &Tensor,
        intrinsics: &Tensor,
    ) -> Result<()> {
        self.check_mapper_id(mapper_id);
        if !all_on_device(&[(color_frame, "color_frame")]) {
            return Ok(());
        }
        let color = color_image_from_tensor(color_frame, &self.stream)?;
        let pose = transform_from_tensor(pose);
        let camera = camera_from_intrinsics_tensor(intrinsics, color.rows(), color.cols());
        self.engines[mapper_id].integrate_color(&color, &pose, &camera)
    }

    /// Integrate a feature frame, optionally masked. Skips frames that are
    /// not on the GPU.
    pub fn add_feature_frame(
        &mut self,
        mapper_id: usize,
        feature_frame: &Tensor,
        mask: Option<&Tensor>,
        pose: &Tensor,
        intrinsics: &Tensor,
    ) -> Result<()> {
        self.check_mapper_id(mapper_id);
        let mut placed = vec![(feature_frame, "feature_frame")];
        if let Some(mask) = mask {
            placed.push((mask, "feature_mask"));
        }
        if !all_on_device(&placed) {
            return Ok(());
        }
        let features = feature_image_from_tensor(feature_frame, &self.stream)?;
        let mask = match mask {
            Some(mask) => Some(mono_image_from_tensor(mask, &self.stream)?),
            None => None,
        };
        let pose = transform_from_tensor(pose);
        let camera = camera_from_intrinsics_tensor(intrinsics, features.rows(), features.cols());
        self.engines[mapper_id].integrate_features(&features, mask.as_ref(), &pose, &camera)
    }

    pub fn update_mesh(&mut self, mapper_id: usize) -> Result<()> {
        self.check_mapper_id(mapper_id);
        self.engines[mapper_id].update_mesh()
    }

    pub fn update_esdf(&mut self, mapper_id: usize) -> Result<()> {
        self.check_mapper_id(mapper_id);
        self.engines[mapper_id].update_esdf()
    }

    /// Sample tsdf distances at `[N, 3]` f32 layer-frame points. Returns a
    /// host tensor of shape `[N]`.
    pub fn query_tsdf(&self, mapper_id: usize, points: &Tensor) -> Result<Tensor<'static>> {
        self.check_mapper_id(mapper_id);
        let points = points_from_tensor(points);
        let distances = self.engines[mapper_id].query_tsdf(&points)?;
        Ok(Tensor::from_vec(&distances, &[distances.len()], DType::F32))
    }

    /// Sample esdf distances at `[N, 3]` f32 layer-frame points. Returns a
    /// host tensor of shape `[N]`.
    pub fn query_esdf(&self, mapper_id: usize, points: &Tensor) -> Result<Tensor<'static>> {
        self.check_mapper_id(mapper_id);
        let points = points_from_tensor(points);
        let distances = self.engines[mapper_id].query_esdf(&points)?;
        Ok(Tensor::from_vec(&distances, &[distances.len()], DType::F32))
    }

    /// Sample feature vectors at `[N, 3]` f32 layer-frame points. Returns a
    /// host tensor of shape `[N, channels]`.
    pub fn query_features(&self, mapper_id: usize, points: &Tensor) -> Result<Tensor<'static>> {
        self.check_mapper_id(mapper_id);
        let points = points_from_tensor(points);
        let features = self.engines[mapper_id].query_features(&points)?;
        let mut flat: Vec<f16> = Vec::with_capacity(features.len() * FEATURE_ARRAY_NUM_ELEMENTS);
        for feature in &features {
            flat.extend_from_slice(&feature.0);
        }
        Ok(Tensor::from_vec(
            &flat,
            &[features.len(), FEATURE_ARRAY_NUM_ELEMENTS],
            DType::F16,
        ))
    }

    /// Render a synthetic depth frame into a fresh `[rows, cols]` tensor.
    pub fn render_depth_image(
        &self,
        mapper_id: usize,
        pose: &Tensor,
        intrinsics: &Tensor,
        rows: usize,
        cols: usize,
        max_ray_length_m: f32,
    ) -> Result<Tensor<'static>> {
        self.check_mapper_id(mapper_id);
        let engine = &self.engines[mapper_id];
        let pose = transform_from_tensor(pose);
        let camera = camera_from_intrinsics_tensor(intrinsics, rows, cols);
        let depth = alloc_depth_image_tensor(rows, cols, MemoryType::Unified, &self.stream)?;
        let mut depth_view = pixel_view_from_tensor::<f32>(&depth, "depth_render");
        engine.render_depth(
            &camera,
            &pose,
            &mut depth_view,
            max_ray_length_m,
            engine.voxel_size() * RENDER_TRUNCATION_VOX,
        )?;
        self.stream.synchronize()?;
        Ok(depth)
    }

    /// Render synthetic depth and color frames in one pass.
    pub fn render_rgbd_image(
        &self,
        mapper_id: usize,
        pose: &Tensor,
        intrinsics: &Tensor,
        rows: usize,
        cols: usize,
        max_ray_length_m: f32,
    ) -> Result<(Tensor<'static>, Tensor<'static>)> {
        self.check_mapper_id(mapper_id);
        let engine = &self.engines[mapper_id];
        let pose = transform_from_tensor(pose);
        let camera = camera_from_intrinsics_tensor(intrinsics, rows, cols);
        let depth = alloc_depth_image_tensor(rows, cols, MemoryType::Unified, &self.stream)?;
        let color = alloc_color_image_tensor(rows, cols, MemoryType::Unified, &self.stream)?;
        let mut depth_view = pixel_view_from_tensor::<f32>(&depth, "depth_render");
        let mut color_view = pixel_view_from_tensor::<Rgba>(&color, "color_render");
        engine.render_rgbd(
            &camera,
            &pose,
            &mut depth_view,
            &mut color_view,
            max_ray_length_m,
            engine.voxel_size() * RENDER_TRUNCATION_VOX,
        )?;
        self.stream.synchronize()?;
        Ok((depth, color))
    }

    /// Export the mesh of one map as (vertices, triangles, appearances).
    ///
    /// Vertices and appearances are zero-copy views over mesh memory;
    /// triangles are freshly allocated with block-local indices rewritten
    /// to global ones.
    pub fn mesh_tensors(
        &self,
        mapper_id: usize,
    ) -> Result<(Tensor<'_>, Tensor<'static>, Tensor<'_>)> {
        self.check_mapper_id(mapper_id);
        let mesh = self.engines[mapper_id].mesh();
        let vertices = vertices_tensor(mesh);
        let triangles = triangles_tensor(mesh, &self.stream)?;
        let appearances = vertex_appearances_tensor(mesh);
        Ok((vertices, triangles, appearances))
    }

    pub fn tsdf_layer(&self, mapper_id: usize) -> &VoxelBlockLayer<TsdfVoxel> {
        self.check_mapper_id(mapper_id);
        self.engines[mapper_id].tsdf_layer()
    }

    pub fn color_layer(&self, mapper_id: usize) -> Option<&VoxelBlockLayer<ColorVoxel>> {
        self.check_mapper_id(mapper_id);
        self.engines[mapper_id].color_layer()
    }

    pub fn feature_layer(&self, mapper_id: usize) -> Option<&VoxelBlockLayer<FeatureVoxel>> {
        self.check_mapper_id(mapper_id);
        self.engines[mapper_id].feature_layer()
    }

    pub fn params(&self, mapper_id: usize) -> MapperParams {
        self.check_mapper_id(mapper_id);
        *self.engines[mapper_id].params()
    }

    pub fn set_params(&mut self, mapper_id: usize, params: MapperParams) {
        self.check_mapper_id(mapper_id);
        self.engines[mapper_id].set_params(params);
    }

    pub fn voxel_size(&self, mapper_id: usize) -> f32 {
        self.check_mapper_id(mapper_id);
        self.engines[mapper_id].voxel_size()
    }

    pub fn save(&self, mapper_id: usize, path: &Path) -> Result<()> {
        self.check_mapper_id(mapper_id);
        self.engines[mapper_id].save(path)
    }

    pub fn load(&mut self, mapper_id: usize, path: &Path) -> Result<()> {
        self.check_mapper_id(mapper_id);
        self.engines[mapper_id].load(path)
    }
}

/// Read `[N, 3]` f32 layer-frame points out of a host-accessible tensor.
fn points_from_tensor(points: &Tensor) -> Vec<[f32; 3]> {
    check_rank(points, 2, "points");
    check_dim(points, 1, 3, "points");
    check_dtype(points, DType::F32, "points");
    (0..points.shape()[0])
        .map(|i| {
            [
                points.at::<f32>(&[i, 0]),
                points.at::<f32>(&[i, 1]),
                points.at::<f32>(&[i, 2]),
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{ColorImage, DepthImage, FeatureImage, MonoImage};
    use crate::mesh::{Mesh, MeshBlock};
    use crate::transforms::{Camera, Transform};
    use crate::view::PixelView;
    use crate::voxel::{FeatureArray, Rgb};
    use cuda_memory::HostStream;

    /// Records engine calls; answers queries with constants.
    struct MockEngine {
        tsdf: VoxelBlockLayer<TsdfVoxel>,
        mesh: Mesh<Rgb>,
        params: MapperParams,
        depth_frames: Vec<(usize, usize)>,
        color_frames: Vec<(usize, usize)>,
        feature_frames: Vec<bool>,
        last_camera: Option<Camera>,
        last_translation: Option<[f32; 3]>,
        mesh_updates: usize,
        esdf_updates: usize,
    }

    impl MockEngine {
        fn new() -> Self {
            let stream = HostStream;
            let block = MeshBlock {
                vertices: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
                triangle_indices: vec![0, 1, 2],
                appearances: vec![Rgb::new(1, 2, 3); 3],
            };
            Self {
                tsdf: VoxelBlockLayer::new(0.05, MemoryType::Unified),
                mesh: Mesh::from_blocks(&[block], MemoryType::Unified, &stream)
                    .expect("Failed to build mesh"),
                params: MapperParams::default(),
                depth_frames: Vec::new(),
                color_frames: Vec::new(),
                feature_frames: Vec::new(),
                last_camera: None,
                last_translation: None,
                mesh_updates: 0,
                esdf_updates: 0,
            }
        }
    }

    impl MappingEngine for MockEngine {
        type MeshAppearance = Rgb;

        fn integrate_depth(
            &mut self,
            depth: &DepthImage,
            pose: &Transform,
            camera: &Camera,
        ) -> Result<()> {
            self.depth_frames.push((depth.rows(), depth.cols()));
            self.last_translation = Some([pose[(0, 3)], pose[(1, 3)], pose[(2, 3)]]);
            self.last_camera = Some(*camera);
            Ok(())
        }

        fn integrate_color(
            &mut self,
            color: &ColorImage,
            _pose: &Transform,
            _camera: &Camera,
        ) -> Result<()> {
            self.color_frames.push((color.rows(), color.cols()));
            Ok(())
        }

        fn integrate_features(
            &mut self,
            _features: &FeatureImage,
            mask: Option<&MonoImage>,
            _pose: &Transform,
            _camera: &Camera,
        ) -> Result<()> {
            self.feature_frames.push(mask.is_some());
            Ok(())
        }

        fn update_mesh(&mut self) -> Result<()> {
            self.mesh_updates += 1;
            Ok(())
        }

        fn update_esdf(&mut self) -> Result<()> {
            self.esdf_updates += 1;
            Ok(())
        }

        fn query_tsdf(&self, points: &[[f32; 3]]) -> Result<Vec<f32>> {
            Ok(vec![0.25; points.len()])
        }

        fn query_esdf(&self, points: &[[f32; 3]]) -> Result<Vec<f32>> {
            Ok(points.iter().map(|p| p[0]).collect())
        }

        fn query_features(&self, points: &[[f32; 3]]) -> Result<Vec<FeatureArray>> {
            Ok(vec![FeatureArray::default(); points.len()])
        }

        fn render_depth(
            &self,
            camera: &Camera,
            _pose: &Transform,
            depth_out: &mut PixelView<'_, f32>,
            max_ray_length_m: f32,
            _truncation_distance_m: f32,
        ) -> Result<()> {
            assert_eq!(depth_out.rows(), camera.height);
            assert_eq!(depth_out.cols(), camera.width);
            for row in 0..depth_out.rows() {
                for col in 0..depth_out.cols() {
                    depth_out.set(row, col, max_ray_length_m.min(1.5));
                }
            }
            Ok(())
        }

        fn render_rgbd(
            &self,
            camera: &Camera,
            pose: &Transform,
            depth_out: &mut PixelView<'_, f32>,
            color_out: &mut PixelView<'_, Rgba>,
            max_ray_length_m: f32,
            truncation_distance_m: f32,
        ) -> Result<()> {
            self.render_depth(camera, pose, depth_out, max_ray_length_m, truncation_distance_m)?;
            for row in 0..color_out.rows() {
                for col in 0..color_out.cols() {
                    color_out.set(
                        row,
                        col,
                        Rgba {
                            r: 7,
                            g: 8,
                            b: 9,
                            a: 255,
                        },
                    );
                }
            }
            Ok(())
        }

        fn tsdf_layer(&self) -> &VoxelBlockLayer<TsdfVoxel> {
            &self.tsdf
        }

        fn color_layer(&self) -> Option<&VoxelBlockLayer<ColorVoxel>> {
            None
        }

        fn feature_layer(&self) -> Option<&VoxelBlockLayer<FeatureVoxel>> {
            None
        }

        fn mesh(&self) -> &Mesh<Rgb> {
            &self.mesh
        }

        fn params(&self) -> &MapperParams {
            &self.params
        }

        fn set_params(&mut self, params: MapperParams) {
            self.params = params;
        }

        fn voxel_size(&self) -> f32 {
            self.tsdf.voxel_size()
        }

        fn save(&self, _path: &Path) -> Result<()> {
            Ok(())
        }

        fn load(&mut self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    fn test_mapper(n: usize) -> Mapper<MockEngine, HostStream> {
        Mapper::new((0..n).map(|_| MockEngine::new()).collect(), HostStream)
    }

    fn identity_pose() -> Tensor<'static> {
        let mut data = [0f32; 16];
        data[0] = 1.0;
        data[5] = 1.0;
        data[10] = 1.0;
        data[15] = 1.0;
        data[3] = 0.5;
        Tensor::from_vec(&data, &[4, 4], DType::F32)
    }

    fn intrinsics() -> Tensor<'static> {
        let k = [100.0f32, 0.0, 32.0, 0.0, 100.0, 24.0, 0.0, 0.0, 1.0];
        Tensor::from_vec(&k, &[3, 3], DType::F32)
    }

    #[test]
    fn test_add_depth_frame_marshals_arguments() {
        let stream = HostStream;
        let mut mapper = test_mapper(2);
        let depth = Tensor::zeros(&[4, 6], DType::F32, MemoryType::Unified, &stream).unwrap();

        mapper
            .add_depth_frame(1, &depth, &identity_pose(), &intrinsics())
            .expect("Failed to add frame");

        assert!(mapper.engine(0).depth_frames.is_empty());
        assert_eq!(mapper.engine(1).depth_frames, vec![(4, 6)]);
        assert_eq!(mapper.engine(1).last_translation, Some([0.5, 0.0, 0.0]));
        let camera = mapper.engine(1).last_camera.unwrap();
        assert_eq!(camera.fu, 100.0);
        assert_eq!(camera.height, 4);
        assert_eq!(camera.width, 6);
    }

    #[test]
    fn test_host_frame_is_skipped() {
        let mut mapper = test_mapper(1);
        let depth = Tensor::from_vec(&[0f32; 24], &[4, 6], DType::F32);

        mapper
            .add_depth_frame(0, &depth, &identity_pose(), &intrinsics())
            .expect("Skip should not be an error");
        assert!(mapper.engine(0).depth_frames.is_empty());
    }

    #[test]
    fn test_add_feature_frame_with_mask() {
        let stream = HostStream;
        let mut mapper = test_mapper(1);
        let features = Tensor::zeros(
            &[2, 3, FEATURE_ARRAY_NUM_ELEMENTS],
            DType::F16,
            MemoryType::Unified,
            &stream,
        )
        .unwrap();
        let mask = Tensor::zeros(&[2, 3], DType::U8, MemoryType::Unified, &stream).unwrap();

        mapper
            .add_feature_frame(0, &features, Some(&mask), &identity_pose(), &intrinsics())
            .unwrap();
        mapper
            .add_feature_frame(0, &features, None, &identity_pose(), &intrinsics())
            .unwrap();
        assert_eq!(mapper.engine(0).feature_frames, vec![true, false]);
    }

    #[test]
    fn test_feature_frame_skipped_when_mask_on_host() {
        let stream = HostStream;
        let mut mapper = test_mapper(1);
        let features = Tensor::zeros(
            &[2, 3, FEATURE_ARRAY_NUM_ELEMENTS],
            DType::F16,
            MemoryType::Unified,
            &stream,
        )
        .unwrap();
        let host_mask = Tensor::from_vec(&[0u8; 6], &[2, 3], DType::U8);

        mapper
            .add_feature_frame(0, &features, Some(&host_mask), &identity_pose(), &intrinsics())
            .unwrap();
        assert!(mapper.engine(0).feature_frames.is_empty());
    }

    #[test]
    fn test_update_calls_reach_the_right_engine() {
        let mut mapper = test_mapper(2);
        mapper.update_mesh(0).unwrap();
        mapper.update_esdf(1).unwrap();
        mapper.update_esdf(1).unwrap();
        assert_eq!(mapper.engine(0).mesh_updates, 1);
        assert_eq!(mapper.engine(0).esdf_updates, 0);
        assert_eq!(mapper.engine(1).esdf_updates, 2);
    }

    #[test]
    fn test_query_tsdf_shapes_result() {
        let mapper = test_mapper(1);
        let points = Tensor::from_vec(
            &[0.0f32, 0.0, 0.0, 1.0, 2.0, 3.0],
            &[2, 3],
            DType::F32,
        );
        let distances = mapper.query_tsdf(0, &points).unwrap();
        assert_eq!(distances.shape(), &[2]);
        assert_eq!(distances.as_slice::<f32>(), &[0.25, 0.25]);
    }

    #[test]
    fn test_query_esdf_passes_points_through() {
        let mapper = test_mapper(1);
        let points = Tensor::from_vec(&[4.0f32, 0.0, 0.0], &[1, 3], DType::F32);
        let distances = mapper.query_esdf(0, &points).unwrap();
        assert_eq!(distances.as_slice::<f32>(), &[4.0]);
    }

    #[test]
    fn test_query_features_shape() {
        let mapper = test_mapper(1);
        let points = Tensor::from_vec(&[0.0f32; 9], &[3, 3], DType::F32);
        let features = mapper.query_features(0, &points).unwrap();
        assert_eq!(features.shape(), &[3, FEATURE_ARRAY_NUM_ELEMENTS]);
        assert_eq!(features.dtype(), DType::F16);
    }

    #[test]
    fn test_render_depth_image() {
        let mapper = test_mapper(1);
        let depth = mapper
            .render_depth_image(0, &identity_pose(), &intrinsics(), 3, 5, 10.0)
            .unwrap();
        assert_eq!(depth.shape(), &[3, 5]);
        assert_eq!(depth.device(), crate::device::DeviceTag::Device);
        assert_eq!(depth.at::<f32>(&[2, 4]), 1.5);
    }

    #[test]
    fn test_render_rgbd_image() {
        let mapper = test_mapper(1);
        let (depth, color) = mapper
            .render_rgbd_image(0, &identity_pose(), &intrinsics(), 2, 2, 10.0)
            .unwrap();
        assert_eq!(depth.shape(), &[2, 2]);
        assert_eq!(color.shape(), &[2, 2, 4]);
        assert_eq!(color.at::<u8>(&[1, 1, 0]), 7);
        assert_eq!(color.at::<u8>(&[1, 1, 3]), 255);
    }

    #[test]
    fn test_mesh_tensors() {
        let mapper = test_mapper(1);
        let (vertices, triangles, colors) = mapper.mesh_tensors(0).unwrap();
        assert_eq!(vertices.shape(), &[3, 3]);
        assert_eq!(triangles.shape(), &[1, 3]);
        assert_eq!(triangles.as_slice::<i32>(), &[0, 1, 2]);
        assert_eq!(colors.shape(), &[3, 3]);
        assert_eq!(colors.at::<u8>(&[0, 2]), 3);
    }

    #[test]
    fn test_set_params_is_per_mapper() {
        let mut mapper = test_mapper(2);
        let mut params = MapperParams::default();
        params.projective_integrator.max_weight = 99.0;
        mapper.set_params(1, params);
        assert_eq!(mapper.params(0).projective_integrator.max_weight, 5.0);
        assert_eq!(mapper.params(1).projective_integrator.max_weight, 99.0);
    }

    #[test]
    #[should_panic(expected = "mapper_id 3 out of range for 2 mappers")]
    fn test_mapper_id_out_of_range_panics() {
        let mapper = test_mapper(2);
        let _ = mapper.voxel_size(3);
    }
}
