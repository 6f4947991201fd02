//! Pose and camera intrinsics conversion.
//!
//! Tensors arrive row-major; the engine's math side (nalgebra, like the
//! Eigen types it mirrors) stores matrices column-major. The conversion
//! reads element-wise so the layout difference can never leak through.

use nalgebra::Matrix4;

use crate::check::{check_dtype, check_rank, check_shape};
use crate::tensor::{DType, Tensor};

/// A rigid-body transform as a homogeneous 4x4 matrix.
pub type Transform = Matrix4<f32>;

/// Pinhole camera intrinsics plus image extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub fu: f32,
    pub fv: f32,
    pub cu: f32,
    pub cv: f32,
    pub width: usize,
    pub height: usize,
}

/// Convert a row-major `[4, 4]` f32 tensor into a transform.
pub fn transform_from_tensor(tensor: &Tensor) -> Transform {
    check_shape(tensor, &[4, 4], "transform");
    check_dtype(tensor, DType::F32, "transform");
    Matrix4::from_fn(|r, c| tensor.at::<f32>(&[r, c]))
}

/// Extract camera intrinsics from a rank 2 matrix tensor.
///
/// Reads the standard positions: focal lengths on the diagonal, principal
/// point in the last column.
pub fn camera_from_intrinsics_tensor(
    intrinsics: &Tensor,
    height: usize,
    width: usize,
) -> Camera {
    check_rank(intrinsics, 2, "intrinsics");
    check_dtype(intrinsics, DType::F32, "intrinsics");
    Camera {
        fu: intrinsics.at::<f32>(&[0, 0]),
        fv: intrinsics.at::<f32>(&[1, 1]),
        cu: intrinsics.at::<f32>(&[0, 2]),
        cv: intrinsics.at::<f32>(&[1, 2]),
        width,
        height,
    }
}
