//! Mapper tuning parameters and their string-keyed enums.
//!
//! Enum variants parse from and print as the names the engine's
//! configuration surface uses, so callers can pass the same strings they
//! would hand to the engine directly.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognized {kind} name: {name}")]
pub struct ParseParamError {
    kind: &'static str,
    name: String,
}

/// How a projective integrator weights new observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeightingFunctionType {
    ConstantWeight,
    ConstantDropoffWeight,
    #[default]
    InverseSquareWeight,
    InverseSquareDropoffWeight,
    InverseSquareTsdfDistancePenalty,
    LinearWithMax,
}

impl WeightingFunctionType {
    pub fn name(self) -> &'static str {
        match self {
            Self::ConstantWeight => "kConstantWeight",
            Self::ConstantDropoffWeight => "kConstantDropoffWeight",
            Self::InverseSquareWeight => "kInverseSquareWeight",
            Self::InverseSquareDropoffWeight => "kInverseSquareDropoffWeight",
            Self::InverseSquareTsdfDistancePenalty => "kInverseSquareTsdfDistancePenalty",
            Self::LinearWithMax => "kLinearWithMax",
        }
    }
}

impl fmt::Display for WeightingFunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WeightingFunctionType {
    type Err = ParseParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kConstantWeight" => Ok(Self::ConstantWeight),
            "kConstantDropoffWeight" => Ok(Self::ConstantDropoffWeight),
            "kInverseSquareWeight" => Ok(Self::InverseSquareWeight),
            "kInverseSquareDropoffWeight" => Ok(Self::InverseSquareDropoffWeight),
            "kInverseSquareTsdfDistancePenalty" => Ok(Self::InverseSquareTsdfDistancePenalty),
            "kLinearWithMax" => Ok(Self::LinearWithMax),
            other => Err(ParseParamError {
                kind: "weighting function",
                name: other.to_string(),
            }),
        }
    }
}

/// How the view calculator bounds the updated workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkspaceBoundsType {
    #[default]
    Unbounded,
    HeightBounds,
    BoundingBox,
}

impl WorkspaceBoundsType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Unbounded => "kUnbounded",
            Self::HeightBounds => "kHeightBounds",
            Self::BoundingBox => "kBoundingBox",
        }
    }
}

impl fmt::Display for WorkspaceBoundsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WorkspaceBoundsType {
    type Err = ParseParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kUnbounded" => Ok(Self::Unbounded),
            "kHeightBounds" => Ok(Self::HeightBounds),
            "kBoundingBox" => Ok(Self::BoundingBox),
            other => Err(ParseParamError {
                kind: "workspace bounds",
                name: other.to_string(),
            }),
        }
    }
}

/// Parameters shared by the projective tsdf, color, and feature
/// integrators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectiveIntegratorParams {
    /// Maximum camera integration distance in meters.
    pub max_integration_distance_m: f32,
    /// Maximum lidar integration distance in meters.
    pub lidar_max_integration_distance_m: f32,
    /// Truncation band half-width in voxels.
    pub truncation_distance_vox: f32,
    pub weighting_mode: WeightingFunctionType,
    pub max_weight: f32,
    /// Weight decay applied where the depth frame is invalid.
    pub invalid_depth_decay_factor: f32,
}

impl Default for ProjectiveIntegratorParams {
    fn default() -> Self {
        Self {
            max_integration_distance_m: 7.0,
            lidar_max_integration_distance_m: 10.0,
            truncation_distance_vox: 4.0,
            weighting_mode: WeightingFunctionType::default(),
            max_weight: 5.0,
            invalid_depth_decay_factor: -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EsdfIntegratorParams {
    pub max_distance_m: f32,
    pub min_weight: f32,
    pub max_site_distance_vox: f32,
}

impl Default for EsdfIntegratorParams {
    fn default() -> Self {
        Self {
            max_distance_m: 2.0,
            min_weight: 1e-4,
            max_site_distance_vox: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshIntegratorParams {
    pub min_weight: f32,
    pub weld_vertices: bool,
}

impl Default for MeshIntegratorParams {
    fn default() -> Self {
        Self {
            min_weight: 1e-4,
            weld_vertices: true,
        }
    }
}

/// Workspace restriction for the view calculator. The height and corner
/// fields only apply under the matching bounds type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewCalculatorParams {
    pub workspace_bounds_type: WorkspaceBoundsType,
    pub min_height_m: f32,
    pub max_height_m: f32,
    pub min_corner_x_m: f32,
    pub min_corner_y_m: f32,
    pub max_corner_x_m: f32,
    pub max_corner_y_m: f32,
}

impl Default for ViewCalculatorParams {
    fn default() -> Self {
        Self {
            workspace_bounds_type: WorkspaceBoundsType::default(),
            min_height_m: 0.0,
            max_height_m: 0.0,
            min_corner_x_m: 0.0,
            min_corner_y_m: 0.0,
            max_corner_x_m: 0.0,
            max_corner_y_m: 0.0,
        }
    }
}

/// The full parameter set a mapper carries.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MapperParams {
    pub projective_integrator: ProjectiveIntegratorParams,
    pub esdf_integrator: EsdfIntegratorParams,
    pub mesh_integrator: MeshIntegratorParams,
    pub view_calculator: ViewCalculatorParams,
}
