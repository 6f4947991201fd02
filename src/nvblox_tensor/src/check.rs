//! Precondition checks on tensor arguments.
//!
//! Shape, type, and placement violations are programmer errors; these
//! helpers panic with a message naming the offending argument and the
//! violated precondition. The warn-and-skip variant mirrors the facade's
//! behavior of refusing a frame whose inputs are not on the GPU.

use tracing::warn;

use crate::device::DeviceTag;
use crate::tensor::{DType, Tensor};

/// Panic unless `tensor` has exactly `expected` dimensions.
pub fn check_rank(tensor: &Tensor, expected: usize, arg: &str) {
    if tensor.rank() != expected {
        panic!(
            "{arg}: expected a rank {expected} tensor, got rank {}",
            tensor.rank()
        );
    }
}

/// Panic unless the rank of `tensor` is one of `allowed`.
pub fn check_rank_in(tensor: &Tensor, allowed: &[usize], arg: &str) {
    if !allowed.contains(&tensor.rank()) {
        panic!(
            "{arg}: expected a tensor of rank {allowed:?}, got rank {}",
            tensor.rank()
        );
    }
}

/// Panic unless `tensor` has element type `expected`.
pub fn check_dtype(tensor: &Tensor, expected: DType, arg: &str) {
    if tensor.dtype() != expected {
        panic!(
            "{arg}: expected dtype {expected:?}, got {:?}",
            tensor.dtype()
        );
    }
}

/// Panic unless `tensor` has exactly the given shape.
pub fn check_shape(tensor: &Tensor, expected: &[usize], arg: &str) {
    if tensor.shape() != expected {
        panic!(
            "{arg}: expected shape {expected:?}, got {:?}",
            tensor.shape()
        );
    }
}

/// Panic unless axis `axis` of `tensor` has size `expected`.
pub fn check_dim(tensor: &Tensor, axis: usize, expected: usize, arg: &str) {
    if tensor.shape().get(axis) != Some(&expected) {
        panic!(
            "{arg}: expected size {expected} on axis {axis}, got shape {:?}",
            tensor.shape()
        );
    }
}

/// Panic unless `tensor` is dense row-major.
pub fn check_contiguous(tensor: &Tensor, arg: &str) {
    if !tensor.is_contiguous() {
        panic!("{arg}: expected a contiguous tensor, got strides {:?}", tensor.strides());
    }
}

/// Panic unless `tensor` is device-tagged.
pub fn check_on_device(tensor: &Tensor, arg: &str) {
    if tensor.device() != DeviceTag::Device {
        panic!("{arg}: expected a device tensor, got a host tensor");
    }
}

/// True if every named tensor is device-tagged; warns and returns false
/// otherwise so the caller can skip the operation.
pub fn all_on_device(tensors: &[(&Tensor, &str)]) -> bool {
    for (tensor, arg) in tensors {
        if tensor.device() != DeviceTag::Device {
            warn!("{arg} is not on the GPU, skipping");
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "depth_frame: expected a rank 2 tensor")]
    fn test_check_rank_names_argument() {
        let t = Tensor::from_vec(&[0f32; 8], &[2, 2, 2], DType::F32);
        check_rank(&t, 2, "depth_frame");
    }

    #[test]
    #[should_panic(expected = "expected dtype F32")]
    fn test_check_dtype() {
        let t = Tensor::from_vec(&[0i32; 4], &[4], DType::I32);
        check_dtype(&t, DType::F32, "pose");
    }

    #[test]
    fn test_all_on_device_rejects_host_tensor() {
        let t = Tensor::from_vec(&[0f32; 4], &[2, 2], DType::F32);
        assert!(!all_on_device(&[(&t, "depth_frame")]));
        assert!(all_on_device(&[]));
    }
}
