//! Voxel block layers and the block-to-tensor bridge.
//!
//! A layer is a sparse map from 3D block indices to dense `8^3` voxel
//! blocks. Blocks are exposed to the host environment as borrowed strided
//! tensors over the raw voxel storage; no voxel data is ever copied on
//! the wrap path.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::mem::size_of;

use anyhow::Result;
use bytemuck::Pod;
use cuda_memory::{MemoryBuffer, MemoryType, TransferStream};

use crate::check::{check_dim, check_dtype, check_rank};
use crate::device::device_tag_for;
use crate::tensor::{DType, Tensor};
use crate::voxel::{
    ColorVoxel, FeatureVoxel, TsdfVoxel, VoxelKind, VOXELS_PER_BLOCK, VOXELS_PER_SIDE,
};

/// Block coordinates in the layer's index grid.
pub type BlockIndex = [i32; 3];

/// Voxel types a layer can be instantiated with.
pub trait LayerVoxel: Pod + Default {
    const KIND: VoxelKind;
}

impl LayerVoxel for TsdfVoxel {
    const KIND: VoxelKind = VoxelKind::Tsdf;
}

impl LayerVoxel for ColorVoxel {
    const KIND: VoxelKind = VoxelKind::Color;
}

impl LayerVoxel for FeatureVoxel {
    const KIND: VoxelKind = VoxelKind::Feature;
}

/// Linear position of voxel `(x, y, z)` within a block, matching the
/// first three dimensions of the wrapped tensor.
pub fn linear_voxel_index(x: usize, y: usize, z: usize) -> usize {
    (x * VOXELS_PER_SIDE + y) * VOXELS_PER_SIDE + z
}

/// Wrap one voxel block as a borrowed `[8, 8, 8, channels]` tensor.
///
/// The strides come from the voxel kind's layout, so kinds whose voxels
/// carry non-exposed fields (color) produce a non-contiguous view.
pub fn tensor_from_block(block: &MemoryBuffer, kind: VoxelKind) -> Tensor<'_> {
    debug_assert_eq!(block.len(), kind.block_size_bytes());
    let layout = kind.layout();
    let shape = vec![
        VOXELS_PER_SIDE,
        VOXELS_PER_SIDE,
        VOXELS_PER_SIDE,
        layout.channels,
    ];
    unsafe {
        Tensor::from_raw_parts(
            block.as_ptr() as *mut u8,
            shape,
            layout.block_byte_strides().to_vec(),
            layout.dtype,
            device_tag_for(block.memory_type()),
            block.is_host_accessible(),
        )
    }
}

/// A block index as a length 3 i32 host tensor.
pub fn tensor_from_index(index: BlockIndex) -> Tensor<'static> {
    Tensor::from_vec(&index, &[3], DType::I32)
}

/// Parse a block index from a length 3 i32 tensor.
pub fn index_from_tensor(tensor: &Tensor) -> BlockIndex {
    check_rank(tensor, 1, "block_index");
    check_dim(tensor, 0, 3, "block_index");
    check_dtype(tensor, DType::I32, "block_index");
    [
        tensor.at::<i32>(&[0]),
        tensor.at::<i32>(&[1]),
        tensor.at::<i32>(&[2]),
    ]
}

/// Sparse layer of dense voxel blocks.
pub struct VoxelBlockLayer<V: LayerVoxel> {
    blocks: HashMap<BlockIndex, MemoryBuffer>,
    voxel_size: f32,
    memory_type: MemoryType,
    _voxel: PhantomData<V>,
}

impl<V: LayerVoxel> VoxelBlockLayer<V> {
    pub fn new(voxel_size: f32, memory_type: MemoryType) -> Self {
        assert!(voxel_size > 0.0, "voxel_size must be positive");
        Self {
            blocks: HashMap::new(),
            voxel_size,
            memory_type,
            _voxel: PhantomData,
        }
    }

    pub fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    pub fn kind(&self) -> VoxelKind {
        V::KIND
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Bytes held by allocated blocks.
    pub fn num_allocated_bytes(&self) -> usize {
        self.blocks.len() * V::KIND.block_size_bytes()
    }

    pub fn is_block_allocated(&self, index: BlockIndex) -> bool {
        self.blocks.contains_key(&index)
    }

    /// Allocate a zeroed block at `index`. Existing blocks are kept.
    pub fn allocate_block_at_index(
        &mut self,
        index: BlockIndex,
        stream: &dyn TransferStream,
    ) -> Result<()> {
        if !self.blocks.contains_key(&index) {
            let block = stream.alloc_zeroed(V::KIND.block_size_bytes(), self.memory_type)?;
            self.blocks.insert(index, block);
        }
        Ok(())
    }

    /// Drop all blocks.
    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    /// Borrowed tensor over the block at `index`, if allocated.
    pub fn block_tensor_at_index(&self, index: BlockIndex) -> Option<Tensor<'_>> {
        self.blocks
            .get(&index)
            .map(|block| tensor_from_block(block, V::KIND))
    }

    /// Sorted indices of allocated blocks. None if the layer is empty.
    pub fn all_block_indices(&self) -> Option<Tensor<'static>> {
        if self.blocks.is_empty() {
            return None;
        }
        let mut indices: Vec<BlockIndex> = self.blocks.keys().copied().collect();
        indices.sort_unstable();
        let flat: Vec<i32> = indices.iter().flatten().copied().collect();
        Some(Tensor::from_vec(&flat, &[indices.len(), 3], DType::I32))
    }

    /// Borrowed tensors over all blocks, in sorted index order.
    pub fn all_blocks(&self) -> Vec<Tensor<'_>> {
        let mut indices: Vec<BlockIndex> = self.blocks.keys().copied().collect();
        indices.sort_unstable();
        indices
            .iter()
            .map(|index| tensor_from_block(&self.blocks[index], V::KIND))
            .collect()
    }

    /// Host view of a block's voxels, if allocated and host-accessible.
    pub fn voxels(&self, index: BlockIndex) -> Option<&[V]> {
        self.blocks
            .get(&index)
            .and_then(|block| block.host_bytes())
            .map(bytemuck::cast_slice)
    }

    /// Mutable host view of a block's voxels.
    pub fn voxels_mut(&mut self, index: BlockIndex) -> Option<&mut [V]> {
        self.blocks
            .get_mut(&index)
            .and_then(|block| block.host_bytes_mut())
            .map(bytemuck::cast_slice_mut)
    }
}

const _: () = assert!(VOXELS_PER_BLOCK == 512);
const _: () = assert!(size_of::<BlockIndex>() == 12);
