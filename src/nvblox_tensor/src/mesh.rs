//! Serialized mesh storage and tensor export.
//!
//! The engine serializes its mesh layer into concatenated per-block
//! buffers: vertices and per-vertex appearances live in mesh memory,
//! triangle indices stay host-side and block-local. Vertices and
//! appearances export zero-copy; triangle export rewrites the local
//! indices against each block's vertex offset and uploads the result.

use anyhow::Result;
use bytemuck::Pod;
use cuda_memory::{MemoryBuffer, MemoryType, TransferStream};

use crate::device::device_tag_for;
use crate::tensor::{contiguous_byte_strides, DType, Tensor};
use crate::voxel::{FeatureArray, Rgb, FEATURE_ARRAY_NUM_ELEMENTS};

/// Per-vertex attribute types a mesh can carry.
pub trait VertexAppearance: Pod {
    const CHANNELS: usize;
    const DTYPE: DType;
}

impl VertexAppearance for Rgb {
    const CHANNELS: usize = 3;
    const DTYPE: DType = DType::U8;
}

impl VertexAppearance for FeatureArray {
    const CHANNELS: usize = FEATURE_ARRAY_NUM_ELEMENTS;
    const DTYPE: DType = DType::F16;
}

/// One mesh block as produced by the engine's mesher.
pub struct MeshBlock<A> {
    pub vertices: Vec<[f32; 3]>,
    /// Triangle indices local to this block's vertices.
    pub triangle_indices: Vec<i32>,
    /// One appearance per vertex.
    pub appearances: Vec<A>,
}

/// A serialized mesh: flat vertex and appearance buffers plus host-side
/// block-local triangle indices.
pub struct Mesh<A: VertexAppearance> {
    vertices: MemoryBuffer,
    appearances: MemoryBuffer,
    num_vertices: usize,
    local_triangle_indices: Vec<i32>,
    block_triangle_counts: Vec<usize>,
    vertex_block_offsets: Vec<i32>,
    memory_type: MemoryType,
    _appearance: std::marker::PhantomData<A>,
}

impl<A: VertexAppearance> Mesh<A> {
    /// A mesh with no blocks.
    pub fn empty(memory_type: MemoryType) -> Self {
        Self {
            vertices: MemoryBuffer::from_host_bytes(&[], MemoryType::Host),
            appearances: MemoryBuffer::from_host_bytes(&[], MemoryType::Host),
            num_vertices: 0,
            local_triangle_indices: Vec::new(),
            block_triangle_counts: Vec::new(),
            vertex_block_offsets: Vec::new(),
            memory_type,
            _appearance: std::marker::PhantomData,
        }
    }

    /// Serialize mesh blocks into flat buffers.
    ///
    /// Panics if a block's appearance count differs from its vertex count,
    /// its index count is not a multiple of three, or a local index is out
    /// of range for its block.
    pub fn from_blocks(
        blocks: &[MeshBlock<A>],
        memory_type: MemoryType,
        stream: &dyn TransferStream,
    ) -> Result<Self> {
        let mut vertex_block_offsets = Vec::with_capacity(blocks.len());
        let mut block_triangle_counts = Vec::with_capacity(blocks.len());
        let mut local_triangle_indices = Vec::new();
        let mut flat_vertices: Vec<f32> = Vec::new();
        let mut flat_appearances: Vec<A> = Vec::new();

        let mut vertex_offset = 0i32;
        for block in blocks {
            assert_eq!(
                block.appearances.len(),
                block.vertices.len(),
                "mesh block appearance count does not match vertex count"
            );
            assert_eq!(
                block.triangle_indices.len() % 3,
                0,
                "mesh block index count is not a multiple of three"
            );
            for &index in &block.triangle_indices {
                assert!(
                    (index as usize) < block.vertices.len(),
                    "mesh block triangle index {index} out of range"
                );
            }

            vertex_block_offsets.push(vertex_offset);
            block_triangle_counts.push(block.triangle_indices.len() / 3);
            local_triangle_indices.extend_from_slice(&block.triangle_indices);
            for vertex in &block.vertices {
                flat_vertices.extend_from_slice(vertex);
            }
            flat_appearances.extend_from_slice(&block.appearances);
            vertex_offset += block.vertices.len() as i32;
        }

        let num_vertices = vertex_offset as usize;
        let mut vertices =
            stream.alloc_zeroed(flat_vertices.len() * std::mem::size_of::<f32>(), memory_type)?;
        stream.write(&mut vertices, 0, bytemuck::cast_slice(&flat_vertices))?;
        let mut appearances = stream.alloc_zeroed(
            flat_appearances.len() * std::mem::size_of::<A>(),
            memory_type,
        )?;
        stream.write(&mut appearances, 0, bytemuck::cast_slice(&flat_appearances))?;
        stream.synchronize()?;

        Ok(Self {
            vertices,
            appearances,
            num_vertices,
            local_triangle_indices,
            block_triangle_counts,
            vertex_block_offsets,
            memory_type,
            _appearance: std::marker::PhantomData,
        })
    }

    pub fn num_vertices(&self) -> usize {
        self.num_vertices
    }

    pub fn num_triangles(&self) -> usize {
        self.local_triangle_indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.num_vertices == 0
    }

    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }
}

/// Zero-copy `[N, 3]` f32 view of the vertex buffer. An empty mesh
/// yields an owned `[0, 3]` tensor carrying the mesh's device tag.
pub fn vertices_tensor<A: VertexAppearance>(mesh: &Mesh<A>) -> Tensor<'_> {
    if mesh.is_empty() {
        return Tensor::empty_2d(3, DType::F32, device_tag_for(mesh.memory_type));
    }
    let shape = vec![mesh.num_vertices, 3];
    let strides = contiguous_byte_strides(&shape, DType::F32);
    unsafe {
        Tensor::from_raw_parts(
            mesh.vertices.as_ptr() as *mut u8,
            shape,
            strides,
            DType::F32,
            device_tag_for(mesh.memory_type),
            mesh.vertices.is_host_accessible(),
        )
    }
}

/// Export global triangle indices as an owned `[T, 3]` i32 tensor.
///
/// Local indices are rewritten against their block's vertex offset on the
/// host, then uploaded in one copy. The stream is synchronized before the
/// tensor is returned.
pub fn triangles_tensor<A: VertexAppearance>(
    mesh: &Mesh<A>,
    stream: &dyn TransferStream,
) -> Result<Tensor<'static>> {
    if mesh.num_triangles() == 0 {
        return Ok(Tensor::empty_2d(3, DType::I32, device_tag_for(mesh.memory_type)));
    }

    let mut global: Vec<i32> = Vec::with_capacity(mesh.local_triangle_indices.len());
    let mut cursor = 0;
    for (block, &count) in mesh.block_triangle_counts.iter().enumerate() {
        let offset = mesh.vertex_block_offsets[block];
        for &local in &mesh.local_triangle_indices[cursor..cursor + count * 3] {
            global.push(local + offset);
        }
        cursor += count * 3;
    }

    let mut tensor = Tensor::zeros(
        &[mesh.num_triangles(), 3],
        DType::I32,
        mesh.memory_type,
        stream,
    )?;
    let Some(buffer) = tensor.buffer_mut() else {
        unreachable!("freshly allocated tensor owns its storage");
    };
    stream.write(buffer, 0, bytemuck::cast_slice(&global))?;
    stream.synchronize()?;
    Ok(tensor)
}

/// Zero-copy `[N, channels]` view of the appearance buffer, typed by the
/// appearance kind. An empty mesh yields an owned `[0, channels]` tensor.
pub fn vertex_appearances_tensor<A: VertexAppearance>(mesh: &Mesh<A>) -> Tensor<'_> {
    if mesh.is_empty() {
        return Tensor::empty_2d(A::CHANNELS, A::DTYPE, device_tag_for(mesh.memory_type));
    }
    let shape = vec![mesh.num_vertices, A::CHANNELS];
    let strides = contiguous_byte_strides(&shape, A::DTYPE);
    unsafe {
        Tensor::from_raw_parts(
            mesh.appearances.as_ptr() as *mut u8,
            shape,
            strides,
            A::DTYPE,
            device_tag_for(mesh.memory_type),
            mesh.appearances.is_host_accessible(),
        )
    }
}
