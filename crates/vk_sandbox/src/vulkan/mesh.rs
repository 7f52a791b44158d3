//! Built-in geometry uploaded to host-visible buffers

use ash::{vk, Device};
use std::mem;

use super::commands::ActiveRenderPass;
use super::{Buffer, PhysicalDeviceInfo, VulkanResult};

/// Vertex with position and face normal
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Face normal
    pub normal: [f32; 3],
}

unsafe impl bytemuck::Pod for Vertex {}
unsafe impl bytemuck::Zeroable for Vertex {}

impl Vertex {
    /// Create a new vertex
    pub const fn new(position: [f32; 3], normal: [f32; 3]) -> Self {
        Self { position, normal }
    }

    /// Vertex buffer binding 0, per-vertex rate
    pub const fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Position at location 0, normal at location 1
    pub const fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 12,
            },
        ]
    }
}

/// CPU-side indexed triangle list
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    /// Vertices
    pub vertices: Vec<Vertex>,
    /// Counter-clockwise triangle indices
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Unit cube spanning -1..1 with four vertices per face so normals stay flat
    pub fn cube() -> Self {
        const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            // normal, u axis, v axis
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, u, v) in FACES {
            let base = vertices.len() as u32;
            for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                let position = [
                    normal[0] + su * u[0] + sv * v[0],
                    normal[1] + su * u[1] + sv * v[1],
                    normal[2] + su * u[2] + sv * v[2],
                ];
                vertices.push(Vertex::new(position, normal));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }

        Self { vertices, indices }
    }
}

/// Mesh uploaded to vertex and index buffers
pub struct GpuMesh {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
}

impl GpuMesh {
    /// Upload `mesh`
    pub fn upload(device: &Device, physical_device: &PhysicalDeviceInfo, mesh: &Mesh) -> VulkanResult<Self> {
        let vertex_buffer =
            Buffer::with_data(device, physical_device, vk::BufferUsageFlags::VERTEX_BUFFER, &mesh.vertices)?;
        let index_buffer = Buffer::with_data(device, physical_device, vk::BufferUsageFlags::INDEX_BUFFER, &mesh.indices)?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
        })
    }

    /// Bind the buffers and draw one instance
    pub fn draw(&self, pass: &mut ActiveRenderPass<'_>) {
        pass.cmd_bind_vertex_buffers(0, &[self.vertex_buffer.handle()], &[0]);
        pass.cmd_bind_index_buffer(self.index_buffer.handle(), 0, vk::IndexType::UINT32);
        pass.cmd_draw_indexed(self.index_count, 1, 0);
    }

    /// Number of indices
    pub const fn index_count(&self) -> u32 {
        self.index_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
        [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
    }

    fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
        [a[1] * b[2] - a[2] * b[1], a[2] * b[0] - a[0] * b[2], a[0] * b[1] - a[1] * b[0]]
    }

    #[test]
    fn test_cube_counts() {
        let cube = Mesh::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        assert!(cube.indices.iter().all(|&i| (i as usize) < cube.vertices.len()));
    }

    #[test]
    fn test_cube_corners_on_unit_box() {
        for vertex in Mesh::cube().vertices {
            assert!(vertex.position.iter().all(|c| (c.abs() - 1.0).abs() < f32::EPSILON));
        }
    }

    #[test]
    fn test_cube_triangles_wind_outward() {
        let cube = Mesh::cube();
        for triangle in cube.indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|i| cube.vertices[triangle[i] as usize]);
            let face_normal = cross(sub(b.position, a.position), sub(c.position, a.position));
            let dot: f32 = face_normal.iter().zip(a.normal).map(|(x, y)| x * y).sum();
            assert!(dot > 0.0, "triangle {triangle:?} faces inward");
        }
    }

    #[test]
    fn test_vertex_layout_matches_struct() {
        assert_eq!(Vertex::binding_description().stride, 24);
        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes[1].offset as usize, mem::offset_of!(Vertex, normal));
    }
}
