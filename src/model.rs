// OBJ models
//
// Parsing goes through tobj with triangulation and a single index stream,
// so every mesh is ready for one indexed draw.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::io::BufRead;
use std::mem::{offset_of, size_of};
use std::path::Path;
use std::sync::Arc;

use crate::backend::{Buffer, CommandPool, VulkanDevice};

/// Interleaved vertex, locations 0..=2 in the shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn binding_descriptions() -> [vk::VertexInputBindingDescription; 1] {
        [vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }]
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, normal) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, uv) as u32,
            },
        ]
    }
}

/// CPU-side mesh
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

fn load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ignore_points: true,
        ignore_lines: true,
        ..Default::default()
    }
}

/// Parse OBJ text. Materials are ignored.
pub fn parse_obj<R: BufRead>(reader: &mut R) -> Result<Vec<MeshData>> {
    let (models, _materials) = tobj::load_obj_buf(reader, &load_options(), |_| {
        Ok(Default::default())
    })
    .context("Failed to parse OBJ")?;

    meshes_from_models(models)
}

/// Load an OBJ file from disk
pub fn load_obj<P: AsRef<Path>>(path: P) -> Result<Vec<MeshData>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut reader = std::io::BufReader::new(file);

    let meshes = parse_obj(&mut reader).with_context(|| format!("Failed to load {:?}", path))?;

    log::info!(
        "Loaded {:?}: {} meshes, {} triangles",
        path,
        meshes.len(),
        meshes.iter().map(|m| m.indices.len() / 3).sum::<usize>()
    );
    Ok(meshes)
}

fn meshes_from_models(models: Vec<tobj::Model>) -> Result<Vec<MeshData>> {
    let meshes: Vec<MeshData> = models
        .into_iter()
        .map(|model| {
            let mesh = model.mesh;
            let count = mesh.positions.len() / 3;

            // Missing normals or texture coordinates come out as zeros
            let vertices = (0..count)
                .map(|i| Vertex {
                    position: [
                        mesh.positions[3 * i],
                        mesh.positions[3 * i + 1],
                        mesh.positions[3 * i + 2],
                    ],
                    normal: if mesh.normals.len() >= 3 * (i + 1) {
                        [
                            mesh.normals[3 * i],
                            mesh.normals[3 * i + 1],
                            mesh.normals[3 * i + 2],
                        ]
                    } else {
                        [0.0; 3]
                    },
                    uv: if mesh.texcoords.len() >= 2 * (i + 1) {
                        [mesh.texcoords[2 * i], mesh.texcoords[2 * i + 1]]
                    } else {
                        [0.0; 2]
                    },
                })
                .collect();

            MeshData {
                name: model.name,
                vertices,
                indices: mesh.indices,
            }
        })
        .filter(|mesh| !mesh.indices.is_empty())
        .collect();

    if meshes.is_empty() {
        anyhow::bail!("OBJ contains no triangles");
    }
    Ok(meshes)
}

/// A mesh living in device-local buffers
pub struct GpuMesh {
    pub vertex_buffer: Buffer,
    pub index_buffer: Buffer,
    pub index_count: u32,
}

#[derive(Default)]
pub struct Model {
    pub meshes: Vec<GpuMesh>,
}

impl Model {
    /// Upload every mesh with blocking transfers on `queue`
    pub fn upload(
        device: &Arc<VulkanDevice>,
        pool: &CommandPool,
        queue: vk::Queue,
        meshes: &[MeshData],
    ) -> Result<Self> {
        let meshes = meshes
            .iter()
            .map(|mesh| {
                Ok(GpuMesh {
                    vertex_buffer: Buffer::upload(
                        device.clone(),
                        pool,
                        queue,
                        &format!("{} vertices", mesh.name),
                        vk::BufferUsageFlags::VERTEX_BUFFER,
                        &mesh.vertices,
                    )?,
                    index_buffer: Buffer::upload(
                        device.clone(),
                        pool,
                        queue,
                        &format!("{} indices", mesh.name),
                        vk::BufferUsageFlags::INDEX_BUFFER,
                        &mesh.indices,
                    )?,
                    index_count: mesh.indices.len() as u32,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { meshes })
    }

    /// Bind and draw every mesh. Pipeline and descriptors must be bound.
    pub fn draw(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        for mesh in &self.meshes {
            unsafe {
                device.cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertex_buffer.handle], &[0]);
                device.cmd_bind_index_buffer(cmd, mesh.index_buffer.handle, 0, vk::IndexType::UINT32);
                device.cmd_draw_indexed(cmd, mesh.index_count, 1, 0, 0, 0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const QUAD: &str = "\
o quad
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vn 0 0 1
vt 0 0
vt 1 0
vt 1 1
vt 0 1
f 1/1/1 2/2/1 3/3/1 4/4/1
";

    #[test]
    fn quad_is_triangulated() {
        let meshes = parse_obj(&mut Cursor::new(QUAD)).unwrap();
        assert_eq!(meshes.len(), 1);

        let mesh = &meshes[0];
        assert_eq!(mesh.name, "quad");
        assert_eq!(mesh.indices.len(), 6);
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
        assert!(mesh.vertices.iter().all(|v| v.normal == [0.0, 0.0, 1.0]));
    }

    #[test]
    fn missing_normals_and_uvs_are_zero() {
        let obj = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";
        let meshes = parse_obj(&mut Cursor::new(obj)).unwrap();
        let mesh = &meshes[0];

        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.vertices[1].position, [1.0, 0.0, 0.0]);
        assert!(mesh.vertices.iter().all(|v| v.normal == [0.0; 3] && v.uv == [0.0; 2]));
    }

    #[test]
    fn empty_obj_is_an_error() {
        assert!(parse_obj(&mut Cursor::new("# nothing here\n")).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_obj("models/does_not_exist.obj").is_err());
    }

    #[test]
    fn shipped_cube_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("models/cube.obj");
        let meshes = load_obj(path).unwrap();
        let triangles: usize = meshes.iter().map(|m| m.indices.len() / 3).sum();
        assert_eq!(triangles, 12);
    }

    #[test]
    fn vertex_layout_matches_shader_locations() {
        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[2].offset, 24);
        assert_eq!(Vertex::binding_descriptions()[0].stride, 32);
    }
}
