// SPDX-License-Identifier: CEPL-1.0
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use tracing::{info, warn};

use crate::error::VkError;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const fn new(pos: [f32; 3], color: [f32; 3], uv: [f32; 2]) -> Self {
        Self { pos, color, uv }
    }

    pub fn binding() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attributes() -> [vk::VertexInputAttributeDescription; 3] {
        let f = std::mem::size_of::<f32>() as u32;
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
                offset: 3 * f,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: 6 * f,
            },
        ]
    }

    /// Bitwise identity, so -0.0 and 0.0 stay distinct and NaN is hashable.
    fn key(&self) -> [u32; 8] {
        let mut k = [0u32; 8];
        for (dst, src) in k
            .iter_mut()
            .zip(self.pos.iter().chain(&self.color).chain(&self.uv))
        {
            *dst = src.to_bits();
        }
        k
    }
}

#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Two stacked, textured quads facing +Z, framed by the fixed camera.
    pub fn fallback() -> Self {
        const H: f32 = 10.0;
        const Y: f32 = 12.0;
        let quad = |z: f32| {
            [
                Vertex::new([-H, Y - H, z], [1.0, 0.0, 0.0], [0.0, 1.0]),
                Vertex::new([H, Y - H, z], [0.0, 1.0, 0.0], [1.0, 1.0]),
                Vertex::new([H, Y + H, z], [0.0, 0.0, 1.0], [1.0, 0.0]),
                Vertex::new([-H, Y + H, z], [1.0, 1.0, 1.0], [0.0, 0.0]),
            ]
        };
        let mut vertices = quad(0.0).to_vec();
        vertices.extend_from_slice(&quad(-H));
        Self {
            vertices,
            indices: vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4],
        }
    }
}

/// Parses triangulated OBJ data, merging identical vertices. Texture V is
/// flipped to Vulkan's top-left origin.
pub fn parse_obj<R: BufRead>(reader: &mut R) -> Result<Mesh> {
    let (models, _) = tobj::load_obj_buf(
        reader,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
        |_| Ok(Default::default()),
    )
    .map_err(|e| VkError::Loading(format!("obj: {e}")))?;

    let mut mesh = Mesh::default();
    let mut unique: HashMap<[u32; 8], u32> = HashMap::new();

    for model in &models {
        let m = &model.mesh;
        for &index in &m.indices {
            let i = index as usize;
            let pos = [m.positions[3 * i], m.positions[3 * i + 1], m.positions[3 * i + 2]];
            let uv = if m.texcoords.len() >= 2 * i + 2 {
                [m.texcoords[2 * i], 1.0 - m.texcoords[2 * i + 1]]
            } else {
                [0.0, 0.0]
            };
            let v = Vertex::new(pos, [1.0, 1.0, 1.0], uv);

            let next = mesh.vertices.len() as u32;
            let idx = *unique.entry(v.key()).or_insert_with(|| {
                mesh.vertices.push(v);
                next
            });
            mesh.indices.push(idx);
        }
    }
    Ok(mesh)
}

pub fn load_obj(path: &Path) -> Result<Mesh> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mesh = parse_obj(&mut BufReader::new(file))
        .with_context(|| format!("parse {}", path.display()))?;
    info!(
        "model {}: {} vertices, {} indices",
        path.display(),
        mesh.vertices.len(),
        mesh.indices.len()
    );
    Ok(mesh)
}

/// Mesh from `path`, or the built-in quads when it cannot be read.
pub fn load_mesh_or_fallback(path: &Path) -> Mesh {
    match load_obj(path) {
        Ok(m) if !m.indices.is_empty() => m,
        Ok(_) => {
            warn!("{} has no triangles; using built-in mesh", path.display());
            Mesh::fallback()
        }
        Err(e) => {
            warn!("{e:#}; using built-in mesh");
            Mesh::fallback()
        }
    }
}

#[derive(Clone, Debug)]
pub struct TexturePixels {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl TexturePixels {
    pub fn checkerboard(size: u32, cell: u32) -> Self {
        let cell = cell.max(1);
        let mut rgba = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let on = ((x / cell) + (y / cell)) % 2 == 0;
                let c = if on { 230 } else { 40 };
                rgba.extend_from_slice(&[c, c, c, 255]);
            }
        }
        Self {
            width: size,
            height: size,
            rgba,
        }
    }
}

pub fn load_texture(path: &Path) -> Result<TexturePixels> {
    let img = image::open(path)
        .map_err(|e| VkError::Loading(format!("{}: {e}", path.display())))?
        .into_rgba8();
    let (width, height) = img.dimensions();
    info!("texture {}: {}x{}", path.display(), width, height);
    Ok(TexturePixels {
        width,
        height,
        rgba: img.into_raw(),
    })
}

pub fn load_texture_or_fallback(path: &Path) -> TexturePixels {
    load_texture(path).unwrap_or_else(|e| {
        warn!("{e:#}; using checkerboard texture");
        TexturePixels::checkerboard(256, 32)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const QUAD_OBJ: &str = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
f 1/1 2/2 3/3 4/4
";

    #[test]
    fn vertex_layout_matches_shader() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        let a = Vertex::attributes();
        assert_eq!(a[1].offset, 12);
        assert_eq!(a[2].offset, 24);
        assert_eq!(Vertex::binding().stride, 32);
    }

    #[test]
    fn quad_is_triangulated_and_deduplicated() {
        let mesh = parse_obj(&mut Cursor::new(QUAD_OBJ)).unwrap();
        // two triangles sharing an edge: 6 indices over 4 vertices
        assert_eq!(mesh.indices.len(), 6);
        assert_eq!(mesh.vertices.len(), 4);
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
    }

    #[test]
    fn uv_v_is_flipped() {
        let mesh = parse_obj(&mut Cursor::new(QUAD_OBJ)).unwrap();
        let origin = mesh
            .vertices
            .iter()
            .find(|v| v.pos == [0.0, 0.0, 0.0])
            .unwrap();
        assert_eq!(origin.uv, [0.0, 1.0]);
    }

    #[test]
    fn repeated_faces_reuse_vertices() {
        let obj = format!("{QUAD_OBJ}f 1/1 2/2 3/3\n");
        let mesh = parse_obj(&mut Cursor::new(obj)).unwrap();
        assert_eq!(mesh.indices.len(), 9);
        assert_eq!(mesh.vertices.len(), 4);
    }

    #[test]
    fn missing_file_falls_back() {
        let m = load_mesh_or_fallback(Path::new("does/not/exist.obj"));
        assert_eq!(m.indices.len(), 12);
        assert_eq!(m.vertex_bytes().len(), 8 * 32);
        assert_eq!(m.index_bytes().len(), 12 * 4);

        let t = load_texture_or_fallback(Path::new("does/not/exist.png"));
        assert_eq!((t.width, t.height), (256, 256));
    }

    #[test]
    fn checkerboard_alternates() {
        let t = TexturePixels::checkerboard(4, 2);
        assert_eq!(t.rgba.len(), 4 * 4 * 4);
        let px = |x: usize, y: usize| t.rgba[(y * 4 + x) * 4];
        assert_eq!(px(0, 0), px(1, 1));
        assert_ne!(px(0, 0), px(2, 0));
        assert_ne!(px(0, 0), px(0, 2));
        assert_eq!(px(0, 0), px(2, 2));
    }
}
