use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// 2D vertex with RGB color
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec2,
    pub color: Vec3,
}

impl Vertex {
    pub const fn new(position: [f32; 2], color: [f32; 3]) -> Self {
        Self {
            position: Vec2::new(position[0], position[1]),
            color: Vec3::new(color[0], color[1], color[2]),
        }
    }
}

/// The colored unit quad drawn by the viewer.
pub const QUAD_VERTICES: [Vertex; 4] = [
    Vertex::new([-0.5, -0.5], [1.0, 0.0, 0.0]),
    Vertex::new([0.5, -0.5], [0.0, 1.0, 0.0]),
    Vertex::new([0.5, 0.5], [0.0, 0.0, 1.0]),
    Vertex::new([-0.5, 0.5], [1.0, 1.0, 1.0]),
];

pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

/// Vertex layout a pipeline is built for
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VertexFormat {
    /// [`Vertex`]: position at location 0, color at location 1
    #[default]
    #[serde(rename = "color_2d")]
    Color2D,
    /// No vertex input; the shader generates positions itself
    None,
}

impl VertexFormat {
    pub fn bindings(&self) -> Vec<vk::VertexInputBindingDescription> {
        match self {
            VertexFormat::Color2D => vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: std::mem::size_of::<Vertex>() as u32,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            VertexFormat::None => Vec::new(),
        }
    }

    pub fn attributes(&self) -> Vec<vk::VertexInputAttributeDescription> {
        match self {
            VertexFormat::Color2D => vec![
                vk::VertexInputAttributeDescription {
                    location: 0,
                    binding: 0,
                    format: vk::Format::R32G32_SFLOAT,
                    offset: std::mem::offset_of!(Vertex, position) as u32,
                },
                vk::VertexInputAttributeDescription {
                    location: 1,
                    binding: 0,
                    format: vk::Format::R32G32B32_SFLOAT,
                    offset: std::mem::offset_of!(Vertex, color) as u32,
                },
            ],
            VertexFormat::None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_2d_layout_matches_shader_inputs() {
        let bindings = VertexFormat::Color2D.bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].stride, 20);

        let attributes = VertexFormat::Color2D.attributes();
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[0].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(attributes[1].offset, 8);
        assert_eq!(attributes[1].format, vk::Format::R32G32B32_SFLOAT);
    }

    #[test]
    fn quad_is_castable_to_bytes() {
        let bytes: &[u8] = bytemuck::cast_slice(&QUAD_VERTICES);
        assert_eq!(bytes.len(), 4 * 20);
        assert!(VertexFormat::None.attributes().is_empty());
    }

    #[test]
    fn format_names_in_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            format: VertexFormat,
        }
        let parsed: Wrapper = toml::from_str("format = \"color_2d\"").unwrap();
        assert_eq!(parsed.format, VertexFormat::Color2D);
        let parsed: Wrapper = toml::from_str("format = \"none\"").unwrap();
        assert_eq!(parsed.format, VertexFormat::None);
    }
}
