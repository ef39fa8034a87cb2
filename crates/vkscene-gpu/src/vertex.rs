//! Vertex record and its input layout.

use ash::vk;
use bytemuck::{Pod, Zeroable};

/// A vertex with a 3-component position.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
}

impl Vertex {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            position: [x, y, z],
        }
    }

    /// The single per-vertex binding.
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(std::mem::size_of::<Self>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
    }

    /// Position at location 0.
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 1] {
        [vk::VertexInputAttributeDescription::default()
            .binding(0)
            .location(0)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(std::mem::offset_of!(Self, position) as u32)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_three_packed_floats() {
        assert_eq!(std::mem::size_of::<Vertex>(), 12);
        assert_eq!(Vertex::binding_description().stride, 12);

        let [position] = Vertex::attribute_descriptions();
        assert_eq!(position.offset, 0);
        assert_eq!(position.location, 0);
        assert_eq!(position.format, vk::Format::R32G32B32_SFLOAT);
    }

    #[test]
    fn vertices_cast_to_bytes() {
        let vertices = [Vertex::new(1.0, 0.0, 0.0), Vertex::new(0.0, 2.0, 0.0)];
        let bytes: &[u8] = bytemuck::cast_slice(&vertices);
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[0..4], &1.0f32.to_ne_bytes());
        assert_eq!(&bytes[16..20], &2.0f32.to_ne_bytes());
    }
}
