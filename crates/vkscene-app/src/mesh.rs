//! Indexed triangle geometry.

use vkscene_gpu::Vertex;

/// Triangle-list geometry with 32-bit indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// A unit quad centred on the origin, counter-clockwise in Vulkan's
    /// y-down clip space.
    pub fn quad() -> Self {
        Self::new(
            vec![
                Vertex::new(-0.5, -0.5, 0.0),
                Vertex::new(0.5, -0.5, 0.0),
                Vertex::new(0.5, 0.5, 0.0),
                Vertex::new(-0.5, 0.5, 0.0),
            ],
            vec![0, 3, 2, 2, 1, 0],
        )
    }

    /// Number of indices drawn.
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Check the mesh can be drawn as a triangle list.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.vertices.is_empty(), "mesh has no vertices");
        anyhow::ensure!(!self.indices.is_empty(), "mesh has no indices");
        anyhow::ensure!(
            self.indices.len() % 3 == 0,
            "index count {} is not a multiple of 3",
            self.indices.len()
        );
        if let Some(&index) = self
            .indices
            .iter()
            .find(|&&index| index as usize >= self.vertices.len())
        {
            anyhow::bail!(
                "index {index} out of range for {} vertices",
                self.vertices.len()
            );
        }
        Ok(())
    }
}

/// Signed area of a triangle in Vulkan framebuffer coordinates (y down);
/// positive when the winding is counter-clockwise on screen.
pub fn screen_signed_area(a: Vertex, b: Vertex, c: Vertex) -> f32 {
    let [ax, ay, _] = a.position;
    let [bx, by, _] = b.position;
    let [cx, cy, _] = c.position;
    -0.5 * ((bx - ax) * (cy - ay) - (cx - ax) * (by - ay))
}
