//! Built-in meshes.

use std::f32::consts::TAU;

use vkscene_app::{Mat4, Mesh, Vertex};

/// A regular polygon of `sides` vertices around the origin, as a triangle
/// fan around a centre vertex. Wound counter-clockwise on screen.
pub fn polygon(sides: u32, radius: f32) -> Mesh {
    let sides = sides.max(3);
    let mut vertices = Vec::with_capacity(sides as usize + 1);
    vertices.push(Vertex::new(0.0, 0.0, 0.0));
    for i in 0..sides {
        let angle = TAU * i as f32 / sides as f32;
        vertices.push(Vertex::new(
            radius * angle.cos(),
            radius * angle.sin(),
            0.0,
        ));
    }

    // Vulkan's framebuffer y axis points down, so the rim is walked backwards.
    let indices = (0..sides)
        .flat_map(|i| [0, (i + 1) % sides + 1, i + 1])
        .collect();

    Mesh::new(vertices, indices)
}

/// Perspective view of the `z = 0` plane from two units away.
pub fn perspective(aspect: f32) -> Mat4 {
    let projection = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10000.0);
    projection * Mat4::from_translation(glam::Vec3::new(0.0, 0.0, -2.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;
    use vkscene_app::screen_signed_area;

    #[test]
    fn hexagon_layout() {
        let mesh = polygon(6, 0.5);
        mesh.validate().unwrap();
        assert_eq!(mesh.vertices.len(), 7);
        assert_eq!(mesh.index_count(), 18);
        assert_eq!(&mesh.indices[15..], &[0, 1, 6]);
    }

    #[test]
    fn every_triangle_is_front_facing() {
        for sides in [3, 4, 6, 32] {
            let mesh = polygon(sides, 0.8);
            for tri in mesh.indices.chunks_exact(3) {
                let [a, b, c] = [0, 1, 2].map(|i| mesh.vertices[tri[i] as usize]);
                assert!(screen_signed_area(a, b, c) > 0.0, "{sides} sides: {tri:?}");
            }
        }
    }

    #[test]
    fn degenerate_side_counts_become_triangles() {
        assert_eq!(polygon(1, 1.0).index_count(), 3);
    }

    #[test]
    fn perspective_centres_the_origin() {
        let clip = perspective(4.0 / 3.0) * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!(clip.x.abs() < 1e-6 && clip.y.abs() < 1e-6);
        assert!((clip.w - 2.0).abs() < 1e-6);
        let depth = clip.z / clip.w;
        assert!(depth > 0.0 && depth < 1.0, "depth {depth}");
    }

    #[test]
    fn perspective_keeps_quadrants() {
        let transform = perspective(1.0);
        for (x, y) in [(0.5, 0.5), (-0.5, 0.5), (-0.5, -0.5), (0.5, -0.5)] {
            let clip = transform * Vec4::new(x, y, 0.0, 1.0);
            let (nx, ny) = (clip.x / clip.w, clip.y / clip.w);
            assert_eq!((nx > 0.0, ny > 0.0), (x > 0.0, y > 0.0));
            assert!(nx.abs() < 1.0 && ny.abs() < 1.0);
        }
    }

    #[test]
    fn perspective_narrows_wide_windows() {
        let square = perspective(1.0) * Vec4::new(0.5, 0.0, 0.0, 1.0);
        let wide = perspective(2.0) * Vec4::new(0.5, 0.0, 0.0, 1.0);
        assert!((wide.x / wide.w - 0.5 * square.x / square.w).abs() < 1e-6);
    }
}
