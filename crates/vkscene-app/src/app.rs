//! `SceneApp` trait definition.

use glam::Mat4;
use winit::event::WindowEvent;

use crate::mesh::Mesh;

/// Trait for applications driven by [`run_app`](crate::run_app).
///
/// The framework creates the window and renderer, uploads the mesh returned
/// by [`SceneApp::mesh`] once, and calls [`SceneApp::update`] before every
/// frame.
pub trait SceneApp {
    /// Geometry drawn every frame.
    fn mesh(&self) -> Mesh;

    /// Update application state.
    ///
    /// # Arguments
    /// * `dt` - Delta time in seconds since last frame
    fn update(&mut self, dt: f32);

    /// Clip-space transform pushed to the vertex shader for the next frame.
    ///
    /// `aspect` is the window's width over height.
    #[allow(unused_variables)]
    fn transform(&self, aspect: f32) -> Mat4 {
        Mat4::IDENTITY
    }

    /// Colour shift pushed to the fragment shader for the next frame.
    fn color_shift(&self) -> f32 {
        0.0
    }

    /// Handle window events.
    ///
    /// Return `true` if the event was handled and should not be processed
    /// further.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Called after the renderer has adapted to a new window size.
    #[allow(unused_variables)]
    fn on_resize(&mut self, width: u32, height: u32) {}

    /// Called once before shutdown, after the GPU is idle.
    fn cleanup(&mut self) {}
}
