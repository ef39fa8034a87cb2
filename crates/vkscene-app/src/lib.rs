//! Window, event loop and renderer assembly for vkscene.
//!
//! This crate handles:
//! - Logging initialization
//! - Window creation and the winit event loop
//! - Building the [`Renderer`] and rebuilding it on resize
//! - Per-frame timing
//!
//! # Example
//!
//! ```no_run
//! use vkscene_app::{run_app, AppConfig, Mesh, SceneApp};
//!
//! struct Quad;
//!
//! impl SceneApp for Quad {
//!     fn mesh(&self) -> Mesh {
//!         Mesh::quad()
//!     }
//!
//!     fn update(&mut self, _dt: f32) {}
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app(AppConfig::default(), Quad)
//! }
//! ```

mod app;
mod config;
mod mesh;
mod renderer;
mod runner;

pub use app::SceneApp;
pub use config::AppConfig;
pub use mesh::{screen_signed_area, Mesh};
pub use renderer::Renderer;
pub use runner::{init_logging, run_app};

pub use glam::Mat4;
pub use vkscene_gpu::Vertex;
pub use winit::event::WindowEvent;
