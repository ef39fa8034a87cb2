//! vkscene viewer.
//!
//! Draws a quad or regular polygon whose colour cycles over time.

mod geometry;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use vkscene_app::{run_app, AppConfig, Mat4, Mesh, SceneApp};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Initial window width
    #[arg(long, default_value_t = 800)]
    width: u32,

    /// Initial window height
    #[arg(long, default_value_t = 600)]
    height: u32,

    /// Enable Vulkan validation layers
    #[arg(long, conflicts_with = "no_validation")]
    validation: bool,

    /// Disable Vulkan validation layers
    #[arg(long)]
    no_validation: bool,

    /// SPIR-V vertex shader (defaults to the built-in one)
    #[arg(long, value_name = "PATH")]
    vert: Option<PathBuf>,

    /// SPIR-V fragment shader (defaults to the built-in one)
    #[arg(long, value_name = "PATH")]
    frag: Option<PathBuf>,

    /// Clear colour as r,g,b,a in 0..=1
    #[arg(long, value_name = "R,G,B,A", value_parser = parse_color, default_value = "0,0,0,1")]
    clear: [f32; 4],

    /// Draw a regular polygon with this many sides instead of a quad
    #[arg(long)]
    sides: Option<u32>,

    /// View the mesh through a perspective camera instead of flat
    #[arg(long)]
    perspective: bool,
}

impl Args {
    fn validation(&self) -> bool {
        if self.validation {
            true
        } else if self.no_validation {
            false
        } else {
            cfg!(debug_assertions)
        }
    }

    fn app_config(&self) -> AppConfig {
        let mut config = AppConfig::new("A Basic Vulkan Scene")
            .with_size(self.width, self.height)
            .with_validation(self.validation())
            .with_clear_color(self.clear);
        if let Some(path) = &self.vert {
            config = config.with_vertex_shader(path);
        }
        if let Some(path) = &self.frag {
            config = config.with_fragment_shader(path);
        }
        config
    }
}

fn parse_color(s: &str) -> Result<[f32; 4], String> {
    let parts = s
        .split(',')
        .map(|part| {
            let value: f32 = part
                .trim()
                .parse()
                .map_err(|_| format!("invalid component `{part}`"))?;
            if (0.0..=1.0).contains(&value) {
                Ok(value)
            } else {
                Err(format!("component {value} outside 0..=1"))
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    <[f32; 4]>::try_from(parts)
        .map_err(|parts| format!("expected 4 components, got {}", parts.len()))
}

struct Viewer {
    mesh: Mesh,
    elapsed: f32,
    perspective: bool,
}

impl SceneApp for Viewer {
    fn mesh(&self) -> Mesh {
        self.mesh.clone()
    }

    fn update(&mut self, dt: f32) {
        self.elapsed += dt;
    }

    fn transform(&self, aspect: f32) -> Mat4 {
        if self.perspective {
            geometry::perspective(aspect)
        } else {
            Mat4::IDENTITY
        }
    }

    fn color_shift(&self) -> f32 {
        self.elapsed.sin().abs()
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.app_config();

    let mesh = match args.sides {
        Some(sides) => geometry::polygon(sides, 0.6),
        None => Mesh::quad(),
    };

    let viewer = Viewer {
        mesh,
        elapsed: 0.0,
        perspective: args.perspective,
    };
    run_app(config, viewer)?;
    info!("Exited cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clear_colors() {
        assert_eq!(parse_color("0.1, 0.2,0.3,1"), Ok([0.1, 0.2, 0.3, 1.0]));
        assert!(parse_color("0.1,0.2,0.3").is_err());
        assert!(parse_color("0,0,0,2").is_err());
        assert!(parse_color("a,b,c,d").is_err());
    }

    #[test]
    fn cli_maps_to_config() {
        let args = Args::parse_from([
            "vkscene-viewer",
            "--width",
            "1024",
            "--no-validation",
            "--frag",
            "custom.spv",
            "--clear",
            "1,0,0,1",
        ]);
        let config = args.app_config();
        assert_eq!((config.width, config.height), (1024, 600));
        assert!(!config.validation);
        assert_eq!(config.clear_color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(config.vertex_shader, None);
        assert_eq!(config.fragment_shader, Some(PathBuf::from("custom.spv")));
    }

    #[test]
    fn flat_view_uses_identity_transform() {
        let viewer = Viewer {
            mesh: Mesh::quad(),
            elapsed: 0.0,
            perspective: false,
        };
        assert_eq!(viewer.transform(2.0), Mat4::IDENTITY);

        let args = Args::parse_from(["vkscene-viewer", "--perspective"]);
        let viewer = Viewer {
            perspective: args.perspective,
            ..viewer
        };
        assert_eq!(viewer.transform(2.0), geometry::perspective(2.0));
    }

    #[test]
    fn validation_flag_wins() {
        let args = Args::parse_from(["vkscene-viewer", "--validation"]);
        assert!(args.validation());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
