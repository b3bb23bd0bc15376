//! Red triangle demo
//!
//! Opens a window and draws one red triangle every frame until the window
//! is closed. Settings come from the TOML or RON file named by the first
//! argument, else `triangle.toml` or `triangle.ron` when present.
//! `RUST_LOG` overrides the configured log level.

use std::process::ExitCode;

use bytemuck::{Pod, Zeroable};
use present_engine::ash::vk;
use present_engine::prelude::*;
use present_engine::render::vulkan::{Buffer, WindowError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct AppConfig {
    window: WindowConfig,
    renderer: RendererConfig,
    log_level: Option<String>,
}

impl Config for AppConfig {}

#[derive(Error, Debug)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error(transparent)]
    Vulkan(#[from] VulkanError),
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Vertex {
    position: [f32; 3],
}

const VERTICES: [Vertex; 3] = [
    Vertex { position: [0.0, -0.5, 0.0] },
    Vertex { position: [0.5, 0.5, 0.0] },
    Vertex { position: [-0.5, 0.5, 0.0] },
];

struct TriangleContent {
    vertex_buffer: Buffer,
}

impl TriangleContent {
    fn new(context: &DeviceContext) -> VulkanResult<Self> {
        let vertex_buffer = Buffer::new_local_with_data(
            context,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&VERTICES),
        )?;
        Ok(Self { vertex_buffer })
    }
}

impl FrameContent for TriangleContent {
    fn configure_pipeline(&self, pipeline: &mut PipelineBuilder, shaders: &dyn ShaderStore) -> VulkanResult<()> {
        let bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let attributes = [vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        }];

        pipeline
            .add_shader(shaders, vk::ShaderStageFlags::VERTEX, "passthrough")?
            .add_shader(shaders, vk::ShaderStageFlags::FRAGMENT, "red")?
            .set_vertex_input(&bindings, &attributes)
            .set_topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        Ok(())
    }

    fn record(&self, pass: &ActiveRenderPass<'_>) {
        pass.bind_vertex_buffers(0, &[self.vertex_buffer.handle()], &[0]);
        pass.draw(VERTICES.len() as u32, 1, 0, 0);
    }
}

fn run(config: &AppConfig) -> Result<(), AppError> {
    let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;
    let context = DeviceContext::new(&mut window, &config.renderer)?;
    let shaders = FileShaderStore::with_fallbacks(&config.renderer.shader_directory);
    let content = TriangleContent::new(&context)?;
    let mut renderer = FrameRenderer::new(&context, &window, &shaders, content, &config.renderer)?;

    run_frame_loop(&mut window, &mut renderer)?;
    Ok(())
}

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["triangle.toml", "triangle.ron"];

fn config_path() -> Option<String> {
    std::env::args().nth(1).or_else(|| {
        DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| std::path::Path::new(path).exists())
            .map(|path| (*path).to_string())
    })
}

fn main() -> ExitCode {
    let loaded = config_path()
        .map_or_else(|| Ok(AppConfig::default()), |path| AppConfig::load_from_file(&path));

    let default_level = loaded
        .as_ref()
        .ok()
        .and_then(|config| config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 12);
        assert_eq!(bytemuck::cast_slice::<Vertex, u8>(&VERTICES).len(), 36);
    }

    #[test]
    fn test_triangle_vertices() {
        let positions: Vec<[f32; 3]> = VERTICES.iter().map(|v| v.position).collect();
        assert_eq!(positions, vec![[0.0, -0.5, 0.0], [0.5, 0.5, 0.0], [-0.5, 0.5, 0.0]]);
    }

    #[test]
    fn test_app_config_from_partial_toml() {
        let config = AppConfig::parse(
            "triangle.toml",
            "log_level = \"debug\"\n[window]\ntitle = \"Triangle\"\n[renderer]\nframes_in_flight = 2\n",
        )
        .unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.window.title, "Triangle");
        assert_eq!(config.window.width, 1920);
        assert_eq!(config.renderer.frames_in_flight, 2);
        assert_eq!(config.renderer.target_image_count, 3);
    }
}
