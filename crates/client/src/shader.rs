//! GPU canvas fallback: draws each decoded frame as a textured full-screen
//! quad with a pass-through shader.

use anyhow::Context;
use tracing::info;

use crate::render::{CanvasSurface, FrameBuffer};

pub const VERTEX_SHADER: &str = r#"
attribute vec2 a_position;
attribute vec2 a_texCoord;
varying vec2 v_texCoord;
void main() {
    gl_Position = vec4(a_position, 0.0, 1.0);
    v_texCoord = a_texCoord;
}
"#;

pub const FRAGMENT_SHADER: &str = r#"
precision mediump float;
uniform sampler2D u_image;
varying vec2 v_texCoord;
void main() {
    gl_FragColor = texture2D(u_image, v_texCoord);
}
"#;

/// Two triangles covering clip space.
pub const QUAD_POSITIONS: [f32; 12] = [
    -1.0, -1.0, //
    1.0, -1.0, //
    -1.0, 1.0, //
    -1.0, 1.0, //
    1.0, -1.0, //
    1.0, 1.0, //
];

/// Texture coordinates for `QUAD_POSITIONS`, flipped vertically: frame rows
/// are stored top-down while clip space grows upward.
pub const QUAD_UVS: [f32; 12] = [
    0.0, 1.0, //
    1.0, 1.0, //
    0.0, 0.0, //
    0.0, 0.0, //
    1.0, 1.0, //
    1.0, 0.0, //
];

pub const QUAD_VERTEX_COUNT: usize = QUAD_POSITIONS.len() / 2;

/// The handful of GL calls the canvas needs.
pub trait GlBackend {
    fn compile_program(&mut self, vertex: &str, fragment: &str) -> anyhow::Result<()>;
    fn upload_quad(&mut self, positions: &[f32], uvs: &[f32]);
    fn set_viewport(&mut self, width: u32, height: u32);
    fn upload_frame(&mut self, frame: &dyn FrameBuffer) -> anyhow::Result<()>;
    fn draw_triangles(&mut self, vertex_count: usize);
}

pub struct GpuCanvas<B> {
    backend: B,
    width: u32,
    height: u32,
    program_ready: bool,
}

impl<B: GlBackend> GpuCanvas<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            width: 0,
            height: 0,
            program_ready: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn ensure_program(&mut self) -> anyhow::Result<()> {
        if self.program_ready {
            return Ok(());
        }
        self.backend
            .compile_program(VERTEX_SHADER, FRAGMENT_SHADER)
            .context("Failed to compile pass-through shader")?;
        self.backend.upload_quad(&QUAD_POSITIONS, &QUAD_UVS);
        self.program_ready = true;
        info!("GPU canvas program ready");
        Ok(())
    }
}

impl<B: GlBackend> CanvasSurface for GpuCanvas<B> {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.backend.set_viewport(width, height);
    }

    fn draw(&mut self, frame: &dyn FrameBuffer) -> anyhow::Result<()> {
        self.ensure_program()?;
        self.backend.upload_frame(frame)?;
        self.backend.draw_triangles(QUAD_VERTEX_COUNT);
        Ok(())
    }
}
