use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::error::EngineError;
use crate::math::{Color, Matrix33, Vec2};
use crate::render::{Batch, VertexAttribute};

/// Off-screen render target. `SCREEN` (0) stands for the window surface.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u32);

impl TextureHandle {
    pub const SCREEN: TextureHandle = TextureHandle(0);

    #[inline]
    pub const fn is_screen(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TextureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_screen() {
            f.write_str("screen")
        } else {
            write!(f, "texture#{}", self.0)
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ShaderHandle(pub u32);

impl fmt::Display for ShaderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shader#{}", self.0)
    }
}

/// Device-specific address of a uniform inside a shader.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct UniformLocation(pub u32);

/// Value type of a shader uniform.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum UniformKind {
    Int,
    Double,
    Vector,
    Matrix,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformDecl {
    pub name: String,
    pub kind: UniformKind,
}

/// Shader program description.
///
/// `uniforms` lists the members of the uniform block at `@group(0) @binding(0)`
/// in declaration order. Vertex inputs follow the attribute convention:
/// position at location 0, color at 1, texture coordinate `n` at `2 + n`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderSource {
    pub label: String,
    pub wgsl: String,
    pub uniforms: Vec<UniformDecl>,
}

impl ShaderSource {
    pub fn new(label: impl Into<String>, wgsl: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            wgsl: wgsl.into(),
            uniforms: Vec::new(),
        }
    }

    pub fn with_uniform(mut self, name: impl Into<String>, kind: UniformKind) -> Self {
        self.uniforms.push(UniformDecl {
            name: name.into(),
            kind,
        });
        self
    }
}

/// What a clear color applies to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ClearTarget {
    Screen,
    Slot(usize),
}

/// Drainable diagnostics buffer shared by device implementations.
#[derive(Debug, Default)]
pub struct DeviceLog(Mutex<String>);

impl DeviceLog {
    /// Appends one line and mirrors it to the `log` facade.
    pub fn append(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        log::warn!("device: {msg}");
        let mut buf = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if !buf.is_empty() {
            buf.push('\n');
        }
        buf.push_str(msg);
    }

    /// Returns the accumulated text and resets the buffer.
    pub fn take(&self) -> String {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Engine-side contract of a graphics device.
///
/// Methods take `&self`; implementations synchronize internally so that the
/// scheduler thread can create batches while the render thread draws.
pub trait GraphicsDevice: Send + Sync {
    /// Drains and resets the diagnostic log.
    fn take_log(&self) -> String;

    fn max_render_targets(&self) -> usize;

    fn gen_texture(&self, width: u32, height: u32) -> Option<TextureHandle>;
    fn destroy_texture(&self, texture: TextureHandle);

    fn gen_shader(&self, source: &ShaderSource) -> Option<ShaderHandle>;

    /// [`gen_shader`](Self::gen_shader), failing with the drained log.
    fn create_shader(&self, source: &ShaderSource) -> Result<ShaderHandle, EngineError> {
        self.gen_shader(source).ok_or_else(|| {
            EngineError::Device(format!("shader `{}`: {}", source.label, self.take_log()))
        })
    }
    fn destroy_shader(&self, shader: ShaderHandle);
    fn bind_shader(&self, shader: ShaderHandle) -> bool;
    fn unbind_shader(&self);

    /// Uniform name → location map of `shader`.
    fn uniforms(&self, shader: ShaderHandle) -> HashMap<String, UniformLocation>;

    fn set_uniform_int(&self, location: UniformLocation, value: i32) -> bool;
    fn set_uniform_double(&self, location: UniformLocation, value: f64) -> bool;
    fn set_uniform_vector(&self, location: UniformLocation, value: Vec2) -> bool;
    fn set_uniform_matrix(&self, location: UniformLocation, value: &Matrix33) -> bool;

    fn bind_render_target(&self, slot: usize, texture: TextureHandle) -> bool;
    fn unbind_render_target(&self, slot: usize);

    fn set_clear_color(&self, target: ClearTarget, color: Color);

    /// Clears every bound render target, or the screen if none is bound.
    fn clear_render_targets(&self);

    /// Creates an empty batch for `attributes`, or `None` if the layout cannot
    /// be represented.
    fn gen_batch(&self, is_static: bool, attributes: &[VertexAttribute]) -> Option<Batch>;
    fn destroy_batch(&self, batch: &Batch);

    /// Issues one indexed draw of `batch` with the bound shader and target.
    fn render_batch(&self, batch: &Batch) -> bool;
}

/// Returns `None` if `attributes` is empty, repeats an attribute, or names an
/// unsupported channel.
pub(crate) fn validate_layout(attributes: &[VertexAttribute]) -> Option<()> {
    if attributes.is_empty() || attributes.iter().any(|a| !a.is_valid()) {
        return None;
    }
    let set = crate::render::AttributeSet::from_attributes(attributes);
    (set.len() == attributes.len()).then_some(())
}
