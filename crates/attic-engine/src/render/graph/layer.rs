use std::collections::HashMap;

use crate::device::{GraphicsDevice, ShaderHandle, TextureHandle, UniformKind, UniformLocation};
use crate::error::EngineError;
use crate::math::{Matrix33, Vec2};
use crate::render::LayerData;

use super::node::{EvalCtx, Node, OutputId};
use super::value::Value;

/// Uniform value pulled from an input, ready to upload.
#[derive(Debug, Clone)]
enum UniformValue {
    Int(i32),
    Double(f64),
    Vector(Vec2),
    Matrix(Matrix33),
}

/// Draws every batch of a layer with one shader.
///
/// Inputs: `shader`, `layer`, optional `target` (an off-screen texture; the
/// screen when unset) and one input per declared uniform. Output `result` is
/// the texture drawn into.
///
/// The shader's uniform locations are looked up once and reused until the
/// `shader` input changes.
#[derive(Debug, Default)]
pub struct RenderLayerNode {
    uniforms: Vec<(String, UniformKind)>,
    locations: Option<(ShaderHandle, HashMap<String, UniformLocation>)>,
}

impl RenderLayerNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a uniform input pushed to the shader before drawing.
    pub fn with_uniform(mut self, name: impl Into<String>, kind: UniformKind) -> Self {
        self.uniforms.push((name.into(), kind));
        self
    }

    fn locations(
        &mut self,
        device: &dyn GraphicsDevice,
        shader: ShaderHandle,
    ) -> &HashMap<String, UniformLocation> {
        if self.locations.as_ref().is_some_and(|(s, _)| *s != shader) {
            self.locations = None;
        }
        &self
            .locations
            .get_or_insert_with(|| (shader, device.uniforms(shader)))
            .1
    }

    fn pull_uniforms(
        &self,
        ctx: &mut EvalCtx<'_>,
    ) -> Result<Vec<(String, UniformValue)>, EngineError> {
        let mut values = Vec::with_capacity(self.uniforms.len());
        for (name, kind) in &self.uniforms {
            let value = match kind {
                UniformKind::Int => UniformValue::Int(ctx.input(name)?),
                UniformKind::Double => UniformValue::Double(ctx.input(name)?),
                UniformKind::Vector => UniformValue::Vector(ctx.input(name)?),
                UniformKind::Matrix => UniformValue::Matrix(ctx.input(name)?),
            };
            values.push((name.clone(), value));
        }
        Ok(values)
    }

    /// Everything between binding the shader and unbinding it.
    fn draw(
        &mut self,
        device: &dyn GraphicsDevice,
        shader: ShaderHandle,
        layer: &LayerData,
        target: TextureHandle,
        uniforms: &[(String, UniformValue)],
    ) -> bool {
        let locations = self.locations(device, shader);
        for (name, value) in uniforms {
            let Some(&location) = locations.get(name) else {
                log::warn!("render layer: {shader} has no uniform `{name}`");
                continue;
            };
            let ok = match value {
                UniformValue::Int(v) => device.set_uniform_int(location, *v),
                UniformValue::Double(v) => device.set_uniform_double(location, *v),
                UniformValue::Vector(v) => device.set_uniform_vector(location, *v),
                UniformValue::Matrix(v) => device.set_uniform_matrix(location, v),
            };
            if !ok {
                return false;
            }
        }

        if !target.is_screen() && !device.bind_render_target(0, target) {
            return false;
        }
        let drawn = layer.batches().iter().all(|batch| batch.render(device));
        if !target.is_screen() {
            device.unbind_render_target(0);
        }
        drawn
    }
}

impl Node for RenderLayerNode {
    fn name(&self) -> &str {
        "render-layer"
    }

    fn accepts_input(&self, name: &str) -> bool {
        matches!(name, "shader" | "layer" | "target") || self.uniforms.iter().any(|(n, _)| n == name)
    }

    fn output_id(&self, name: &str) -> Option<OutputId> {
        (name == "result").then_some(OutputId(0))
    }

    fn produce(&mut self, ctx: &mut EvalCtx<'_>) -> Result<Vec<Value>, EngineError> {
        let shader: ShaderHandle = ctx.input("shader")?;
        let layer: LayerData = ctx.input("layer")?;
        let target: TextureHandle = ctx
            .optional_input("target")?
            .unwrap_or(TextureHandle::SCREEN);
        let uniforms = self.pull_uniforms(ctx)?;

        let device = ctx.device();
        if !device.bind_shader(shader) {
            return Ok(vec![Value::Invalid]);
        }
        let drawn = self.draw(device, shader, &layer, target, &uniforms);
        device.unbind_shader();

        Ok(vec![if drawn {
            Value::Texture(target)
        } else {
            Value::Invalid
        }])
    }
}
