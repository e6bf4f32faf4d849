use crate::device::{ClearTarget, TextureHandle};
use crate::error::EngineError;
use crate::math::Color;

use super::node::{EvalCtx, Node, OutputId};
use super::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Screen,
    Targets(usize),
}

/// Clears render targets to per-target colors.
///
/// The clear runs when the node is evaluated, so at most once per frame no
/// matter how many consumers pull its outputs.
///
/// - [`ClearNode::screen`]: input `color`, output `result` (the screen handle).
/// - [`ClearNode::targets`]: inputs `target_<i>` and `color_<i>`, outputs
///   `target_<i>` and `result` (the first target).
///
/// Targets are cleared in chunks of the device's render-target limit.
#[derive(Debug)]
pub struct ClearNode {
    mode: Mode,
}

impl ClearNode {
    pub fn screen() -> Self {
        Self { mode: Mode::Screen }
    }

    pub fn targets(count: usize) -> Self {
        Self {
            mode: Mode::Targets(count),
        }
    }

    fn indexed(name: &str, prefix: &str, count: usize) -> Option<usize> {
        name.strip_prefix(prefix)
            .and_then(|i| i.parse::<usize>().ok())
            .filter(|i| *i < count)
    }

    fn clear_screen(&self, ctx: &mut EvalCtx<'_>) -> Result<Vec<Value>, EngineError> {
        let color: Color = ctx.optional_input("color")?.unwrap_or(Color::BLACK);
        let device = ctx.device();
        device.set_clear_color(ClearTarget::Screen, color);
        device.clear_render_targets();
        Ok(vec![Value::Texture(TextureHandle::SCREEN)])
    }

    fn clear_targets(&self, ctx: &mut EvalCtx<'_>, count: usize) -> Result<Vec<Value>, EngineError> {
        let mut targets = Vec::with_capacity(count);
        for i in 0..count {
            let target: TextureHandle = ctx.input(&format!("target_{i}"))?;
            let color: Color = ctx
                .optional_input(&format!("color_{i}"))?
                .unwrap_or(Color::BLACK);
            targets.push((target, color));
        }

        let device = ctx.device();
        let chunk = device.max_render_targets().max(1);
        for group in targets.chunks(chunk) {
            let mut bound = 0;
            let mut failed = false;
            for (slot, (target, color)) in group.iter().enumerate() {
                if !device.bind_render_target(slot, *target) {
                    failed = true;
                    break;
                }
                bound += 1;
                device.set_clear_color(ClearTarget::Slot(slot), *color);
            }
            if !failed {
                device.clear_render_targets();
            }
            for slot in 0..bound {
                device.unbind_render_target(slot);
            }
            if failed {
                return Ok(vec![Value::Invalid]);
            }
        }

        let first = targets
            .first()
            .map_or(Value::Texture(TextureHandle::SCREEN), |(t, _)| Value::Texture(*t));
        let mut outputs = vec![first];
        outputs.extend(targets.iter().map(|(t, _)| Value::Texture(*t)));
        Ok(outputs)
    }
}

impl Node for ClearNode {
    fn name(&self) -> &str {
        "clear"
    }

    fn accepts_input(&self, name: &str) -> bool {
        match self.mode {
            Mode::Screen => name == "color",
            Mode::Targets(n) => {
                Self::indexed(name, "target_", n).is_some()
                    || Self::indexed(name, "color_", n).is_some()
            }
        }
    }

    fn output_id(&self, name: &str) -> Option<OutputId> {
        if name == "result" {
            return Some(OutputId(0));
        }
        match self.mode {
            Mode::Screen => None,
            Mode::Targets(n) => Self::indexed(name, "target_", n).map(|i| OutputId(i + 1)),
        }
    }

    fn produce(&mut self, ctx: &mut EvalCtx<'_>) -> Result<Vec<Value>, EngineError> {
        match self.mode {
            Mode::Screen => self.clear_screen(ctx),
            Mode::Targets(n) => self.clear_targets(ctx, n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCall, GraphicsDevice, HeadlessDevice};
    use crate::render::graph::RenderPathBuilder;

    fn is_clear(call: &DeviceCall) -> bool {
        matches!(call, DeviceCall::ClearRenderTargets(_))
    }

    // ── screen ────────────────────────────────────────────────────────────

    #[test]
    fn screen_clear_runs_once_per_frame() {
        let device = HeadlessDevice::new();
        let mut b = RenderPathBuilder::new();
        let clear = b.add_node(ClearNode::screen());
        b.set_value(clear, "color", Color::rgb(0.1, 0.2, 0.3)).unwrap();
        let mut path = b.build(clear, "result").unwrap();

        path.prepare();
        assert_eq!(path.poll_frame(&device).unwrap(), TextureHandle::SCREEN);
        assert_eq!(path.poll_frame(&device).unwrap(), TextureHandle::SCREEN);
        assert_eq!(device.count_calls(is_clear), 1);

        path.prepare();
        path.poll_frame(&device).unwrap();
        assert_eq!(device.count_calls(is_clear), 2);
    }

    #[test]
    fn screen_clear_sets_color_first() {
        let device = HeadlessDevice::new();
        let mut b = RenderPathBuilder::new();
        let clear = b.add_node(ClearNode::screen());
        let color = Color::rgb(1.0, 0.0, 0.0);
        b.set_value(clear, "color", color).unwrap();
        let mut path = b.build(clear, "result").unwrap();
        path.prepare();
        path.poll_frame(&device).unwrap();

        assert_eq!(
            device.calls(),
            vec![
                DeviceCall::SetClearColor(ClearTarget::Screen, color),
                DeviceCall::ClearRenderTargets(vec![TextureHandle::SCREEN]),
            ]
        );
    }

    #[test]
    fn screen_node_rejects_target_inputs() {
        let node = ClearNode::screen();
        assert!(!node.accepts_input("target_0"));
        assert!(node.output_id("target_0").is_none());
    }

    // ── targets ───────────────────────────────────────────────────────────

    #[test]
    fn targets_are_cleared_in_device_sized_chunks() {
        let device = HeadlessDevice::new().with_max_render_targets(2);
        let textures: Vec<_> = (0..3).map(|_| device.gen_texture(16, 16).unwrap()).collect();
        device.clear_calls();

        let mut b = RenderPathBuilder::new();
        let clear = b.add_node(ClearNode::targets(3));
        for (i, t) in textures.iter().enumerate() {
            b.set_value(clear, &format!("target_{i}"), *t).unwrap();
        }
        b.set_value(clear, "color_2", Color::WHITE).unwrap();
        let mut path = b.build(clear, "target_2").unwrap();

        path.prepare();
        assert_eq!(path.poll_frame(&device).unwrap(), textures[2]);
        assert_eq!(
            path.output::<TextureHandle>(&device, clear, "result").unwrap(),
            textures[0]
        );

        let clears: Vec<_> = device.calls().into_iter().filter(is_clear).collect();
        assert_eq!(
            clears,
            vec![
                DeviceCall::ClearRenderTargets(vec![textures[0], textures[1]]),
                DeviceCall::ClearRenderTargets(vec![textures[2]]),
            ]
        );
        assert!(device
            .calls()
            .contains(&DeviceCall::SetClearColor(ClearTarget::Slot(0), Color::WHITE)));
    }

    #[test]
    fn unbindable_target_invalidates_output() {
        let device = HeadlessDevice::new();
        let mut b = RenderPathBuilder::new();
        let clear = b.add_node(ClearNode::targets(1));
        b.set_value(clear, "target_0", TextureHandle(77)).unwrap();
        let mut path = b.build(clear, "result").unwrap();

        path.prepare();
        match path.poll_frame(&device) {
            Err(EngineError::RenderFailure(log)) => assert!(log.contains("texture#77")),
            other => panic!("expected render failure, got {other:?}"),
        }
        assert_eq!(device.count_calls(is_clear), 0);
    }

    #[test]
    fn missing_target_is_unknown_input() {
        let device = HeadlessDevice::new();
        let mut b = RenderPathBuilder::new();
        let clear = b.add_node(ClearNode::targets(2));
        let t = device.gen_texture(4, 4).unwrap();
        b.set_value(clear, "target_0", t).unwrap();
        let mut path = b.build(clear, "result").unwrap();
        path.prepare();
        assert!(matches!(
            path.poll_frame(&device),
            Err(EngineError::UnknownInput(_))
        ));
    }
}
