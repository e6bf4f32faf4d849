use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::device::TextureHandle;
use crate::error::EngineError;

use super::graph::{NodeId, RenderPath, Value};
use super::scene::{LayerData, SceneRegistry};

/// Scene registry plus the installed render path.
///
/// Clones share both. The path is only evaluated from the render thread;
/// views install it through [`Renderer::set_render_path`] from scheduler tasks.
#[derive(Clone)]
pub struct Renderer {
    scene: Arc<SceneRegistry>,
    path: Arc<Mutex<Option<RenderPath>>>,
}

impl Renderer {
    pub fn new(scene: Arc<SceneRegistry>) -> Self {
        Self {
            scene,
            path: Arc::new(Mutex::new(None)),
        }
    }

    #[inline]
    pub fn scene(&self) -> &Arc<SceneRegistry> {
        &self.scene
    }

    /// Shorthand for [`SceneRegistry::layer_data`].
    pub fn layer_data(&self, name: &str) -> LayerData {
        self.scene.layer_data(name)
    }

    fn path(&self) -> MutexGuard<'_, Option<RenderPath>> {
        self.path.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs `path`, returning the previous one.
    pub fn set_render_path(&self, path: RenderPath) -> Option<RenderPath> {
        log::debug!("render path installed ({} nodes)", path.len());
        self.path().replace(path)
    }

    pub fn clear_render_path(&self) -> Option<RenderPath> {
        self.path().take()
    }

    pub fn has_render_path(&self) -> bool {
        self.path().is_some()
    }

    /// Replaces a constant input of the installed path, e.g. a per-frame
    /// uniform. Takes effect on the next frame.
    pub fn set_path_value(
        &self,
        node: NodeId,
        input: &str,
        value: impl Into<Value>,
    ) -> Result<(), EngineError> {
        match self.path().as_mut() {
            Some(path) => path.set_value(node, input, value),
            None => Err(EngineError::config("no render path installed")),
        }
    }

    /// Evaluates one frame of the installed path.
    ///
    /// Returns `None` when no path is installed.
    pub fn render(&self) -> Result<Option<TextureHandle>, EngineError> {
        let mut guard = self.path();
        let Some(path) = guard.as_mut() else {
            return Ok(None);
        };
        path.prepare();
        path.poll_frame(&**self.scene.device()).map(Some)
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("scene", &self.scene)
            .field("path", &*self.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCall, HeadlessDevice};
    use crate::math::Color;
    use crate::render::graph::{ClearNode, RenderPathBuilder};

    fn renderer() -> (Arc<HeadlessDevice>, Renderer) {
        let device = Arc::new(HeadlessDevice::new());
        let scene = Arc::new(SceneRegistry::new(device.clone()));
        (device, Renderer::new(scene))
    }

    fn clear_path(color: Color) -> RenderPath {
        let mut b = RenderPathBuilder::new();
        let clear = b.add_node(ClearNode::screen());
        b.set_value(clear, "color", color).unwrap();
        b.build(clear, "result").unwrap()
    }

    #[test]
    fn nothing_to_render_without_a_path() {
        let (device, renderer) = renderer();
        assert_eq!(renderer.render().unwrap(), None);
        assert!(device.calls().is_empty());
    }

    #[test]
    fn each_render_is_a_fresh_frame() {
        let (device, renderer) = renderer();
        assert!(renderer.set_render_path(clear_path(Color::BLACK)).is_none());

        assert_eq!(renderer.render().unwrap(), Some(TextureHandle::SCREEN));
        assert_eq!(renderer.render().unwrap(), Some(TextureHandle::SCREEN));
        assert_eq!(
            device.count_calls(|c| matches!(c, DeviceCall::ClearRenderTargets(_))),
            2
        );
    }

    #[test]
    fn replacing_the_path_returns_the_old_one() {
        let (_device, renderer) = renderer();
        renderer.set_render_path(clear_path(Color::BLACK));
        let clone = renderer.clone();
        assert!(clone.set_render_path(clear_path(Color::WHITE)).is_some());
        assert!(renderer.clear_render_path().is_some());
        assert!(!clone.has_render_path());
    }

    #[test]
    fn path_values_need_an_installed_path() {
        let (device, renderer) = renderer();
        let mut b = RenderPathBuilder::new();
        let clear = b.add_node(ClearNode::screen());
        b.set_value(clear, "color", Color::BLACK).unwrap();
        let path = b.build(clear, "result").unwrap();

        assert!(matches!(
            renderer.set_path_value(clear, "color", Color::WHITE),
            Err(EngineError::Config(_))
        ));
        renderer.set_render_path(path);
        renderer.set_path_value(clear, "color", Color::WHITE).unwrap();
        renderer.render().unwrap();
        assert!(device.calls().contains(&DeviceCall::SetClearColor(
            crate::device::ClearTarget::Screen,
            Color::WHITE
        )));
    }

    #[test]
    fn layer_data_comes_from_the_scene() {
        let (_device, renderer) = renderer();
        assert_eq!(renderer.layer_data("ui"), renderer.scene().layer_data("ui"));
    }
}
