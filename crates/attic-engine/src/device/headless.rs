use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::math::{Color, Matrix33, Vec2};
use crate::render::{Batch, BatchId, SharedMemory, VertexAttribute, vertex_size};

use super::api::{
    ClearTarget, DeviceLog, GraphicsDevice, ShaderHandle, ShaderSource, TextureHandle,
    UniformKind, UniformLocation, validate_layout,
};

/// Calls recorded by [`HeadlessDevice`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    GenTexture(TextureHandle),
    DestroyTexture(TextureHandle),
    GenShader(ShaderHandle),
    DestroyShader(ShaderHandle),
    BindShader(ShaderHandle),
    UnbindShader,
    Uniforms(ShaderHandle),
    SetUniformInt(UniformLocation, i32),
    SetUniformDouble(UniformLocation, f64),
    SetUniformVector(UniformLocation, Vec2),
    SetUniformMatrix(UniformLocation, Matrix33),
    BindRenderTarget(usize, TextureHandle),
    UnbindRenderTarget(usize),
    SetClearColor(ClearTarget, Color),
    ClearRenderTargets(Vec<TextureHandle>),
    GenBatch(BatchId),
    DestroyBatch(BatchId),
    RenderBatch { batch: BatchId, indices: u32 },
}

/// Number of vertices a headless batch can hold by default.
pub const DEFAULT_BATCH_VERTICES: usize = 4096;

#[derive(Default)]
struct HeadlessState {
    calls: Vec<DeviceCall>,
    next_handle: u32,
    textures: HashSet<TextureHandle>,
    shaders: HashMap<ShaderHandle, Vec<UniformKind>>,
    shader_names: HashMap<ShaderHandle, HashMap<String, UniformLocation>>,
    bound_shader: Option<ShaderHandle>,
    targets: BTreeMap<usize, TextureHandle>,
    batches: HashMap<BatchId, SharedMemory>,
}

impl HeadlessState {
    fn fresh_handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    fn uniform_kind(&self, location: UniformLocation) -> Option<UniformKind> {
        let shader = self.bound_shader?;
        self.shaders.get(&shader)?.get(location.0 as usize).copied()
    }
}

/// Graphics device that records calls instead of touching a GPU.
///
/// Batches are backed by CPU memory. Used by tests and by headless runs of the
/// scheduler.
pub struct HeadlessDevice {
    batch_vertices: usize,
    max_targets: usize,
    log: DeviceLog,
    state: Mutex<HeadlessState>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self {
            batch_vertices: DEFAULT_BATCH_VERTICES,
            max_targets: 4,
            log: DeviceLog::default(),
            state: Mutex::new(HeadlessState::default()),
        }
    }

    /// Sets how many vertices each generated batch holds.
    pub fn with_batch_vertices(mut self, vertices: usize) -> Self {
        self.batch_vertices = vertices;
        self
    }

    pub fn with_max_render_targets(mut self, targets: usize) -> Self {
        self.max_targets = targets;
        self
    }

    fn lock(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Recorded calls, oldest first.
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn count_calls(&self, pred: impl Fn(&DeviceCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// CPU copy of a batch's vertex and index uploads.
    pub fn batch_memory(&self, batch: BatchId) -> Option<SharedMemory> {
        self.lock().batches.get(&batch).cloned()
    }

    fn set_uniform(&self, location: UniformLocation, kind: UniformKind, call: DeviceCall) -> bool {
        let mut state = self.lock();
        match state.uniform_kind(location) {
            Some(actual) if actual == kind => {
                state.calls.push(call);
                true
            }
            Some(actual) => {
                drop(state);
                self.log.append(format!(
                    "uniform {}: expected {actual:?}, got {kind:?}",
                    location.0
                ));
                false
            }
            None => {
                drop(state);
                self.log
                    .append(format!("uniform {} is not part of the bound shader", location.0));
                false
            }
        }
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn take_log(&self) -> String {
        self.log.take()
    }

    fn max_render_targets(&self) -> usize {
        self.max_targets
    }

    fn gen_texture(&self, width: u32, height: u32) -> Option<TextureHandle> {
        if width == 0 || height == 0 {
            self.log.append(format!("cannot create a {width}x{height} texture"));
            return None;
        }
        let mut state = self.lock();
        let handle = TextureHandle(state.fresh_handle());
        state.textures.insert(handle);
        state.calls.push(DeviceCall::GenTexture(handle));
        Some(handle)
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        let mut state = self.lock();
        state.textures.remove(&texture);
        state.calls.push(DeviceCall::DestroyTexture(texture));
    }

    fn gen_shader(&self, source: &ShaderSource) -> Option<ShaderHandle> {
        if source.wgsl.trim().is_empty() {
            self.log
                .append(format!("shader `{}`: empty source", source.label));
            return None;
        }

        let mut state = self.lock();
        let handle = ShaderHandle(state.fresh_handle());
        let kinds = source.uniforms.iter().map(|u| u.kind).collect();
        let names = source
            .uniforms
            .iter()
            .enumerate()
            .map(|(i, u)| (u.name.clone(), UniformLocation(i as u32)))
            .collect();
        state.shaders.insert(handle, kinds);
        state.shader_names.insert(handle, names);
        state.calls.push(DeviceCall::GenShader(handle));
        Some(handle)
    }

    fn destroy_shader(&self, shader: ShaderHandle) {
        let mut state = self.lock();
        state.shaders.remove(&shader);
        state.shader_names.remove(&shader);
        if state.bound_shader == Some(shader) {
            state.bound_shader = None;
        }
        state.calls.push(DeviceCall::DestroyShader(shader));
    }

    fn bind_shader(&self, shader: ShaderHandle) -> bool {
        let mut state = self.lock();
        if !state.shaders.contains_key(&shader) {
            drop(state);
            self.log.append(format!("cannot bind unknown {shader}"));
            return false;
        }
        state.bound_shader = Some(shader);
        state.calls.push(DeviceCall::BindShader(shader));
        true
    }

    fn unbind_shader(&self) {
        let mut state = self.lock();
        state.bound_shader = None;
        state.calls.push(DeviceCall::UnbindShader);
    }

    fn uniforms(&self, shader: ShaderHandle) -> HashMap<String, UniformLocation> {
        let mut state = self.lock();
        state.calls.push(DeviceCall::Uniforms(shader));
        state.shader_names.get(&shader).cloned().unwrap_or_default()
    }

    fn set_uniform_int(&self, location: UniformLocation, value: i32) -> bool {
        self.set_uniform(location, UniformKind::Int, DeviceCall::SetUniformInt(location, value))
    }

    fn set_uniform_double(&self, location: UniformLocation, value: f64) -> bool {
        self.set_uniform(
            location,
            UniformKind::Double,
            DeviceCall::SetUniformDouble(location, value),
        )
    }

    fn set_uniform_vector(&self, location: UniformLocation, value: Vec2) -> bool {
        self.set_uniform(
            location,
            UniformKind::Vector,
            DeviceCall::SetUniformVector(location, value),
        )
    }

    fn set_uniform_matrix(&self, location: UniformLocation, value: &Matrix33) -> bool {
        self.set_uniform(
            location,
            UniformKind::Matrix,
            DeviceCall::SetUniformMatrix(location, *value),
        )
    }

    fn bind_render_target(&self, slot: usize, texture: TextureHandle) -> bool {
        let mut state = self.lock();
        if slot >= self.max_targets || !state.textures.contains(&texture) {
            drop(state);
            self.log
                .append(format!("cannot bind {texture} to render target slot {slot}"));
            return false;
        }
        state.targets.insert(slot, texture);
        state.calls.push(DeviceCall::BindRenderTarget(slot, texture));
        true
    }

    fn unbind_render_target(&self, slot: usize) {
        let mut state = self.lock();
        state.targets.remove(&slot);
        state.calls.push(DeviceCall::UnbindRenderTarget(slot));
    }

    fn set_clear_color(&self, target: ClearTarget, color: Color) {
        self.lock().calls.push(DeviceCall::SetClearColor(target, color));
    }

    fn clear_render_targets(&self) {
        let mut state = self.lock();
        let targets = if state.targets.is_empty() {
            vec![TextureHandle::SCREEN]
        } else {
            state.targets.values().copied().collect()
        };
        state.calls.push(DeviceCall::ClearRenderTargets(targets));
    }

    fn gen_batch(&self, is_static: bool, attributes: &[VertexAttribute]) -> Option<Batch> {
        if validate_layout(attributes).is_none() {
            self.log
                .append(format!("unsupported vertex layout {attributes:?}"));
            return None;
        }

        let memory = SharedMemory::default();
        let capacity = vertex_size(attributes) * self.batch_vertices;
        let batch = Batch::new(is_static, attributes, capacity, Box::new(memory.clone()));

        let mut state = self.lock();
        state.batches.insert(batch.id(), memory);
        state.calls.push(DeviceCall::GenBatch(batch.id()));
        Some(batch)
    }

    fn destroy_batch(&self, batch: &Batch) {
        batch.destroy();
        let mut state = self.lock();
        state.batches.remove(&batch.id());
        state.calls.push(DeviceCall::DestroyBatch(batch.id()));
    }

    fn render_batch(&self, batch: &Batch) -> bool {
        let indices = batch.flush_indices();
        let mut state = self.lock();
        if !state.batches.contains_key(&batch.id()) {
            drop(state);
            self.log.append(format!("cannot render unknown batch {:?}", batch.id()));
            return false;
        }
        if state.bound_shader.is_none() {
            drop(state);
            self.log.append("render_batch without a bound shader");
            return false;
        }
        state.calls.push(DeviceCall::RenderBatch {
            batch: batch.id(),
            indices,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shader(device: &HeadlessDevice) -> ShaderHandle {
        device
            .gen_shader(
                &ShaderSource::new("test", "fn main() {}")
                    .with_uniform("u_time", UniformKind::Double)
                    .with_uniform("u_view", UniformKind::Matrix),
            )
            .unwrap()
    }

    #[test]
    fn uniform_locations_follow_declaration_order() {
        let device = HeadlessDevice::new();
        let s = shader(&device);
        let map = device.uniforms(s);
        assert_eq!(map["u_time"], UniformLocation(0));
        assert_eq!(map["u_view"], UniformLocation(1));
    }

    #[test]
    fn uniform_kind_mismatch_is_logged() {
        let device = HeadlessDevice::new();
        let s = shader(&device);
        device.bind_shader(s);
        assert!(device.set_uniform_double(UniformLocation(0), 1.5));
        assert!(!device.set_uniform_int(UniformLocation(0), 1));
        assert!(device.take_log().contains("expected Double"));
    }

    #[test]
    fn empty_shader_fails() {
        let device = HeadlessDevice::new();
        assert!(device.gen_shader(&ShaderSource::new("empty", "  ")).is_none());
        assert!(device.take_log().contains("empty source"));
    }

    #[test]
    fn clear_without_targets_clears_screen() {
        let device = HeadlessDevice::new();
        device.clear_render_targets();
        assert_eq!(
            device.calls(),
            vec![DeviceCall::ClearRenderTargets(vec![TextureHandle::SCREEN])]
        );
    }

    #[test]
    fn binding_unknown_texture_fails() {
        let device = HeadlessDevice::new();
        assert!(!device.bind_render_target(0, TextureHandle(99)));
        let t = device.gen_texture(8, 8).unwrap();
        assert!(device.bind_render_target(0, t));
        assert!(!device.bind_render_target(7, t));
    }

    #[test]
    fn gen_batch_rejects_bad_layout() {
        let device = HeadlessDevice::new();
        assert!(device.gen_batch(false, &[]).is_none());
        let b = device.gen_batch(true, &[VertexAttribute::Position]).unwrap();
        assert!(b.is_static());
        assert_eq!(b.capacity(), 8 * DEFAULT_BATCH_VERTICES);
    }

    #[test]
    fn render_requires_bound_shader() {
        let device = HeadlessDevice::new();
        let b = device.gen_batch(false, &[VertexAttribute::Position]).unwrap();
        assert!(!device.render_batch(&b));
        let s = shader(&device);
        device.bind_shader(s);
        assert!(device.render_batch(&b));
    }
}
