use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU64;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use wgpu::util::DeviceExt;

use crate::math::{Color, Matrix33, Vec2};
use crate::render::{Batch, BatchId, BatchStorage, VertexAttribute, VertexStorage, vertex_size};

use super::api::{
    ClearTarget, DeviceLog, GraphicsDevice, ShaderHandle, ShaderSource, TextureHandle,
    UniformKind, UniformLocation, validate_layout,
};

/// Vertex bytes per batch when none is configured.
pub const DEFAULT_BATCH_CAPACITY: usize = 64 * 1024;

/// Upper bound on simultaneously bound render targets, whatever the adapter allows.
const MAX_TARGETS: usize = 8;

// ── uniform block layout ──────────────────────────────────────────────────

/// (size, align) of a uniform member in the WGSL uniform address space.
/// `Double` is uploaded as `f32`.
const fn uniform_size_align(kind: UniformKind) -> (u64, u64) {
    match kind {
        UniformKind::Int | UniformKind::Double => (4, 4),
        UniformKind::Vector => (8, 8),
        UniformKind::Matrix => (48, 16),
    }
}

const fn align_to(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

/// Member offsets and total block size (a multiple of 16, zero if empty).
fn uniform_layout(kinds: &[UniformKind]) -> (Vec<u64>, u64) {
    let mut offsets = Vec::with_capacity(kinds.len());
    let mut cursor = 0;
    for kind in kinds {
        let (size, align) = uniform_size_align(*kind);
        cursor = align_to(cursor, align);
        offsets.push(cursor);
        cursor += size;
    }
    (offsets, align_to(cursor, 16))
}

fn vertex_format(attr: VertexAttribute) -> wgpu::VertexFormat {
    match attr {
        VertexAttribute::Position | VertexAttribute::TexCoord(_) => wgpu::VertexFormat::Float32x2,
        VertexAttribute::Color => wgpu::VertexFormat::Unorm8x4,
    }
}

fn shader_location(attr: VertexAttribute) -> u32 {
    match attr {
        VertexAttribute::Position => 0,
        VertexAttribute::Color => 1,
        VertexAttribute::TexCoord(n) => 2 + u32::from(n),
    }
}

fn vertex_attributes(layout: &[VertexAttribute]) -> Vec<wgpu::VertexAttribute> {
    let mut offset = 0;
    layout
        .iter()
        .map(|attr| {
            let out = wgpu::VertexAttribute {
                format: vertex_format(*attr),
                offset,
                shader_location: shader_location(*attr),
            };
            offset += attr.byte_size() as u64;
            out
        })
        .collect()
}

// ── batch storage ─────────────────────────────────────────────────────────

struct GpuBatchBuffers {
    vertices: wgpu::Buffer,
    indices: Mutex<Option<wgpu::Buffer>>,
}

impl GpuBatchBuffers {
    fn index_buffer(&self) -> Option<wgpu::Buffer> {
        self.indices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Batch storage writing through the queue into GPU buffers.
struct WgpuBatchStorage {
    device: wgpu::Device,
    queue: wgpu::Queue,
    buffers: Arc<GpuBatchBuffers>,
}

impl VertexStorage for WgpuBatchStorage {
    fn upload(&mut self, offset: usize, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        // Vertex sizes are multiples of four, so offsets and lengths stay copy-aligned.
        debug_assert_eq!(offset % 4, 0);
        debug_assert_eq!(bytes.len() % 4, 0);
        self.queue
            .write_buffer(&self.buffers.vertices, offset as u64, bytes);
    }
}

impl BatchStorage for WgpuBatchStorage {
    fn upload_indices(&mut self, indices: &[u32]) {
        if indices.is_empty() {
            return;
        }
        let needed = (indices.len() * 4) as u64;
        let mut slot = self
            .buffers
            .indices
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if slot.as_ref().is_none_or(|b| b.size() < needed) {
            if let Some(old) = slot.take() {
                old.destroy();
            }
            *slot = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("attic batch indices"),
                size: needed.next_power_of_two(),
                usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }
        if let Some(buffer) = slot.as_ref() {
            self.queue
                .write_buffer(buffer, 0, bytemuck::cast_slice(indices));
        }
    }

    fn release(&mut self) {
        self.buffers.vertices.destroy();
        if let Some(buffer) = self
            .buffers
            .indices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            buffer.destroy();
        }
    }
}

// ── device state ──────────────────────────────────────────────────────────

struct UniformSlot {
    name: String,
    kind: UniformKind,
    offset: u64,
}

struct ShaderEntry {
    label: String,
    module: wgpu::ShaderModule,
    uniforms: Vec<UniformSlot>,
    staging: Vec<u8>,
    bind_group_layout: Option<wgpu::BindGroupLayout>,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<Vec<VertexAttribute>, wgpu::RenderPipeline>,
}

struct TextureEntry {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct FrameState {
    encoder: wgpu::CommandEncoder,
    screen: wgpu::TextureView,
}

#[derive(Default)]
struct WgpuState {
    next_handle: u32,
    textures: HashMap<TextureHandle, TextureEntry>,
    shaders: HashMap<ShaderHandle, ShaderEntry>,
    batches: HashMap<BatchId, Arc<GpuBatchBuffers>>,
    bound_shader: Option<ShaderHandle>,
    targets: BTreeMap<usize, TextureHandle>,
    clear_colors: HashMap<ClearTarget, Color>,
    frame: Option<FrameState>,
}

impl WgpuState {
    fn fresh_handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    fn clear_color(&self, target: ClearTarget) -> Color {
        let fallback = match target {
            ClearTarget::Screen => Color::BLACK,
            ClearTarget::Slot(_) => Color::TRANSPARENT,
        };
        self.clear_colors.get(&target).copied().unwrap_or(fallback)
    }
}

/// [`GraphicsDevice`] backed by wgpu.
///
/// Commands are recorded between [`begin_frame`](Self::begin_frame) and
/// [`end_frame`](Self::end_frame); every draw and clear opens its own render
/// pass. Shaders must expose `vs_main` and `fs_main` entry points.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_format: wgpu::TextureFormat,
    batch_capacity: usize,
    log: DeviceLog,
    state: Mutex<WgpuState>,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, surface_format: wgpu::TextureFormat) -> Self {
        Self {
            device,
            queue,
            surface_format,
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            log: DeviceLog::default(),
            state: Mutex::new(WgpuState::default()),
        }
    }

    /// Sets the vertex byte capacity of batches created afterwards.
    pub fn with_batch_capacity(mut self, bytes: usize) -> Self {
        self.batch_capacity = bytes;
        self
    }

    fn lock(&self) -> MutexGuard<'_, WgpuState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts recording a frame that presents to `screen`.
    pub fn begin_frame(&self, screen: wgpu::TextureView) {
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("attic frame encoder"),
            });
        let mut state = self.lock();
        if state.frame.is_some() {
            log::warn!("begin_frame while a frame is open; dropping recorded commands");
        }
        state.frame = Some(FrameState { encoder, screen });
    }

    /// Finishes the open frame, returning its commands for submission.
    pub fn end_frame(&self) -> Option<wgpu::CommandBuffer> {
        let frame = self.lock().frame.take()?;
        Some(frame.encoder.finish())
    }

    fn set_uniform(&self, location: UniformLocation, kind: UniformKind, bytes: &[u8]) -> bool {
        let mut state = self.lock();
        let Some(handle) = state.bound_shader else {
            drop(state);
            self.log.append("set uniform without a bound shader");
            return false;
        };
        let Some(shader) = state.shaders.get_mut(&handle) else {
            drop(state);
            self.log.append(format!("bound {handle} no longer exists"));
            return false;
        };
        let Some(slot) = shader.uniforms.get(location.0 as usize) else {
            let label = shader.label.clone();
            drop(state);
            self.log
                .append(format!("shader `{label}`: no uniform at location {}", location.0));
            return false;
        };
        if slot.kind != kind {
            let msg = format!(
                "shader `{}`: uniform `{}` is {:?}, got {kind:?}",
                shader.label, slot.name, slot.kind
            );
            drop(state);
            self.log.append(msg);
            return false;
        }

        let start = slot.offset as usize;
        shader.staging[start..start + bytes.len()].copy_from_slice(bytes);
        true
    }

    fn create_pipeline(
        &self,
        shader: &ShaderEntry,
        layout: &[VertexAttribute],
    ) -> wgpu::RenderPipeline {
        let attributes = vertex_attributes(layout);
        let buffers = [wgpu::VertexBufferLayout {
            array_stride: vertex_size(layout) as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &attributes,
        }];

        self.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&format!("attic pipeline `{}`", shader.label)),
                layout: Some(&shader.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader.module,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &buffers,
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader.module,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: self.surface_format,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: Default::default(),
                multiview_mask: None,
                cache: None,
            })
    }
}

fn clear_pass(encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView, color: Color) {
    let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("attic clear pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(color.into()),
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
        multiview_mask: None,
    });
}

impl GraphicsDevice for WgpuDevice {
    fn take_log(&self) -> String {
        self.log.take()
    }

    fn max_render_targets(&self) -> usize {
        (self.device.limits().max_color_attachments as usize).clamp(1, MAX_TARGETS)
    }

    fn gen_texture(&self, width: u32, height: u32) -> Option<TextureHandle> {
        let max = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            self.log
                .append(format!("cannot create a {width}x{height} texture (max {max})"));
            return None;
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("attic render target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.surface_format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut state = self.lock();
        let handle = TextureHandle(state.fresh_handle());
        state.textures.insert(
            handle,
            TextureEntry {
                texture,
                view,
            },
        );
        Some(handle)
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        let mut state = self.lock();
        state.targets.retain(|_, t| *t != texture);
        if let Some(entry) = state.textures.remove(&texture) {
            entry.texture.destroy();
        }
    }

    fn gen_shader(&self, source: &ShaderSource) -> Option<ShaderHandle> {
        if source.wgsl.trim().is_empty() {
            self.log
                .append(format!("shader `{}`: empty source", source.label));
            return None;
        }

        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&source.label),
                source: wgpu::ShaderSource::Wgsl(source.wgsl.as_str().into()),
            });

        let kinds: Vec<_> = source.uniforms.iter().map(|u| u.kind).collect();
        let (offsets, block_size) = uniform_layout(&kinds);
        let uniforms = source
            .uniforms
            .iter()
            .zip(offsets)
            .map(|(decl, offset)| UniformSlot {
                name: decl.name.clone(),
                kind: decl.kind,
                offset,
            })
            .collect();

        let bind_group_layout = NonZeroU64::new(block_size).map(|size| {
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("attic uniform bgl"),
                    entries: &[wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: Some(size),
                        },
                        count: None,
                    }],
                })
        });

        let bind_group_layouts: Vec<&wgpu::BindGroupLayout> =
            bind_group_layout.iter().collect();
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("attic pipeline layout"),
                bind_group_layouts: &bind_group_layouts,
                immediate_size: 0,
            });

        let entry = ShaderEntry {
            label: source.label.clone(),
            module,
            uniforms,
            staging: vec![0; block_size as usize],
            bind_group_layout,
            pipeline_layout,
            pipelines: HashMap::new(),
        };

        let mut state = self.lock();
        let handle = ShaderHandle(state.fresh_handle());
        state.shaders.insert(handle, entry);
        log::debug!("created {handle} `{}`", source.label);
        Some(handle)
    }

    fn destroy_shader(&self, shader: ShaderHandle) {
        let mut state = self.lock();
        state.shaders.remove(&shader);
        if state.bound_shader == Some(shader) {
            state.bound_shader = None;
        }
    }

    fn bind_shader(&self, shader: ShaderHandle) -> bool {
        let mut state = self.lock();
        if !state.shaders.contains_key(&shader) {
            drop(state);
            self.log.append(format!("cannot bind unknown {shader}"));
            return false;
        }
        state.bound_shader = Some(shader);
        true
    }

    fn unbind_shader(&self) {
        self.lock().bound_shader = None;
    }

    fn uniforms(&self, shader: ShaderHandle) -> HashMap<String, UniformLocation> {
        self.lock()
            .shaders
            .get(&shader)
            .map(|entry| {
                entry
                    .uniforms
                    .iter()
                    .enumerate()
                    .map(|(i, u)| (u.name.clone(), UniformLocation(i as u32)))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn set_uniform_int(&self, location: UniformLocation, value: i32) -> bool {
        self.set_uniform(location, UniformKind::Int, bytemuck::bytes_of(&value))
    }

    fn set_uniform_double(&self, location: UniformLocation, value: f64) -> bool {
        let value = value as f32;
        self.set_uniform(location, UniformKind::Double, bytemuck::bytes_of(&value))
    }

    fn set_uniform_vector(&self, location: UniformLocation, value: Vec2) -> bool {
        self.set_uniform(location, UniformKind::Vector, bytemuck::bytes_of(&value))
    }

    fn set_uniform_matrix(&self, location: UniformLocation, value: &Matrix33) -> bool {
        let columns = value.to_std140_columns();
        self.set_uniform(location, UniformKind::Matrix, bytemuck::bytes_of(&columns))
    }

    fn bind_render_target(&self, slot: usize, texture: TextureHandle) -> bool {
        let mut state = self.lock();
        if slot >= self.max_render_targets() || !state.textures.contains_key(&texture) {
            drop(state);
            self.log
                .append(format!("cannot bind {texture} to render target slot {slot}"));
            return false;
        }
        state.targets.insert(slot, texture);
        true
    }

    fn unbind_render_target(&self, slot: usize) {
        self.lock().targets.remove(&slot);
    }

    fn set_clear_color(&self, target: ClearTarget, color: Color) {
        self.lock().clear_colors.insert(target, color);
    }

    fn clear_render_targets(&self) {
        let mut guard = self.lock();
        let state = &mut *guard;

        let passes: Vec<(Option<TextureHandle>, Color)> = if state.targets.is_empty() {
            vec![(None, state.clear_color(ClearTarget::Screen))]
        } else {
            state
                .targets
                .iter()
                .map(|(slot, tex)| (Some(*tex), state.clear_color(ClearTarget::Slot(*slot))))
                .collect()
        };

        let Some(frame) = state.frame.as_mut() else {
            drop(guard);
            self.log.append("clear outside of a frame");
            return;
        };
        for (texture, color) in passes {
            let view = match texture {
                None => &frame.screen,
                Some(t) => match state.textures.get(&t) {
                    Some(entry) => &entry.view,
                    None => continue,
                },
            };
            clear_pass(&mut frame.encoder, view, color);
        }
    }

    fn gen_batch(&self, is_static: bool, attributes: &[VertexAttribute]) -> Option<Batch> {
        if validate_layout(attributes).is_none() {
            self.log
                .append(format!("unsupported vertex layout {attributes:?}"));
            return None;
        }

        let stride = vertex_size(attributes);
        let capacity = self.batch_capacity / stride * stride;
        if capacity == 0 {
            self.log.append(format!(
                "batch capacity {} cannot hold one {stride}-byte vertex",
                self.batch_capacity
            ));
            return None;
        }

        let buffers = Arc::new(GpuBatchBuffers {
            vertices: self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("attic batch vertices"),
                size: capacity as u64,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            indices: Mutex::new(None),
        });
        let storage = WgpuBatchStorage {
            device: self.device.clone(),
            queue: self.queue.clone(),
            buffers: buffers.clone(),
        };

        let batch = Batch::new(is_static, attributes, capacity, Box::new(storage));
        self.lock().batches.insert(batch.id(), buffers);
        log::debug!("created batch {:?} for {attributes:?}", batch.id());
        Some(batch)
    }

    fn destroy_batch(&self, batch: &Batch) {
        batch.destroy();
        self.lock().batches.remove(&batch.id());
    }

    fn render_batch(&self, batch: &Batch) -> bool {
        let count = batch.flush_indices();

        let mut guard = self.lock();
        let state = &mut *guard;

        let Some(buffers) = state.batches.get(&batch.id()).cloned() else {
            drop(guard);
            self.log
                .append(format!("cannot render unknown batch {:?}", batch.id()));
            return false;
        };
        let Some(handle) = state.bound_shader else {
            drop(guard);
            self.log.append("render_batch without a bound shader");
            return false;
        };
        if state.frame.is_none() {
            drop(guard);
            self.log.append("render_batch outside of a frame");
            return false;
        }
        if count == 0 {
            return true;
        }
        let Some(index_buffer) = buffers.index_buffer() else {
            return true;
        };

        let Some(shader) = state.shaders.get_mut(&handle) else {
            drop(guard);
            self.log.append(format!("bound {handle} no longer exists"));
            return false;
        };
        if !shader.pipelines.contains_key(batch.attributes()) {
            let pipeline = self.create_pipeline(shader, batch.attributes());
            shader.pipelines.insert(batch.attributes().to_vec(), pipeline);
        }

        let bind_group = shader.bind_group_layout.as_ref().map(|layout| {
            let uniforms = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("attic uniforms"),
                    contents: &shader.staging,
                    usage: wgpu::BufferUsages::UNIFORM,
                });
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("attic uniform bind group"),
                layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniforms.as_entire_binding(),
                }],
            })
        });

        let Some(pipeline) = shader.pipelines.get(batch.attributes()) else {
            return false;
        };
        let Some(frame) = state.frame.as_mut() else {
            return false;
        };
        let view = match state.targets.values().next() {
            None => &frame.screen,
            Some(t) => match state.textures.get(t) {
                Some(entry) => &entry.view,
                None => &frame.screen,
            },
        };

        let mut pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("attic batch pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        pass.set_pipeline(pipeline);
        if let Some(bind_group) = bind_group.as_ref() {
            pass.set_bind_group(0, bind_group, &[]);
        }
        pass.set_vertex_buffer(0, buffers.vertices.slice(..));
        pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..count, 0, 0..1);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_block_follows_wgsl_alignment() {
        use UniformKind::*;
        let (offsets, size) = uniform_layout(&[Double, Vector, Matrix, Int]);
        assert_eq!(offsets, vec![0, 8, 16, 64]);
        assert_eq!(size, 80);
    }

    #[test]
    fn empty_uniform_block_has_no_size() {
        assert_eq!(uniform_layout(&[]), (vec![], 0));
    }

    #[test]
    fn vertex_attributes_are_interleaved() {
        let attrs = vertex_attributes(&[
            VertexAttribute::Position,
            VertexAttribute::Color,
            VertexAttribute::TexCoord(1),
        ]);
        let offsets: Vec<_> = attrs.iter().map(|a| a.offset).collect();
        let locations: Vec<_> = attrs.iter().map(|a| a.shader_location).collect();
        assert_eq!(offsets, vec![0, 8, 12]);
        assert_eq!(locations, vec![0, 1, 3]);
        assert_eq!(attrs[1].format, wgpu::VertexFormat::Unorm8x4);
    }
}
