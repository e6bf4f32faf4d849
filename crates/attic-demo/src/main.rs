use std::f32::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{Context, Result};
use attic_engine::app::{AppConfig, AppHandle, Application, View, ViewState};
use attic_engine::device::{ShaderHandle, ShaderSource, UniformKind};
use attic_engine::logging::{LoggingConfig, init_logging};
use attic_engine::logic::{EntityId, Property, World};
use attic_engine::math::{Color, Matrix33, Vec2};
use attic_engine::props::{SpriteProperty, TransformProperty};
use attic_engine::render::graph::{ClearNode, NodeId, RenderLayerNode, RenderPathBuilder};

const WIDTH: u32 = 800;
const HEIGHT: u32 = 600;

/// Sprites per ring.
const RING_SPRITES: usize = 24;

/// (radius, degrees per second, sprite size)
const RINGS: [(f32, f32, f32); 2] = [(140.0, 40.0, 26.0), (230.0, -25.0, 18.0)];

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let config = AppConfig::default()
        .with_title("Attic demo")
        .with_size(WIDTH, HEIGHT)
        .with_vsync(true);

    Application::new(config).launch(Orbits::default())
}

/// Maps logical pixels (+Y down) to clip space.
#[rustfmt::skip]
fn pixel_to_clip(width: f32, height: f32) -> Matrix33 {
    Matrix33::from_rows([
        2.0 / width, 0.0, -1.0,
        0.0, -2.0 / height, 1.0,
        0.0, 0.0, 1.0,
    ])
}

/// Fully saturated hue at `t` in `[0, 1)`.
fn hue(t: f32) -> Color {
    let h = (t.fract() * 6.0).max(0.0);
    let x = 1.0 - (h % 2.0 - 1.0).abs();
    let (r, g, b) = match h as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    Color::rgb(r, g, b)
}

/// Two rings of sprites spinning in opposite directions.
#[derive(Default)]
struct Orbits {
    shader: Option<ShaderHandle>,
    running: Arc<AtomicBool>,
    /// Animation time in milliseconds, kept across pause and resume.
    elapsed_ms: Arc<AtomicU64>,
}

impl Orbits {
    /// Spawns a pivot entity and a ring of sprites parented to it.
    fn spawn_ring(
        app: &AppHandle,
        index: usize,
        (radius, _, size): (f32, f32, f32),
    ) -> Result<EntityId> {
        let center = Vec2::new(WIDTH as f32 / 2.0, HEIGHT as f32 / 2.0);
        let pivot = TransformProperty::new(center);
        let pivot_ref = pivot.handle();

        for i in 0..RING_SPRITES {
            let t = i as f32 / RING_SPRITES as f32;
            let offset = Vec2::new((t * TAU).cos(), (t * TAU).sin()) * radius;

            let mut transform = TransformProperty::new(offset);
            transform.set_parent(Some(pivot_ref.clone()))?;
            let sprite = SpriteProperty::new(Vec2::splat(size))
                .with_tint(hue(t + index as f32 * 0.5))
                .following(transform.handle());

            let properties: Vec<Box<dyn Property>> = vec![Box::new(transform), Box::new(sprite)];
            app.genius().create_entity(properties)?;
        }

        let properties: Vec<Box<dyn Property>> = vec![Box::new(pivot)];
        Ok(app.genius().create_entity(properties)?)
    }

    fn build_path(&self, app: &AppHandle, shader: ShaderHandle) -> Result<NodeId> {
        let mut b = RenderPathBuilder::new();

        let clear = b.add_node(ClearNode::screen());
        b.set_value(clear, "color", Color::rgb(0.05, 0.05, 0.08))?;

        let sprites = b.add_node(
            RenderLayerNode::new()
                .with_uniform("u_view", UniformKind::Matrix)
                .with_uniform("u_time", UniformKind::Double),
        );
        b.set_value(sprites, "shader", shader)?
            .set_value(sprites, "layer", app.renderer().layer_data("default"))?
            .set_value(sprites, "u_view", pixel_to_clip(WIDTH as f32, HEIGHT as f32))?
            .set_value(sprites, "u_time", self.elapsed_secs())?;
        // Drawing into the cleared screen orders the clear first.
        b.link(sprites, "target", clear, "result")?;

        app.renderer().set_render_path(b.build(sprites, "result")?);
        Ok(sprites)
    }

    fn elapsed_secs(&self) -> f64 {
        self.elapsed_ms.load(Ordering::Relaxed) as f64 / 1000.0
    }
}

impl View for Orbits {
    fn setup(&mut self, app: &AppHandle, _world: &mut World, state: ViewState) -> Result<()> {
        if let Some(ms) = state.get::<u64>("elapsed_ms") {
            self.elapsed_ms.store(*ms, Ordering::Relaxed);
        }

        let device = app.scene().device();
        let source = ShaderSource::new("sprite", include_str!("../shaders/sprite.wgsl"))
            .with_uniform("u_view", UniformKind::Matrix)
            .with_uniform("u_time", UniformKind::Double);
        let shader = device.create_shader(&source)?;
        self.shader = Some(shader);

        let mut pivots = Vec::with_capacity(RINGS.len());
        for (index, ring) in RINGS.iter().enumerate() {
            let pivot = Self::spawn_ring(app, index, *ring)
                .with_context(|| format!("spawning ring {index}"))?;
            pivots.push((pivot, ring.1));
        }

        let sprites = self.build_path(app, shader)?;

        // A fresh flag so that a step left over from a previous run stops.
        self.running = Arc::new(AtomicBool::new(true));
        let animation = Animation {
            app: app.clone(),
            running: self.running.clone(),
            elapsed_ms: self.elapsed_ms.clone(),
            time_node: sprites,
            pivots,
        };
        app.genius().submit_task(move |world| animation.step(world))?;

        log::info!("orbits: {} sprites", RINGS.len() * RING_SPRITES);
        Ok(())
    }

    fn stop(&mut self, app: &AppHandle, world: &mut World, _next: &mut ViewState) -> ViewState {
        self.running.store(false, Ordering::Release);
        app.renderer().clear_render_path();
        world.clear();
        if let Some(shader) = self.shader.take() {
            app.scene().device().destroy_shader(shader);
        }

        let mut saved = ViewState::new();
        saved.insert("elapsed_ms", self.elapsed_ms.load(Ordering::Relaxed));
        saved
    }
}

/// Self-resubmitting task: one animation step per scheduler tick.
struct Animation {
    app: AppHandle,
    running: Arc<AtomicBool>,
    elapsed_ms: Arc<AtomicU64>,
    time_node: NodeId,
    /// Pivot entity and its speed in degrees per second.
    pivots: Vec<(EntityId, f32)>,
}

impl Animation {
    fn step(self, world: &mut World) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Ok(());
        }

        let dt = self.app.genius().config().tick_interval;
        let elapsed = self.elapsed_ms.fetch_add(dt.as_millis() as u64, Ordering::Relaxed);
        for (id, speed) in &self.pivots {
            if let Some(pivot) = world
                .entity_mut(*id)
                .and_then(|e| e.property_mut::<TransformProperty>())
            {
                pivot.rotate_by(speed * dt.as_secs_f32());
            }
        }

        self.app
            .renderer()
            .set_path_value(self.time_node, "u_time", elapsed as f64 / 1000.0)?;

        let genius = self.app.genius().clone();
        genius.submit_task(move |world| self.step(world))?;
        Ok(())
    }
}
