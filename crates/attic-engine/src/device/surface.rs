use winit::dpi::PhysicalSize;

use super::GpuInit;

/// What the frame loop should do after [`Gpu::begin_frame`](super::Gpu::begin_frame) fails.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SurfaceErrorAction {
    /// The surface was configured again; the next frame should succeed.
    Reconfigured,
    /// Transient; drop this frame.
    SkipFrame,
    /// Unrecoverable, usually out of memory.
    Fatal,
}

/// One acquired surface texture and its view.
///
/// Hand it back through [`Gpu::present`](super::Gpu::present) promptly; no
/// other frame can be acquired while it is held.
pub struct GpuFrame {
    pub surface_texture: wgpu::SurfaceTexture,
    pub view: wgpu::TextureView,
}

/// A window surface with its live configuration.
pub(crate) struct WindowSurface<'w> {
    surface: wgpu::Surface<'w>,
    config: wgpu::SurfaceConfiguration,
    /// Last size reported by the window; may be zero while minimized.
    size: PhysicalSize<u32>,
}

impl<'w> WindowSurface<'w> {
    /// Picks format and modes from the adapter capabilities and configures
    /// the surface. `None` when the adapter cannot present to it at all.
    pub(crate) fn configure(
        surface: wgpu::Surface<'w>,
        adapter: &wgpu::Adapter,
        device: &wgpu::Device,
        size: PhysicalSize<u32>,
        init: &GpuInit,
    ) -> Option<Self> {
        let caps = surface.get_capabilities(adapter);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: pick_format(&caps, init.prefer_srgb)?,
            width: size.width,
            height: size.height,
            present_mode: pick_present_mode(&caps, init.present_mode),
            alpha_mode: pick_alpha_mode(&caps, init.alpha_mode),
            view_formats: Vec::new(),
            desired_maximum_frame_latency: init.desired_maximum_frame_latency,
        };
        surface.configure(device, &config);
        log::debug!(
            "surface {:?} {}x{} {:?}",
            config.format,
            config.width,
            config.height,
            config.present_mode
        );

        Some(Self {
            surface,
            config,
            size,
        })
    }

    #[inline]
    pub(crate) fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    #[inline]
    pub(crate) fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    fn has_area(&self) -> bool {
        self.size.width > 0 && self.size.height > 0
    }

    /// Tracks the new window size. A minimized window keeps the old
    /// configuration until it has an area again.
    pub(crate) fn resize(&mut self, device: &wgpu::Device, size: PhysicalSize<u32>) {
        self.size = size;
        if !self.has_area() {
            return;
        }
        self.config.width = size.width;
        self.config.height = size.height;
        self.surface.configure(device, &self.config);
    }

    pub(crate) fn acquire(&self) -> Result<GpuFrame, wgpu::SurfaceError> {
        let surface_texture = self.surface.get_current_texture()?;
        let view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        Ok(GpuFrame {
            surface_texture,
            view,
        })
    }

    pub(crate) fn recover(
        &self,
        device: &wgpu::Device,
        err: wgpu::SurfaceError,
    ) -> SurfaceErrorAction {
        use wgpu::SurfaceError as E;
        match err {
            E::Lost | E::Outdated => {
                if self.has_area() {
                    self.surface.configure(device, &self.config);
                }
                SurfaceErrorAction::Reconfigured
            }
            E::OutOfMemory => SurfaceErrorAction::Fatal,
            E::Timeout | E::Other => SurfaceErrorAction::SkipFrame,
        }
    }
}

const SRGB_FORMATS: [wgpu::TextureFormat; 2] = [
    wgpu::TextureFormat::Bgra8UnormSrgb,
    wgpu::TextureFormat::Rgba8UnormSrgb,
];

fn pick_format(caps: &wgpu::SurfaceCapabilities, prefer_srgb: bool) -> Option<wgpu::TextureFormat> {
    let preferred = SRGB_FORMATS
        .into_iter()
        .filter(|_| prefer_srgb)
        .find(|f| caps.formats.contains(f));
    preferred.or_else(|| caps.formats.first().copied())
}

/// `Fifo` is the only mode every surface supports.
fn pick_present_mode(
    caps: &wgpu::SurfaceCapabilities,
    requested: wgpu::PresentMode,
) -> wgpu::PresentMode {
    use wgpu::PresentMode as P;
    match requested {
        P::AutoVsync | P::AutoNoVsync => requested,
        mode if caps.present_modes.contains(&mode) => mode,
        mode => {
            log::warn!("present mode {mode:?} unsupported, falling back to Fifo");
            P::Fifo
        }
    }
}

fn pick_alpha_mode(
    caps: &wgpu::SurfaceCapabilities,
    requested: Option<wgpu::CompositeAlphaMode>,
) -> wgpu::CompositeAlphaMode {
    match requested {
        Some(mode) if caps.alpha_modes.contains(&mode) => mode,
        _ => caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(formats: &[wgpu::TextureFormat]) -> wgpu::SurfaceCapabilities {
        wgpu::SurfaceCapabilities {
            formats: formats.to_vec(),
            present_modes: vec![wgpu::PresentMode::Fifo, wgpu::PresentMode::Mailbox],
            alpha_modes: vec![wgpu::CompositeAlphaMode::Opaque],
            usages: wgpu::TextureUsages::RENDER_ATTACHMENT,
        }
    }

    // ── format ──

    #[test]
    fn srgb_preferred_when_offered() {
        use wgpu::TextureFormat::*;
        let c = caps(&[Bgra8Unorm, Rgba8UnormSrgb]);
        assert_eq!(pick_format(&c, true), Some(Rgba8UnormSrgb));
        assert_eq!(pick_format(&c, false), Some(Bgra8Unorm));
    }

    #[test]
    fn first_format_without_srgb() {
        use wgpu::TextureFormat::*;
        assert_eq!(pick_format(&caps(&[Rgba16Float]), true), Some(Rgba16Float));
        assert_eq!(pick_format(&caps(&[]), true), None);
    }

    // ── modes ──

    #[test]
    fn unsupported_present_mode_falls_back() {
        use wgpu::PresentMode::*;
        let c = caps(&[]);
        assert_eq!(pick_present_mode(&c, Mailbox), Mailbox);
        assert_eq!(pick_present_mode(&c, Immediate), Fifo);
        assert_eq!(pick_present_mode(&c, AutoNoVsync), AutoNoVsync);
    }

    #[test]
    fn alpha_mode_must_be_supported() {
        use wgpu::CompositeAlphaMode::*;
        let c = caps(&[]);
        assert_eq!(pick_alpha_mode(&c, Some(PreMultiplied)), Opaque);
        assert_eq!(pick_alpha_mode(&c, Some(Opaque)), Opaque);
        assert_eq!(pick_alpha_mode(&c, None), Opaque);
    }
}
