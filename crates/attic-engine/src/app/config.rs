use crate::device::GpuInit;
use crate::logging::LoggingConfig;
use crate::logic::GeniusConfig;

/// Startup parameters of an [`Application`](super::Application).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub title: String,
    /// Logical window size.
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    /// Borderless fullscreen on the current monitor.
    pub fullscreen: bool,
    pub genius: GeniusConfig,
    pub gpu: GpuInit,
    /// Installs the logger on launch when set.
    pub logging: Option<LoggingConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Attic".to_string(),
            width: 800,
            height: 600,
            vsync: false,
            fullscreen: false,
            genius: GeniusConfig::default(),
            gpu: GpuInit::default(),
            logging: None,
        }
    }
}

impl AppConfig {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_fullscreen(mut self, fullscreen: bool) -> Self {
        self.fullscreen = fullscreen;
        self
    }

    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// GPU parameters with the present mode taken from `vsync`.
    pub fn gpu_init(&self) -> GpuInit {
        self.gpu.clone().with_vsync(self.vsync)
    }
}
