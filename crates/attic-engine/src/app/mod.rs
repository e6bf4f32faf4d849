//! Application shell.
//!
//! Owns the `winit` event loop and window, wires the wgpu device into the
//! scene and render path, and drives the scheduler through a stack of views.

mod config;
mod handle;
mod runtime;
mod view;

pub use config::AppConfig;
pub use handle::AppHandle;
pub use runtime::Application;
pub use view::{View, ViewState};
