//! Graphics devices.
//!
//! [`GraphicsDevice`] is the contract the render graph and batches draw
//! through. Two implementations exist:
//! - [`WgpuDevice`] records into a wgpu command encoder for the window surface
//! - [`HeadlessDevice`] records calls in memory
//!
//! [`Gpu`] owns the wgpu instance, device and surface of the window.

mod api;
mod gpu;
mod headless;
mod init;
mod surface;
mod wgpu_device;

pub use api::{
    ClearTarget, DeviceLog, GraphicsDevice, ShaderHandle, ShaderSource, TextureHandle,
    UniformDecl, UniformKind, UniformLocation,
};
pub(crate) use api::validate_layout;
pub use gpu::Gpu;
pub use headless::{DEFAULT_BATCH_VERTICES, DeviceCall, HeadlessDevice};
pub use init::GpuInit;
pub use surface::{GpuFrame, SurfaceErrorAction};
pub use wgpu_device::{DEFAULT_BATCH_CAPACITY, WgpuDevice};
