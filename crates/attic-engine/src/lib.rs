//! Attic engine crate.
//!
//! Entities made of properties are simulated on a dedicated scheduler thread
//! ([`logic::Genius`]); drawable properties are packed into GPU batches per
//! layer and drawn by a pull-based render graph ([`render::graph`]) on the
//! window thread.

pub mod app;
pub mod device;
pub mod error;
pub mod logging;
pub mod logic;
pub mod math;
pub mod props;
pub mod render;
pub mod time;

pub use app::{AppConfig, AppHandle, Application, View, ViewState};
pub use error::EngineError;
