//! Time subsystem.
//!
//! `FrameClock` drives both loops of an application:
//! - the scheduler ticks it once per logic step and sleeps with `remaining`
//! - the window runtime ticks it once per presented frame

mod frame_clock;

pub use frame_clock::{FrameClock, FrameTime};
