//! Hub mode tracking.

pub mod machine;

pub use machine::{DeviceMode, ModeMachine};
