pub mod config;
pub mod control;
pub mod display;
pub mod dsp;
pub mod session;
pub mod telemetry;
pub mod wire;
