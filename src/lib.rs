//! Isoflicker Library
//!
//! Synchronized audio-visual stimulus engine: an amplitude-modulated tone and a
//! full-field flicker driven at the same modulation frequency, with per-frame
//! timing telemetry.

pub mod audio;
pub mod control;
pub mod engine;
pub mod stimulus;
pub mod telemetry;
pub mod visual;
