//! Per-window presentation
//!
//! Each window owns a [`WindowSurface`] with two swap-chain slots. One slot
//! presents while the other is used to build a replacement during a resize,
//! so presentation never waits for the rebuild.

mod surface;
mod surface_tests;

pub use surface::{ResizeNotifier, SurfaceState, WindowId, WindowSurface};
