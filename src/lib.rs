//! Tempest library.
//!
//! Runtime core of a real-time simulation: a physics world, a Lua script
//! bridge and a dedicated render thread advancing in lock-step over one
//! shared scene. Exposed as a library for the binary and integration tests.

pub mod game;
pub mod resources;
pub mod stub_generator;
pub mod systems;
