//! Per-frame drivers.
//!
//! Submodules overview
//! - [`control`] – the control thread's frame loop: physics, scripts, handoff
//! - [`render_thread`] – frame coordinator and the render collaborator trait
//! - [`hooks`] – engine, scene and physics operations exposed to Lua

pub mod control;
pub mod hooks;
pub mod render_thread;
