//! Long-lived state owned by the control thread.
//!
//! Overview
//! - `indexregistry` – dense slots keyed by id, with a free list
//! - `engineconfig` – INI-backed configuration
//! - `frameclock` – frame delta, elapsed time and time scale
//! - `scene` – renderable instances and the render-thread snapshot
//! - `engine` – facade over scene and physics used by gameplay code
//! - `physics` – rigid-body world and collision shape cache
//! - `script_bridge` – embedded Lua, native operation registry, dispatch
pub mod engine;
pub mod engineconfig;
pub mod frameclock;
pub mod indexregistry;
pub mod physics;
pub mod scene;
pub mod script_bridge;
