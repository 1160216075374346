//! Rigid-body simulation.
//!
//! - [`shapecache`] - collision shapes deduplicated by structural key
//! - [`world`] - the simulation itself, body lifecycle and scene sync
//!
//! Bodies are keyed by the scene's [`InstanceId`](crate::resources::scene::InstanceId)
//! and simulated with `rapier3d`.

pub mod shapecache;
pub mod world;

pub use shapecache::ShapeCache;
pub use world::{BodyRecord, Manifold, PhysicsWorld};

/// How a body moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionKind {
    /// Integrated under gravity and contact forces.
    DynamicRigid,
    /// Never moves on its own and is not integrated.
    StaticRigid,
    /// Moved by the caller; pushes dynamic bodies but is not pushed back.
    Kinematic,
}

/// Primitive collision geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    /// Half-extents are `scale / 2`.
    Box,
    /// Radius is `scale.x / 2`.
    Sphere,
    /// Upright capsule, radius `scale.x / 2`, segment length `scale.y`.
    Capsule,
    /// Infinite ground plane with normal +Y. Orientation and scale are ignored.
    Plane,
}
