//! Collision shape cache.
//!
//! Building a collision shape is expensive for hulls and wasteful for
//! primitives, so every shape is built once per structural key and then
//! shared. A [`SharedShape`] is an `Arc`; two bodies created from the same
//! key hold the very same allocation.
//!
//! Keys:
//! - primitives: geometry kind plus the exact bit pattern of the scale
//!   (planes ignore scale, so all planes share one shape)
//! - meshes: mesh id plus scale, since the instance scale is baked into the
//!   hull points
//!
//! Shapes are never evicted. Mass properties are not cached here; each body
//! derives them from its own mass.

use crate::resources::physics::GeometryKind;
use crate::resources::scene::{MeshGeometry, MeshId};
use log::debug;
use nalgebra::{Isometry3, Point3, Vector3};
use rapier3d::prelude::SharedShape;
use rustc_hash::FxHashMap;

/// Scale as hashable bits; `-0.0` is folded into `0.0`.
fn scale_bits(scale: &Vector3<f32>) -> [u32; 3] {
    [
        (scale.x + 0.0).to_bits(),
        (scale.y + 0.0).to_bits(),
        (scale.z + 0.0).to_bits(),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrimitiveKey {
    kind: GeometryKind,
    scale: [u32; 3],
}

impl PrimitiveKey {
    pub fn new(kind: GeometryKind, scale: &Vector3<f32>) -> Self {
        let scale = match kind {
            GeometryKind::Plane => [0; 3],
            _ => scale_bits(scale),
        };
        Self { kind, scale }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshKey {
    mesh: MeshId,
    scale: [u32; 3],
}

impl MeshKey {
    pub fn new(mesh: MeshId, scale: &Vector3<f32>) -> Self {
        Self {
            mesh,
            scale: scale_bits(scale),
        }
    }
}

/// Structural-equality table of collision shapes.
#[derive(Default)]
pub struct ShapeCache {
    primitives: FxHashMap<PrimitiveKey, SharedShape>,
    meshes: FxHashMap<MeshKey, SharedShape>,
}

impl ShapeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shape for a primitive of the given kind and scale, built on first use.
    pub fn primitive(&mut self, kind: GeometryKind, scale: &Vector3<f32>) -> SharedShape {
        self.primitives
            .entry(PrimitiveKey::new(kind, scale))
            .or_insert_with(|| {
                debug!(target: "physics", "building {:?} shape for scale {:?}", kind, scale);
                build_primitive(kind, scale)
            })
            .clone()
    }

    /// Convex shape for a mesh at the given scale, built on first use.
    ///
    /// One hull per sub-mesh with the sub-mesh transform and `scale` applied
    /// to its points. A single sub-mesh yields a plain hull, several yield a
    /// compound.
    ///
    /// # Errors
    ///
    /// Fails when the mesh has no sub-meshes, or a sub-mesh has fewer than
    /// four points or no hull.
    pub fn mesh(
        &mut self,
        mesh: MeshId,
        geometry: &MeshGeometry,
        scale: &Vector3<f32>,
    ) -> Result<SharedShape, String> {
        let key = MeshKey::new(mesh, scale);
        if let Some(shape) = self.meshes.get(&key) {
            return Ok(shape.clone());
        }
        let shape = build_mesh_shape(geometry, scale)?;
        debug!(
            target: "physics",
            "built hull shape for mesh '{}' ({} sub-meshes)",
            geometry.name(),
            geometry.submeshes().len()
        );
        self.meshes.insert(key, shape.clone());
        Ok(shape)
    }

    pub fn primitive_count(&self) -> usize {
        self.primitives.len()
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }
}

fn build_primitive(kind: GeometryKind, scale: &Vector3<f32>) -> SharedShape {
    match kind {
        GeometryKind::Box => SharedShape::cuboid(scale.x / 2.0, scale.y / 2.0, scale.z / 2.0),
        GeometryKind::Sphere => SharedShape::ball(scale.x / 2.0),
        GeometryKind::Capsule => SharedShape::capsule_y(scale.y / 2.0, scale.x / 2.0),
        GeometryKind::Plane => SharedShape::halfspace(Vector3::y_axis()),
    }
}

fn build_mesh_shape(geometry: &MeshGeometry, scale: &Vector3<f32>) -> Result<SharedShape, String> {
    let mut hulls = Vec::with_capacity(geometry.submeshes().len());
    for (i, sub) in geometry.submeshes().iter().enumerate() {
        let points: Vec<Point3<f32>> = geometry
            .submesh_positions(sub)
            .map(|p| {
                let baked = sub.transform.transform_point(&p);
                Point3::from(baked.coords.component_mul(scale))
            })
            .collect();
        if points.len() < 4 {
            return Err(format!(
                "mesh '{}': sub-mesh {} has {} points, a hull needs at least 4",
                geometry.name(),
                i,
                points.len()
            ));
        }
        let hull = SharedShape::convex_hull(&points).ok_or_else(|| {
            format!(
                "mesh '{}': sub-mesh {} ({} points) has no convex hull",
                geometry.name(),
                i,
                points.len()
            )
        })?;
        hulls.push(hull);
    }
    match hulls.len() {
        0 => Err(format!("mesh '{}' has no sub-meshes", geometry.name())),
        1 => Ok(hulls.remove(0)),
        _ => Ok(SharedShape::compound(
            hulls
                .into_iter()
                .map(|hull| (Isometry3::identity(), hull))
                .collect(),
        )),
    }
}
