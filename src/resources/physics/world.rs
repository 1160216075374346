//! The physics world: body lifecycle, stepping and scene synchronisation.
//!
//! # Lifecycle
//!
//! ```text
//! Unregistered --add_object--> Active(Dynamic | Static | Kinematic) --remove_object--> Unregistered
//! ```
//!
//! Body records live in an [`IndexRegistry`] keyed by [`InstanceId`], so
//! iterating every body walks a dense array and a removed body's slot is
//! reused by the next insertion.
//!
//! # Time
//!
//! [`tick`](PhysicsWorld::tick) is the only place simulation time advances.
//! Elapsed time accumulates and is consumed in fixed steps, at most
//! `max_substeps` per tick. Time beyond that is dropped so a long stall can
//! not snowball into an ever longer catch-up.
//!
//! # External mutation
//!
//! Every setter wakes the body it touches; a sleeping body would otherwise
//! ignore the new state until something else disturbed it.
//!
//! Addressing an id that was never added is a caller bug and panics.

use crate::resources::engineconfig::PhysicsConfig;
use crate::resources::indexregistry::IndexRegistry;
use crate::resources::physics::shapecache::ShapeCache;
use crate::resources::physics::{GeometryKind, MotionKind};
use crate::resources::scene::{InstanceId, MeshGeometry, MeshId, Scene};
use log::{debug, warn};
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use rapier3d::prelude::{
    BroadPhase, CCDSolver, ColliderBuilder, ColliderHandle, ColliderSet, ImpulseJointSet,
    IntegrationParameters, IslandManager, MultibodyJointSet, NarrowPhase, PhysicsPipeline,
    RigidBody, RigidBodyBuilder, RigidBodyHandle, RigidBodySet, SharedShape,
};
use std::time::Duration;

/// Physics-side state of one instance.
#[derive(Clone)]
pub struct BodyRecord {
    pub id: InstanceId,
    pub body: RigidBodyHandle,
    pub collider: ColliderHandle,
    pub motion: MotionKind,
    pub shape: SharedShape,
    pub mass: f32,
    pub restitution: f32,
}

/// One contact manifold between two touching bodies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Manifold {
    pub a: InstanceId,
    pub b: InstanceId,
    /// Contact normal in world space, pointing from `a` towards `b`.
    pub normal: Vector3<f32>,
    pub points: usize,
    /// Smallest separation among the points; negative means penetration.
    pub depth: f32,
}

/// Owns the simulation, the body registry and the shape cache.
pub struct PhysicsWorld {
    gravity: Vector3<f32>,
    integration_parameters: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: BroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    shapes: ShapeCache,
    objects: IndexRegistry<InstanceId, BodyRecord>,
    fixed_step: Duration,
    max_substeps: u32,
    accumulator: Duration,
    steps: u64,
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new(&PhysicsConfig::default())
    }
}

impl PhysicsWorld {
    pub fn new(config: &PhysicsConfig) -> Self {
        let fixed_step = config.step_duration();
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = fixed_step.as_secs_f32();
        Self {
            gravity: Vector3::new(0.0, config.gravity_y, 0.0),
            integration_parameters,
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: BroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            shapes: ShapeCache::new(),
            objects: IndexRegistry::new(),
            fixed_step,
            max_substeps: config.max_substeps.max(1),
            accumulator: Duration::ZERO,
            steps: 0,
        }
    }

    /// Add a body with primitive geometry.
    ///
    /// A `DynamicRigid` request with `mass <= 0` becomes a static body, since
    /// a massless body can not be integrated. Kinematic bodies never sleep.
    /// Capsules may only turn about the vertical axis so characters do not
    /// tip over. Planes keep their position but always face +Y.
    ///
    /// # Panics
    ///
    /// Panics if `id` already has a body.
    #[allow(clippy::too_many_arguments)]
    pub fn add_object(
        &mut self,
        id: InstanceId,
        motion: MotionKind,
        kind: GeometryKind,
        position: Vector3<f32>,
        rotation: UnitQuaternion<f32>,
        scale: Vector3<f32>,
        mass: f32,
        restitution: f32,
    ) {
        let shape = self.shapes.primitive(kind, &scale);
        let motion = if motion == MotionKind::DynamicRigid && mass <= 0.0 {
            debug!(target: "physics", "instance {} has no mass, adding it as static", id);
            MotionKind::StaticRigid
        } else {
            motion
        };
        let rotation = match kind {
            GeometryKind::Plane => UnitQuaternion::identity(),
            _ => rotation,
        };
        self.insert_body(
            id,
            motion,
            shape,
            Isometry3::from_parts(Translation3::from(position), rotation),
            kind == GeometryKind::Capsule,
            mass,
            restitution,
        );
    }

    /// Add a body whose collider is the convex hull of a mesh.
    ///
    /// Mesh bodies are massless: a `DynamicRigid` request is demoted to
    /// static with a warning. Kinematic mesh bodies stay kinematic.
    ///
    /// # Errors
    ///
    /// Fails when no hull can be built from the mesh, see [`ShapeCache::mesh`].
    #[allow(clippy::too_many_arguments)]
    pub fn add_mesh_object(
        &mut self,
        id: InstanceId,
        motion: MotionKind,
        mesh: MeshId,
        geometry: &MeshGeometry,
        position: Vector3<f32>,
        rotation: UnitQuaternion<f32>,
        scale: Vector3<f32>,
    ) -> Result<(), String> {
        let shape = self.shapes.mesh(mesh, geometry, &scale)?;
        let motion = if motion == MotionKind::DynamicRigid {
            warn!(
                target: "physics",
                "instance {}: mesh colliders are massless, adding it as static",
                id
            );
            MotionKind::StaticRigid
        } else {
            motion
        };
        self.insert_body(
            id,
            motion,
            shape,
            Isometry3::from_parts(Translation3::from(position), rotation),
            false,
            0.0,
            0.0,
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_body(
        &mut self,
        id: InstanceId,
        motion: MotionKind,
        shape: SharedShape,
        pose: Isometry3<f32>,
        upright: bool,
        mass: f32,
        restitution: f32,
    ) {
        assert!(
            !self.objects.contains(id),
            "PhysicsWorld: instance {} already has a body",
            id
        );
        let builder = match motion {
            MotionKind::DynamicRigid => RigidBodyBuilder::dynamic(),
            MotionKind::StaticRigid => RigidBodyBuilder::fixed(),
            MotionKind::Kinematic => RigidBodyBuilder::kinematic_position_based().can_sleep(false),
        };
        let mut builder = builder.position(pose).user_data(id as u128);
        if upright {
            builder = builder.enabled_rotations(false, true, false);
        }
        let body = self.bodies.insert(builder.build());

        let collider = ColliderBuilder::new(shape.clone())
            .restitution(restitution)
            .user_data(id as u128);
        let collider = match motion {
            MotionKind::DynamicRigid => collider.mass(mass),
            _ => collider.density(0.0),
        };
        let collider = self
            .colliders
            .insert_with_parent(collider.build(), body, &mut self.bodies);

        let slot = self.objects.insert(
            id,
            BodyRecord {
                id,
                body,
                collider,
                motion,
                shape,
                mass: if motion == MotionKind::DynamicRigid { mass } else { 0.0 },
                restitution,
            },
        );
        debug!(target: "physics", "instance {} added as {:?} in slot {}", id, motion, slot);
    }

    /// Detach and destroy the body of `id`, freeing its slot.
    ///
    /// The shared shape stays in the cache.
    pub fn remove_object(&mut self, id: InstanceId) {
        let record = self.objects.erase(id);
        self.bodies.remove(
            record.body,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
        debug!(target: "physics", "instance {} removed", id);
    }

    /// Advance the simulation by `delta`. Returns the number of fixed steps
    /// actually taken.
    pub fn tick(&mut self, delta: Duration) -> u32 {
        self.accumulator += delta;
        let step_nanos = self.fixed_step.as_nanos().max(1);
        let due = self.accumulator.as_nanos() / step_nanos;
        let remainder = self.accumulator.as_nanos() % step_nanos;
        self.accumulator = Duration::from_nanos(remainder as u64);

        let steps = due.min(self.max_substeps as u128) as u32;
        if due > steps as u128 {
            debug!(
                target: "physics",
                "dropping {} of {} due steps",
                due - steps as u128,
                due
            );
        }
        for _ in 0..steps {
            self.step();
        }
        steps
    }

    fn step(&mut self) {
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            None,
            &(),
            &(),
        );
        self.steps += 1;
    }

    /// Write the pose of every non-static body into its scene instance.
    ///
    /// Reads simulation state only, so calling it again without a `tick` in
    /// between writes the same values. Bodies without a scene instance are
    /// skipped.
    pub fn update_dynamic_objects(&self, scene: &mut Scene) {
        for (_, record) in self.objects.iter() {
            if record.motion == MotionKind::StaticRigid || !scene.contains(record.id) {
                continue;
            }
            let body = &self.bodies[record.body];
            scene.set_instance_pose(record.id, *body.translation(), *body.rotation());
        }
    }

    pub fn set_instance_position(&mut self, id: InstanceId, position: Vector3<f32>) {
        let body = self.body_mut(id);
        let pose = Isometry3::from_parts(Translation3::from(position), *body.rotation());
        body.set_position(pose, true);
        body.wake_up(true);
    }

    pub fn translate_instance(&mut self, id: InstanceId, offset: Vector3<f32>) {
        let body = self.body_mut(id);
        let position = body.translation() + offset;
        let pose = Isometry3::from_parts(Translation3::from(position), *body.rotation());
        body.set_position(pose, true);
        body.wake_up(true);
    }

    pub fn set_instance_rotation(&mut self, id: InstanceId, rotation: UnitQuaternion<f32>) {
        let body = self.body_mut(id);
        let pose = Isometry3::from_parts(Translation3::from(*body.translation()), rotation);
        body.set_position(pose, true);
        body.wake_up(true);
    }

    pub fn set_instance_linear_velocity(&mut self, id: InstanceId, velocity: Vector3<f32>) {
        let body = self.body_mut(id);
        body.set_linvel(velocity, true);
        body.wake_up(true);
    }

    pub fn apply_impulse(&mut self, id: InstanceId, impulse: Vector3<f32>) {
        let body = self.body_mut(id);
        body.apply_impulse(impulse, true);
        body.wake_up(true);
    }

    pub fn body_position(&self, id: InstanceId) -> Vector3<f32> {
        *self.body(id).translation()
    }

    pub fn body_rotation(&self, id: InstanceId) -> UnitQuaternion<f32> {
        *self.body(id).rotation()
    }

    pub fn linear_velocity(&self, id: InstanceId) -> Vector3<f32> {
        *self.body(id).linvel()
    }

    pub fn is_sleeping(&self, id: InstanceId) -> bool {
        self.body(id).is_sleeping()
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.objects.contains(id)
    }

    pub fn record(&self, id: InstanceId) -> &BodyRecord {
        match self.objects.get(id) {
            Some(record) => record,
            None => panic!("PhysicsWorld: instance {} has no body", id),
        }
    }

    /// Registry slot of `id`, if it has a body.
    pub fn slot_of(&self, id: InstanceId) -> Option<usize> {
        self.objects.slot(id)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn shape_cache(&self) -> &ShapeCache {
        &self.shapes
    }

    pub fn rigid_body(&self, id: InstanceId) -> &RigidBody {
        self.body(id)
    }

    /// Length of one internal step.
    pub fn fixed_step(&self) -> Duration {
        self.fixed_step
    }

    /// Fixed steps taken since creation.
    pub fn step_count(&self) -> u64 {
        self.steps
    }

    /// Number of manifolds with at least one contact point.
    pub fn get_manifold_count(&self) -> usize {
        self.get_manifolds().len()
    }

    /// Every manifold with at least one contact point, between bodies that
    /// are currently touching.
    pub fn get_manifolds(&self) -> Vec<Manifold> {
        let mut out = Vec::new();
        for pair in self.narrow_phase.contact_pairs() {
            if !pair.has_any_active_contact {
                continue;
            }
            let (Some(c1), Some(c2)) = (
                self.colliders.get(pair.collider1),
                self.colliders.get(pair.collider2),
            ) else {
                continue;
            };
            for manifold in &pair.manifolds {
                if manifold.points.is_empty() {
                    continue;
                }
                let depth = manifold
                    .points
                    .iter()
                    .map(|p| p.dist)
                    .fold(f32::MAX, f32::min);
                out.push(Manifold {
                    a: c1.user_data as InstanceId,
                    b: c2.user_data as InstanceId,
                    normal: manifold.data.normal,
                    points: manifold.points.len(),
                    depth,
                });
            }
        }
        out
    }

    /// Whether `a` and `b` share a manifold with contact points.
    pub fn is_touching(&self, a: InstanceId, b: InstanceId) -> bool {
        self.get_manifolds()
            .iter()
            .any(|m| (m.a == a && m.b == b) || (m.a == b && m.b == a))
    }

    fn body(&self, id: InstanceId) -> &RigidBody {
        &self.bodies[self.record(id).body]
    }

    fn body_mut(&mut self, id: InstanceId) -> &mut RigidBody {
        let handle = self.record(id).body;
        &mut self.bodies[handle]
    }
}
