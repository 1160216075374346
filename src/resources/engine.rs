//! Engine facade shared by the control loop and scripts.
//!
//! Gameplay code addresses instances by id without caring whether they have
//! a body. Reads prefer the physics pose when there is one, writes go to the
//! scene and to the body.

use crate::resources::physics::{GeometryKind, MotionKind, PhysicsWorld};
use crate::resources::scene::{Dynamism, InstanceId, MeshId, Scene, Transform};
use log::{debug, info};
use nalgebra::{UnitQuaternion, Vector3};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Primitive body description for [`Engine::add_body_instance`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyDesc {
    pub motion: MotionKind,
    pub geometry: GeometryKind,
    pub mass: f32,
    pub restitution: f32,
}

impl BodyDesc {
    pub fn dynamic(geometry: GeometryKind, mass: f32) -> Self {
        Self {
            motion: MotionKind::DynamicRigid,
            geometry,
            mass,
            restitution: 0.0,
        }
    }

    pub fn fixed(geometry: GeometryKind) -> Self {
        Self {
            motion: MotionKind::StaticRigid,
            geometry,
            mass: 0.0,
            restitution: 0.0,
        }
    }

    pub fn kinematic(geometry: GeometryKind) -> Self {
        Self {
            motion: MotionKind::Kinematic,
            geometry,
            mass: 0.0,
            restitution: 0.0,
        }
    }

    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution;
        self
    }
}

pub struct Engine {
    scene: Rc<RefCell<Scene>>,
    physics: Rc<RefCell<PhysicsWorld>>,
    quit_requested: bool,
    removed: Vec<InstanceId>,
    elapsed: Duration,
    frame_count: u64,
}

fn dynamism_of(motion: MotionKind) -> Dynamism {
    match motion {
        MotionKind::StaticRigid => Dynamism::Static,
        MotionKind::DynamicRigid | MotionKind::Kinematic => Dynamism::Dynamic,
    }
}

impl Engine {
    pub fn new(scene: Rc<RefCell<Scene>>, physics: Rc<RefCell<PhysicsWorld>>) -> Self {
        Self {
            scene,
            physics,
            quit_requested: false,
            removed: Vec::new(),
            elapsed: Duration::ZERO,
            frame_count: 0,
        }
    }

    pub fn scene(&self) -> Rc<RefCell<Scene>> {
        self.scene.clone()
    }

    pub fn physics(&self) -> Rc<RefCell<PhysicsWorld>> {
        self.physics.clone()
    }

    /// Add a scene instance together with a primitive body.
    pub fn add_body_instance(
        &mut self,
        name: &str,
        mesh: MeshId,
        transform: Transform,
        body: BodyDesc,
    ) -> InstanceId {
        let id = self.scene.borrow_mut().add_instance(
            name,
            mesh,
            transform,
            dynamism_of(body.motion),
        );
        self.physics.borrow_mut().add_object(
            id,
            body.motion,
            body.geometry,
            transform.position,
            transform.rotation,
            transform.scale,
            body.mass,
            body.restitution,
        );
        id
    }

    /// Add a scene instance whose body is a hull of its own mesh.
    ///
    /// # Errors
    ///
    /// Fails when no collider can be built from the mesh. The scene instance
    /// is not kept in that case.
    pub fn add_mesh_body_instance(
        &mut self,
        name: &str,
        mesh: MeshId,
        transform: Transform,
        motion: MotionKind,
    ) -> Result<InstanceId, String> {
        let mut scene = self.scene.borrow_mut();
        let id = scene.add_instance(name, mesh, transform, dynamism_of(motion));
        let added = self.physics.borrow_mut().add_mesh_object(
            id,
            motion,
            mesh,
            scene.mesh(mesh),
            transform.position,
            transform.rotation,
            transform.scale,
        );
        if let Err(e) = added {
            scene.remove_instance(id);
            return Err(format!("{}: {}", name, e));
        }
        Ok(id)
    }

    pub fn get_instance_position(&self, id: InstanceId) -> Vector3<f32> {
        let physics = self.physics.borrow();
        if physics.contains(id) {
            physics.body_position(id)
        } else {
            self.scene.borrow().get_instance_position(id)
        }
    }

    pub fn set_instance_position(&mut self, id: InstanceId, position: Vector3<f32>) {
        self.scene.borrow_mut().set_instance_position(id, position);
        let mut physics = self.physics.borrow_mut();
        if physics.contains(id) {
            physics.set_instance_position(id, position);
        }
    }

    pub fn translate_instance(&mut self, id: InstanceId, offset: Vector3<f32>) {
        self.scene.borrow_mut().translate_instance(id, offset);
        let mut physics = self.physics.borrow_mut();
        if physics.contains(id) {
            physics.translate_instance(id, offset);
        }
    }

    /// Orient an instance from Euler angles in radians (roll, pitch, yaw).
    pub fn set_instance_rotation(&mut self, id: InstanceId, euler: Vector3<f32>) {
        let rotation = UnitQuaternion::from_euler_angles(euler.x, euler.y, euler.z);
        self.scene.borrow_mut().set_instance_rotation(id, rotation);
        let mut physics = self.physics.borrow_mut();
        if physics.contains(id) {
            physics.set_instance_rotation(id, rotation);
        }
    }

    /// Move only what is drawn. The body, if any, is left where it is and
    /// will overwrite the scene pose on the next physics sync.
    pub fn set_graphics_instance_position(&mut self, id: InstanceId, position: Vector3<f32>) {
        self.scene.borrow_mut().set_instance_position(id, position);
    }

    pub fn get_instance_id_by_name(&self, name: &str) -> Option<InstanceId> {
        self.scene.borrow().instance_id_by_name(name)
    }

    /// Pose of the body of `id`, or `None` if it has no body.
    pub fn get_physics_body_position(&self, id: InstanceId) -> Option<Vector3<f32>> {
        let physics = self.physics.borrow();
        physics.contains(id).then(|| physics.body_position(id))
    }

    /// # Panics
    ///
    /// Panics if `id` has no body.
    pub fn apply_impulse_to_instance(&mut self, id: InstanceId, impulse: Vector3<f32>) {
        self.physics.borrow_mut().apply_impulse(id, impulse);
    }

    /// Queue an instance and its body for removal.
    ///
    /// Nothing is destroyed until [`apply_removals`](Self::apply_removals),
    /// which the control loop calls after the script tick, so every script
    /// function still due this tick sees the instance intact. Queuing the
    /// same id twice is harmless.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not in the scene.
    pub fn remove_instance(&mut self, id: InstanceId) {
        assert!(
            self.scene.borrow().contains(id),
            "Engine: unknown instance {}",
            id
        );
        if !self.removed.contains(&id) {
            self.removed.push(id);
            debug!("instance {} queued for removal", id);
        }
    }

    /// Destroy every queued instance and its body. Returns the removed ids
    /// in queue order.
    pub fn apply_removals(&mut self) -> Vec<InstanceId> {
        let removed = std::mem::take(&mut self.removed);
        let mut physics = self.physics.borrow_mut();
        let mut scene = self.scene.borrow_mut();
        for &id in &removed {
            if physics.contains(id) {
                physics.remove_object(id);
            }
            scene.remove_instance(id);
        }
        removed
    }

    /// Ids queued for removal and not yet applied.
    pub fn pending_removals(&self) -> &[InstanceId] {
        &self.removed
    }

    pub fn request_quit(&mut self) {
        if !self.quit_requested {
            info!("quit requested");
        }
        self.quit_requested = true;
    }

    pub fn quit_requested(&self) -> bool {
        self.quit_requested
    }

    /// Account for one control frame of `delta`.
    pub fn advance(&mut self, delta: Duration) {
        self.elapsed += delta;
        self.frame_count += 1;
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::scene::MeshGeometry;
    use nalgebra::Point3;

    const EPSILON: f32 = 1e-4;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    fn engine() -> (Engine, MeshId) {
        let scene = Rc::new(RefCell::new(Scene::new()));
        let mesh = scene.borrow_mut().add_mesh(MeshGeometry::unit_cube("cube"));
        let physics = Rc::new(RefCell::new(PhysicsWorld::default()));
        (Engine::new(scene, physics), mesh)
    }

    #[test]
    fn positions_follow_the_body_when_there_is_one() {
        let (mut engine, mesh) = engine();
        let crate_id = engine.add_body_instance(
            "crate",
            mesh,
            Transform::from_position(Vector3::new(0.0, 5.0, 0.0)),
            BodyDesc::dynamic(GeometryKind::Box, 1.0),
        );
        let prop = engine.scene().borrow_mut().add_instance(
            "prop",
            mesh,
            Transform::from_position(Vector3::new(1.0, 0.0, 0.0)),
            Dynamism::Static,
        );

        engine.set_instance_position(crate_id, Vector3::new(2.0, 3.0, 4.0));
        assert_eq!(engine.get_instance_position(crate_id), Vector3::new(2.0, 3.0, 4.0));
        assert_eq!(
            engine.get_physics_body_position(crate_id),
            Some(Vector3::new(2.0, 3.0, 4.0))
        );
        assert_eq!(engine.scene().borrow().get_instance_position(crate_id), Vector3::new(2.0, 3.0, 4.0));

        engine.translate_instance(prop, Vector3::new(0.0, 1.0, 0.0));
        assert_eq!(engine.get_instance_position(prop), Vector3::new(1.0, 1.0, 0.0));
        assert_eq!(engine.get_physics_body_position(prop), None);
    }

    #[test]
    fn graphics_position_does_not_move_the_body() {
        let (mut engine, mesh) = engine();
        let id = engine.add_body_instance(
            "crate",
            mesh,
            Transform::default(),
            BodyDesc::kinematic(GeometryKind::Box),
        );
        engine.set_graphics_instance_position(id, Vector3::new(9.0, 0.0, 0.0));
        assert_eq!(engine.scene().borrow().get_instance_position(id).x, 9.0);
        assert_eq!(engine.get_instance_position(id), Vector3::zeros());
    }

    #[test]
    fn rotation_is_taken_from_euler_angles() {
        let (mut engine, mesh) = engine();
        let id = engine.add_body_instance(
            "door",
            mesh,
            Transform::default(),
            BodyDesc::kinematic(GeometryKind::Box),
        );
        engine.set_instance_rotation(id, Vector3::new(0.0, 0.0, std::f32::consts::FRAC_PI_2));
        let rotation = engine.physics().borrow().body_rotation(id);
        let turned = rotation * Vector3::x();
        assert!(approx_eq(turned.x, 0.0));
        assert!(approx_eq(turned.y, 1.0));
    }

    #[test]
    fn removal_waits_for_apply_removals() {
        let (mut engine, mesh) = engine();
        let id = engine.add_body_instance(
            "crate",
            mesh,
            Transform::from_position(Vector3::new(0.0, 2.0, 0.0)),
            BodyDesc::dynamic(GeometryKind::Box, 1.0),
        );
        engine.remove_instance(id);
        engine.remove_instance(id);
        assert_eq!(engine.pending_removals(), &[id]);
        assert!(engine.physics().borrow().contains(id));
        assert!(engine.scene().borrow().contains(id));
        assert!(approx_eq(engine.get_instance_position(id).y, 2.0));

        assert_eq!(engine.apply_removals(), vec![id]);
        assert!(!engine.physics().borrow().contains(id));
        assert!(!engine.scene().borrow().contains(id));
        assert!(engine.apply_removals().is_empty());
    }

    #[test]
    #[should_panic(expected = "Engine: unknown instance 99")]
    fn removing_an_unknown_instance_panics() {
        let (mut engine, _) = engine();
        engine.remove_instance(99);
    }

    #[test]
    fn failed_mesh_body_leaves_no_instance() {
        let (mut engine, _) = engine();
        let flat = MeshGeometry::from_positions(
            "flat",
            &[
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
            ],
        )
        .unwrap();
        let mesh = engine.scene().borrow_mut().add_mesh(flat);
        let result = engine.add_mesh_body_instance(
            "flat",
            mesh,
            Transform::default(),
            MotionKind::StaticRigid,
        );
        assert!(result.is_err());
        assert_eq!(engine.scene().borrow().instance_count(), 0);
    }

    #[test]
    fn advance_and_quit() {
        let (mut engine, _) = engine();
        engine.advance(Duration::from_millis(10));
        engine.advance(Duration::from_millis(5));
        assert_eq!(engine.frame_count(), 2);
        assert_eq!(engine.elapsed(), Duration::from_millis(15));
        assert!(!engine.quit_requested());
        engine.request_quit();
        assert!(engine.quit_requested());
    }
}
