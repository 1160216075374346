//! Demo world used by the binary.
//!
//! A ground plane, a static ramp built from its own mesh, a few crates and a
//! ball that bounce under script control, and a kinematic platform that a
//! script keeps spinning.

use crate::resources::engine::{BodyDesc, Engine};
use crate::resources::engineconfig::EngineConfig;
use crate::resources::physics::{GeometryKind, MotionKind, PhysicsWorld};
use crate::resources::scene::{MeshGeometry, Scene, Transform};
use crate::resources::script_bridge::{Context, ScriptBridge};
use crate::systems::hooks;
use log::info;
use nalgebra::{Point3, Vector3};
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

/// Empty scene and physics world wired into an [`Engine`].
pub fn build_engine(config: &EngineConfig) -> Rc<RefCell<Engine>> {
    let scene = Rc::new(RefCell::new(Scene::new()));
    let physics = Rc::new(RefCell::new(PhysicsWorld::new(&config.physics)));
    Rc::new(RefCell::new(Engine::new(scene, physics)))
}

/// Script bridge with every engine, scene and physics operation installed.
pub fn create_bridge(config: &EngineConfig, engine: &Rc<RefCell<Engine>>) -> Result<ScriptBridge, String> {
    let mut bridge =
        ScriptBridge::new(&config.scripts).map_err(|e| format!("Failed to create Lua runtime: {e}"))?;
    hooks::register_all(&mut bridge, engine)
        .map_err(|e| format!("Failed to register native operations: {e}"))?;
    Ok(bridge)
}

fn ramp_mesh() -> Result<MeshGeometry, String> {
    MeshGeometry::from_positions(
        "ramp",
        &[
            Point3::new(-2.0, 0.0, -1.0),
            Point3::new(2.0, 0.0, -1.0),
            Point3::new(-2.0, 0.0, 1.0),
            Point3::new(2.0, 0.0, 1.0),
            Point3::new(2.0, 1.5, -1.0),
            Point3::new(2.0, 1.5, 1.0),
        ],
    )
}

/// Populate the world and load the demo scripts.
///
/// # Errors
///
/// Fails if a script cannot be loaded or lacks its entity function.
pub fn setup(engine: &Rc<RefCell<Engine>>, bridge: &mut ScriptBridge) -> Result<(), String> {
    let scene = engine.borrow().scene();
    let (cube, ramp) = {
        let mut scene = scene.borrow_mut();
        (
            scene.add_mesh(MeshGeometry::unit_cube("cube")),
            scene.add_mesh(ramp_mesh()?),
        )
    };

    let mut engine = engine.borrow_mut();
    engine.add_body_instance(
        "ground",
        cube,
        Transform::default().with_scale(Vector3::new(40.0, 0.0, 40.0)),
        BodyDesc::fixed(GeometryKind::Plane),
    );
    engine.add_mesh_body_instance(
        "ramp",
        ramp,
        Transform::from_position(Vector3::new(-6.0, 0.0, 0.0)),
        MotionKind::StaticRigid,
    )?;

    let mut bouncers = Vec::new();
    for (i, height) in [3.0, 5.0, 7.0].into_iter().enumerate() {
        let id = engine.add_body_instance(
            &format!("crate_{}", i),
            cube,
            Transform::from_position(Vector3::new(i as f32 * 1.5 - 1.5, height, 0.0)),
            BodyDesc::dynamic(GeometryKind::Box, 1.0).with_restitution(0.2),
        );
        bouncers.push(id);
    }
    bouncers.push(engine.add_body_instance(
        "ball",
        cube,
        Transform::from_position(Vector3::new(0.0, 9.0, 2.0)).with_scale(Vector3::new(0.8, 0.8, 0.8)),
        BodyDesc::dynamic(GeometryKind::Sphere, 0.5).with_restitution(0.8),
    ));
    engine.add_body_instance(
        "player",
        cube,
        Transform::from_position(Vector3::new(3.0, 1.0, -3.0)).with_scale(Vector3::new(0.6, 1.8, 0.6)),
        BodyDesc::dynamic(GeometryKind::Capsule, 70.0),
    );
    let platform = engine.add_body_instance(
        "platform",
        cube,
        Transform::from_position(Vector3::new(5.0, 0.5, 3.0)).with_scale(Vector3::new(3.0, 0.2, 1.0)),
        BodyDesc::kinematic(GeometryKind::Box),
    );
    drop(engine);

    bridge.load_main().map_err(|e| format!("Failed to load main script: {e}"))?;
    bridge
        .register_script(Path::new("bounce.lua"), "bounce", Context::Physics)
        .map_err(|e| e.to_string())?;
    bridge
        .register_script(Path::new("spin.lua"), "spin", Context::GamePlay)
        .map_err(|e| e.to_string())?;
    for id in &bouncers {
        bridge.register_entity_with_script("bounce", *id);
    }
    bridge.register_entity_with_script("spin", platform);

    info!(
        "demo world ready: {} instances, {} scripted",
        scene.borrow().instance_count(),
        bouncers.len() + 1
    );
    Ok(())
}
