//! Script-facing operations of the engine, scene and physics subsystems.
//!
//! Each subsystem gets its own prefix, so a script calls
//! `physics_apply_impulse(id, v)` or `engine_request_quit()`.
//!
//! Ids that do not exist are caller bugs and trap, the same as in native
//! code. Lookups that can legitimately miss return `nil` instead.

use crate::resources::engine::Engine;
use crate::resources::physics::{Manifold, PhysicsWorld};
use crate::resources::scene::{InstanceId, Scene};
use crate::resources::script_bridge::marshal::vec3_to_lua;
use crate::resources::script_bridge::{ArgKind, ScriptBridge, ScriptReturn};
use mlua::prelude::*;
use nalgebra::{UnitQuaternion, Vector3};
use std::cell::RefCell;
use std::rc::Rc;

/// Manifolds are handed to scripts as
/// `{ a = id, b = id, points = n, depth = d, normal = { x, y, z } }`.
impl ScriptReturn for Manifold {
    const KIND: Option<ArgKind> = Some(ArgKind::Table);

    fn lua_type_name() -> Option<&'static str> {
        Some("Manifold")
    }

    fn into_script(self, lua: &Lua) -> LuaResult<LuaMultiValue> {
        let table = lua.create_table()?;
        table.set("a", self.a)?;
        table.set("b", self.b)?;
        table.set("points", self.points)?;
        table.set("depth", self.depth)?;
        table.set("normal", vec3_to_lua(lua, &self.normal)?)?;
        table.into_lua_multi(lua)
    }
}

pub fn register_scene_hooks(bridge: &mut ScriptBridge, scene: Rc<RefCell<Scene>>) -> LuaResult<()> {
    let mut registrar = bridge.create_registrar("scene", scene);
    registrar
        .register("get_instance_position", |s: &mut Scene, id: InstanceId| {
            s.get_instance_position(id)
        })
        .params(&["id"])
        .register("set_instance_position", Scene::set_instance_position)
        .params(&["id", "position"])
        .register("translate_instance", Scene::translate_instance)
        .params(&["id", "offset"])
        .register("get_instance_id_by_name", |s: &mut Scene, name: String| {
            s.instance_id_by_name(&name)
        })
        .params(&["name"])
        .register("contains", |s: &mut Scene, id: InstanceId| s.contains(id))
        .params(&["id"])
        .register("instance_count", |s: &mut Scene| s.instance_count());
    bridge.register_callables(registrar)
}

pub fn register_physics_hooks(
    bridge: &mut ScriptBridge,
    physics: Rc<RefCell<PhysicsWorld>>,
) -> LuaResult<()> {
    let mut registrar = bridge.create_registrar("physics", physics);
    registrar
        .register("set_instance_position", PhysicsWorld::set_instance_position)
        .params(&["id", "position"])
        .register("translate_instance", PhysicsWorld::translate_instance)
        .params(&["id", "offset"])
        .register(
            "set_instance_rotation",
            |p: &mut PhysicsWorld, id: InstanceId, euler: Vector3<f32>| {
                let rotation = UnitQuaternion::from_euler_angles(euler.x, euler.y, euler.z);
                p.set_instance_rotation(id, rotation)
            },
        )
        .params(&["id", "euler"])
        .register("set_linear_velocity", PhysicsWorld::set_instance_linear_velocity)
        .params(&["id", "velocity"])
        .register("get_linear_velocity", |p: &mut PhysicsWorld, id: InstanceId| {
            p.linear_velocity(id)
        })
        .params(&["id"])
        .register("apply_impulse", PhysicsWorld::apply_impulse)
        .params(&["id", "impulse"])
        .register("get_body_position", |p: &mut PhysicsWorld, id: InstanceId| {
            p.body_position(id)
        })
        .params(&["id"])
        .register("has_body", |p: &mut PhysicsWorld, id: InstanceId| p.contains(id))
        .params(&["id"])
        .register("is_sleeping", |p: &mut PhysicsWorld, id: InstanceId| {
            p.is_sleeping(id)
        })
        .params(&["id"])
        .register("get_manifold_count", |p: &mut PhysicsWorld| {
            p.get_manifold_count()
        })
        // Lua side is 1-based.
        .register("get_manifold", |p: &mut PhysicsWorld, index: usize| {
            index
                .checked_sub(1)
                .and_then(|i| p.get_manifolds().get(i).copied())
        })
        .params(&["index"])
        .register("is_touching", |p: &mut PhysicsWorld, a: InstanceId, b: InstanceId| {
            p.is_touching(a, b)
        })
        .params(&["a", "b"]);
    bridge.register_callables(registrar)
}

pub fn register_engine_hooks(bridge: &mut ScriptBridge, engine: Rc<RefCell<Engine>>) -> LuaResult<()> {
    let mut registrar = bridge.create_registrar("engine", engine);
    registrar
        .register("get_instance_position", |e: &mut Engine, id: InstanceId| {
            e.get_instance_position(id)
        })
        .params(&["id"])
        .register("set_instance_position", Engine::set_instance_position)
        .params(&["id", "position"])
        .register("translate_instance", Engine::translate_instance)
        .params(&["id", "offset"])
        .register("set_instance_rotation", Engine::set_instance_rotation)
        .params(&["id", "euler"])
        .register(
            "set_graphics_instance_position",
            Engine::set_graphics_instance_position,
        )
        .params(&["id", "position"])
        .register("get_instance_id_by_name", |e: &mut Engine, name: String| {
            e.get_instance_id_by_name(&name)
        })
        .params(&["name"])
        .register("get_physics_body_position", |e: &mut Engine, id: InstanceId| {
            e.get_physics_body_position(id)
        })
        .params(&["id"])
        .register("apply_impulse_to_instance", Engine::apply_impulse_to_instance)
        .params(&["id", "impulse"])
        .register("remove_instance", Engine::remove_instance)
        .params(&["id"])
        .register("request_quit", Engine::request_quit)
        .register("elapsed", |e: &mut Engine| e.elapsed().as_secs_f64())
        .register("frame_count", |e: &mut Engine| e.frame_count());
    bridge.register_callables(registrar)
}

/// Install every engine, scene and physics operation.
pub fn register_all(bridge: &mut ScriptBridge, engine: &Rc<RefCell<Engine>>) -> LuaResult<()> {
    let (scene, physics) = {
        let engine = engine.borrow();
        (engine.scene(), engine.physics())
    };
    register_engine_hooks(bridge, engine.clone())?;
    register_scene_hooks(bridge, scene)?;
    register_physics_hooks(bridge, physics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::engine::BodyDesc;
    use crate::resources::engineconfig::ScriptConfig;
    use crate::resources::physics::GeometryKind;
    use crate::resources::scene::{MeshGeometry, Transform};

    fn setup() -> (ScriptBridge, Rc<RefCell<Engine>>, InstanceId, InstanceId) {
        let scene = Rc::new(RefCell::new(Scene::new()));
        let cube = scene.borrow_mut().add_mesh(MeshGeometry::unit_cube("cube"));
        let physics = Rc::new(RefCell::new(PhysicsWorld::default()));
        let engine = Rc::new(RefCell::new(Engine::new(scene, physics)));
        let ground = engine.borrow_mut().add_body_instance(
            "ground",
            cube,
            Transform::default(),
            BodyDesc::fixed(GeometryKind::Plane),
        );
        let crate_id = engine.borrow_mut().add_body_instance(
            "crate",
            cube,
            Transform::from_position(Vector3::new(0.0, 0.5, 0.0)),
            BodyDesc::dynamic(GeometryKind::Box, 1.0),
        );
        let mut bridge = ScriptBridge::new(&ScriptConfig::default()).unwrap();
        register_all(&mut bridge, &engine).unwrap();
        (bridge, engine, ground, crate_id)
    }

    #[test]
    fn every_subsystem_is_registered_with_its_prefix() {
        let (bridge, _, _, _) = setup();
        for name in [
            "engine_request_quit",
            "scene_get_instance_position",
            "physics_get_manifold",
        ] {
            assert!(bridge.has_function(name), "{} missing", name);
        }
        let quit = bridge
            .signatures()
            .iter()
            .find(|s| s.name == "engine_request_quit")
            .unwrap();
        assert!(quit.args.is_empty());
    }

    #[test]
    fn scripts_move_instances_through_the_engine() {
        let (bridge, engine, _, crate_id) = setup();
        bridge
            .run_source(
                "move",
                r#"
                local id = engine_get_instance_id_by_name("crate")
                engine_set_instance_position(id, { x = 1, y = 2, z = 3 })
                engine_translate_instance(id, { y = 1 })
                moved = engine_get_physics_body_position(id)
                missing = engine_get_instance_id_by_name("nobody")
                "#,
            )
            .unwrap();
        assert_eq!(
            engine.borrow().get_instance_position(crate_id),
            Vector3::new(1.0, 3.0, 3.0)
        );
        let missing: Option<u64> = bridge.lua().globals().get("missing").unwrap();
        assert_eq!(missing, None);
        let y: f32 = bridge.lua().load("return moved.y").eval().unwrap();
        assert_eq!(y, 3.0);
    }

    #[test]
    fn manifolds_are_tables() {
        let (bridge, engine, ground, crate_id) = setup();
        let physics = engine.borrow().physics();
        let step = physics.borrow().fixed_step();
        for _ in 0..5 {
            physics.borrow_mut().tick(step);
        }
        bridge
            .run_source(
                "contacts",
                r#"
                count = physics_get_manifold_count()
                first = physics_get_manifold(1)
                none = physics_get_manifold(0)
                "#,
            )
            .unwrap();
        let count: usize = bridge.lua().globals().get("count").unwrap();
        assert!(count >= 1);
        let (a, b): (u64, u64) = bridge
            .lua()
            .load("return first.a, first.b")
            .eval()
            .unwrap();
        let mut pair = [a, b];
        pair.sort_unstable();
        assert_eq!(pair, [ground, crate_id]);
        let none: LuaValue = bridge.lua().globals().get("none").unwrap();
        assert!(none.is_nil());
        let touching: bool = bridge
            .lua()
            .load(format!("return physics_is_touching({}, {})", crate_id, ground))
            .eval()
            .unwrap();
        assert!(touching);
    }

    #[test]
    fn remove_and_quit_are_recorded_on_the_engine() {
        let (bridge, engine, _, crate_id) = setup();
        bridge
            .run_source(
                "remove",
                &format!("engine_remove_instance({}); engine_request_quit()", crate_id),
            )
            .unwrap();
        let mut engine = engine.borrow_mut();
        assert!(engine.quit_requested());
        assert!(engine.scene().borrow().contains(crate_id));
        assert_eq!(engine.apply_removals(), vec![crate_id]);
        assert!(!engine.scene().borrow().contains(crate_id));
    }
}
