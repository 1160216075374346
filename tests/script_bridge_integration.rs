//! Script bridge integration tests: file-based scripts, custom native
//! operations and events sent from other threads.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use mlua::prelude::*;

use tempest::resources::engineconfig::ScriptConfig;
use tempest::resources::script_bridge::{ArgKind, Context, ScriptBridge, ScriptEvent, ScriptEventKind};

fn config() -> ScriptConfig {
    ScriptConfig {
        root: PathBuf::from("tests/scripts"),
        main: PathBuf::from("main.lua"),
        event_queue_size: 8,
    }
}

fn loaded() -> ScriptBridge {
    let bridge = ScriptBridge::new(&config()).unwrap();
    bridge.load_main().unwrap();
    bridge
}

fn take_calls(bridge: &ScriptBridge) -> String {
    bridge.call_function("take_calls", ()).unwrap()
}

#[derive(Default)]
struct Counter {
    total: i64,
    hits: u32,
}

impl Counter {
    fn add(&mut self, amount: i64) -> i64 {
        self.total += amount;
        self.hits += 1;
        self.total
    }
}

fn with_counter(bridge: &mut ScriptBridge) -> Rc<RefCell<Counter>> {
    let counter = Rc::new(RefCell::new(Counter::default()));
    let mut registrar = bridge.create_registrar("counter", counter.clone());
    registrar
        .register("add", Counter::add)
        .params(&["amount"])
        .register("hits", |c: &mut Counter| c.hits)
        .register("reset", |c: &mut Counter| {
            *c = Counter::default();
        });
    bridge.register_callables(registrar).unwrap();
    counter
}

#[test]
fn scripts_load_relative_to_the_root() {
    let mut bridge = loaded();
    bridge
        .register_script(Path::new("walker.lua"), "walker", Context::GamePlay)
        .unwrap();
    bridge
        .register_script(Path::new("tests/scripts/glow.lua"), "glow", Context::Graphics)
        .unwrap();
    assert!(bridge.dispatch().contains_function("walker"));
    assert!(bridge.dispatch().contains_function("glow"));

    bridge.register_entity_with_script("walker", 3);
    bridge.register_entity_with_script("glow", 3);
    bridge.init().unwrap();
    bridge.tick(Duration::from_millis(20)).unwrap();
    assert_eq!(take_calls(&bridge), "init,walker_init:3,main,walker:3,glow:3");
}

#[test]
fn missing_files_and_functions_are_errors() {
    let mut bridge = loaded();
    assert!(
        bridge
            .register_script(Path::new("nope.lua"), "nope", Context::GamePlay)
            .is_err()
    );
    assert!(
        bridge
            .register_script(Path::new("walker.lua"), "runner", Context::GamePlay)
            .is_err()
    );
    assert!(!bridge.dispatch().contains_function("runner"));
}

#[test]
#[should_panic(expected = "no script function")]
fn registering_an_entity_for_an_unknown_function_panics() {
    let mut bridge = loaded();
    bridge.register_entity_with_script("walker", 1);
}

#[test]
fn registering_an_entity_twice_calls_it_twice() {
    let mut bridge = loaded();
    bridge
        .register_script(Path::new("walker.lua"), "walker", Context::GamePlay)
        .unwrap();
    bridge.register_entity_with_script("walker", 9);
    bridge.register_entity_with_script("walker", 9);
    bridge.init().unwrap();
    assert_eq!(take_calls(&bridge), "init,walker_init:9,walker_init:9");
    bridge.tick(Duration::ZERO).unwrap();
    assert_eq!(take_calls(&bridge), "main,walker:9,walker:9");

    assert_eq!(bridge.unregister_entity(9), 2);
    bridge.tick(Duration::ZERO).unwrap();
    assert_eq!(take_calls(&bridge), "main");
}

#[test]
fn native_operations_are_callable_from_lua_and_by_name() {
    let mut bridge = loaded();
    let counter = with_counter(&mut bridge);

    bridge
        .run_source("use", "counter_add(5); last = counter_add(-2)")
        .unwrap();
    let last: i64 = bridge.lua().globals().get("last").unwrap();
    assert_eq!(last, 3);

    let lua = bridge.lua();
    let args = (10_i64,).into_lua_multi(lua).unwrap();
    let result = bridge.invoke("counter_add", args).unwrap();
    let total = i64::from_lua_multi(result, lua).unwrap();
    assert_eq!(total, 13);
    assert_eq!(counter.borrow().hits, 3);

    let hits = bridge.invoke("counter_hits", LuaMultiValue::new()).unwrap();
    assert_eq!(u32::from_lua_multi(hits, lua).unwrap(), 3);

    bridge.invoke("counter_reset", LuaMultiValue::new()).unwrap();
    assert_eq!(counter.borrow().total, 0);
    assert!(bridge.invoke("counter_missing", LuaMultiValue::new()).is_err());
}

#[test]
fn signatures_describe_registered_operations() {
    let mut bridge = loaded();
    with_counter(&mut bridge);
    let add = bridge
        .signatures()
        .iter()
        .find(|s| s.name == "counter_add")
        .unwrap();
    assert_eq!(add.args.as_slice(), &[ArgKind::Integer]);
    assert_eq!(add.param_name(0), "amount");
    assert_eq!(add.returns, Some(ArgKind::Integer));
    let reset = bridge
        .signatures()
        .iter()
        .find(|s| s.name == "counter_reset")
        .unwrap();
    assert!(reset.args.is_empty());
    assert_eq!(reset.returns, None);
}

#[test]
fn registering_a_name_twice_fails() {
    let mut bridge = loaded();
    with_counter(&mut bridge);
    let again = Rc::new(RefCell::new(Counter::default()));
    let mut registrar = bridge.create_registrar("counter", again);
    registrar.register("add", Counter::add);
    assert!(bridge.register_callables(registrar).is_err());
}

#[test]
fn bad_arguments_raise_inside_lua() {
    let mut bridge = loaded();
    let counter = with_counter(&mut bridge);
    let result = bridge.run_source("bad", r#"counter_add("lots")"#);
    assert!(result.is_err());
    assert_eq!(counter.borrow().hits, 0);
}

#[test]
fn events_sent_from_another_thread_arrive_on_the_next_tick() {
    let bridge = loaded();
    bridge
        .run_source(
            "events",
            r#"function on_event(kind, a, b) trace(kind .. ":" .. a .. ":" .. b) end"#,
        )
        .unwrap();

    let sender = bridge.event_sender();
    let producer = thread::spawn(move || {
        assert!(sender.send(ScriptEvent::new(ScriptEventKind::KeyPress, 32, 0)));
        assert!(sender.send(ScriptEvent::new(ScriptEventKind::MouseClick, 100, 200)));
    });
    producer.join().unwrap();

    bridge.tick(Duration::ZERO).unwrap();
    assert_eq!(take_calls(&bridge), "key_press:32:0,mouse_click:100:200,main");
    bridge.tick(Duration::ZERO).unwrap();
    assert_eq!(take_calls(&bridge), "main");
}

#[test]
fn a_full_event_queue_rejects_new_events() {
    let bridge = loaded();
    let sender = bridge.event_sender();
    for key in 0..8 {
        assert!(sender.send(ScriptEvent::new(ScriptEventKind::KeyHold, key, 0)));
    }
    assert!(!sender.send(ScriptEvent::new(ScriptEventKind::KeyRelease, 99, 0)));
}

#[test]
fn inline_script_errors_are_reported() {
    let bridge = loaded();
    let err = bridge
        .run_source("inline", "error('nope from inline')")
        .unwrap_err()
        .to_string();
    assert!(err.contains("nope from inline"), "{}", err);
}
