//! The Lua state and everything driven through it.

use super::dispatch::{Context, DispatchTable};
use super::events::{EventQueue, EventSender};
use super::registrar::{Callable, Registrar, Signature};
use crate::resources::engineconfig::ScriptConfig;
use crate::resources::scene::InstanceId;
use mlua::prelude::*;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use log::{debug, error, info, warn};

/// Owner of the embedded Lua state.
///
/// Lives on the control thread only; the Lua state is not `Send`. Native
/// operations are installed as Lua globals through
/// [`register_callables`](Self::register_callables) and remain reachable by
/// name through [`invoke`](Self::invoke).
///
/// Every Lua error raised by a call the bridge makes is logged under the
/// `lua` target with the function name before it is returned.
pub struct ScriptBridge {
    lua: Lua,
    callables: FxHashMap<String, Rc<dyn Callable>>,
    signatures: Vec<Signature>,
    dispatch: DispatchTable,
    events: EventQueue,
    root: PathBuf,
    main_script: PathBuf,
}

impl ScriptBridge {
    /// Create the Lua state, point `require` at the script root and install
    /// the `log` table.
    ///
    /// # Errors
    ///
    /// Returns an error if the Lua state cannot be set up.
    pub fn new(config: &ScriptConfig) -> LuaResult<Self> {
        let lua = Lua::new();

        let root = config.root.to_string_lossy().replace('\\', "/");
        let package: LuaTable = lua.globals().get("package")?;
        let path: String = package.get("path")?;
        package.set(
            "path",
            format!("{root}/?.lua;{root}/?/init.lua;{path}"),
        )?;

        let bridge = Self {
            lua,
            callables: FxHashMap::default(),
            signatures: Vec::new(),
            dispatch: DispatchTable::new(),
            events: EventQueue::new(config.event_queue_size),
            root: config.root.clone(),
            main_script: config.main_path(),
        };
        bridge.register_log_api()?;
        Ok(bridge)
    }

    /// `log.info(msg)`, `log.warn(msg)`, `log.error(msg)` and `log.debug(msg)`.
    fn register_log_api(&self) -> LuaResult<()> {
        let log = self.lua.create_table()?;
        log.set(
            "info",
            self.lua.create_function(|_, msg: String| {
                info!(target: "lua", "{}", msg);
                Ok(())
            })?,
        )?;
        log.set(
            "warn",
            self.lua.create_function(|_, msg: String| {
                warn!(target: "lua", "{}", msg);
                Ok(())
            })?,
        )?;
        log.set(
            "error",
            self.lua.create_function(|_, msg: String| {
                error!(target: "lua", "{}", msg);
                Ok(())
            })?,
        )?;
        log.set(
            "debug",
            self.lua.create_function(|_, msg: String| {
                debug!(target: "lua", "{}", msg);
                Ok(())
            })?,
        )?;
        self.lua.globals().set("log", log)
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Start a batch of operations of `target`, named `<prefix>_<name>`.
    pub fn create_registrar<T: 'static>(
        &self,
        prefix: &str,
        target: Rc<RefCell<T>>,
    ) -> Registrar<T> {
        Registrar::new(prefix, target)
    }

    /// Install every operation of `registrar` as a Lua global.
    ///
    /// # Errors
    ///
    /// Fails if a name is already taken by another registered operation, or
    /// if Lua cannot create the function. Operations installed before the
    /// failing one stay installed.
    pub fn register_callables<T: 'static>(&mut self, registrar: Registrar<T>) -> LuaResult<()> {
        let prefix = registrar.prefix().to_string();
        let count = registrar.len();
        for registration in registrar.into_registrations() {
            let name = registration.signature.name.clone();
            if self.callables.contains_key(&name) {
                return Err(LuaError::runtime(format!(
                    "native operation '{}' is already registered",
                    name
                )));
            }
            let callable = registration.callable.clone();
            let function = self
                .lua
                .create_function(move |lua, args: LuaMultiValue| callable.call(lua, args))?;
            self.lua.globals().set(name.as_str(), function)?;
            self.callables.insert(name, registration.callable);
            self.signatures.push(registration.signature);
        }
        debug!(target: "lua", "registered {} '{}' operations", count, prefix);
        Ok(())
    }

    pub fn callable(&self, name: &str) -> Option<Rc<dyn Callable>> {
        self.callables.get(name).cloned()
    }

    /// Call a registered native operation by name, the same way a script
    /// would.
    pub fn invoke(&self, name: &str, args: LuaMultiValue) -> LuaResult<LuaMultiValue> {
        let callable = self
            .callables
            .get(name)
            .ok_or_else(|| LuaError::runtime(format!("no native operation named '{}'", name)))?;
        callable.call(&self.lua, args).inspect_err(|e| {
            error!(target: "lua", "Error in {}(): {}", name, e);
        })
    }

    /// Registered operations in installation order.
    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// Run the configured entry script.
    pub fn load_main(&self) -> LuaResult<()> {
        let path = self.main_script.clone();
        self.run_script(&path)
    }

    /// Load and execute a script file. Relative paths are resolved against
    /// the script root.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the script fails.
    pub fn run_script(&self, path: &Path) -> LuaResult<()> {
        let path = self.resolve(path);
        let source = std::fs::read_to_string(&path).map_err(|e| {
            error!(target: "lua", "Cannot read script {}: {}", path.display(), e);
            LuaError::ExternalError(std::sync::Arc::new(e))
        })?;
        self.run_source(&path.display().to_string(), &source)
    }

    /// Execute a chunk of Lua source under `name`.
    pub fn run_source(&self, name: &str, source: &str) -> LuaResult<()> {
        self.lua
            .load(source)
            .set_name(name)
            .exec()
            .inspect_err(|e| error!(target: "lua", "Error in {}: {}", name, e))
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() || path.starts_with(&self.root) {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Load the script at `path` and create an empty entity list for
    /// `function`, which the script must define.
    pub fn register_script(&mut self, path: &Path, function: &str, context: Context) -> LuaResult<()> {
        self.run_script(path)?;
        self.add_dispatch_function(function, context)
    }

    /// Same as [`register_script`](Self::register_script) with the source
    /// given inline.
    pub fn register_script_source(
        &mut self,
        chunk_name: &str,
        source: &str,
        function: &str,
        context: Context,
    ) -> LuaResult<()> {
        self.run_source(chunk_name, source)?;
        self.add_dispatch_function(function, context)
    }

    fn add_dispatch_function(&mut self, function: &str, context: Context) -> LuaResult<()> {
        if !self.has_function(function) {
            error!(target: "lua", "Script function '{}' is not defined", function);
            return Err(LuaError::runtime(format!(
                "script function '{}' is not defined",
                function
            )));
        }
        if self.dispatch.add_function(function, context) {
            info!(target: "lua", "registered script function '{}' ({:?})", function, context);
        }
        Ok(())
    }

    /// Call `function(entity, dt)` for `entity` on every tick, once per
    /// registration.
    ///
    /// # Panics
    ///
    /// Panics if `function` was never registered with
    /// [`register_script`](Self::register_script).
    pub fn register_entity_with_script(&mut self, function: &str, entity: InstanceId) {
        self.dispatch.register_entity(function, entity);
    }

    /// Stop dispatching to `entity`. Returns how many registrations were
    /// dropped.
    pub fn unregister_entity(&mut self, entity: InstanceId) -> usize {
        self.dispatch.unregister_entity(entity)
    }

    pub fn dispatch(&self) -> &DispatchTable {
        &self.dispatch
    }

    pub fn event_sender(&self) -> EventSender {
        self.events.sender()
    }

    /// One-time pass before the first tick.
    ///
    /// Calls the global `init()`, then `<function>_init(entity)` for every
    /// registered pair whose script defines such a hook.
    ///
    /// # Errors
    ///
    /// Fails if `init` is missing or any call raises.
    pub fn init(&self) -> LuaResult<()> {
        self.call_function::<_, ()>("init", ())?;
        for entry in self.dispatch.entries() {
            let hook = format!("{}_init", entry.function);
            if !self.has_function(&hook) {
                debug!(target: "lua", "no {}() hook, skipping", hook);
                continue;
            }
            for &entity in &entry.entities {
                self.call_function::<_, ()>(&hook, entity)?;
            }
        }
        Ok(())
    }

    /// One script tick.
    ///
    /// Queued events go to `on_event(kind, data1, data2)` when the script
    /// defines it. Then `main(dt)` runs once, followed by
    /// `function(entity, dt)` for every registered pair in registration
    /// order. `dt` is in microseconds.
    ///
    /// # Errors
    ///
    /// Stops at the first call that raises and returns its error.
    pub fn tick(&self, delta: Duration) -> LuaResult<()> {
        let dt_us = i64::try_from(delta.as_micros()).unwrap_or(i64::MAX);

        let events = self.events.drain();
        if !events.is_empty() {
            if self.has_function("on_event") {
                for event in events {
                    self.call_function::<_, ()>(
                        "on_event",
                        (event.kind.as_str(), event.data1, event.data2),
                    )?;
                }
            } else {
                debug!(target: "lua", "no on_event(), dropped {} events", events.len());
            }
        }

        self.call_function::<_, ()>("main", dt_us)?;

        for (function, entity) in self.dispatch.calls() {
            self.call_function::<_, ()>(function, (entity, dt_us))?;
        }
        Ok(())
    }

    /// Call a global Lua function by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the function doesn't exist or raises.
    pub fn call_function<A, R>(&self, name: &str, args: A) -> LuaResult<R>
    where
        A: IntoLuaMulti,
        R: FromLuaMulti,
    {
        let result = self
            .lua
            .globals()
            .get::<LuaFunction>(name)
            .and_then(|func| func.call::<R>(args));
        if let Err(e) = &result {
            error!(target: "lua", "Error in {}(): {}", name, e);
        }
        result
    }

    pub fn has_function(&self, name: &str) -> bool {
        matches!(
            self.lua.globals().get::<LuaValue>(name),
            Ok(LuaValue::Function(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::script_bridge::events::{ScriptEvent, ScriptEventKind};

    const TRACE: &str = r#"
        calls = {}
        function trace(s) calls[#calls + 1] = s end
        function init() trace("init") end
        function main(dt) trace("main:" .. dt) end
    "#;

    fn bridge() -> ScriptBridge {
        let bridge = ScriptBridge::new(&ScriptConfig::default()).unwrap();
        bridge.run_source("trace", TRACE).unwrap();
        bridge
    }

    fn trace(bridge: &ScriptBridge) -> String {
        bridge
            .lua()
            .load("local s = table.concat(calls, ','); calls = {}; return s")
            .eval()
            .unwrap()
    }

    #[test]
    fn tick_runs_main_then_entities_in_registration_order() {
        let mut bridge = bridge();
        bridge
            .register_script_source(
                "walk",
                r#"function walk(e, dt) trace("walk:" .. e) end"#,
                "walk",
                Context::GamePlay,
            )
            .unwrap();
        bridge
            .register_script_source(
                "glow",
                r#"function glow(e, dt) trace("glow:" .. e) end"#,
                "glow",
                Context::Graphics,
            )
            .unwrap();
        bridge.register_entity_with_script("walk", 7);
        bridge.register_entity_with_script("glow", 7);
        bridge.register_entity_with_script("walk", 2);

        bridge.tick(Duration::from_millis(16)).unwrap();
        assert_eq!(trace(&bridge), "main:16000,walk:7,walk:2,glow:7");
        bridge.tick(Duration::from_millis(16)).unwrap();
        assert_eq!(trace(&bridge), "main:16000,walk:7,walk:2,glow:7");
    }

    #[test]
    fn init_calls_optional_entity_hooks() {
        let mut bridge = bridge();
        bridge
            .register_script_source(
                "door",
                r#"
                function door(e, dt) end
                function door_init(e) trace("door_init:" .. e) end
                "#,
                "door",
                Context::GamePlay,
            )
            .unwrap();
        bridge
            .register_script_source("lamp", "function lamp(e, dt) end", "lamp", Context::Graphics)
            .unwrap();
        bridge.register_entity_with_script("door", 4);
        bridge.register_entity_with_script("lamp", 5);

        bridge.init().unwrap();
        assert_eq!(trace(&bridge), "init,door_init:4");
    }

    #[test]
    fn unregistered_entities_are_no_longer_called() {
        let mut bridge = bridge();
        bridge
            .register_script_source(
                "walk",
                r#"function walk(e, dt) trace("walk:" .. e) end"#,
                "walk",
                Context::GamePlay,
            )
            .unwrap();
        bridge.register_entity_with_script("walk", 1);
        bridge.register_entity_with_script("walk", 2);
        assert_eq!(bridge.unregister_entity(1), 1);
        bridge.tick(Duration::ZERO).unwrap();
        assert_eq!(trace(&bridge), "main:0,walk:2");
    }

    #[test]
    fn missing_function_or_entry_point_is_an_error() {
        let mut bridge = ScriptBridge::new(&ScriptConfig::default()).unwrap();
        assert!(
            bridge
                .register_script_source("empty", "x = 1", "walk", Context::GamePlay)
                .is_err()
        );
        assert!(bridge.init().is_err());
        assert!(bridge.tick(Duration::ZERO).is_err());
    }

    #[test]
    fn script_errors_stop_the_tick() {
        let mut bridge = bridge();
        bridge
            .register_script_source(
                "boom",
                r#"function boom(e, dt) error("kaboom " .. e) end"#,
                "boom",
                Context::GamePlay,
            )
            .unwrap();
        bridge.register_entity_with_script("boom", 3);
        let err = bridge.tick(Duration::ZERO).unwrap_err().to_string();
        assert!(err.contains("kaboom 3"), "{}", err);
    }

    #[test]
    fn events_reach_on_event_before_main() {
        let bridge = bridge();
        bridge
            .run_source(
                "events",
                r#"function on_event(kind, a, b) trace(kind .. ":" .. a .. ":" .. b) end"#,
            )
            .unwrap();
        let sender = bridge.event_sender();
        sender.send(ScriptEvent::new(ScriptEventKind::KeyPress, 32, 0));
        sender.send(ScriptEvent::new(ScriptEventKind::Collision, 1, 2));
        bridge.tick(Duration::from_micros(5)).unwrap();
        assert_eq!(trace(&bridge), "key_press:32:0,collision:1:2,main:5");
    }

    #[derive(Default)]
    struct Tally {
        total: i64,
    }

    #[test]
    fn registered_callables_are_lua_globals() {
        let mut bridge = bridge();
        let tally = Rc::new(RefCell::new(Tally::default()));
        let mut registrar = bridge.create_registrar("tally", tally.clone());
        registrar
            .register("add", |t: &mut Tally, n: i64| t.total += n)
            .register("total", |t: &mut Tally| t.total);
        bridge.register_callables(registrar).unwrap();

        bridge.run_source("use", "tally_add(4); tally_add(tally_total())").unwrap();
        assert_eq!(tally.borrow().total, 8);

        let out = bridge.invoke("tally_total", LuaMultiValue::new()).unwrap();
        assert_eq!(out.len(), 1);
        assert!(bridge.callable("tally_add").is_some());
        assert!(bridge.invoke("tally_missing", LuaMultiValue::new()).is_err());
        assert_eq!(bridge.signatures().len(), 2);
    }

    #[test]
    fn duplicate_callable_names_are_rejected() {
        let mut bridge = bridge();
        let tally = Rc::new(RefCell::new(Tally::default()));
        let mut first = bridge.create_registrar("tally", tally.clone());
        first.register("total", |t: &mut Tally| t.total);
        bridge.register_callables(first).unwrap();
        let mut second = bridge.create_registrar("tally", tally);
        second.register("total", |t: &mut Tally| t.total);
        assert!(bridge.register_callables(second).is_err());
    }

    #[test]
    fn log_table_is_available() {
        let bridge = bridge();
        bridge
            .run_source("log", r#"log.info("hello"); log.debug("quiet")"#)
            .unwrap();
    }
}
