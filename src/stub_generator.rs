//! Lua stub generator for EmmyLua / lua-language-server.
//!
//! Walks the signatures of every registered native operation and emits a
//! deterministic stub file with `---@param` and `---@return` annotations,
//! plus the shared types and the callbacks scripts are expected to define.

use crate::resources::script_bridge::{ScriptBridge, Signature};
use std::fmt::{self, Write as FmtWrite};
use std::path::Path;

/// Section order for deterministic output. Prefixes not listed go last.
const CATEGORY_ORDER: &[&str] = &["engine", "scene", "physics"];

fn category_title(category: &str) -> &str {
    match category {
        "engine" => "Engine",
        "scene" => "Scene",
        "physics" => "Physics",
        _ => "Other",
    }
}

fn category_of(name: &str) -> &str {
    name.split_once('_').map_or("", |(prefix, _)| prefix)
}

/// Callbacks scripts define: name, parameters, description.
const CALLBACKS: &[(&str, &[(&str, &str)], &str)] = &[
    ("init", &[], "Called once before the first tick."),
    (
        "main",
        &[("dt", "integer")],
        "Called once per tick, before entity functions. `dt` is in microseconds.",
    ),
    (
        "on_event",
        &[("kind", "string"), ("data1", "integer"), ("data2", "integer")],
        "Called for each queued event at the start of a tick.\nkind: key_press | key_hold | key_release | mouse_click | collision",
    ),
];

/// Generate the stub file content for every operation registered on `bridge`.
pub fn generate_stubs(bridge: &ScriptBridge) -> Result<String, String> {
    let mut signatures: Vec<&Signature> = bridge.signatures().iter().collect();
    signatures.sort_by(|a, b| {
        let rank = |s: &Signature| {
            CATEGORY_ORDER
                .iter()
                .position(|c| *c == category_of(&s.name))
                .unwrap_or(CATEGORY_ORDER.len())
        };
        rank(a).cmp(&rank(b)).then_with(|| a.name.cmp(&b.name))
    });

    let mut out = String::with_capacity(16 * 1024);
    render_stubs(&mut out, &signatures).map_err(|e| format!("Failed to render stubs: {e}"))?;
    Ok(out)
}

/// Write the generated stubs to a file.
pub fn write_stubs(path: &Path, content: &str) -> Result<(), String> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .map_err(|e| format!("Failed to create {}: {e}", dir.display()))?;
    }
    std::fs::write(path, content).map_err(|e| format!("Failed to write {}: {e}", path.display()))
}

fn render_stubs(out: &mut String, signatures: &[&Signature]) -> fmt::Result {
    writeln!(out, "---@meta")?;
    writeln!(out)?;
    writeln!(out, "-- THIS FILE IS AUTO-GENERATED by `tempest --create-lua-stubs`.")?;
    writeln!(out, "-- DO NOT EDIT MANUALLY.")?;
    writeln!(out)?;

    render_types(out)?;
    render_log(out)?;
    render_callbacks(out)?;

    let mut current = None;
    for signature in signatures {
        let category = category_of(&signature.name);
        if current != Some(category) {
            current = Some(category);
            writeln!(out, "-- ==================== {} ====================", category_title(category))?;
            writeln!(out)?;
        }
        render_function(out, signature)?;
    }
    Ok(())
}

fn render_types(out: &mut String) -> fmt::Result {
    writeln!(out, "---@class Vec3")?;
    writeln!(out, "---@field x number")?;
    writeln!(out, "---@field y number")?;
    writeln!(out, "---@field z number")?;
    writeln!(out)?;
    writeln!(out, "---Contact manifold returned by `physics_get_manifold`.")?;
    writeln!(out, "---@class Manifold")?;
    writeln!(out, "---@field a integer")?;
    writeln!(out, "---@field b integer")?;
    writeln!(out, "---@field points integer")?;
    writeln!(out, "---@field depth number")?;
    writeln!(out, "---@field normal Vec3")?;
    writeln!(out)
}

fn render_log(out: &mut String) -> fmt::Result {
    writeln!(out, "---@class log")?;
    writeln!(out, "log = {{}}")?;
    writeln!(out)?;
    for level in ["info", "warn", "error", "debug"] {
        writeln!(out, "---@param message string")?;
        writeln!(out, "function log.{}(message) end", level)?;
        writeln!(out)?;
    }
    Ok(())
}

fn render_callbacks(out: &mut String) -> fmt::Result {
    writeln!(out, "-- ==================== Callback Signatures ====================")?;
    writeln!(out, "-- Define these in your scripts. Entity functions registered with the")?;
    writeln!(out, "-- engine take (entity, dt) and may have an optional <name>_init(entity).")?;
    writeln!(out)?;
    for (name, params, description) in CALLBACKS {
        for line in description.lines() {
            writeln!(out, "---{}", line)?;
        }
        for (pname, ptype) in params.iter() {
            writeln!(out, "---@param {} {}", pname, ptype)?;
        }
        let names: Vec<&str> = params.iter().map(|(n, _)| *n).collect();
        writeln!(out, "function {}({}) end", name, names.join(", "))?;
        writeln!(out)?;
    }
    Ok(())
}

fn render_function(out: &mut String, signature: &Signature) -> fmt::Result {
    let mut names = Vec::with_capacity(signature.args.len());
    for (i, kind) in signature.args.iter().enumerate() {
        let name = signature.param_name(i);
        writeln!(out, "---@param {} {}", name, kind.lua_type())?;
        names.push(name);
    }
    if let Some(lua_type) = signature.return_type {
        if signature.optional_return {
            writeln!(out, "---@return {}|nil", lua_type)?;
        } else {
            writeln!(out, "---@return {}", lua_type)?;
        }
    }
    writeln!(out, "function {}({}) end", signature.name, names.join(", "))?;
    writeln!(out)
}
