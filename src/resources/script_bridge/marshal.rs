//! Conversions between Lua values and native argument/return types.
//!
//! Native operations declare their parameters as ordinary Rust types. Each
//! supported type implements [`ScriptArg`] (pop one Lua value and convert it)
//! and, where it can be returned, [`ScriptReturn`] (convert back and push).
//! The [`ArgKind`] each type reports is what stub generation and error
//! messages use to describe a signature.
//!
//! 3-vectors travel as tables with named fields:
//!
//! ```lua
//! local p = engine_get_instance_position(id)   -- { x = 0, y = 5, z = 0 }
//! engine_set_instance_position(id, { x = p.x, y = p.y + 1, z = p.z })
//! ```
//!
//! Missing vector fields read as `0`.

use mlua::LuaSerdeExt;
use mlua::prelude::*;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Script-facing type of one argument or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    Integer,
    Number,
    Boolean,
    String,
    Vec3,
    Table,
}

impl ArgKind {
    /// EmmyLua annotation type.
    pub fn lua_type(&self) -> &'static str {
        match self {
            ArgKind::Integer => "integer",
            ArgKind::Number => "number",
            ArgKind::Boolean => "boolean",
            ArgKind::String => "string",
            ArgKind::Vec3 => "Vec3",
            ArgKind::Table => "table",
        }
    }
}

/// Wire shape of a 3-vector.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Float3 {
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
    #[serde(default)]
    z: f32,
}

/// Convert a vector to a `{ x, y, z }` table.
pub fn vec3_to_lua(lua: &Lua, v: &Vector3<f32>) -> LuaResult<LuaValue> {
    lua.to_value(&Float3 {
        x: v.x,
        y: v.y,
        z: v.z,
    })
}

/// Read a `{ x, y, z }` table.
pub fn vec3_from_lua(lua: &Lua, value: LuaValue) -> LuaResult<Vector3<f32>> {
    match value {
        LuaValue::Table(_) => {
            let v: Float3 = lua.from_value(value)?;
            Ok(Vector3::new(v.x, v.y, v.z))
        }
        other => Err(LuaError::runtime(format!(
            "expected a {{x, y, z}} table, got {}",
            other.type_name()
        ))),
    }
}

/// Arguments of one call, consumed front to back.
pub struct ArgStack {
    values: std::vec::IntoIter<LuaValue>,
    position: usize,
}

impl ArgStack {
    pub fn new(args: LuaMultiValue) -> Self {
        let values: Vec<LuaValue> = args.into_iter().collect();
        Self {
            values: values.into_iter(),
            position: 0,
        }
    }

    /// Pop the next argument as `T`. A missing argument reads as `nil`.
    pub fn pop<T: ScriptArg>(&mut self, lua: &Lua) -> LuaResult<T> {
        self.position += 1;
        let value = self.values.next().unwrap_or(LuaValue::Nil);
        T::from_script(lua, value).map_err(|e| {
            LuaError::runtime(format!(
                "bad argument #{} ({} expected): {}",
                self.position,
                T::KIND.lua_type(),
                e
            ))
        })
    }

    /// Arguments not popped yet.
    pub fn remaining(&self) -> usize {
        self.values.len()
    }
}

/// A type that can be read from one Lua argument.
pub trait ScriptArg: Sized {
    const KIND: ArgKind;

    fn from_script(lua: &Lua, value: LuaValue) -> LuaResult<Self>;
}

/// A type that can be handed back to Lua.
///
/// `KIND` is `None` for operations that return nothing.
pub trait ScriptReturn {
    const KIND: Option<ArgKind>;
    /// Whether the value may come back as `nil`.
    const OPTIONAL: bool = false;

    /// Annotation type used in stubs. Defaults to the kind's type.
    fn lua_type_name() -> Option<&'static str> {
        Self::KIND.map(|kind| kind.lua_type())
    }

    fn into_script(self, lua: &Lua) -> LuaResult<LuaMultiValue>;
}

macro_rules! impl_scalar_marshal {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl ScriptArg for $ty {
                const KIND: ArgKind = ArgKind::$kind;

                fn from_script(lua: &Lua, value: LuaValue) -> LuaResult<Self> {
                    <$ty>::from_lua(value, lua)
                }
            }

            impl ScriptReturn for $ty {
                const KIND: Option<ArgKind> = Some(ArgKind::$kind);

                fn into_script(self, lua: &Lua) -> LuaResult<LuaMultiValue> {
                    self.into_lua_multi(lua)
                }
            }
        )*
    };
}

impl_scalar_marshal!(
    i32 => Integer,
    i64 => Integer,
    u32 => Integer,
    u64 => Integer,
    usize => Integer,
    f32 => Number,
    f64 => Number,
    bool => Boolean,
    String => String,
);

impl ScriptArg for Vector3<f32> {
    const KIND: ArgKind = ArgKind::Vec3;

    fn from_script(lua: &Lua, value: LuaValue) -> LuaResult<Self> {
        vec3_from_lua(lua, value)
    }
}

impl ScriptReturn for Vector3<f32> {
    const KIND: Option<ArgKind> = Some(ArgKind::Vec3);

    fn into_script(self, lua: &Lua) -> LuaResult<LuaMultiValue> {
        vec3_to_lua(lua, &self)?.into_lua_multi(lua)
    }
}

impl ScriptReturn for () {
    const KIND: Option<ArgKind> = None;

    fn into_script(self, _lua: &Lua) -> LuaResult<LuaMultiValue> {
        Ok(LuaMultiValue::new())
    }
}

impl<T: ScriptReturn> ScriptReturn for Option<T> {
    const KIND: Option<ArgKind> = T::KIND;
    const OPTIONAL: bool = true;

    fn lua_type_name() -> Option<&'static str> {
        T::lua_type_name()
    }

    fn into_script(self, lua: &Lua) -> LuaResult<LuaMultiValue> {
        match self {
            Some(value) => value.into_script(lua),
            None => LuaValue::Nil.into_lua_multi(lua),
        }
    }
}
