//! Binding native operations to script-callable names.
//!
//! A subsystem exposes itself to scripts by filling a [`Registrar`]: it names
//! each operation and passes the operation itself, either a method path such
//! as `Scene::set_instance_position` or a closure taking `&mut Subsystem`
//! first. The argument list is read off the operation's type, so there is no
//! per-operation marshaling code. The filled registrar is then handed to
//! [`ScriptBridge::register_callables`](super::ScriptBridge::register_callables).
//!
//! ```ignore
//! let mut registrar = bridge.create_registrar("scene", scene.clone());
//! registrar
//!     .register("set_instance_position", Scene::set_instance_position)
//!     .params(&["id", "position"])
//!     .register("get_instance_position", |s: &mut Scene, id: InstanceId| {
//!         s.get_instance_position(id)
//!     })
//!     .params(&["id"]);
//! bridge.register_callables(registrar)?;
//! ```
//!
//! Operations are supported up to five arguments.

use super::marshal::{ArgKind, ArgStack, ScriptArg, ScriptReturn};
use mlua::prelude::*;
use smallvec::{SmallVec, smallvec};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

/// Script-facing description of one registered operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    /// Global name the operation is installed under.
    pub name: String,
    pub args: SmallVec<[ArgKind; 4]>,
    /// Optional parameter names, used for stubs. Missing names read `argN`.
    pub param_names: Vec<String>,
    pub returns: Option<ArgKind>,
    /// Stub annotation of the return value.
    pub return_type: Option<&'static str>,
    pub optional_return: bool,
}

impl Signature {
    pub fn param_name(&self, index: usize) -> String {
        self.param_names
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("arg{}", index + 1))
    }
}

/// A type-erased native operation bound to its subsystem.
pub trait Callable {
    fn name(&self) -> &str;

    /// Pop the arguments, run the operation and return what it produced.
    fn call(&self, lua: &Lua, args: LuaMultiValue) -> LuaResult<LuaMultiValue>;
}

/// A native operation on `T` taking the argument tuple `Args`.
///
/// Implemented for every `Fn(&mut T, A1, .., An) -> R` whose arguments are
/// [`ScriptArg`] and whose result is [`ScriptReturn`].
pub trait NativeOp<T, Args>: 'static {
    type Ret: ScriptReturn;

    fn arg_kinds() -> SmallVec<[ArgKind; 4]>;

    fn invoke(&self, target: &mut T, lua: &Lua, args: &mut ArgStack) -> LuaResult<Self::Ret>;
}

macro_rules! impl_native_op {
    ($($arg:ident),*) => {
        impl<T, F, R, $($arg,)*> NativeOp<T, ($($arg,)*)> for F
        where
            F: Fn(&mut T, $($arg),*) -> R + 'static,
            R: ScriptReturn,
            $($arg: ScriptArg,)*
        {
            type Ret = R;

            fn arg_kinds() -> SmallVec<[ArgKind; 4]> {
                smallvec![$(<$arg as ScriptArg>::KIND),*]
            }

            #[allow(non_snake_case, unused_variables)]
            fn invoke(&self, target: &mut T, lua: &Lua, args: &mut ArgStack) -> LuaResult<R> {
                $(let $arg = args.pop::<$arg>(lua)?;)*
                Ok((self)(target, $($arg),*))
            }
        }
    };
}

impl_native_op!();
impl_native_op!(A1);
impl_native_op!(A1, A2);
impl_native_op!(A1, A2, A3);
impl_native_op!(A1, A2, A3, A4);
impl_native_op!(A1, A2, A3, A4, A5);

struct BoundCallable<T, F, Args> {
    name: String,
    target: Rc<RefCell<T>>,
    op: F,
    _args: PhantomData<fn() -> Args>,
}

impl<T, F, Args> Callable for BoundCallable<T, F, Args>
where
    F: NativeOp<T, Args>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, lua: &Lua, args: LuaMultiValue) -> LuaResult<LuaMultiValue> {
        let mut stack = ArgStack::new(args);
        let result = {
            let mut target = self.target.try_borrow_mut().map_err(|_| {
                LuaError::runtime(format!("{}: subsystem is already in use", self.name))
            })?;
            self.op.invoke(&mut target, lua, &mut stack)
        };
        let result = result.map_err(|e| LuaError::runtime(format!("{}: {}", self.name, e)))?;
        result.into_script(lua)
    }
}

/// One operation ready to be installed.
pub struct Registration {
    pub signature: Signature,
    pub callable: Rc<dyn Callable>,
}

/// Batch of operations of one subsystem.
pub struct Registrar<T> {
    prefix: String,
    target: Rc<RefCell<T>>,
    entries: Vec<Registration>,
}

impl<T: 'static> Registrar<T> {
    /// Operations will be installed as `<prefix>_<name>`, or plain `<name>`
    /// for an empty prefix.
    pub fn new(prefix: impl Into<String>, target: Rc<RefCell<T>>) -> Self {
        Self {
            prefix: prefix.into(),
            target,
            entries: Vec::new(),
        }
    }

    /// Bind `op` on this registrar's subsystem under `name`.
    pub fn register<Args, F>(&mut self, name: &str, op: F) -> &mut Self
    where
        Args: 'static,
        F: NativeOp<T, Args>,
    {
        let name = if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}_{}", self.prefix, name)
        };
        let signature = Signature {
            name: name.clone(),
            args: F::arg_kinds(),
            param_names: Vec::new(),
            returns: <F::Ret as ScriptReturn>::KIND,
            return_type: <F::Ret as ScriptReturn>::lua_type_name(),
            optional_return: <F::Ret as ScriptReturn>::OPTIONAL,
        };
        let callable = BoundCallable {
            name,
            target: self.target.clone(),
            op,
            _args: PhantomData::<fn() -> Args>,
        };
        self.entries.push(Registration {
            signature,
            callable: Rc::new(callable),
        });
        self
    }

    /// Name the parameters of the most recently registered operation.
    pub fn params(&mut self, names: &[&str]) -> &mut Self {
        if let Some(last) = self.entries.last_mut() {
            debug_assert_eq!(
                names.len(),
                last.signature.args.len(),
                "{}: parameter names do not match the argument count",
                last.signature.name
            );
            last.signature.param_names = names.iter().map(|n| n.to_string()).collect();
        }
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_registrations(self) -> Vec<Registration> {
        self.entries
    }
}
