//! Lua scripting for the simulation.
//!
//! The bridge has two jobs. It exposes native operations of the engine
//! subsystems to Lua without per-operation glue, and it drives per-entity
//! script functions once per tick.
//!
//! - [`marshal`] - argument and return value conversion
//! - [`registrar`] - binding native operations to Lua names
//! - [`dispatch`] - which entities each script function runs for
//! - [`events`] - input and collision events queued for `on_event`
//! - [`runtime`] - the Lua state and the tick/init drivers
//!
//! # Example
//!
//! ```lua
//! function init()
//!     log.info("starting")
//! end
//!
//! function main(dt)
//!     -- once per tick, dt in microseconds
//! end
//!
//! function bounce(entity, dt)
//!     local p = scene_get_instance_position(entity)
//!     if p.y < 0.6 then
//!         physics_apply_impulse(entity, { x = 0, y = 4, z = 0 })
//!     end
//! end
//! ```

pub mod dispatch;
pub mod events;
pub mod marshal;
pub mod registrar;
pub mod runtime;

pub use dispatch::{Context, DispatchEntry, DispatchTable};
pub use events::{EventQueue, EventSender, ScriptEvent, ScriptEventKind};
pub use marshal::{ArgKind, ArgStack, ScriptArg, ScriptReturn};
pub use registrar::{Callable, NativeOp, Registrar, Registration, Signature};
pub use runtime::ScriptBridge;
