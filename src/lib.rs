//! BlockScript: an embeddable, statically typed scripting language with
//! vector math, compiled to a compact stack bytecode.
//!
//! A host creates a [`BlockScriptManager`], registers its own types and
//! functions in [`BlockLib`]s, compiles a [`BlockScript`] and runs it on one
//! or more [`BsVmState`]s.

pub mod builder;
pub mod bytecode;
pub mod frontend;
pub mod lang;
pub mod runtime;
pub mod script;

pub use lang::value::Value;
pub use runtime::{BsVm, BsVmState, HostEnvironment, RuntimeError, VmConfig, VmError};
pub use script::{BlockLib, BlockScript, BlockScriptManager, ScriptError, ScriptStatus};
