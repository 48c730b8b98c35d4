//! Host-facing API: managers, libraries and compiled scripts.

pub mod block_lib;
pub mod block_script;
pub mod compiler;
pub mod listener;
pub mod manager;

pub use block_lib::{BlockLib, ClassTypeDesc, EnumTypeDesc, IntrinsicFunction, StructTypeDesc};
pub use block_script::{BlockScript, ScriptError, ScriptStatus};
pub use compiler::{BlockScriptCompiler, CompileOutput, CompilerConfig};
pub use listener::{CompilerListener, DirIncluder, FileIncluder};
pub use manager::BlockScriptManager;
