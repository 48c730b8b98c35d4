pub mod assembly;
pub mod codegen;
pub mod disasm;
pub mod op;
pub mod stack_check;

pub use assembly::Assembly;
pub use op::Op;
