pub mod arena;
pub mod bindings;
pub mod fun_callback;
pub mod intrinsics;
pub mod runtime_error;
pub mod state;
pub mod vm;

pub use bindings::NativeBindings;
pub use intrinsics::HostEnvironment;
pub use runtime_error::{RuntimeError, VmError};
pub use state::{BsVmState, RuntimeListener};
pub use vm::{BsVm, VmConfig};
