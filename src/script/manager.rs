use std::sync::Arc;

use tracing::debug;

use crate::lang::symbol_table::{SymbolError, SymbolTable};
use crate::runtime::intrinsics::{HostEnvironment, create_runtime_table};
use crate::script::block_lib::BlockLib;
use crate::script::block_script::BlockScript;

/// Owns the runtime library and hands out scripts and libraries linked to
/// it. Managers are independent: two managers in one process share nothing.
#[derive(Debug)]
pub struct BlockScriptManager {
    env: HostEnvironment,
    runtime: Arc<SymbolTable>,
}

impl BlockScriptManager {
    pub fn new(env: HostEnvironment) -> Result<Self, SymbolError> {
        let runtime = Arc::new(create_runtime_table(&env)?);
        debug!("block script manager ready");
        Ok(BlockScriptManager { env, runtime })
    }

    pub fn create_block_script(&self) -> BlockScript {
        BlockScript::new(self.runtime.clone())
    }

    pub fn create_block_lib(&self, name: &str) -> BlockLib {
        BlockLib::new(name, self.runtime.clone())
    }

    pub fn runtime_lib(&self) -> &Arc<SymbolTable> {
        &self.runtime
    }

    pub fn environment(&self) -> &HostEnvironment {
        &self.env
    }
}
