use thiserror::Error;
use tracing::debug;

use crate::bytecode::assembly::Assembly;
use crate::lang::symbol_table::{FunImpl, SymbolTable};
use crate::lang::types::TypeKind;
use crate::runtime::fun_callback::{FunCallback, PropertyCallback};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinkError {
    #[error("native function '{0}' is not registered")]
    MissingFunction(String),

    #[error("'{0}' is not a native function")]
    NotNative(String),

    #[error("class '{0}' is not registered")]
    MissingClass(String),
}

/// The host callbacks an assembly refers to, in the order of its native and
/// accessor tables. An assembly only stores signatures; a `NativeBindings`
/// built from the symbol tables makes it runnable.
#[derive(Clone, Default)]
pub struct NativeBindings {
    pub functions: Vec<FunCallback>,
    /// `None` for classes registered without an accessor.
    pub accessors: Vec<Option<PropertyCallback>>,
}

impl std::fmt::Debug for NativeBindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeBindings")
            .field("functions", &self.functions.len())
            .field("accessors", &self.accessors.len())
            .finish()
    }
}

impl NativeBindings {
    /// Resolves every native and accessor of `assembly` by name and
    /// signature against `table` and the tables it links.
    pub fn link(assembly: &Assembly, table: &SymbolTable) -> Result<NativeBindings, LinkError> {
        let mut functions = Vec::with_capacity(assembly.natives.len());
        for native in &assembly.natives {
            let params: Vec<&str> = native.params.iter().map(String::as_str).collect();
            let signature = format!("{}({})", native.name, native.params.join(", "));
            let desc = table
                .find_function_description(&native.name, &params)
                .ok_or_else(|| LinkError::MissingFunction(signature.clone()))?;
            match &desc.imp {
                FunImpl::Native(callback) => functions.push(callback.clone()),
                _ => return Err(LinkError::NotNative(signature)),
            }
        }

        let mut accessors = Vec::with_capacity(assembly.accessors.len());
        for accessor in &assembly.accessors {
            let class = table
                .get_type_by_name(&accessor.class_name)
                .filter(|t| t.kind == TypeKind::Class)
                .ok_or_else(|| LinkError::MissingClass(accessor.class_name.clone()))?;
            accessors.push(class.class.as_ref().and_then(|c| c.accessor.clone()));
        }

        debug!(
            natives = functions.len(),
            accessors = accessors.len(),
            "linked assembly"
        );
        Ok(NativeBindings {
            functions,
            accessors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::assembly::{NativeRef, next_serial};
    use crate::bytecode::Op;
    use crate::runtime::intrinsics::{HostEnvironment, create_runtime_table};

    fn with_natives(natives: Vec<NativeRef>) -> Assembly {
        Assembly {
            code: vec![Op::Exit],
            strings: Vec::new(),
            functions: Vec::new(),
            globals: Vec::new(),
            natives,
            accessors: Vec::new(),
            global_frame_size: 0,
            global_end: 1,
            serial: next_serial(),
        }
    }

    fn native(name: &str, params: &[&str]) -> NativeRef {
        NativeRef {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            ret: "int".to_string(),
            arg_size: 4 * params.len() as u32,
            ret_size: 4,
        }
    }

    #[test]
    fn test_link_by_signature() {
        let table = create_runtime_table(&HostEnvironment::default()).unwrap();
        let asm = with_natives(vec![native("echo", &["int"]), native("sqrt", &["float"])]);
        let bindings = NativeBindings::link(&asm, &table).unwrap();
        assert_eq!(bindings.functions.len(), 2);
    }

    #[test]
    fn test_link_reports_missing_signature() {
        let table = create_runtime_table(&HostEnvironment::default()).unwrap();
        let asm = with_natives(vec![native("echo", &["int", "int"])]);
        let err = NativeBindings::link(&asm, &table).unwrap_err();
        assert_eq!(err, LinkError::MissingFunction("echo(int, int)".to_string()));
    }

    #[test]
    fn test_constructor_is_not_native() {
        let mut table = SymbolTable::new("lib");
        let int = table
            .create_scalar_type("int", crate::lang::types::AluEngine::Int)
            .unwrap();
        table
            .create_struct_type("P", vec![("a".to_string(), int)])
            .unwrap();
        let asm = with_natives(vec![native("P", &[])]);
        assert_eq!(
            NativeBindings::link(&asm, &table).unwrap_err(),
            LinkError::NotNative("P()".to_string())
        );
    }
}
