use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::bytecode::Op;
use crate::runtime::fun_callback::PropertyRef;

/// Returned by the bind-point lookups when nothing matches.
pub const FUN_INVALID_BIND_POINT: i32 = -1;
pub const GLOBAL_INVALID_BIND_POINT: i32 = -1;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Unique per compiled or loaded assembly in this process.
pub fn next_serial() -> u64 {
    NEXT_SERIAL.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionEntry {
    pub name: String,
    /// Parameter type names.
    pub params: Vec<String>,
    pub ret: String,
    /// First op.
    pub entry: u32,
    /// One past the last op.
    pub end: u32,
    pub frame_size: u32,
    pub arg_size: u32,
    pub ret_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalEntry {
    pub name: String,
    pub type_name: String,
    /// Byte offset in the global frame.
    pub offset: u32,
    pub size: u32,
    pub is_extern: bool,
    pub init: Option<Vec<u8>>,
}

/// A native function the code calls, by signature. Rebound on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeRef {
    pub name: String,
    pub params: Vec<String>,
    pub ret: String,
    pub arg_size: u32,
    pub ret_size: u32,
}

/// A host class whose properties the code reads or writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessorRef {
    pub class_name: String,
    pub properties: Vec<PropertyRef>,
}

/// A compiled script: code, symbol tables for binding and the layout of
/// its global frame. Everything but the native callbacks, so it can be
/// stored and reloaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assembly {
    /// Global code first, then every function body.
    pub code: Vec<Op>,
    pub strings: Vec<String>,
    pub functions: Vec<FunctionEntry>,
    pub globals: Vec<GlobalEntry>,
    pub natives: Vec<NativeRef>,
    pub accessors: Vec<AccessorRef>,
    pub global_frame_size: u32,
    /// End of the global code, start of the first function.
    pub global_end: u32,
    #[serde(skip)]
    pub serial: u64,
}

impl Assembly {
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Decodes an assembly. It gets a fresh serial: states initialized by
    /// another assembly are never mistaken for this one's.
    pub fn from_bytes(bytes: &[u8]) -> Result<Assembly, postcard::Error> {
        let mut assembly: Assembly = postcard::from_bytes(bytes)?;
        assembly.serial = next_serial();
        Ok(assembly)
    }

    /// Index of the function with exactly this name and parameter types,
    /// or [`FUN_INVALID_BIND_POINT`].
    pub fn get_function_bind_point(&self, name: &str, params: &[&str]) -> i32 {
        self.functions
            .iter()
            .position(|f| {
                f.name == name
                    && f.params.len() == params.len()
                    && f.params.iter().zip(params).all(|(a, b)| a == b)
            })
            .map_or(FUN_INVALID_BIND_POINT, |i| i as i32)
    }

    /// Index of the `extern` global `name`, or [`GLOBAL_INVALID_BIND_POINT`].
    /// Non-extern globals are not bindable.
    pub fn get_global_bind_point(&self, name: &str) -> i32 {
        self.globals
            .iter()
            .position(|g| g.is_extern && g.name == name)
            .map_or(GLOBAL_INVALID_BIND_POINT, |i| i as i32)
    }

    pub fn function(&self, bind_point: i32) -> Option<&FunctionEntry> {
        usize::try_from(bind_point)
            .ok()
            .and_then(|i| self.functions.get(i))
    }

    pub fn global(&self, bind_point: i32) -> Option<&GlobalEntry> {
        usize::try_from(bind_point)
            .ok()
            .and_then(|i| self.globals.get(i))
            .filter(|g| g.is_extern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Assembly {
        Assembly {
            code: vec![Op::Exit, Op::LocalAddr(0), Op::Load(1), Op::Ret(1)],
            strings: vec!["hi".to_string()],
            functions: vec![FunctionEntry {
                name: "Id".to_string(),
                params: vec!["int".to_string()],
                ret: "int".to_string(),
                entry: 1,
                end: 4,
                frame_size: 4,
                arg_size: 4,
                ret_size: 4,
            }],
            globals: vec![
                GlobalEntry {
                    name: "hidden".to_string(),
                    type_name: "int".to_string(),
                    offset: 0,
                    size: 4,
                    is_extern: false,
                    init: None,
                },
                GlobalEntry {
                    name: "counter".to_string(),
                    type_name: "int".to_string(),
                    offset: 4,
                    size: 4,
                    is_extern: true,
                    init: Some(42i32.to_le_bytes().to_vec()),
                },
            ],
            natives: Vec::new(),
            accessors: Vec::new(),
            global_frame_size: 8,
            global_end: 1,
            serial: next_serial(),
        }
    }

    #[test]
    fn test_function_bind_point_is_exact() {
        let asm = sample();
        assert_eq!(asm.get_function_bind_point("Id", &["int"]), 0);
        assert_eq!(asm.get_function_bind_point("Id", &["float"]), FUN_INVALID_BIND_POINT);
        assert_eq!(asm.get_function_bind_point("Id", &[]), FUN_INVALID_BIND_POINT);
        // idempotent
        assert_eq!(asm.get_function_bind_point("Id", &["int"]), 0);
    }

    #[test]
    fn test_only_externs_bind() {
        let asm = sample();
        assert_eq!(asm.get_global_bind_point("counter"), 1);
        assert_eq!(asm.get_global_bind_point("hidden"), GLOBAL_INVALID_BIND_POINT);
        assert!(asm.global(0).is_none());
        assert!(asm.global(-1).is_none());
    }

    #[test]
    fn test_reload_gets_new_serial() {
        let asm = sample();
        let bytes = asm.to_bytes().unwrap();
        let loaded = Assembly::from_bytes(&bytes).unwrap();
        assert_ne!(loaded.serial, asm.serial);
        assert_eq!(loaded.code, asm.code);
        assert_eq!(loaded.globals, asm.globals);
    }
}
