use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::builder::CompileError;
use crate::bytecode::assembly::{
    Assembly, FUN_INVALID_BIND_POINT, GLOBAL_INVALID_BIND_POINT,
};
use crate::bytecode::stack_check::{StackCheckError, check_assembly};
use crate::lang::ast::Program;
use crate::lang::symbol_table::SymbolTable;
use crate::lang::types::TypeDesc;
use crate::lang::value::{Value, ValueError};
use crate::runtime::bindings::{LinkError, NativeBindings};
use crate::runtime::runtime_error::{RuntimeError, VmError};
use crate::runtime::state::BsVmState;
use crate::runtime::vm::{BsVm, VmConfig};
use crate::script::block_lib::BlockLib;
use crate::script::compiler::{BlockScriptCompiler, CompilerConfig, script_table};
use crate::script::listener::{CompilerListener, FileIncluder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStatus {
    /// Nothing compiled yet, or reset since.
    Uninitialized,
    /// Compiled and runnable.
    Active,
    /// The last compilation failed.
    Inert,
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script must be reset before it is compiled again")]
    NotReset,

    #[error("script has no compiled assembly")]
    NotActive,

    #[error("compilation failed with {} error(s)", .0.len())]
    Compile(Vec<CompileError>),

    #[error("could not decode assembly: {0}")]
    Load(String),

    #[error("could not encode assembly: {0}")]
    Encode(String),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    StackCheck(#[from] StackCheckError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Vm(#[from] VmError),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("'{name}' takes {expected} arguments, got {got}")]
    ArgumentCount {
        name: String,
        expected: usize,
        got: usize,
    },
}

struct Compiled {
    assembly: Assembly,
    bindings: NativeBindings,
    table: SymbolTable,
    /// Absent for assemblies loaded from bytes.
    program: Option<Program>,
}

/// A compilable, runnable script.
///
/// Compiling moves the script from `Uninitialized` to `Active`, or to `Inert`
/// on failure; `reset` discards the result. One compiled script may run on
/// any number of [`BsVmState`]s.
pub struct BlockScript {
    runtime: Arc<SymbolTable>,
    libs: Vec<Arc<SymbolTable>>,
    definitions: Vec<(String, String)>,
    includer: Option<Box<dyn FileIncluder + Send>>,
    listener: Option<Box<dyn CompilerListener>>,
    compiler_config: CompilerConfig,
    vm_config: VmConfig,
    status: ScriptStatus,
    compiled: Option<Compiled>,
}

impl std::fmt::Debug for BlockScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockScript")
            .field("status", &self.status)
            .field("libs", &self.libs.iter().map(|l| l.name()).collect::<Vec<_>>())
            .field("serial", &self.serial())
            .finish_non_exhaustive()
    }
}

impl BlockScript {
    pub(crate) fn new(runtime: Arc<SymbolTable>) -> Self {
        BlockScript {
            runtime,
            libs: Vec::new(),
            definitions: Vec::new(),
            includer: None,
            listener: None,
            compiler_config: CompilerConfig::default(),
            vm_config: VmConfig::default(),
            status: ScriptStatus::Uninitialized,
            compiled: None,
        }
    }

    // =========================================================================
    // Setup
    // =========================================================================

    /// Makes `lib` visible to the next compilation. Libraries included
    /// earlier are searched first; including the same library twice is a
    /// no-op.
    pub fn include_lib(&mut self, lib: &BlockLib) {
        if !self.libs.iter().any(|l| Arc::ptr_eq(l, lib.table())) {
            self.libs.push(lib.table().clone());
        }
    }

    /// Presets preprocessor definitions for every following compilation.
    pub fn register_definitions(&mut self, definitions: &[(&str, &str)]) {
        self.definitions.extend(
            definitions
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string())),
        );
    }

    pub fn set_file_includer(&mut self, includer: Box<dyn FileIncluder + Send>) {
        self.includer = Some(includer);
    }

    pub fn set_compiler_listener(&mut self, listener: Box<dyn CompilerListener>) {
        self.listener = Some(listener);
    }

    pub fn set_compiler_config(&mut self, config: CompilerConfig) {
        self.compiler_config = config;
    }

    pub fn set_vm_config(&mut self, config: VmConfig) {
        self.vm_config = config;
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn status(&self) -> ScriptStatus {
        self.status
    }

    pub fn compile(&mut self, source: &str) -> Result<(), ScriptError> {
        if self.status != ScriptStatus::Uninitialized {
            return Err(ScriptError::NotReset);
        }

        let mut compiler = BlockScriptCompiler::new(self.runtime.clone())
            .with_config(self.compiler_config.clone())
            .with_libs(&self.libs)
            .with_definitions(&self.definitions);
        if let Some(includer) = self.includer.as_deref_mut() {
            compiler = compiler.with_file_includer(includer);
        }
        if let Some(listener) = self.listener.as_deref_mut() {
            compiler = compiler.with_listener(listener);
        }

        match compiler.compile(source) {
            Ok(out) => {
                info!(serial = out.assembly.serial, "script compiled");
                self.compiled = Some(Compiled {
                    assembly: out.assembly,
                    bindings: out.bindings,
                    table: out.table,
                    program: Some(out.program),
                });
                self.status = ScriptStatus::Active;
                Ok(())
            }
            Err(errors) => {
                self.status = ScriptStatus::Inert;
                Err(ScriptError::Compile(errors))
            }
        }
    }

    /// Loads an assembly produced by [`BlockScript::to_bytes`] and links it
    /// against the runtime and the included libraries.
    pub fn load_assembly(&mut self, bytes: &[u8]) -> Result<(), ScriptError> {
        if self.status != ScriptStatus::Uninitialized {
            return Err(ScriptError::NotReset);
        }
        let result = (|| {
            let assembly =
                Assembly::from_bytes(bytes).map_err(|e| ScriptError::Load(e.to_string()))?;
            check_assembly(&assembly)?;
            let table = script_table(&self.runtime, &self.libs);
            let bindings = NativeBindings::link(&assembly, &table)?;
            Ok(Compiled {
                assembly,
                bindings,
                table,
                program: None,
            })
        })();

        match result {
            Ok(compiled) => {
                debug!(serial = compiled.assembly.serial, "assembly loaded");
                self.compiled = Some(compiled);
                self.status = ScriptStatus::Active;
                Ok(())
            }
            Err(e) => {
                self.status = ScriptStatus::Inert;
                Err(e)
            }
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ScriptError> {
        self.active()?
            .assembly
            .to_bytes()
            .map_err(|e| ScriptError::Encode(e.to_string()))
    }

    /// Discards the compiled assembly and syntax tree. Libraries,
    /// definitions and hooks stay.
    pub fn reset(&mut self) {
        self.compiled = None;
        self.status = ScriptStatus::Uninitialized;
    }

    fn active(&self) -> Result<&Compiled, ScriptError> {
        self.compiled.as_ref().ok_or(ScriptError::NotActive)
    }

    fn vm(&self) -> Result<BsVm<'_>, ScriptError> {
        let compiled = self.active()?;
        Ok(BsVm::with_config(
            &compiled.assembly,
            &compiled.bindings,
            self.vm_config.clone(),
        ))
    }

    pub fn assembly(&self) -> Option<&Assembly> {
        self.compiled.as_ref().map(|c| &c.assembly)
    }

    pub fn bindings(&self) -> Option<&NativeBindings> {
        self.compiled.as_ref().map(|c| &c.bindings)
    }

    pub fn ast(&self) -> Option<&Program> {
        self.compiled.as_ref()?.program.as_ref()
    }

    pub fn table(&self) -> Option<&SymbolTable> {
        self.compiled.as_ref().map(|c| &c.table)
    }

    /// Serial of the compiled assembly. Changes with every compilation.
    pub fn serial(&self) -> Option<u64> {
        self.assembly().map(|a| a.serial)
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Runs the global code on a reset `state`.
    pub fn run(&self, state: &mut BsVmState) -> Result<(), ScriptError> {
        self.vm()?.run(state)?;
        Ok(())
    }

    /// Runs only when `state` was not initialized by the current assembly.
    /// Returns whether it ran.
    pub fn run_if_stale(&self, state: &mut BsVmState) -> Result<bool, ScriptError> {
        if state.initialized_by().is_some() && state.initialized_by() == self.serial() {
            return Ok(false);
        }
        self.run(state)?;
        Ok(true)
    }

    pub fn get_function_bind_point(&self, name: &str, params: &[&str]) -> i32 {
        self.assembly()
            .map_or(FUN_INVALID_BIND_POINT, |a| a.get_function_bind_point(name, params))
    }

    pub fn execute_function(
        &self,
        state: &mut BsVmState,
        bind_point: i32,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<(), ScriptError> {
        self.vm()?.execute_function(state, bind_point, input, output)?;
        Ok(())
    }

    /// Packs `args`, executes the function and decodes its return value.
    pub fn call_function(
        &self,
        state: &mut BsVmState,
        bind_point: i32,
        args: &[Value],
    ) -> Result<Value, ScriptError> {
        let compiled = self.active()?;
        let function = compiled
            .assembly
            .function(bind_point)
            .ok_or(VmError::InvalidBindPoint(bind_point))?;
        if args.len() != function.params.len() {
            return Err(ScriptError::ArgumentCount {
                name: function.name.clone(),
                expected: function.params.len(),
                got: args.len(),
            });
        }

        let mut input = Vec::with_capacity(function.arg_size as usize);
        for arg in args {
            arg.encode(&mut input);
        }
        let ret = self.type_named(&function.ret)?;
        let mut output = vec![0u8; function.ret_size as usize];
        self.execute_function(state, bind_point, &input, &mut output)?;
        Ok(Value::decode(&output, &ret)?)
    }

    // =========================================================================
    // Globals
    // =========================================================================

    pub fn get_global_bind_point(&self, name: &str) -> i32 {
        self.assembly()
            .map_or(GLOBAL_INVALID_BIND_POINT, |a| a.get_global_bind_point(name))
    }

    pub fn get_global_type(&self, bind_point: i32) -> Option<Arc<TypeDesc>> {
        let compiled = self.compiled.as_ref()?;
        let global = compiled.assembly.global(bind_point)?;
        compiled.table.type_from_name(&global.type_name)
    }

    /// Raw bytes of an extern global in an initialized state.
    pub fn global_bytes<'s>(
        &self,
        state: &'s BsVmState,
        bind_point: i32,
    ) -> Result<&'s [u8], ScriptError> {
        Ok(self.vm()?.read_global(state, bind_point)?)
    }

    pub fn read_global_value(&self, state: &BsVmState, bind_point: i32) -> Result<Value, ScriptError> {
        let ty = self
            .get_global_type(bind_point)
            .ok_or(VmError::InvalidBindPoint(bind_point))?;
        let bytes = self.global_bytes(state, bind_point)?;
        Ok(Value::decode(bytes, &ty)?)
    }

    pub fn write_global_value(
        &self,
        state: &mut BsVmState,
        bind_point: i32,
        value: &Value,
    ) -> Result<(), ScriptError> {
        let mut bytes = Vec::new();
        value.encode(&mut bytes);
        self.vm()?.write_global(state, bind_point, &bytes)?;
        Ok(())
    }

    fn type_named(&self, name: &str) -> Result<Arc<TypeDesc>, ScriptError> {
        self.active()?
            .table
            .type_from_name(name)
            .ok_or_else(|| ScriptError::UnknownType(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::runtime::arena::{CollectionHandle, ObjectArena};
    use crate::runtime::fun_callback::{CallbackError, PropertyAccess};
    use crate::runtime::intrinsics::HostEnvironment;
    use crate::script::block_lib::{ClassTypeDesc, IntrinsicFunction};
    use crate::script::manager::BlockScriptManager;

    // ============================================================
    // Test Helpers
    // ============================================================

    type Lines = Arc<Mutex<Vec<String>>>;

    fn manager() -> (BlockScriptManager, Lines) {
        let lines: Lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let env = HostEnvironment::with_print(move |s| sink.lock().unwrap().push(s.to_string()));
        (BlockScriptManager::new(env).unwrap(), lines)
    }

    fn compile(manager: &BlockScriptManager, source: &str) -> BlockScript {
        let mut script = manager.create_block_script();
        if let Err(e) = script.compile(source) {
            panic!("compile failed: {:?}", e);
        }
        script
    }

    /// Compiles and runs `source`, returning everything it echoed.
    fn run_source(source: &str) -> Vec<String> {
        let (manager, lines) = manager();
        let script = compile(&manager, source);
        let mut state = BsVmState::new();
        script.run(&mut state).unwrap();
        let out = lines.lock().unwrap().clone();
        out
    }

    fn assert_compile_error(script: &mut BlockScript, source: &str, contains: &str) {
        match script.compile(source) {
            Err(ScriptError::Compile(errors)) => assert!(
                errors.iter().any(|e| e.message.contains(contains)),
                "expected error containing '{}', got: {:?}",
                contains,
                errors
            ),
            other => panic!("expected compile error, got {:?}", other),
        }
    }

    fn ints(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    const ADD: &str = "int Add(int a, int b) { return a + b; }";

    // ============================================================
    // Host API
    // ============================================================

    #[test]
    fn test_add_end_to_end() {
        let (manager, _) = manager();
        let script = compile(&manager, ADD);
        let bind = script.get_function_bind_point("Add", &["int", "int"]);
        assert!(bind >= 0);

        let mut state = BsVmState::new();
        script.run(&mut state).unwrap();
        let mut output = [0u8; 4];
        script
            .execute_function(&mut state, bind, &ints(&[2, 3]), &mut output)
            .unwrap();
        assert_eq!(i32::from_le_bytes(output), 5);
    }

    #[test]
    fn test_bind_points_are_idempotent() {
        let (manager, _) = manager();
        let script = compile(&manager, &format!("{}\nfloat Half(float v) {{ return v / 2.0; }}", ADD));
        let first = script.get_function_bind_point("Half", &["float"]);
        assert_eq!(first, script.get_function_bind_point("Half", &["float"]));
        assert_eq!(first, 1);
        assert_eq!(script.get_function_bind_point("Half", &["int"]), FUN_INVALID_BIND_POINT);
        assert_eq!(script.get_function_bind_point("Nope", &[]), FUN_INVALID_BIND_POINT);
    }

    #[test]
    fn test_extern_counter() {
        let (manager, _) = manager();
        let script = compile(&manager, "extern int counter;\ncounter = 42;");
        let mut state = BsVmState::new();
        script.run(&mut state).unwrap();

        let bind = script.get_global_bind_point("counter");
        assert!(bind >= 0);
        assert_eq!(script.get_global_type(bind).map(|t| t.name.clone()), Some("int".to_string()));
        assert_eq!(script.global_bytes(&state, bind).unwrap(), &42i32.to_le_bytes());
        assert_eq!(script.read_global_value(&state, bind).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_extern_written_by_host_is_seen_by_script() {
        let (manager, _) = manager();
        let script = compile(
            &manager,
            "extern float speed = 1.5;\nint hidden = 3;\nfloat Scaled(float v) { return v * speed; }",
        );
        let mut state = BsVmState::new();
        script.run(&mut state).unwrap();
        assert_eq!(script.get_global_bind_point("hidden"), GLOBAL_INVALID_BIND_POINT);

        let speed = script.get_global_bind_point("speed");
        assert_eq!(script.read_global_value(&state, speed).unwrap(), Value::Float(1.5));
        script
            .write_global_value(&mut state, speed, &Value::Float(4.0))
            .unwrap();
        let scaled = script.get_function_bind_point("Scaled", &["float"]);
        assert_eq!(
            script.call_function(&mut state, scaled, &[Value::Float(2.0)]).unwrap(),
            Value::Float(8.0)
        );
    }

    #[test]
    fn test_input_size_mismatch_leaves_output_alone() {
        let (manager, _) = manager();
        let script = compile(&manager, ADD);
        let mut state = BsVmState::new();
        script.run(&mut state).unwrap();
        let bind = script.get_function_bind_point("Add", &["int", "int"]);

        let mut output = [0xAAu8; 4];
        let result = script.execute_function(&mut state, bind, &ints(&[2]), &mut output);
        assert!(
            matches!(
                result,
                Err(ScriptError::Vm(VmError::InputSizeMismatch {
                    expected: 8,
                    got: 4
                }))
            ),
            "result was: {:?}",
            result
        );
        assert_eq!(output, [0xAAu8; 4]);
    }

    #[test]
    fn test_execute_before_run_is_rejected() {
        let (manager, _) = manager();
        let script = compile(&manager, ADD);
        let mut state = BsVmState::new();
        let result = script.execute_function(&mut state, 0, &ints(&[1, 2]), &mut [0u8; 4]);
        assert!(matches!(result, Err(ScriptError::Vm(VmError::StateNotReady))));
    }

    #[test]
    fn test_call_function_with_vectors() {
        let (manager, _) = manager();
        let script = compile(&manager, "float3 Scale(float3 v, float k) { return v * k; }");
        let mut state = BsVmState::new();
        script.run(&mut state).unwrap();
        let bind = script.get_function_bind_point("Scale", &["float3", "float"]);
        let out = script
            .call_function(
                &mut state,
                bind,
                &[Value::Vector(vec![1.0, 2.0, 3.0]), Value::Float(2.0)],
            )
            .unwrap();
        assert_eq!(out, Value::Vector(vec![2.0, 4.0, 6.0]));
        assert!(matches!(
            script.call_function(&mut state, bind, &[Value::Float(2.0)]),
            Err(ScriptError::ArgumentCount { expected: 2, got: 1, .. })
        ));
    }

    // ============================================================
    // Lifecycle
    // ============================================================

    #[test]
    fn test_status_transitions() {
        let (manager, _) = manager();
        let mut script = manager.create_block_script();
        assert_eq!(script.status(), ScriptStatus::Uninitialized);
        assert!(matches!(script.run(&mut BsVmState::new()), Err(ScriptError::NotActive)));

        assert_compile_error(&mut script, "int x = missing;", "unknown identifier");
        assert_eq!(script.status(), ScriptStatus::Inert);
        assert!(script.assembly().is_none());
        assert!(matches!(script.compile(ADD), Err(ScriptError::NotReset)));

        script.reset();
        script.compile(ADD).unwrap();
        assert_eq!(script.status(), ScriptStatus::Active);
        assert!(script.ast().is_some());
        assert!(matches!(script.compile(ADD), Err(ScriptError::NotReset)));
    }

    #[test]
    fn test_recompile_behaves_the_same() {
        let (manager, _) = manager();
        let mut script = compile(&manager, ADD);
        let first_serial = script.serial();
        let mut results = Vec::new();
        for _ in 0..2 {
            let mut state = BsVmState::new();
            script.run(&mut state).unwrap();
            let bind = script.get_function_bind_point("Add", &["int", "int"]);
            let v = script
                .call_function(&mut state, bind, &[Value::Int(20), Value::Int(22)])
                .unwrap();
            results.push(v);
            script.reset();
            script.compile(ADD).unwrap();
        }
        assert_eq!(results, vec![Value::Int(42), Value::Int(42)]);
        assert_ne!(script.serial(), first_serial);
    }

    #[test]
    fn test_run_if_stale() {
        let (manager, _) = manager();
        let mut script = compile(&manager, ADD);
        let mut state = BsVmState::new();
        assert!(script.run_if_stale(&mut state).unwrap());
        assert!(!script.run_if_stale(&mut state).unwrap());

        script.reset();
        script.compile(ADD).unwrap();
        assert!(script.run_if_stale(&mut state).unwrap());
    }

    #[test]
    fn test_runtime_fault_keeps_state_usable() {
        let (manager, _) = manager();
        let script = compile(
            &manager,
            "int Div(int a, int b) { return a / b; }\nint Outer(int a) { return Div(a, 0); }",
        );
        let mut state = BsVmState::new();
        script.run(&mut state).unwrap();
        let outer = script.get_function_bind_point("Outer", &["int"]);
        let err = script
            .call_function(&mut state, outer, &[Value::Int(1)])
            .unwrap_err();
        match err {
            ScriptError::Vm(VmError::Runtime(e)) => {
                assert_eq!(e.message, "division by zero");
                assert_eq!(e.call_stack, vec!["Div".to_string(), "Outer".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(state.stack_depth(), 0);
        let div = script.get_function_bind_point("Div", &["int", "int"]);
        assert_eq!(
            script
                .call_function(&mut state, div, &[Value::Int(9), Value::Int(3)])
                .unwrap(),
            Value::Int(3)
        );
    }

    #[test]
    fn test_serialized_assembly_reloads() {
        let (manager, lines) = manager();
        let source = format!("{}\necho(Add(40, 2));", ADD);
        let script = compile(&manager, &source);
        let bytes = script.to_bytes().unwrap();

        let mut loaded = manager.create_block_script();
        loaded.load_assembly(&bytes).unwrap();
        assert_eq!(loaded.status(), ScriptStatus::Active);
        assert!(loaded.ast().is_none());
        assert_ne!(loaded.serial(), script.serial());

        let mut state = BsVmState::new();
        loaded.run(&mut state).unwrap();
        assert_eq!(*lines.lock().unwrap(), vec!["42".to_string()]);
        let bind = loaded.get_function_bind_point("Add", &["int", "int"]);
        assert_eq!(
            loaded
                .call_function(&mut state, bind, &[Value::Int(1), Value::Int(1)])
                .unwrap(),
            Value::Int(2)
        );

        let mut broken = manager.create_block_script();
        assert!(matches!(broken.load_assembly(&bytes[..bytes.len() / 2]), Err(ScriptError::Load(_))));
        assert_eq!(broken.status(), ScriptStatus::Inert);
    }

    #[test]
    fn test_malformed_assembly_is_rejected_on_load() {
        let (manager, _) = manager();
        let script = compile(&manager, ADD);
        let mut assembly = script.assembly().unwrap().clone();
        assembly.functions[0].frame_size = 0;
        let bytes = assembly.to_bytes().unwrap();

        let mut loaded = manager.create_block_script();
        let result = loaded.load_assembly(&bytes);
        assert!(matches!(result, Err(ScriptError::StackCheck(_))), "result was: {:?}", result);
        assert_eq!(loaded.status(), ScriptStatus::Inert);
    }

    #[test]
    fn test_loaded_assembly_needs_its_libraries() {
        let (manager, _) = manager();
        let mut lib = manager.create_block_lib("util");
        lib.create_intrinsic_functions(vec![
            IntrinsicFunction::new("Seven", "int", |ctx| {
                ctx.ret().push_i32(7)?;
                Ok(())
            }),
        ])
        .unwrap();
        let mut script = manager.create_block_script();
        script.include_lib(&lib);
        script.compile("extern int v;\nv = Seven();").unwrap();
        let bytes = script.to_bytes().unwrap();

        let mut without = manager.create_block_script();
        assert!(matches!(
            without.load_assembly(&bytes),
            Err(ScriptError::Link(LinkError::MissingFunction(_)))
        ));

        let mut with = manager.create_block_script();
        with.include_lib(&lib);
        with.load_assembly(&bytes).unwrap();
        let mut state = BsVmState::new();
        with.run(&mut state).unwrap();
        let v = with.get_global_bind_point("v");
        assert_eq!(with.read_global_value(&state, v).unwrap(), Value::Int(7));
    }

    // ============================================================
    // Libraries
    // ============================================================

    fn foo_lib(manager: &BlockScriptManager, name: &str, value: i32) -> BlockLib {
        let mut lib = manager.create_block_lib(name);
        lib.create_intrinsic_functions(vec![
            IntrinsicFunction::new("Foo", "int", move |ctx| {
                ctx.ret().push_i32(value)?;
                Ok(())
            })
            .param("int", "x"),
        ])
        .unwrap();
        lib
    }

    #[test]
    fn test_duplicate_library_functions_fail_compilation() {
        let (manager, _) = manager();
        let a = foo_lib(&manager, "libA", 1);
        let b = foo_lib(&manager, "libB", 2);
        let mut script = manager.create_block_script();
        script.include_lib(&a);
        script.include_lib(&b);
        assert_compile_error(&mut script, "extern int r;\nr = Foo(0);", "Foo(int)");
        assert_eq!(script.status(), ScriptStatus::Inert);
    }

    #[test]
    fn test_script_cannot_redefine_library_function() {
        let (manager, _) = manager();
        let a = foo_lib(&manager, "libA", 1);
        let mut script = manager.create_block_script();
        script.include_lib(&a);
        assert_compile_error(&mut script, "int Foo(int x) { return x; }", "Foo(int)");
    }

    #[test]
    fn test_library_overloads_are_distinct() {
        let (manager, _) = manager();
        let a = foo_lib(&manager, "libA", 1);
        let mut b = manager.create_block_lib("libB");
        b.create_intrinsic_functions(vec![
            IntrinsicFunction::new("Foo", "int", |ctx| {
                ctx.ret().push_i32(2)?;
                Ok(())
            })
            .param("float", "x"),
        ])
        .unwrap();
        let mut script = manager.create_block_script();
        script.include_lib(&a);
        script.include_lib(&b);
        script.include_lib(&a);
        script
            .compile("extern int r;\nextern int s;\nr = Foo(0);\ns = Foo(0.5);")
            .unwrap();
        let mut state = BsVmState::new();
        script.run(&mut state).unwrap();
        let r = script.get_global_bind_point("r");
        let s = script.get_global_bind_point("s");
        assert_eq!(script.read_global_value(&state, r).unwrap(), Value::Int(1));
        assert_eq!(script.read_global_value(&state, s).unwrap(), Value::Int(2));
    }

    // ============================================================
    // Language
    // ============================================================

    #[test]
    fn test_structs() {
        let out = run_source(
            "struct Particle { float3 pos; float life; };\n\
             Particle p = Particle(float3(1.0, 2.0, 3.0), 0.5);\n\
             p.life = p.life * 2.0;\n\
             echo(p.pos.y);\n\
             echo(p.life);\n\
             Particle z = Particle();\n\
             echo(z.pos);",
        );
        assert_eq!(out, vec!["2", "1", "(0, 0, 0)"]);
    }

    #[test]
    fn test_swizzles() {
        let out = run_source(
            "float4 v = float4(1.0, 2.0, 3.0, 4.0);\n\
             float2 a = v.wx;\n\
             echo(a);\n\
             v.xy = float2(9.0, 8.0);\n\
             echo(v);\n\
             float3 s = 2.0;\n\
             echo(s * v.xyz);",
        );
        assert_eq!(out, vec!["(4, 1)", "(9, 8, 3, 4)", "(18, 16, 6)"]);
    }

    #[test]
    fn test_arrays() {
        let out = run_source(
            "int a[4];\n\
             int i = 0;\n\
             while (i < 4) { a[i] = i * i; i = i + 1; }\n\
             echo(a[3]);\n\
             float m[2][3];\n\
             m[1][2] = 5.0;\n\
             echo(m[1][2]);\n\
             echo(m[0][2]);",
        );
        assert_eq!(out, vec!["9", "5", "0"]);
    }

    #[test]
    fn test_array_index_out_of_range() {
        let (manager, _) = manager();
        let script = compile(&manager, "int b[2];\nint k = 2;\nb[k] = 1;");
        let err = script.run(&mut BsVmState::new()).unwrap_err();
        assert!(
            err.to_string().contains("index 2 out of range"),
            "msg was: {}",
            err
        );
    }

    #[test]
    fn test_enums_and_if_chains() {
        let out = run_source(
            "enum Mode { Off, On = 5, Auto };\n\
             Mode m = Auto;\n\
             if (m == On) { echo(\"on\"); } elif (m == Auto) { echo(\"auto\"); } else { echo(\"off\"); }\n\
             echo(int(m));",
        );
        assert_eq!(out, vec!["auto", "6"]);
    }

    #[test]
    fn test_global_code_runs_past_function_calls() {
        let (manager, lines) = manager();
        let script = compile(
            &manager,
            "int Add(int a, int b) { return a + b; }\n\
             void Say(int v) { echo(v); }\n\
             extern int r = 0;\n\
             r = Add(2, 3);\n\
             int i = 0;\n\
             while (i < 3) { Say(i); i = i + 1; }\n\
             echo(\"after\");",
        );
        let mut state = BsVmState::new();
        script.run(&mut state).unwrap();
        let r = script.get_global_bind_point("r");
        assert_eq!(script.read_global_value(&state, r).unwrap(), Value::Int(5));
        assert_eq!(*lines.lock().unwrap(), vec!["0", "1", "2", "after"]);
    }

    #[test]
    fn test_recursion() {
        let out = run_source(
            "int Fib(int n) { if (n < 2) { return n; } return Fib(n - 1) + Fib(n - 2); }\n\
             echo(Fib(10));",
        );
        assert_eq!(out, vec!["55"]);
    }

    #[test]
    fn test_strings_and_math() {
        let out = run_source(
            "string s = concat(\"a\", to_string(3));\n\
             echo(s);\n\
             echo(strlen(\"hello\"));\n\
             echo(max(2, 7));\n\
             echo(dot(float2(1.0, 2.0), float2(3.0, 4.0)));\n\
             echo(1 + 0.5);",
        );
        assert_eq!(out, vec!["a3", "5", "7", "11", "1.5"]);
    }

    #[test]
    fn test_preset_definitions() {
        let (manager, lines) = manager();
        let mut script = manager.create_block_script();
        script.register_definitions(&[("DEBUG", "1"), ("LEVEL", "3")]);
        script
            .compile("#if DEBUG && LEVEL > 2\necho(\"verbose\");\n#elseif DEBUG\necho(\"debug\");\n#else\necho(\"quiet\");\n#endif")
            .unwrap();
        script.run(&mut BsVmState::new()).unwrap();
        assert_eq!(*lines.lock().unwrap(), vec!["verbose".to_string()]);
    }

    #[test]
    fn test_includes_are_opened_and_closed() {
        struct Files {
            files: HashMap<String, String>,
            log: Lines,
        }

        impl FileIncluder for Files {
            fn open(&mut self, path: &str) -> std::io::Result<String> {
                self.log.lock().unwrap().push(format!("open {}", path));
                self.files.get(path).cloned().ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no such file")
                })
            }

            fn close(&mut self, path: &str) {
                self.log.lock().unwrap().push(format!("close {}", path));
            }
        }

        let (manager, lines) = manager();
        let log: Lines = Arc::new(Mutex::new(Vec::new()));
        let mut script = manager.create_block_script();
        script.set_file_includer(Box::new(Files {
            files: HashMap::from([(
                "square.bs".to_string(),
                "int Square(int v) { return v * v; }".to_string(),
            )]),
            log: log.clone(),
        }));
        script
            .compile("#include \"square.bs\"\necho(Square(12));")
            .unwrap();
        script.run(&mut BsVmState::new()).unwrap();
        assert_eq!(*lines.lock().unwrap(), vec!["144".to_string()]);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["open square.bs".to_string(), "close square.bs".to_string()]
        );
    }

    #[test]
    fn test_compiler_listener() {
        struct Errors(Lines);

        impl CompilerListener for Errors {
            fn on_compilation_error(&mut self, line: usize, message: &str, _token: &str) {
                self.0.lock().unwrap().push(format!("{}: {}", line, message));
            }

            fn on_compilation_end(&mut self, success: bool) {
                self.0.lock().unwrap().push(format!("success={}", success));
            }
        }

        let (manager, _) = manager();
        let seen: Lines = Arc::new(Mutex::new(Vec::new()));
        let mut script = manager.create_block_script();
        script.set_compiler_listener(Box::new(Errors(seen.clone())));
        assert!(script.compile("int a = 1;\nreturn a;").is_err());
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2, "events were: {:?}", seen);
        assert!(seen[0].starts_with("2: "), "events were: {:?}", seen);
        assert_eq!(seen[1], "success=false");
    }

    // ============================================================
    // Host objects
    // ============================================================

    struct Sprite {
        x: f32,
        frames: i32,
    }

    fn sprite_lib(manager: &BlockScriptManager) -> BlockLib {
        let mut lib = manager.create_block_lib("sprites");
        lib.create_class_types(vec![
            ClassTypeDesc::new("Sprite")
                .property("float", "x", 1)
                .property("int", "frames", 2)
                .property("int", "ghost", 99)
                .accessor(|ctx| {
                    let handle = CollectionHandle(ctx.object);
                    let arena = ctx
                        .state
                        .user_context_mut::<ObjectArena<Sprite>>()
                        .ok_or_else(|| CallbackError::Failed("no sprites".to_string()))?;
                    let sprite = arena
                        .get_mut(handle)
                        .ok_or(CallbackError::InvalidHandle(handle.0))?;
                    match (ctx.property.id, ctx.access) {
                        (1, PropertyAccess::Read) => ctx.buffer.copy_from_slice(&sprite.x.to_le_bytes()),
                        (1, PropertyAccess::Write) => {
                            sprite.x = f32::from_le_bytes([
                                ctx.buffer[0],
                                ctx.buffer[1],
                                ctx.buffer[2],
                                ctx.buffer[3],
                            ])
                        }
                        (2, PropertyAccess::Read) => {
                            ctx.buffer.copy_from_slice(&sprite.frames.to_le_bytes())
                        }
                        _ => return Err(CallbackError::UnknownProperty(ctx.property.name.clone())),
                    }
                    Ok(())
                })
                .method(
                    IntrinsicFunction::new("Advance", "void", |ctx| {
                        let mut args = ctx.args();
                        let handle = CollectionHandle(args.read_handle()?);
                        let dx = args.read_f32()?;
                        args.finish()?;
                        let arena = ctx
                            .state()
                            .user_context_mut::<ObjectArena<Sprite>>()
                            .ok_or_else(|| CallbackError::Failed("no sprites".to_string()))?;
                        let sprite = arena
                            .get_mut(handle)
                            .ok_or(CallbackError::InvalidHandle(handle.0))?;
                        sprite.x += dx;
                        sprite.frames += 1;
                        Ok(())
                    })
                    .param("float", "dx"),
                ),
        ])
        .unwrap();
        lib.create_intrinsic_functions(vec![
            IntrinsicFunction::new("GetSprite", "Sprite", |ctx| {
                let index = ctx.args().read_i32()?;
                let arena = ctx
                    .state_ref()
                    .user_context::<ObjectArena<Sprite>>()
                    .ok_or_else(|| CallbackError::Failed("no sprites".to_string()))?;
                let handle = arena
                    .iter()
                    .nth(index as usize)
                    .map_or(CollectionHandle::NULL, |(h, _)| h);
                ctx.ret().push_i32(handle.0)?;
                Ok(())
            })
            .param("int", "index"),
        ])
        .unwrap();
        lib
    }

    #[test]
    fn test_class_properties_and_methods() {
        let (manager, lines) = manager();
        let lib = sprite_lib(&manager);
        let mut script = manager.create_block_script();
        script.include_lib(&lib);
        script
            .compile(
                "Sprite s = GetSprite(1);\n\
                 s->x = s->x + 1.5;\n\
                 s->Advance(2.0);\n\
                 echo(s->x);\n\
                 echo(s->frames);\n\
                 echo(s->ghost);",
            )
            .unwrap();

        let mut arena = ObjectArena::new();
        arena.insert(Sprite { x: 0.0, frames: 0 });
        let second = arena.insert(Sprite { x: 10.0, frames: 4 });
        let mut state = BsVmState::new();
        state.set_user_context(arena);
        script.run(&mut state).unwrap();

        assert_eq!(*lines.lock().unwrap(), vec!["13.5", "5", "0"]);
        let arena = state.user_context::<ObjectArena<Sprite>>().unwrap();
        assert_eq!(arena.get(second).map(|s| s.x), Some(13.5));
    }

    #[test]
    fn test_invalid_object_handle_crashes() {
        let (manager, _) = manager();
        let lib = sprite_lib(&manager);
        let mut script = manager.create_block_script();
        script.include_lib(&lib);
        script.compile("Sprite s = GetSprite(5);\ns->Advance(1.0);").unwrap();
        let mut state = BsVmState::new();
        state.set_user_context(ObjectArena::<Sprite>::new());
        let err = script.run(&mut state).unwrap_err();
        assert!(
            err.to_string().contains("native 'Advance' failed: invalid heap handle 0"),
            "msg was: {}",
            err
        );
    }

    // ============================================================
    // Sharing
    // ============================================================

    #[test]
    fn test_states_run_in_parallel() {
        let (manager, _) = manager();
        let script = compile(
            &manager,
            "extern int seed;\nint Mix(int v) { return v * 31 + seed; }",
        );
        let assembly = script.assembly().unwrap();
        let bindings = script.bindings().unwrap();
        let seed = script.get_global_bind_point("seed");
        let mix = script.get_function_bind_point("Mix", &["int"]);

        let results: Vec<i32> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    scope.spawn(move || {
                        let vm = BsVm::new(assembly, bindings);
                        let mut state = BsVmState::new();
                        vm.run(&mut state).unwrap();
                        vm.write_global(&mut state, seed, &(t as i32).to_le_bytes())
                            .unwrap();
                        let mut out = [0u8; 4];
                        vm.execute_function(&mut state, mix, &(t as i32).to_le_bytes(), &mut out)
                            .unwrap();
                        i32::from_le_bytes(out)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results, vec![0, 32, 64, 96]);
    }
}
