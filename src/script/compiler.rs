use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::builder::canon::canonicalize;
use crate::builder::{BlockScriptBuilder, CompileError};
use crate::bytecode::assembly::Assembly;
use crate::bytecode::codegen::generate;
use crate::bytecode::stack_check::check_assembly;
use crate::frontend::parser::Parser;
use crate::frontend::preprocessor::{DEFAULT_MAX_INCLUDE_DEPTH, Preprocessor};
use crate::frontend::str_pool::{DEFAULT_MAX_STRINGS, IddStrPool};
use crate::lang::ast::Program;
use crate::lang::symbol_table::SymbolTable;
use crate::runtime::bindings::NativeBindings;
use crate::script::listener::{CompilerListener, FileIncluder};

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Identifier pool capacity for one compilation.
    pub max_identifiers: usize,
    pub max_include_depth: usize,
    /// Run the static stack checker over every generated assembly.
    pub verify_stack: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            max_identifiers: DEFAULT_MAX_STRINGS,
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
            verify_stack: true,
        }
    }
}

/// Everything a successful compilation produces.
#[derive(Debug)]
pub struct CompileOutput {
    pub assembly: Assembly,
    pub bindings: NativeBindings,
    /// The script's own table, linked to the runtime and included libraries.
    pub table: SymbolTable,
    /// The annotated syntax tree.
    pub program: Program,
}

/// Runs one source text through every stage: preprocessor, parser, builder,
/// canonicalizer, code generator, stack checker and linker.
pub struct BlockScriptCompiler<'c> {
    config: CompilerConfig,
    runtime: Arc<SymbolTable>,
    libs: Vec<Arc<SymbolTable>>,
    definitions: Vec<(String, String)>,
    includer: Option<&'c mut dyn FileIncluder>,
    listener: Option<&'c mut dyn CompilerListener>,
}

/// The script table every compilation and every loaded assembly links
/// against. Libraries are linked in inclusion order, after the runtime.
pub(crate) fn script_table(runtime: &Arc<SymbolTable>, libs: &[Arc<SymbolTable>]) -> SymbolTable {
    let mut table = SymbolTable::new("script");
    table.register_child(runtime.clone());
    for lib in libs {
        table.register_child(lib.clone());
    }
    table
}

impl<'c> BlockScriptCompiler<'c> {
    pub fn new(runtime: Arc<SymbolTable>) -> Self {
        BlockScriptCompiler {
            config: CompilerConfig::default(),
            runtime,
            libs: Vec::new(),
            definitions: Vec::new(),
            includer: None,
            listener: None,
        }
    }

    pub fn with_config(mut self, config: CompilerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_libs(mut self, libs: &[Arc<SymbolTable>]) -> Self {
        self.libs = libs.to_vec();
        self
    }

    /// Host presets, applied as if `#define name value` preceded the source.
    pub fn with_definitions(mut self, definitions: &[(String, String)]) -> Self {
        self.definitions = definitions.to_vec();
        self
    }

    pub fn with_file_includer(mut self, includer: &'c mut dyn FileIncluder) -> Self {
        self.includer = Some(includer);
        self
    }

    pub fn with_listener(mut self, listener: &'c mut dyn CompilerListener) -> Self {
        self.listener = Some(listener);
        self
    }

    #[instrument(skip_all, fields(len = source.len()))]
    pub fn compile(mut self, source: &str) -> Result<CompileOutput, Vec<CompileError>> {
        if let Some(listener) = self.listener.as_deref_mut() {
            listener.on_compilation_begin();
        }

        let includer = self.includer.take();
        let result = self.run_stages(source, includer);

        if let Some(listener) = self.listener.as_deref_mut() {
            if let Err(errors) = &result {
                for e in errors {
                    listener.on_compilation_error(e.line, &e.message, &e.token);
                }
            }
            listener.on_compilation_end(result.is_ok());
        }

        match &result {
            Ok(out) => debug!(
                ops = out.assembly.code.len(),
                functions = out.assembly.functions.len(),
                serial = out.assembly.serial,
                "compiled"
            ),
            Err(errors) => warn!(errors = errors.len(), "compilation failed"),
        }
        result
    }

    fn run_stages(
        &self,
        source: &str,
        includer: Option<&'c mut dyn FileIncluder>,
    ) -> Result<CompileOutput, Vec<CompileError>> {
        // ====================================================================
        // Tokens
        // ====================================================================
        let mut pool = IddStrPool::with_capacity(self.config.max_identifiers);
        let mut pp = Preprocessor::new().with_max_include_depth(self.config.max_include_depth);
        if let Some(includer) = includer {
            pp = pp.with_file_includer(includer);
        }
        for (name, value) in &self.definitions {
            pp.register_definition(name, value)
                .map_err(|e| vec![CompileError::new(0, e.to_string(), name.as_str())])?;
        }
        let tokens = pp
            .expand(source, &mut pool)
            .map_err(|d| vec![CompileError::new(d.line, d.error.to_string(), "")])?;

        // ====================================================================
        // Syntax tree
        // ====================================================================
        let mut program = Parser::new(tokens, &pool).parse().map_err(|errors| {
            errors
                .into_iter()
                .map(|e| CompileError::new(e.line, e.message, ""))
                .collect::<Vec<_>>()
        })?;

        // ====================================================================
        // Semantics
        // ====================================================================
        let table = script_table(&self.runtime, &self.libs);
        let duplicates = table.duplicate_functions();
        if !duplicates.is_empty() {
            return Err(duplicates
                .into_iter()
                .map(|sig| {
                    CompileError::new(
                        0,
                        format!("function '{}' is defined by more than one library", sig),
                        sig,
                    )
                })
                .collect());
        }

        let mut builder = BlockScriptBuilder::new(table);
        builder.begin_build();
        builder.build(&mut program);
        let build = builder.end_build()?;

        // ====================================================================
        // Code
        // ====================================================================
        let canon = canonicalize(&program, &build).map_err(|e| vec![e])?;
        let assembly = generate(&canon, &build).map_err(|e| vec![e])?;
        if self.config.verify_stack {
            check_assembly(&assembly).map_err(|e| vec![CompileError::new(0, e.to_string(), "")])?;
        }
        let bindings = NativeBindings::link(&assembly, &build.table)
            .map_err(|e| vec![CompileError::new(0, e.to_string(), "")])?;

        Ok(CompileOutput {
            assembly,
            bindings,
            table: build.table,
            program,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::runtime::intrinsics::{HostEnvironment, create_runtime_table};

    fn runtime() -> Arc<SymbolTable> {
        Arc::new(create_runtime_table(&HostEnvironment::default()).unwrap())
    }

    fn compile(source: &str) -> Result<CompileOutput, Vec<CompileError>> {
        BlockScriptCompiler::new(runtime()).compile(source)
    }

    fn assert_compile_error(source: &str, contains: &str) {
        match compile(source) {
            Ok(_) => panic!("expected compile error containing '{}'", contains),
            Err(errors) => assert!(
                errors.iter().any(|e| e.message.contains(contains)),
                "expected error containing '{}', got: {:?}",
                contains,
                errors
            ),
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl CompilerListener for Recorder {
        fn on_compilation_begin(&mut self) {
            self.events.push("begin".to_string());
        }

        fn on_compilation_error(&mut self, line: usize, message: &str, token: &str) {
            self.events.push(format!("{}:{}:{}", line, token, message));
        }

        fn on_compilation_end(&mut self, success: bool) {
            self.events.push(format!("end {}", success));
        }
    }

    struct MapIncluder(HashMap<String, String>);

    impl FileIncluder for MapIncluder {
        fn open(&mut self, path: &str) -> std::io::Result<String> {
            self.0.get(path).cloned().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such file")
            })
        }
    }

    #[test]
    fn test_compiles_and_links() {
        let out = compile("int Add(int a, int b) { return a + b; }\necho(Add(1, 2));").unwrap();
        assert_eq!(out.assembly.get_function_bind_point("Add", &["int", "int"]), 0);
        assert_eq!(out.bindings.functions.len(), out.assembly.natives.len());
        assert!(out.table.find_function_description("Add", &["int", "int"]).is_some());
    }

    #[test]
    fn test_parse_errors_are_reported_with_lines() {
        let errors = compile("int x = ;\nint y = 2;\nint z = 2 + ;").unwrap_err();
        let lines: Vec<usize> = errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![1, 3], "errors were: {:?}", errors);
    }

    #[test]
    fn test_semantic_errors() {
        assert_compile_error("int x = y;", "y");
        assert_compile_error("float3 v = 1; v.q = 2.0;", "q");
    }

    #[test]
    fn test_preprocessor_errors() {
        assert_compile_error("#if 1\nint x;", "unterminated #if");
        assert_compile_error("#include \"a.bs\"", "no file includer");
    }

    #[test]
    fn test_listener_sees_every_error() {
        let mut recorder = Recorder::default();
        let result = BlockScriptCompiler::new(runtime())
            .with_listener(&mut recorder)
            .compile("int x = 1;\nx = missing;");
        assert!(result.is_err());
        assert_eq!(recorder.events.first().map(String::as_str), Some("begin"));
        assert_eq!(recorder.events.last().map(String::as_str), Some("end false"));
        assert!(
            recorder.events.iter().any(|e| e.starts_with("2:missing:")),
            "events were: {:?}",
            recorder.events
        );
    }

    #[test]
    fn test_definitions_and_includes() {
        let mut includer = MapIncluder(HashMap::from([(
            "lib.bs".to_string(),
            "int Twice(int v) { return v * 2; }".to_string(),
        )]));
        let definitions = vec![("SCALE".to_string(), "21".to_string())];
        let out = BlockScriptCompiler::new(runtime())
            .with_definitions(&definitions)
            .with_file_includer(&mut includer)
            .compile("#include \"lib.bs\"\nextern int answer = 0;\nanswer = Twice(SCALE);")
            .unwrap();
        assert!(out.assembly.get_function_bind_point("Twice", &["int"]) >= 0);
        assert!(out.assembly.get_global_bind_point("answer") >= 0);
    }

    #[test]
    fn test_duplicate_definition_preset() {
        let definitions = vec![
            ("A".to_string(), "1".to_string()),
            ("A".to_string(), "2".to_string()),
        ];
        let errors = BlockScriptCompiler::new(runtime())
            .with_definitions(&definitions)
            .compile("")
            .unwrap_err();
        assert_eq!(errors[0].token, "A");
    }

    #[test]
    fn test_identifier_pool_limit() {
        let config = CompilerConfig {
            max_identifiers: 2,
            ..CompilerConfig::default()
        };
        let result = BlockScriptCompiler::new(runtime())
            .with_config(config)
            .compile("int a = 1; int b = 2; int c = 3;");
        let errors = result.unwrap_err();
        assert!(
            errors[0].message.contains("exhausted"),
            "errors were: {:?}",
            errors
        );
    }
}
