use std::{env, fs, path::Path};

use anyhow::{Context, Result, anyhow, bail};
use tracing_subscriber::EnvFilter;

use blockscript::bytecode::disasm::print_assembly;
use blockscript::frontend::lexer::Lexer;
use blockscript::frontend::str_pool::{DEFAULT_MAX_STRINGS, IddStrPool};
use blockscript::frontend::token_dumper::TokenDumper;
use blockscript::lang::pretty::format_program;
use blockscript::script::DirIncluder;
use blockscript::{BlockScript, BlockScriptManager, BsVmState, HostEnvironment, ScriptError, Value};

struct Options {
    filename: String,
    tokens_only: bool,
    no_color: bool,
    pretty: bool,
    ast: bool,
    bytecode: bool,
    emit: Option<String>,
    call: Option<(String, Vec<String>)>,
    definitions: Vec<(String, String)>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    let options = match parse_args(&args) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            std::process::exit(2);
        }
    };

    if let Err(e) = run(&options) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut options = Options {
        filename: String::new(),
        tokens_only: false,
        no_color: false,
        pretty: false,
        ast: false,
        bytecode: false,
        emit: None,
        call: None,
        definitions: Vec::new(),
    };

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        match arg.as_str() {
            "--tokens" => options.tokens_only = true,
            "--no-color" => options.no_color = true,
            "--pretty" => options.pretty = true,
            "--ast" => options.ast = true,
            "--bc" | "--bytecode" => options.bytecode = true,
            "--emit" => {
                i += 1;
                let out = args.get(i).ok_or_else(|| anyhow!("--emit needs a file name"))?;
                options.emit = Some(out.clone());
            }
            "--call" => {
                i += 1;
                let name = args.get(i).ok_or_else(|| anyhow!("--call needs a function name"))?;
                // everything up to the next flag is an argument
                let mut call_args = Vec::new();
                while let Some(next) = args.get(i + 1) {
                    if next.starts_with("--") || next.starts_with("-D") {
                        break;
                    }
                    if options.filename.is_empty() && is_script_file(next) {
                        break;
                    }
                    call_args.push(next.clone());
                    i += 1;
                }
                options.call = Some((name.clone(), call_args));
            }
            _ if arg.starts_with("-D") => {
                let def = &arg[2..];
                let (name, value) = def.split_once('=').unwrap_or((def, "1"));
                if name.is_empty() {
                    bail!("empty definition name in '{}'", arg);
                }
                options.definitions.push((name.to_string(), value.to_string()));
            }
            _ if arg.starts_with('-') => bail!("unknown flag '{}'", arg),
            _ => {
                if !options.filename.is_empty() {
                    bail!("more than one input file");
                }
                options.filename = arg.clone();
            }
        }
        i += 1;
    }

    if options.filename.is_empty() {
        bail!("no input file");
    }
    Ok(options)
}

fn is_script_file(name: &str) -> bool {
    matches!(
        Path::new(name).extension().and_then(|e| e.to_str()),
        Some("bs") | Some("bsa")
    )
}

fn run(options: &Options) -> Result<()> {
    let path = Path::new(&options.filename);
    let assembly_input = path.extension().and_then(|e| e.to_str()) == Some("bsa");

    if options.tokens_only {
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read '{}'", options.filename))?;
        return dump_tokens(&source, options.no_color, options.pretty);
    }

    let manager = BlockScriptManager::new(HostEnvironment::default())?;
    let mut script = manager.create_block_script();

    if assembly_input {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read '{}'", options.filename))?;
        script.load_assembly(&bytes)?;
    } else {
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read '{}'", options.filename))?;
        let root = path.parent().unwrap_or_else(|| Path::new("."));
        script.set_file_includer(Box::new(DirIncluder::new(root)));
        let definitions: Vec<(&str, &str)> = options
            .definitions
            .iter()
            .map(|(n, v)| (n.as_str(), v.as_str()))
            .collect();
        script.register_definitions(&definitions);

        if let Err(e) = script.compile(&source) {
            report_compile_error(&options.filename, &e);
            bail!("compilation failed");
        }
    }

    if options.ast {
        match script.ast() {
            Some(program) => print!("{}", format_program(program)),
            None => eprintln!("no syntax tree for a loaded assembly"),
        }
        return Ok(());
    }

    if options.bytecode {
        if let Some(assembly) = script.assembly() {
            print_assembly(assembly);
        }
        return Ok(());
    }

    if let Some(out) = &options.emit {
        let bytes = script.to_bytes()?;
        fs::write(out, &bytes).with_context(|| format!("failed to write '{}'", out))?;
        println!("wrote {} bytes to {}", bytes.len(), out);
        return Ok(());
    }

    let mut state = BsVmState::new();
    script.run(&mut state)?;

    if let Some((name, args)) = &options.call {
        let result = call(&script, &mut state, name, args)?;
        if result != Value::Void {
            println!("{}", result);
        }
    }
    Ok(())
}

fn report_compile_error(filename: &str, err: &ScriptError) {
    match err {
        ScriptError::Compile(errors) => {
            for e in errors {
                eprintln!("{}:{}", filename, e);
            }
        }
        other => eprintln!("{}: {}", filename, other),
    }
}

/// Calls the first function named `name` that takes `args.len()` arguments,
/// parsing each argument as its declared type.
fn call(script: &BlockScript, state: &mut BsVmState, name: &str, args: &[String]) -> Result<Value> {
    let assembly = script.assembly().ok_or_else(|| anyhow!("script is not compiled"))?;
    let function = assembly
        .functions
        .iter()
        .find(|f| f.name == name && f.params.len() == args.len())
        .ok_or_else(|| anyhow!("no function '{}' taking {} arguments", name, args.len()))?;

    let params: Vec<&str> = function.params.iter().map(String::as_str).collect();
    let bind = script.get_function_bind_point(name, &params);
    let table = script.table().ok_or_else(|| anyhow!("script is not compiled"))?;

    let mut values = Vec::with_capacity(args.len());
    for (text, ty) in args.iter().zip(&params) {
        let desc = table
            .type_from_name(ty)
            .ok_or_else(|| anyhow!("unknown parameter type '{}'", ty))?;
        values.push(Value::parse(text, &desc)?);
    }
    Ok(script.call_function(state, bind, &values)?)
}

fn dump_tokens(source: &str, no_color: bool, pretty: bool) -> Result<()> {
    let mut pool = IddStrPool::with_capacity(DEFAULT_MAX_STRINGS);
    let tokens = Lexer::new(source, &mut pool)
        .tokenize()
        .map_err(|e| anyhow!("lexer error: {}", e))?;

    let mut dumper = TokenDumper::new();
    if no_color {
        dumper = dumper.no_color();
    }
    if pretty {
        dumper = dumper.pretty();
    }
    dumper.dump(&tokens, &pool);
    Ok(())
}

fn print_usage() {
    println!("BlockScript compiler and runner");
    println!();
    println!("Usage:");
    println!("  bsc <file.bs>                 Compile and run a script");
    println!("  bsc <file.bsa>                Run a compiled assembly");
    println!("  bsc --tokens <file.bs>        Show tokens only (--no-color, --pretty)");
    println!("  bsc --ast <file.bs>           Print the annotated syntax tree");
    println!("  bsc --bc <file.bs>            Print the bytecode listing");
    println!("  bsc --emit <out.bsa> <file>   Write the compiled assembly");
    println!("  bsc --call NAME [ARGS] <file> Run, then call a function");
    println!("  bsc -DNAME[=VALUE] <file>     Preset a preprocessor definition");
    println!("  bsc --help, -h                Show this help");
    println!();
    println!("Set RUST_LOG=debug for compiler and VM tracing.");
}
