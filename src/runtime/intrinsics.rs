//! The runtime library: built-in types and the native functions every
//! script sees without including anything.

use std::sync::Arc;

use tracing::debug;

use crate::lang::symbol_table::{FunDesc, Param, SymbolError, SymbolTable};
use crate::lang::types::{AluEngine, ClassInfo, TypeDesc};
use crate::lang::value::Value;
use crate::runtime::fun_callback::{CallbackError, FunCallback, FunCallbackContext};

/// Host services the runtime library calls into. Passed explicitly so
/// independent runtimes in one process never share output channels.
#[derive(Clone)]
pub struct HostEnvironment {
    pub print: Arc<dyn Fn(&str) + Send + Sync>,
}

impl Default for HostEnvironment {
    fn default() -> Self {
        HostEnvironment {
            print: Arc::new(|line| println!("{}", line)),
        }
    }
}

impl std::fmt::Debug for HostEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostEnvironment").finish_non_exhaustive()
    }
}

impl HostEnvironment {
    pub fn with_print(print: impl Fn(&str) + Send + Sync + 'static) -> Self {
        HostEnvironment {
            print: Arc::new(print),
        }
    }
}

fn callback<F>(f: F) -> FunCallback
where
    F: Fn(&mut FunCallbackContext<'_>) -> Result<(), CallbackError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Registers a native function; `params` are `(type, name)` pairs in
/// calling order.
pub(crate) fn register_native(
    table: &mut SymbolTable,
    name: &str,
    ret: &str,
    params: &[(&str, &str)],
    callback: FunCallback,
) -> Result<Arc<FunDesc>, SymbolError> {
    let ret = table
        .get_type_by_name(ret)
        .ok_or_else(|| SymbolError::UnknownType(ret.to_string()))?;
    let params = params
        .iter()
        .map(|(ty, param)| {
            table
                .get_type_by_name(ty)
                .map(|t| Param::new(param, t))
                .ok_or_else(|| SymbolError::UnknownType(ty.to_string()))
        })
        .collect::<Result<Vec<Param>, SymbolError>>()?;
    table.create_function_description(FunDesc::native(name, ret, params, callback))
}

// =============================================================================
// Vector constructors
// =============================================================================

/// `N` floats in, the same `N` floats out. Also serves `float3(float2, float)`
/// and `float4(float3, float)`, whose packed arguments are the lanes.
fn lanes<const N: usize>() -> FunCallback {
    callback(|ctx| {
        let v = ctx.args().read_floats::<N>()?;
        ctx.ret().push_floats(&v)?;
        Ok(())
    })
}

fn int_lanes<const N: usize>() -> FunCallback {
    callback(|ctx| {
        let mut args = ctx.args();
        let mut v = [0.0f32; N];
        for lane in v.iter_mut() {
            *lane = args.read_i32()? as f32;
        }
        ctx.ret().push_floats(&v)?;
        Ok(())
    })
}

fn splat<const N: usize>(from_int: bool) -> FunCallback {
    callback(move |ctx| {
        let mut args = ctx.args();
        let x = if from_int {
            args.read_i32()? as f32
        } else {
            args.read_f32()?
        };
        ctx.ret().push_floats(&[x; N])?;
        Ok(())
    })
}

fn register_constructors(table: &mut SymbolTable) -> Result<(), SymbolError> {
    let ctors: Vec<(&str, Vec<(&str, &str)>, FunCallback)> = vec![
        ("float4", vec![("float", "x"), ("float", "y"), ("float", "z"), ("float", "w")], lanes::<4>()),
        ("float4", vec![("float3", "xyz"), ("float", "w")], lanes::<4>()),
        ("float4", vec![("int", "x"), ("int", "y"), ("int", "z"), ("int", "w")], int_lanes::<4>()),
        ("float4", vec![("float", "xyzw")], splat::<4>(false)),
        ("float4", vec![("int", "xyzw")], splat::<4>(true)),
        ("float3", vec![("float", "x"), ("float", "y"), ("float", "z")], lanes::<3>()),
        ("float3", vec![("float2", "xy"), ("float", "z")], lanes::<3>()),
        ("float3", vec![("int", "x"), ("int", "y"), ("int", "z")], int_lanes::<3>()),
        ("float3", vec![("float", "xyz")], splat::<3>(false)),
        ("float3", vec![("int", "xyz")], splat::<3>(true)),
        ("float2", vec![("float", "x"), ("float", "y")], lanes::<2>()),
        ("float2", vec![("int", "x"), ("int", "y")], int_lanes::<2>()),
        ("float2", vec![("float", "xy")], splat::<2>(false)),
        ("float2", vec![("int", "xy")], splat::<2>(true)),
    ];
    for (name, params, cb) in ctors {
        register_native(table, name, name, &params, cb)?;
    }
    Ok(())
}

// =============================================================================
// echo
// =============================================================================

fn register_echo(table: &mut SymbolTable, env: &HostEnvironment) -> Result<(), SymbolError> {
    let print = env.print.clone();
    register_native(
        table,
        "echo",
        "int",
        &[("string", "input")],
        callback(move |ctx| {
            let handle = ctx.args().read_handle()?;
            print(ctx.heap_str(handle)?);
            ctx.ret().push_i32(0)?;
            Ok(())
        }),
    )?;

    let print = env.print.clone();
    register_native(
        table,
        "echo",
        "int",
        &[("int", "input")],
        callback(move |ctx| {
            print(&ctx.args().read_i32()?.to_string());
            ctx.ret().push_i32(0)?;
            Ok(())
        }),
    )?;

    let print = env.print.clone();
    register_native(
        table,
        "echo",
        "int",
        &[("float", "input")],
        callback(move |ctx| {
            print(&ctx.args().read_f32()?.to_string());
            ctx.ret().push_i32(0)?;
            Ok(())
        }),
    )?;

    for (ty, width) in [("float2", 2), ("float3", 3), ("float4", 4)] {
        let print = env.print.clone();
        register_native(
            table,
            "echo",
            "int",
            &[(ty, "input")],
            callback(move |ctx| {
                let mut args = ctx.args();
                let lanes = (0..width)
                    .map(|_| args.read_f32())
                    .collect::<Result<Vec<f32>, CallbackError>>()?;
                print(&Value::Vector(lanes).to_string());
                ctx.ret().push_i32(0)?;
                Ok(())
            }),
        )?;
    }
    Ok(())
}

// =============================================================================
// Math
// =============================================================================

fn float_fn(f: fn(f32) -> f32) -> FunCallback {
    callback(move |ctx| {
        let x = ctx.args().read_f32()?;
        ctx.ret().push_f32(f(x))?;
        Ok(())
    })
}

fn float_fn2(f: fn(f32, f32) -> f32) -> FunCallback {
    callback(move |ctx| {
        let [a, b] = ctx.args().read_floats::<2>()?;
        ctx.ret().push_f32(f(a, b))?;
        Ok(())
    })
}

fn float_fn3(f: fn(f32, f32, f32) -> f32) -> FunCallback {
    callback(move |ctx| {
        let [a, b, c] = ctx.args().read_floats::<3>()?;
        ctx.ret().push_f32(f(a, b, c))?;
        Ok(())
    })
}

fn int_fn2(f: fn(i32, i32) -> i32) -> FunCallback {
    callback(move |ctx| {
        let mut args = ctx.args();
        let (a, b) = (args.read_i32()?, args.read_i32()?);
        ctx.ret().push_i32(f(a, b))?;
        Ok(())
    })
}

fn dot<const N: usize>() -> FunCallback {
    callback(|ctx| {
        let mut args = ctx.args();
        let a = args.read_floats::<N>()?;
        let b = args.read_floats::<N>()?;
        let d: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        ctx.ret().push_f32(d)?;
        Ok(())
    })
}

fn length<const N: usize>() -> FunCallback {
    callback(|ctx| {
        let v = ctx.args().read_floats::<N>()?;
        let len = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        ctx.ret().push_f32(len)?;
        Ok(())
    })
}

/// A zero vector normalizes to zero.
fn normalize<const N: usize>() -> FunCallback {
    callback(|ctx| {
        let mut v = ctx.args().read_floats::<N>()?;
        let len = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if len > 0.0 {
            for lane in v.iter_mut() {
                *lane /= len;
            }
        }
        ctx.ret().push_floats(&v)?;
        Ok(())
    })
}

fn register_math(table: &mut SymbolTable) -> Result<(), SymbolError> {
    let unary: [(&str, fn(f32) -> f32); 7] = [
        ("sin", f32::sin),
        ("cos", f32::cos),
        ("tan", f32::tan),
        ("sqrt", f32::sqrt),
        ("floor", f32::floor),
        ("ceil", f32::ceil),
        ("abs", f32::abs),
    ];
    for (name, f) in unary {
        register_native(table, name, "float", &[("float", "x")], float_fn(f))?;
    }

    register_native(table, "pow", "float", &[("float", "x"), ("float", "y")], float_fn2(f32::powf))?;
    register_native(table, "min", "float", &[("float", "a"), ("float", "b")], float_fn2(f32::min))?;
    register_native(table, "max", "float", &[("float", "a"), ("float", "b")], float_fn2(f32::max))?;
    register_native(
        table,
        "clamp",
        "float",
        &[("float", "x"), ("float", "lo"), ("float", "hi")],
        float_fn3(|x, lo, hi| x.max(lo).min(hi)),
    )?;
    register_native(
        table,
        "lerp",
        "float",
        &[("float", "a"), ("float", "b"), ("float", "t")],
        float_fn3(|a, b, t| a + (b - a) * t),
    )?;

    register_native(
        table,
        "abs",
        "int",
        &[("int", "x")],
        callback(|ctx| {
            let x = ctx.args().read_i32()?;
            ctx.ret().push_i32(x.wrapping_abs())?;
            Ok(())
        }),
    )?;
    register_native(table, "min", "int", &[("int", "a"), ("int", "b")], int_fn2(i32::min))?;
    register_native(table, "max", "int", &[("int", "a"), ("int", "b")], int_fn2(i32::max))?;

    let vectors: [(&str, FunCallback, FunCallback, FunCallback); 3] = [
        ("float2", dot::<2>(), length::<2>(), normalize::<2>()),
        ("float3", dot::<3>(), length::<3>(), normalize::<3>()),
        ("float4", dot::<4>(), length::<4>(), normalize::<4>()),
    ];
    for (ty, dot_cb, length_cb, normalize_cb) in vectors {
        register_native(table, "dot", "float", &[(ty, "a"), (ty, "b")], dot_cb)?;
        register_native(table, "length", "float", &[(ty, "v")], length_cb)?;
        register_native(table, "normalize", ty, &[(ty, "v")], normalize_cb)?;
    }

    register_native(
        table,
        "cross",
        "float3",
        &[("float3", "a"), ("float3", "b")],
        callback(|ctx| {
            let mut args = ctx.args();
            let [ax, ay, az] = args.read_floats::<3>()?;
            let [bx, by, bz] = args.read_floats::<3>()?;
            ctx.ret()
                .push_floats(&[ay * bz - az * by, az * bx - ax * bz, ax * by - ay * bx])?;
            Ok(())
        }),
    )?;
    Ok(())
}

// =============================================================================
// Strings
// =============================================================================

fn register_strings(table: &mut SymbolTable) -> Result<(), SymbolError> {
    register_native(
        table,
        "strlen",
        "int",
        &[("string", "s")],
        callback(|ctx| {
            let handle = ctx.args().read_handle()?;
            let len = ctx.heap_str(handle)?.chars().count() as i32;
            ctx.ret().push_i32(len)?;
            Ok(())
        }),
    )?;

    register_native(
        table,
        "concat",
        "string",
        &[("string", "a"), ("string", "b")],
        callback(|ctx| {
            let mut args = ctx.args();
            let (a, b) = (args.read_handle()?, args.read_handle()?);
            let joined = format!("{}{}", ctx.heap_str(a)?, ctx.heap_str(b)?);
            let handle = ctx.state().push_string(joined);
            ctx.ret().push_i32(handle)?;
            Ok(())
        }),
    )?;

    register_native(
        table,
        "to_string",
        "string",
        &[("int", "x")],
        callback(|ctx| {
            let text = ctx.args().read_i32()?.to_string();
            let handle = ctx.state().push_string(text);
            ctx.ret().push_i32(handle)?;
            Ok(())
        }),
    )?;

    register_native(
        table,
        "to_string",
        "string",
        &[("float", "x")],
        callback(|ctx| {
            let text = ctx.args().read_f32()?.to_string();
            let handle = ctx.state().push_string(text);
            ctx.ret().push_i32(handle)?;
            Ok(())
        }),
    )?;
    Ok(())
}

/// Builds the table every other table links: the built-in types plus
/// constructors, `echo`, math and string helpers.
pub fn create_runtime_table(env: &HostEnvironment) -> Result<SymbolTable, SymbolError> {
    let mut table = SymbolTable::new("runtime");

    table.create_type(TypeDesc::void())?;
    table.create_scalar_type("int", AluEngine::Int)?;
    table.create_scalar_type("float", AluEngine::Float)?;
    for width in 2..=4 {
        table.create_vector_type(&format!("float{}", width), "float", width)?;
    }
    table.create_class_type("string", ClassInfo::default())?;

    register_constructors(&mut table)?;
    register_echo(&mut table, env)?;
    register_math(&mut table)?;
    register_strings(&mut table)?;

    debug!(
        types = table.types().len(),
        functions = table.functions().len(),
        "runtime library registered"
    );
    Ok(table)
}
