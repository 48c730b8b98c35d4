//! Source-like rendering of a program, used by `bsc --ast`.
//!
//! Builder-inserted casts are shown as calls (`float(x)`) so the output of an
//! annotated tree shows where promotions happened.

use crate::lang::ast::{CastKind, Exp, ExpKind, Program, Stmt, TypeRef, UnOp};

pub fn format_program(program: &Program) -> String {
    let mut out = String::new();
    for stmt in &program.items {
        write_stmt(&mut out, stmt, 0);
    }
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("    ");
    }
}

fn dims(ty: &TypeRef) -> String {
    ty.dims.iter().map(|d| format!("[{}]", d)).collect()
}

fn write_block(out: &mut String, body: &[Stmt], depth: usize) {
    out.push_str("{\n");
    for stmt in body {
        write_stmt(out, stmt, depth + 1);
    }
    indent(out, depth);
    out.push('}');
}

fn write_stmt(out: &mut String, stmt: &Stmt, depth: usize) {
    indent(out, depth);
    match stmt {
        Stmt::Expr(e) => {
            out.push_str(&format_exp(e));
            out.push_str(";\n");
        }
        Stmt::VarDecl(v) => {
            if v.is_extern {
                out.push_str("extern ");
            }
            out.push_str(&format!("{} {}{}", v.ty.name, v.name, dims(&v.ty)));
            if let Some(init) = &v.init {
                out.push_str(&format!(" = {}", format_exp(init)));
            }
            out.push_str(";\n");
        }
        Stmt::If {
            branches,
            else_body,
            ..
        } => {
            for (i, branch) in branches.iter().enumerate() {
                let keyword = if i == 0 { "if" } else { " elif" };
                out.push_str(&format!("{} ({}) ", keyword, format_exp(&branch.cond)));
                write_block(out, &branch.body, depth);
            }
            if let Some(body) = else_body {
                out.push_str(" else ");
                write_block(out, body, depth);
            }
            out.push('\n');
        }
        Stmt::While { cond, body, .. } => {
            out.push_str(&format!("while ({}) ", format_exp(cond)));
            write_block(out, body, depth);
            out.push('\n');
        }
        Stmt::Return { value, .. } => match value {
            Some(v) => out.push_str(&format!("return {};\n", format_exp(v))),
            None => out.push_str("return;\n"),
        },
        Stmt::Struct(s) => {
            out.push_str(&format!("struct {} {{\n", s.name));
            for (ty, name) in &s.members {
                indent(out, depth + 1);
                out.push_str(&format!("{} {}{};\n", ty.name, name, dims(ty)));
            }
            indent(out, depth);
            out.push_str("};\n");
        }
        Stmt::Enum(e) => {
            let values: Vec<String> = e
                .values
                .iter()
                .map(|(name, value)| match value {
                    Some(v) => format!("{} = {}", name, v),
                    None => name.clone(),
                })
                .collect();
            out.push_str(&format!("enum {} {{ {} }};\n", e.name, values.join(", ")));
        }
        Stmt::Fun(f) => {
            let params: Vec<String> = f
                .params
                .iter()
                .map(|p| format!("{} {}{}", p.ty.name, p.name, dims(&p.ty)))
                .collect();
            out.push_str(&format!("{} {}({})", f.ret.name, f.name, params.join(", ")));
            match &f.body {
                Some(body) => {
                    out.push(' ');
                    write_block(out, body, depth);
                    out.push('\n');
                }
                None => out.push_str(";\n"),
            }
        }
    }
}

fn format_args(args: &[Exp]) -> String {
    args.iter().map(format_exp).collect::<Vec<_>>().join(", ")
}

pub fn format_exp(exp: &Exp) -> String {
    match &exp.kind {
        ExpKind::Int(n) => n.to_string(),
        ExpKind::Float(f) => format!("{:?}", f),
        ExpKind::Str(s) => format!("{:?}", s),
        ExpKind::Ident { name, .. } => name.clone(),
        ExpKind::Binary { op, lhs, rhs } => {
            format!("({} {} {})", format_exp(lhs), op.symbol(), format_exp(rhs))
        }
        ExpKind::Unary { op, operand } => {
            let symbol = match op {
                UnOp::Neg => "-",
                UnOp::Not => "!",
            };
            format!("{}{}", symbol, format_exp(operand))
        }
        ExpKind::Assign { target, value } => {
            format!("{} = {}", format_exp(target), format_exp(value))
        }
        ExpKind::Call { name, args, .. } => format!("{}({})", name, format_args(args)),
        ExpKind::Index { base, index } => format!("{}[{}]", format_exp(base), format_exp(index)),
        ExpKind::Member { base, name, .. } => format!("{}.{}", format_exp(base), name),
        ExpKind::Arrow {
            object, name, args, ..
        } => match args {
            Some(args) => format!("{}->{}({})", format_exp(object), name, format_args(args)),
            None => format!("{}->{}", format_exp(object), name),
        },
        ExpKind::Cast { kind, operand } => {
            let name = match (kind, &exp.ty) {
                (_, Some(ty)) => ty.name.clone(),
                (CastKind::IntToFloat, None) => "float".to_string(),
                (CastKind::FloatToInt, None) => "int".to_string(),
                (CastKind::Splat(n), None) => format!("float{}", n),
                (CastKind::Retag, None) => "int".to_string(),
            };
            format!("{}({})", name, format_exp(operand))
        }
    }
}
