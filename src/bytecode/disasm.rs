use std::collections::HashMap;

use crate::bytecode::Op;
use crate::bytecode::assembly::Assembly;

/// Print disassembly of an assembly
pub fn print_assembly(asm: &Assembly) {
    print!("{}", format_assembly(asm));
}

/// Disassembly of every region, global code first.
pub fn format_assembly(asm: &Assembly) -> String {
    let mut out = String::from("=== BYTECODE ===\n\n");
    let jump_targets = collect_jump_targets(&asm.code);

    format_region(&mut out, asm, "<global>", 0, asm.global_end as usize, &jump_targets);

    for f in &asm.functions {
        let header = format!(
            "{} {}({})  frame={} args={} ret={}",
            f.ret,
            f.name,
            f.params.join(", "),
            f.frame_size,
            f.arg_size,
            f.ret_size
        );
        format_region(&mut out, asm, &header, f.entry as usize, f.end as usize, &jump_targets);
    }

    if !asm.globals.is_empty() {
        out.push_str("globals:\n");
        for g in &asm.globals {
            let ext = if g.is_extern { "extern " } else { "" };
            out.push_str(&format!("  {:04}  {}{} {}\n", g.offset, ext, g.type_name, g.name));
        }
    }
    out
}

fn format_region(
    out: &mut String,
    asm: &Assembly,
    name: &str,
    start: usize,
    end: usize,
    jump_targets: &[usize],
) {
    out.push_str("════════════════════════════════════════\n");
    out.push_str(&format!(" {}\n", name));
    out.push_str(&format!(" {} instructions\n", end.saturating_sub(start)));
    out.push_str("════════════════════════════════════════\n");

    for ip in start..end.min(asm.code.len()) {
        if jump_targets.contains(&ip) {
            out.push_str("      ┌──────────────────────────────────\n");
        }
        out.push_str(&format!("{:04} ", ip));
        if jump_targets.contains(&ip) {
            out.push_str("► ");
        } else {
            out.push_str("  ");
        }
        out.push_str(&format_op(&asm.code[ip], ip, asm));
        out.push('\n');
    }
    out.push('\n');
}

fn collect_jump_targets(ops: &[Op]) -> Vec<usize> {
    let mut targets = Vec::new();

    for (ip, op) in ops.iter().enumerate() {
        let offset = match op {
            Op::Jump(offset) | Op::JumpIfFalse(offset) => Some(*offset),
            _ => None,
        };

        if let Some(offset) = offset {
            let target = (ip as i32 + offset) as usize;
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
    }

    targets
}

fn format_jump(name: &str, offset: i32, ip: usize) -> String {
    let target = (ip as i32 + offset) as usize;
    let direction = if offset < 0 { "↑" } else { "↓" };
    format!("{:<12}{:+} {} (→ {:04})", name, offset, direction, target)
}

fn format_op(op: &Op, ip: usize, asm: &Assembly) -> String {
    let name = op_name(op);
    match op {
        Op::PushInt(n) => format!("{:<12}{}", name, n),
        Op::PushFloat(f) => format!("{:<12}{:?}", name, f),
        Op::PushStr(i) => match asm.strings.get(*i as usize) {
            Some(s) => format!("{:<12}{} ; {:?}", name, i, s),
            None => format!("{:<12}{} ; <bad string>", name, i),
        },
        Op::PushZero(n)
        | Op::Pop(n)
        | Op::LocalAddr(n)
        | Op::GlobalAddr(n)
        | Op::AddrOffset(n)
        | Op::Load(n)
        | Op::Store(n)
        | Op::Splat(n)
        | Op::Ret(n) => format!("{:<12}{}", name, n),
        Op::VAdd(n) | Op::VSub(n) | Op::VMul(n) | Op::VDiv(n) | Op::VNeg(n) => {
            format!("{:<12}{}", name, n)
        }
        Op::IndexAddr { stride, count } => format!("{:<12}stride={} count={}", name, stride, count),
        Op::StoreLanes(lanes) => format!("{:<12}{}", name, lane_names(lanes)),
        Op::Swizzle { width, lanes } => format!("{:<12}{} of {}", name, lane_names(lanes), width),
        Op::Extract { total, offset, len } => {
            format!("{:<12}[{}..{}] of {}", name, offset, offset + len, total)
        }
        Op::Jump(offset) | Op::JumpIfFalse(offset) => format_jump(name, *offset, ip),
        Op::Call(f) => match asm.functions.get(*f as usize) {
            Some(entry) => format!("{:<12}{} ; {}({})", name, f, entry.name, entry.params.join(", ")),
            None => format!("{:<12}{} ; <bad function>", name, f),
        },
        Op::CallNative(n) => match asm.natives.get(*n as usize) {
            Some(native) => format!(
                "{:<12}{} ; {}({})",
                name,
                n,
                native.name,
                native.params.join(", ")
            ),
            None => format!("{:<12}{} ; <bad native>", name, n),
        },
        Op::ReadProp {
            accessor,
            property,
            words,
        }
        | Op::WriteProp {
            accessor,
            property,
            words,
        } => {
            let target = asm.accessors.get(*accessor as usize).and_then(|a| {
                a.properties
                    .get(*property as usize)
                    .map(|p| format!("{}.{}", a.class_name, p.name))
            });
            format!(
                "{:<12}{} ; {} words",
                name,
                target.unwrap_or_else(|| "<bad property>".to_string()),
                words
            )
        }
        _ => name.to_string(),
    }
}

fn lane_names(lanes: &[u8]) -> String {
    lanes
        .iter()
        .map(|l| match l {
            0 => 'x',
            1 => 'y',
            2 => 'z',
            3 => 'w',
            _ => '?',
        })
        .collect()
}

// =============================================================================
// Statistics
// =============================================================================

/// Ten most frequent ops, most frequent first.
pub fn op_frequency(asm: &Assembly) -> Vec<(&'static str, usize)> {
    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    for op in &asm.code {
        *counts.entry(op_name(op)).or_insert(0) += 1;
    }
    let mut counts: Vec<(&'static str, usize)> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    counts.truncate(10);
    counts
}

fn op_name(op: &Op) -> &'static str {
    match op {
        Op::PushInt(_) => "PUSH_INT",
        Op::PushFloat(_) => "PUSH_FLOAT",
        Op::PushStr(_) => "PUSH_STR",
        Op::PushZero(_) => "PUSH_ZERO",
        Op::Pop(_) => "POP",
        Op::LocalAddr(_) => "LOCAL_ADDR",
        Op::GlobalAddr(_) => "GLOBAL_ADDR",
        Op::AddrOffset(_) => "ADDR_OFFSET",
        Op::IndexAddr { .. } => "INDEX_ADDR",
        Op::Load(_) => "LOAD",
        Op::Store(_) => "STORE",
        Op::StoreLanes(_) => "STORE_LANES",
        Op::IAdd => "IADD",
        Op::ISub => "ISUB",
        Op::IMul => "IMUL",
        Op::IDiv => "IDIV",
        Op::IMod => "IMOD",
        Op::INeg => "INEG",
        Op::IEq => "IEQ",
        Op::INe => "INE",
        Op::ILt => "ILT",
        Op::IGt => "IGT",
        Op::ILe => "ILE",
        Op::IGe => "IGE",
        Op::FAdd => "FADD",
        Op::FSub => "FSUB",
        Op::FMul => "FMUL",
        Op::FDiv => "FDIV",
        Op::FNeg => "FNEG",
        Op::FEq => "FEQ",
        Op::FNe => "FNE",
        Op::FLt => "FLT",
        Op::FGt => "FGT",
        Op::FLe => "FLE",
        Op::FGe => "FGE",
        Op::VAdd(_) => "VADD",
        Op::VSub(_) => "VSUB",
        Op::VMul(_) => "VMUL",
        Op::VDiv(_) => "VDIV",
        Op::VNeg(_) => "VNEG",
        Op::And => "AND",
        Op::Or => "OR",
        Op::Not => "NOT",
        Op::IToF => "ITOF",
        Op::FToI => "FTOI",
        Op::Splat(_) => "SPLAT",
        Op::Swizzle { .. } => "SWIZZLE",
        Op::Extract { .. } => "EXTRACT",
        Op::Jump(_) => "JUMP",
        Op::JumpIfFalse(_) => "JUMP_FALSE",
        Op::Call(_) => "CALL",
        Op::CallNative(_) => "CALL_NATIVE",
        Op::Ret(_) => "RET",
        Op::Exit => "EXIT",
        Op::ReadProp { .. } => "READ_PROP",
        Op::WriteProp { .. } => "WRITE_PROP",
    }
}
