use crate::bytecode::Op;
use crate::bytecode::assembly::Assembly;
use crate::lang::types::WORD_SIZE;

#[derive(Debug, Clone, PartialEq)]
pub struct StackCheckError {
    pub message: String,
}

impl std::fmt::Display for StackCheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stack-check error: {}", self.message)
    }
}

impl std::error::Error for StackCheckError {}

impl StackCheckError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

fn words(bytes: u32) -> i32 {
    (bytes as usize / WORD_SIZE) as i32
}

/// Returns (pops, pushes) in words, or None if the op refers to a function
/// the assembly does not have.
fn effect(op: &Op, asm: &Assembly) -> Option<(i32, i32)> {
    use Op::*;
    Some(match op {
        PushInt(_) | PushFloat(_) | PushStr(_) => (0, 1),
        PushZero(n) => (0, *n as i32),
        Pop(n) => (*n as i32, 0),

        LocalAddr(_) | GlobalAddr(_) => (0, 1),
        AddrOffset(_) => (1, 1),
        IndexAddr { .. } => (2, 1),
        Load(n) => (1, *n as i32),
        Store(n) => (*n as i32 + 1, 0),
        StoreLanes(lanes) => (lanes.len() as i32 + 1, 0),

        IAdd | ISub | IMul | IDiv | IMod => (2, 1),
        IEq | INe | ILt | IGt | ILe | IGe => (2, 1),
        FAdd | FSub | FMul | FDiv => (2, 1),
        FEq | FNe | FLt | FGt | FLe | FGe => (2, 1),
        INeg | FNeg => (1, 1),

        VAdd(n) | VSub(n) | VMul(n) | VDiv(n) => (2 * *n as i32, *n as i32),
        VNeg(n) => (*n as i32, *n as i32),

        And | Or => (2, 1),
        Not => (1, 1),

        IToF | FToI => (1, 1),
        Splat(n) => (1, *n as i32),

        Swizzle { width, lanes } => (*width as i32, lanes.len() as i32),
        Extract { total, len, .. } => (*total as i32, *len as i32),

        Jump(_) => (0, 0),
        JumpIfFalse(_) => (1, 0),
        Call(f) => {
            let f = asm.functions.get(*f as usize)?;
            (words(f.arg_size), words(f.ret_size))
        }
        CallNative(n) => {
            let n = asm.natives.get(*n as usize)?;
            (words(n.arg_size), words(n.ret_size))
        }
        Ret(n) => (*n as i32, 0),
        Exit => (0, 0),

        ReadProp { words, .. } => (1, *words as i32),
        WriteProp { words, .. } => (*words as i32 + 1, 0),
    })
}

/// One straight region of code: the global code or a function body.
struct Region<'a> {
    name: &'a str,
    start: usize,
    end: usize,
    /// Words a `Ret` must leave; None for global code, which ends in `Exit`.
    ret_words: Option<i32>,
}

/// Follows every path through a region, recording the stack height on entry
/// to each op. Paths that join must agree on the height; every path must
/// end in a `Ret` leaving exactly the return value, or `Exit` on an empty
/// stack.
fn check_region(asm: &Assembly, region: &Region<'_>) -> Result<(), StackCheckError> {
    let len = region.end - region.start;
    let mut heights: Vec<Option<i32>> = vec![None; len];
    let mut work = vec![(region.start, 0)];

    while let Some((ip, h)) = work.pop() {
        if ip < region.start || ip >= region.end {
            return Err(StackCheckError::new(format!(
                "{}: control leaves the code region at ip={}",
                region.name, ip
            )));
        }
        match heights[ip - region.start] {
            Some(seen) if seen == h => continue,
            Some(seen) => {
                return Err(StackCheckError::new(format!(
                    "{}: inconsistent stack height at ip={}: {} vs {}",
                    region.name, ip, seen, h
                )));
            }
            None => heights[ip - region.start] = Some(h),
        }

        let op = &asm.code[ip];
        let (pops, pushes) = effect(op, asm).ok_or_else(|| {
            StackCheckError::new(format!(
                "{}: unknown call target at ip={}, op={:?}",
                region.name, ip, op
            ))
        })?;
        if h < pops {
            return Err(StackCheckError::new(format!(
                "{}: stack underflow at ip={}, op={:?}, needed {} words",
                region.name, ip, op, pops
            )));
        }
        let next = h - pops + pushes;

        match op {
            Op::Ret(n) => {
                let expected = region.ret_words.ok_or_else(|| {
                    StackCheckError::new(format!("{}: return in global code at ip={}", region.name, ip))
                })?;
                if *n as i32 != expected || h != expected {
                    return Err(StackCheckError::new(format!(
                        "{}: return at ip={} leaves {} words, expected {}",
                        region.name, ip, h, expected
                    )));
                }
            }
            Op::Exit => {
                if region.ret_words.is_some() || h != 0 {
                    return Err(StackCheckError::new(format!(
                        "{}: exit at ip={} with {} words on the stack",
                        region.name, ip, h
                    )));
                }
            }
            Op::Jump(offset) => work.push(((ip as i64 + *offset as i64) as usize, next)),
            Op::JumpIfFalse(offset) => {
                work.push((ip + 1, next));
                work.push(((ip as i64 + *offset as i64) as usize, next));
            }
            _ => work.push((ip + 1, next)),
        }
    }

    Ok(())
}

/// Verifies every region of an assembly before it is run.
pub fn check_assembly(asm: &Assembly) -> Result<(), StackCheckError> {
    let code_len = asm.code.len();
    let global_end = asm.global_end as usize;
    if global_end == 0 || global_end > code_len {
        return Err(StackCheckError::new("global code is missing"));
    }

    check_region(
        asm,
        &Region {
            name: "<global>",
            start: 0,
            end: global_end,
            ret_words: None,
        },
    )?;

    for f in &asm.functions {
        let (start, end) = (f.entry as usize, f.end as usize);
        if start >= end || end > code_len || start < global_end {
            return Err(StackCheckError::new(format!(
                "{}: invalid code range {}..{}",
                f.name, start, end
            )));
        }
        if f.arg_size > f.frame_size || f.arg_size % WORD_SIZE as u32 != 0 {
            return Err(StackCheckError::new(format!(
                "{}: {} bytes of arguments do not fit a frame of {}",
                f.name, f.arg_size, f.frame_size
            )));
        }
        check_region(
            asm,
            &Region {
                name: &f.name,
                start,
                end,
                ret_words: Some(words(f.ret_size)),
            },
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::assembly::{FunctionEntry, next_serial};

    fn global_only(code: Vec<Op>) -> Assembly {
        Assembly {
            global_end: code.len() as u32,
            code,
            strings: Vec::new(),
            functions: Vec::new(),
            globals: Vec::new(),
            natives: Vec::new(),
            accessors: Vec::new(),
            global_frame_size: 8,
            serial: next_serial(),
        }
    }

    fn with_function(global: Vec<Op>, body: Vec<Op>, arg_size: u32, ret_size: u32) -> Assembly {
        let mut asm = global_only(global);
        let entry = asm.code.len() as u32;
        asm.code.extend(body);
        asm.functions.push(FunctionEntry {
            name: "F".to_string(),
            params: Vec::new(),
            ret: "int".to_string(),
            entry,
            end: asm.code.len() as u32,
            frame_size: arg_size,
            arg_size,
            ret_size,
        });
        asm
    }

    #[test]
    fn test_simple_global_code() {
        let asm = global_only(vec![
            Op::PushInt(1),
            Op::PushInt(2),
            Op::IAdd,
            Op::GlobalAddr(0),
            Op::Store(1),
            Op::Exit,
        ]);
        assert!(check_assembly(&asm).is_ok());
    }

    #[test]
    fn test_arguments_larger_than_frame() {
        let mut asm = with_function(
            vec![Op::Exit],
            vec![Op::PushInt(0), Op::Ret(1)],
            8,
            4,
        );
        asm.functions[0].frame_size = 0;
        let err = check_assembly(&asm).unwrap_err();
        assert!(err.message.contains("do not fit a frame"), "msg was: {}", err);
    }

    #[test]
    fn test_underflow() {
        let asm = global_only(vec![Op::IAdd, Op::Exit]);
        let err = check_assembly(&asm).unwrap_err();
        assert!(err.message.contains("underflow"), "msg was: {}", err);
    }

    #[test]
    fn test_exit_with_leftover_words() {
        let asm = global_only(vec![Op::PushInt(1), Op::Exit]);
        let err = check_assembly(&asm).unwrap_err();
        assert!(err.message.contains("exit"), "msg was: {}", err);
    }

    #[test]
    fn test_if_pattern_joins_at_same_height() {
        // if (1) { x = 10; } else { x = 20; }
        let asm = global_only(vec![
            Op::PushInt(1),
            Op::JumpIfFalse(5),
            Op::PushInt(10),
            Op::GlobalAddr(0),
            Op::Store(1),
            Op::Jump(4),
            Op::PushInt(20),
            Op::GlobalAddr(0),
            Op::Store(1),
            Op::Exit,
        ]);
        assert!(check_assembly(&asm).is_ok());
    }

    #[test]
    fn test_unbalanced_join_is_rejected() {
        let asm = global_only(vec![
            Op::PushInt(1),
            Op::JumpIfFalse(2),
            Op::PushInt(7),
            Op::Exit,
        ]);
        let err = check_assembly(&asm).unwrap_err();
        assert!(err.message.contains("inconsistent"), "msg was: {}", err);
    }

    #[test]
    fn test_jump_out_of_region() {
        let asm = global_only(vec![Op::Jump(10), Op::Exit]);
        let err = check_assembly(&asm).unwrap_err();
        assert!(err.message.contains("leaves the code region"), "msg was: {}", err);
    }

    #[test]
    fn test_function_return_size() {
        let ok = with_function(
            vec![Op::PushInt(1), Op::Call(0), Op::Pop(1), Op::Exit],
            vec![Op::LocalAddr(0), Op::Load(1), Op::Ret(1)],
            4,
            4,
        );
        assert!(check_assembly(&ok).is_ok());

        let bad = with_function(
            vec![Op::Exit],
            vec![Op::PushInt(1), Op::PushInt(2), Op::Ret(1)],
            0,
            4,
        );
        let err = check_assembly(&bad).unwrap_err();
        assert!(err.message.contains("leaves 2 words"), "msg was: {}", err);
    }

    #[test]
    fn test_unknown_call_target() {
        let asm = global_only(vec![Op::Call(3), Op::Exit]);
        assert!(check_assembly(&asm).is_err());
    }

    #[test]
    fn test_function_falls_off_the_end() {
        let asm = with_function(vec![Op::Exit], vec![Op::PushInt(1), Op::Pop(1)], 0, 0);
        assert!(check_assembly(&asm).is_err());
    }
}
