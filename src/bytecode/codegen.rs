use std::collections::HashMap;

use tracing::debug;

use crate::builder::canon::{CExp, Canon, CanonBlock, CanonProgram, Label, Place};
use crate::builder::{BuildOutput, CompileError};
use crate::bytecode::Op;
use crate::bytecode::assembly::{
    AccessorRef, Assembly, FunctionEntry, GlobalEntry, NativeRef, next_serial,
};
use crate::runtime::fun_callback::PropertyRef;

/// Flattens canon blocks into ops. Jumps are emitted with a zero offset and
/// patched once every label has an address.
#[derive(Default)]
struct Emitter {
    code: Vec<Op>,
    labels: HashMap<usize, usize>,
    fixups: Vec<(usize, Label)>,
}

pub fn generate(program: &CanonProgram, build: &BuildOutput) -> Result<Assembly, CompileError> {
    let mut e = Emitter::default();

    e.blocks(&program.global);
    let global_end = e.code.len() as u32;

    let mut functions = Vec::with_capacity(program.functions.len());
    for f in &program.functions {
        let entry = e.code.len() as u32;
        e.blocks(&f.blocks);
        functions.push(FunctionEntry {
            name: f.desc.name.clone(),
            params: f.desc.params.iter().map(|p| p.ty.name.clone()).collect(),
            ret: f.desc.ret.name.clone(),
            entry,
            end: e.code.len() as u32,
            frame_size: f.frame_size as u32,
            arg_size: f.desc.arg_size() as u32,
            ret_size: f.desc.ret.byte_size as u32,
        });
    }

    e.patch()?;

    let globals = build
        .globals
        .iter()
        .map(|g| GlobalEntry {
            name: g.name.clone(),
            type_name: g.ty.name.clone(),
            offset: g.offset as u32,
            size: g.ty.byte_size as u32,
            is_extern: g.is_extern,
            init: g.init.clone(),
        })
        .collect();

    let natives = program
        .natives
        .iter()
        .map(|n| NativeRef {
            name: n.name.clone(),
            params: n.params.iter().map(|p| p.ty.name.clone()).collect(),
            ret: n.ret.name.clone(),
            arg_size: n.arg_size() as u32,
            ret_size: n.ret.byte_size as u32,
        })
        .collect();

    let accessors = program
        .accessors
        .iter()
        .map(|class| AccessorRef {
            class_name: class.name.clone(),
            properties: class
                .class
                .as_ref()
                .map(|info| {
                    info.properties
                        .iter()
                        .map(|p| PropertyRef {
                            name: p.name.clone(),
                            type_name: p.ty.name.clone(),
                            id: p.id,
                            size: p.ty.byte_size as u32,
                        })
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect();

    debug!(ops = e.code.len(), functions = functions.len(), "generated bytecode");

    Ok(Assembly {
        code: e.code,
        strings: program.strings.clone(),
        functions,
        globals,
        natives,
        accessors,
        global_frame_size: build.global_frame_size as u32,
        global_end,
        serial: next_serial(),
    })
}

impl Emitter {
    fn blocks(&mut self, blocks: &[CanonBlock]) {
        for block in blocks {
            self.labels.insert(block.label.0, self.code.len());
            for node in &block.nodes {
                self.node(node);
            }
        }
    }

    fn jump(&mut self, op: Op, target: Label) {
        self.fixups.push((self.code.len(), target));
        self.code.push(op);
    }

    fn patch(&mut self) -> Result<(), CompileError> {
        for &(ip, label) in &self.fixups {
            let target = self.labels.get(&label.0).copied().ok_or_else(|| {
                CompileError::new(0, format!("internal error: label {} never placed", label.0), "")
            })?;
            let offset = target as i32 - ip as i32;
            match self.code.get_mut(ip) {
                Some(Op::Jump(o)) | Some(Op::JumpIfFalse(o)) => *o = offset,
                _ => {
                    return Err(CompileError::new(
                        0,
                        format!("internal error: no jump at {}", ip),
                        "",
                    ));
                }
            }
        }
        Ok(())
    }

    fn node(&mut self, node: &Canon) {
        match node {
            Canon::Eval { exp, words } => {
                self.exp(exp);
                if *words > 0 {
                    self.code.push(Op::Pop(*words as u32));
                }
            }
            Canon::Store {
                place,
                value,
                words,
            } => {
                self.exp(value);
                self.addr(place);
                self.code.push(Op::Store(*words as u32));
            }
            Canon::StoreLanes {
                place,
                lanes,
                value,
            } => {
                self.exp(value);
                self.addr(place);
                self.code.push(Op::StoreLanes(lanes.clone()));
            }
            Canon::WriteProp {
                object,
                accessor,
                property,
                words,
                value,
            } => {
                self.exp(value);
                self.exp(object);
                self.code.push(Op::WriteProp {
                    accessor: *accessor as u32,
                    property: *property as u32,
                    words: *words as u32,
                });
            }
            Canon::Jump(target) => self.jump(Op::Jump(0), *target),
            Canon::JumpIfFalse { cond, target } => {
                self.exp(cond);
                self.jump(Op::JumpIfFalse(0), *target);
            }
            Canon::Ret { value, words } => {
                if let Some(value) = value {
                    self.exp(value);
                }
                self.code.push(Op::Ret(*words as u32));
            }
            Canon::Exit => self.code.push(Op::Exit),
        }
    }

    fn addr(&mut self, place: &Place) {
        match place {
            Place::Global(offset) => self.code.push(Op::GlobalAddr(*offset as u32)),
            Place::Local(offset) => self.code.push(Op::LocalAddr(*offset as u32)),
            Place::Member { base, offset } => {
                self.addr(base);
                if *offset > 0 {
                    self.code.push(Op::AddrOffset(*offset as u32));
                }
            }
            Place::Index {
                base,
                index,
                stride,
                count,
            } => {
                self.addr(base);
                self.exp(index);
                self.code.push(Op::IndexAddr {
                    stride: *stride as u32,
                    count: *count as u32,
                });
            }
        }
    }

    fn exp(&mut self, exp: &CExp) {
        match exp {
            CExp::Int(n) => self.code.push(Op::PushInt(*n)),
            CExp::Float(f) => self.code.push(Op::PushFloat(*f)),
            CExp::Str(index) => self.code.push(Op::PushStr(*index)),
            CExp::Zero(words) => {
                if *words > 0 {
                    self.code.push(Op::PushZero(*words as u32));
                }
            }
            CExp::Load { place, words } => {
                self.addr(place);
                self.code.push(Op::Load(*words as u32));
            }
            CExp::Binary { op, lhs, rhs } => {
                self.exp(lhs);
                self.exp(rhs);
                self.code.push(op.clone());
            }
            CExp::Unary { op, operand } => {
                self.exp(operand);
                self.code.push(op.clone());
            }
            CExp::Swizzle {
                value,
                width,
                lanes,
            } => {
                self.exp(value);
                self.code.push(Op::Swizzle {
                    width: *width as u32,
                    lanes: lanes.clone(),
                });
            }
            CExp::Extract {
                value,
                total,
                offset,
                len,
            } => {
                self.exp(value);
                self.code.push(Op::Extract {
                    total: *total as u32,
                    offset: *offset as u32,
                    len: *len as u32,
                });
            }
            CExp::Call { function, args } => {
                for arg in args {
                    self.exp(arg);
                }
                self.code.push(Op::Call(*function as u32));
            }
            CExp::Native { native, args } => {
                for arg in args {
                    self.exp(arg);
                }
                self.code.push(Op::CallNative(*native as u32));
            }
            CExp::ReadProp {
                object,
                accessor,
                property,
                words,
            } => {
                self.exp(object);
                self.code.push(Op::ReadProp {
                    accessor: *accessor as u32,
                    property: *property as u32,
                    words: *words as u32,
                });
            }
            CExp::Pack(items) => {
                for item in items {
                    self.exp(item);
                }
            }
        }
    }
}
