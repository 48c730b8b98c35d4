//! Canonicalizer: annotated AST to canon blocks.
//!
//! Canon form is the last tree-shaped stage before bytecode. Names are
//! already addresses, promotions are explicit, control flow is a list of
//! labelled blocks ending in jumps, and native functions and class accessors
//! are referenced by their index in the tables collected here.

use std::sync::Arc;

use tracing::trace;

use crate::builder::{BuildOutput, CompileError, is_memory};
use crate::bytecode::op::Op;
use crate::frontend::lexer::Span;
use crate::lang::ast::{
    ArrowTarget, BinOp, CastKind, Exp, ExpKind, FunDef, IdentRef, MemberAccess, Program, Stmt,
    Storage, UnOp,
};
use crate::lang::symbol_table::{FunDesc, FunImpl};
use crate::lang::types::{TypeDesc, WORD_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(pub usize);

/// A memory location.
#[derive(Debug, Clone, PartialEq)]
pub enum Place {
    /// Byte offset in the global frame.
    Global(usize),
    /// Byte offset in the current call frame.
    Local(usize),
    Member {
        base: Box<Place>,
        offset: usize,
    },
    Index {
        base: Box<Place>,
        index: Box<CExp>,
        stride: usize,
        count: usize,
    },
}

/// A fully resolved expression. Every variant pushes a known number of
/// words.
#[derive(Debug, Clone, PartialEq)]
pub enum CExp {
    Int(i32),
    Float(f32),
    /// Index into the string table.
    Str(u32),
    /// `n` zero words.
    Zero(usize),
    Load {
        place: Place,
        words: usize,
    },
    Binary {
        op: Op,
        lhs: Box<CExp>,
        rhs: Box<CExp>,
    },
    Unary {
        op: Op,
        operand: Box<CExp>,
    },
    Swizzle {
        value: Box<CExp>,
        width: usize,
        lanes: Vec<u8>,
    },
    /// A word range of a temporary: member of a returned struct.
    Extract {
        value: Box<CExp>,
        total: usize,
        offset: usize,
        len: usize,
    },
    Call {
        function: usize,
        args: Vec<CExp>,
    },
    Native {
        native: usize,
        args: Vec<CExp>,
    },
    ReadProp {
        object: Box<CExp>,
        accessor: usize,
        property: usize,
        words: usize,
    },
    /// Values pushed back to back: memberwise construction.
    Pack(Vec<CExp>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Canon {
    /// Evaluate and drop the result.
    Eval { exp: CExp, words: usize },
    Store {
        place: Place,
        value: CExp,
        words: usize,
    },
    /// Swizzle assignment into a vector.
    StoreLanes {
        place: Place,
        lanes: Vec<u8>,
        value: CExp,
    },
    WriteProp {
        object: CExp,
        accessor: usize,
        property: usize,
        words: usize,
        value: CExp,
    },
    Jump(Label),
    JumpIfFalse { cond: CExp, target: Label },
    Ret { value: Option<CExp>, words: usize },
    Exit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonBlock {
    pub label: Label,
    pub nodes: Vec<Canon>,
}

#[derive(Debug, Clone)]
pub struct CanonFunction {
    pub index: usize,
    pub desc: Arc<FunDesc>,
    pub frame_size: usize,
    pub blocks: Vec<CanonBlock>,
}

#[derive(Debug, Clone, Default)]
pub struct CanonProgram {
    pub global: Vec<CanonBlock>,
    /// In function index order.
    pub functions: Vec<CanonFunction>,
    pub strings: Vec<String>,
    pub natives: Vec<Arc<FunDesc>>,
    /// Class types whose properties are accessed.
    pub accessors: Vec<Arc<TypeDesc>>,
}

type CanonResult<T> = Result<T, CompileError>;

fn unresolved(span: Span, what: &str) -> CompileError {
    CompileError::new(span.line, format!("internal error: unresolved {}", what), "")
}

fn storage_place(storage: Storage) -> Place {
    match storage {
        Storage::Global(offset) => Place::Global(offset),
        Storage::Local(offset) => Place::Local(offset),
    }
}

fn type_of(exp: &Exp) -> CanonResult<&Arc<TypeDesc>> {
    exp.ty.as_ref().ok_or_else(|| unresolved(exp.span, "expression type"))
}

fn words_of(exp: &Exp) -> usize {
    exp.ty.as_ref().map_or(0, |t| t.words())
}

/// Bytecode operator for `op` over operands of type `ty`.
fn binary_op(op: BinOp, ty: &TypeDesc, span: Span) -> CanonResult<Op> {
    let n = ty.words() as u32;
    let bad = || {
        CompileError::new(
            span.line,
            format!("internal error: no '{}' for {}", op.symbol(), ty),
            op.symbol(),
        )
    };
    let op = match op {
        BinOp::And => Op::And,
        BinOp::Or => Op::Or,
        _ if ty.is_vector() => match op {
            BinOp::Add => Op::VAdd(n),
            BinOp::Sub => Op::VSub(n),
            BinOp::Mul => Op::VMul(n),
            BinOp::Div => Op::VDiv(n),
            _ => return Err(bad()),
        },
        _ if ty.is_float() => match op {
            BinOp::Add => Op::FAdd,
            BinOp::Sub => Op::FSub,
            BinOp::Mul => Op::FMul,
            BinOp::Div => Op::FDiv,
            BinOp::Eq => Op::FEq,
            BinOp::Ne => Op::FNe,
            BinOp::Lt => Op::FLt,
            BinOp::Gt => Op::FGt,
            BinOp::Le => Op::FLe,
            BinOp::Ge => Op::FGe,
            _ => return Err(bad()),
        },
        BinOp::Add => Op::IAdd,
        BinOp::Sub => Op::ISub,
        BinOp::Mul => Op::IMul,
        BinOp::Div => Op::IDiv,
        BinOp::Mod => Op::IMod,
        BinOp::Eq => Op::IEq,
        BinOp::Ne => Op::INe,
        BinOp::Lt => Op::ILt,
        BinOp::Gt => Op::IGt,
        BinOp::Le => Op::ILe,
        BinOp::Ge => Op::IGe,
    };
    Ok(op)
}

#[derive(Default)]
struct Canonicalizer {
    strings: Vec<String>,
    natives: Vec<Arc<FunDesc>>,
    accessors: Vec<Arc<TypeDesc>>,
    blocks: Vec<CanonBlock>,
    next_label: usize,
}

/// Lowers a program the builder accepted.
pub fn canonicalize(program: &Program, build: &BuildOutput) -> CanonResult<CanonProgram> {
    let mut c = Canonicalizer::default();

    let entry = c.new_label();
    c.start_block(entry);
    for item in &program.items {
        c.stmt(item)?;
    }
    c.emit(Canon::Exit);
    let global = c.take_blocks();

    let mut functions = Vec::with_capacity(build.functions.len());
    for item in &program.items {
        if let Stmt::Fun(def) = item {
            functions.push(c.function(def)?);
        }
    }
    functions.sort_by_key(|f| f.index);
    if functions.iter().enumerate().any(|(i, f)| f.index != i) || functions.len() != build.functions.len() {
        return Err(CompileError::new(0, "internal error: function table mismatch", ""));
    }

    trace!(
        functions = functions.len(),
        strings = c.strings.len(),
        natives = c.natives.len(),
        "canonicalized"
    );

    Ok(CanonProgram {
        global,
        functions,
        strings: c.strings,
        natives: c.natives,
        accessors: c.accessors,
    })
}

impl Canonicalizer {
    fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    fn start_block(&mut self, label: Label) {
        self.blocks.push(CanonBlock {
            label,
            nodes: Vec::new(),
        });
    }

    fn emit(&mut self, node: Canon) {
        if self.blocks.is_empty() {
            let label = self.new_label();
            self.start_block(label);
        }
        if let Some(block) = self.blocks.last_mut() {
            block.nodes.push(node);
        }
    }

    fn take_blocks(&mut self) -> Vec<CanonBlock> {
        std::mem::take(&mut self.blocks)
    }

    fn intern(&mut self, text: &str) -> u32 {
        let index = match self.strings.iter().position(|s| s == text) {
            Some(index) => index,
            None => {
                self.strings.push(text.to_string());
                self.strings.len() - 1
            }
        };
        index as u32
    }

    fn native_index(&mut self, desc: &Arc<FunDesc>) -> usize {
        match self.natives.iter().position(|n| Arc::ptr_eq(n, desc)) {
            Some(index) => index,
            None => {
                self.natives.push(desc.clone());
                self.natives.len() - 1
            }
        }
    }

    fn accessor_index(&mut self, class: &Arc<TypeDesc>) -> usize {
        match self.accessors.iter().position(|a| a.name == class.name) {
            Some(index) => index,
            None => {
                self.accessors.push(class.clone());
                self.accessors.len() - 1
            }
        }
    }

    fn function(&mut self, def: &FunDef) -> CanonResult<CanonFunction> {
        let info = def
            .info
            .as_ref()
            .ok_or_else(|| unresolved(def.span, "function"))?;
        let body = def
            .body
            .as_ref()
            .ok_or_else(|| unresolved(def.span, "function body"))?;

        let entry = self.new_label();
        self.start_block(entry);
        self.stmts(body)?;

        // falling off the end returns zero
        let words = info.desc.ret.words();
        let value = (words > 0).then_some(CExp::Zero(words));
        self.emit(Canon::Ret { value, words });

        Ok(CanonFunction {
            index: info.index,
            desc: info.desc.clone(),
            frame_size: info.frame_size,
            blocks: self.take_blocks(),
        })
    }

    fn stmts(&mut self, body: &[Stmt]) -> CanonResult<()> {
        for stmt in body {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> CanonResult<()> {
        match stmt {
            Stmt::Expr(exp) => match &exp.kind {
                ExpKind::Assign { target, value } => self.assign(target, value)?,
                _ => {
                    let words = words_of(exp);
                    let exp = self.exp(exp)?;
                    self.emit(Canon::Eval { exp, words });
                }
            },

            Stmt::VarDecl(decl) => {
                // externs start from their constant, written at state init
                if decl.is_extern {
                    return Ok(());
                }
                let storage = decl.storage.ok_or_else(|| unresolved(decl.span, "variable"))?;
                let ty = decl
                    .resolved
                    .as_ref()
                    .ok_or_else(|| unresolved(decl.span, "variable type"))?;
                let words = ty.words();
                let value = match &decl.init {
                    Some(init) => self.exp(init)?,
                    None => CExp::Zero(words),
                };
                self.emit(Canon::Store {
                    place: storage_place(storage),
                    value,
                    words,
                });
            }

            Stmt::If {
                branches,
                else_body,
                ..
            } => {
                let end = self.new_label();
                for branch in branches {
                    let next = self.new_label();
                    let cond = self.exp(&branch.cond)?;
                    self.emit(Canon::JumpIfFalse { cond, target: next });
                    self.stmts(&branch.body)?;
                    self.emit(Canon::Jump(end));
                    self.start_block(next);
                }
                if let Some(body) = else_body {
                    self.stmts(body)?;
                }
                self.start_block(end);
            }

            Stmt::While { cond, body, .. } => {
                let head = self.new_label();
                let exit = self.new_label();
                self.start_block(head);
                let cond = self.exp(cond)?;
                self.emit(Canon::JumpIfFalse { cond, target: exit });
                self.stmts(body)?;
                self.emit(Canon::Jump(head));
                self.start_block(exit);
            }

            Stmt::Return { value, .. } => {
                let (value, words) = match value {
                    Some(v) => (Some(self.exp(v)?), words_of(v)),
                    None => (None, 0),
                };
                self.emit(Canon::Ret { value, words });
            }

            // declarations carry no code of their own
            Stmt::Struct(_) | Stmt::Enum(_) | Stmt::Fun(_) => {}
        }
        Ok(())
    }

    fn assign(&mut self, target: &Exp, value: &Exp) -> CanonResult<()> {
        let words = words_of(target);
        let value = self.exp(value)?;

        match &target.kind {
            ExpKind::Member {
                base,
                access: Some(MemberAccess::Swizzle { lanes }),
                ..
            } => {
                let place = self.place(base)?;
                self.emit(Canon::StoreLanes {
                    place,
                    lanes: lanes.clone(),
                    value,
                });
            }
            ExpKind::Arrow {
                object,
                target: Some(ArrowTarget::Property { index }),
                ..
            } => {
                let class = type_of(object)?.clone();
                let accessor = self.accessor_index(&class);
                let object = self.exp(object)?;
                self.emit(Canon::WriteProp {
                    object,
                    accessor,
                    property: *index,
                    words,
                    value,
                });
            }
            _ => {
                let place = self.place(target)?;
                self.emit(Canon::Store {
                    place,
                    value,
                    words,
                });
            }
        }
        Ok(())
    }

    fn place(&mut self, exp: &Exp) -> CanonResult<Place> {
        match &exp.kind {
            ExpKind::Ident {
                resolved: Some(IdentRef::Var(storage)),
                ..
            } => Ok(storage_place(*storage)),
            ExpKind::Index { base, index } => {
                let array = type_of(base)?.clone();
                let stride = array.child.as_ref().map_or(0, |c| c.byte_size);
                Ok(Place::Index {
                    base: Box::new(self.place(base)?),
                    index: Box::new(self.exp(index)?),
                    stride,
                    count: array.count,
                })
            }
            ExpKind::Member {
                base,
                access: Some(MemberAccess::Field { offset }),
                ..
            } => Ok(Place::Member {
                base: Box::new(self.place(base)?),
                offset: *offset,
            }),
            _ => Err(unresolved(exp.span, "memory location")),
        }
    }

    fn call(&mut self, desc: &Arc<FunDesc>, args: &[&Exp]) -> CanonResult<CExp> {
        let args = args
            .iter()
            .map(|a| self.exp(a))
            .collect::<CanonResult<Vec<CExp>>>()?;
        Ok(match &desc.imp {
            FunImpl::Script(index) => CExp::Call {
                function: *index,
                args,
            },
            FunImpl::Native(_) => CExp::Native {
                native: self.native_index(desc),
                args,
            },
            FunImpl::ZeroCtor => CExp::Zero(desc.ret.words()),
            FunImpl::MemberCtor => CExp::Pack(args),
        })
    }

    fn exp(&mut self, exp: &Exp) -> CanonResult<CExp> {
        let ty = type_of(exp)?.clone();
        let words = ty.words();

        let lowered = match &exp.kind {
            ExpKind::Int(n) => CExp::Int(*n),
            ExpKind::Float(f) => CExp::Float(*f),
            ExpKind::Str(s) => CExp::Str(self.intern(s)),

            ExpKind::Ident { resolved, .. } => match resolved {
                Some(IdentRef::Var(storage)) => CExp::Load {
                    place: storage_place(*storage),
                    words,
                },
                Some(IdentRef::Enum(value)) => CExp::Int(*value),
                None => return Err(unresolved(exp.span, "identifier")),
            },

            ExpKind::Binary { op, lhs, rhs } => {
                let operand_ty = type_of(lhs)?.clone();
                CExp::Binary {
                    op: binary_op(*op, &operand_ty, exp.span)?,
                    lhs: Box::new(self.exp(lhs)?),
                    rhs: Box::new(self.exp(rhs)?),
                }
            }

            ExpKind::Unary { op, operand } => {
                let op = match op {
                    UnOp::Not => Op::Not,
                    UnOp::Neg if ty.is_vector() => Op::VNeg(words as u32),
                    UnOp::Neg if ty.is_float() => Op::FNeg,
                    UnOp::Neg => Op::INeg,
                };
                CExp::Unary {
                    op,
                    operand: Box::new(self.exp(operand)?),
                }
            }

            ExpKind::Assign { .. } => return Err(unresolved(exp.span, "nested assignment")),

            ExpKind::Call { args, target, .. } => {
                let desc = target.as_ref().ok_or_else(|| unresolved(exp.span, "call"))?;
                let args: Vec<&Exp> = args.iter().collect();
                self.call(desc, &args)?
            }

            ExpKind::Index { .. } => CExp::Load {
                place: self.place(exp)?,
                words,
            },

            ExpKind::Member { base, access, .. } => match access {
                Some(MemberAccess::Field { .. }) if is_memory(base) => CExp::Load {
                    place: self.place(exp)?,
                    words,
                },
                Some(MemberAccess::Field { offset }) => CExp::Extract {
                    value: Box::new(self.exp(base)?),
                    total: words_of(base),
                    offset: offset / WORD_SIZE,
                    len: words,
                },
                Some(MemberAccess::Swizzle { lanes }) => CExp::Swizzle {
                    width: type_of(base)?.count,
                    value: Box::new(self.exp(base)?),
                    lanes: lanes.clone(),
                },
                None => return Err(unresolved(exp.span, "member")),
            },

            ExpKind::Arrow {
                object,
                args,
                target,
                ..
            } => match target {
                Some(ArrowTarget::Method(desc)) => {
                    let mut all: Vec<&Exp> = vec![object];
                    if let Some(args) = args {
                        all.extend(args.iter());
                    }
                    self.call(desc, &all)?
                }
                Some(ArrowTarget::Property { index }) => {
                    let class = type_of(object)?.clone();
                    CExp::ReadProp {
                        accessor: self.accessor_index(&class),
                        object: Box::new(self.exp(object)?),
                        property: *index,
                        words,
                    }
                }
                None => return Err(unresolved(exp.span, "'->' target")),
            },

            ExpKind::Cast { kind, operand } => {
                let operand = self.exp(operand)?;
                let op = match kind {
                    CastKind::IntToFloat => Op::IToF,
                    CastKind::FloatToInt => Op::FToI,
                    CastKind::Splat(n) => Op::Splat(*n as u32),
                    CastKind::Retag => return Ok(operand),
                };
                CExp::Unary {
                    op,
                    operand: Box::new(operand),
                }
            }
        };
        Ok(lowered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BlockScriptBuilder;
    use crate::frontend::lexer::Lexer;
    use crate::frontend::parser::Parser;
    use crate::frontend::str_pool::IddStrPool;
    use crate::lang::symbol_table::SymbolTable;
    use crate::runtime::intrinsics::{HostEnvironment, create_runtime_table};

    fn lower(source: &str) -> CanonProgram {
        let mut pool = IddStrPool::new();
        let tokens = Lexer::new(source, &mut pool).tokenize().unwrap();
        let mut program = Parser::new(tokens, &pool).parse().unwrap();
        let runtime = Arc::new(create_runtime_table(&HostEnvironment::default()).unwrap());
        let mut table = SymbolTable::new("script");
        table.register_child(runtime);
        let mut builder = BlockScriptBuilder::new(table);
        builder.begin_build();
        builder.build(&mut program);
        let out = builder.end_build().unwrap();
        canonicalize(&program, &out).unwrap()
    }

    fn global_nodes(canon: &CanonProgram) -> Vec<&Canon> {
        canon.global.iter().flat_map(|b| b.nodes.iter()).collect()
    }

    #[test]
    fn test_global_code_ends_with_exit() {
        let canon = lower("int a = 1;");
        let nodes = global_nodes(&canon);
        assert_eq!(
            nodes[0],
            &Canon::Store {
                place: Place::Global(0),
                value: CExp::Int(1),
                words: 1
            }
        );
        assert_eq!(nodes.last(), Some(&&Canon::Exit));
    }

    #[test]
    fn test_extern_has_no_store() {
        let canon = lower("extern int counter = 42;");
        assert_eq!(global_nodes(&canon), vec![&Canon::Exit]);
    }

    #[test]
    fn test_if_chain_blocks() {
        let canon = lower("int a; if (a == 1) { a = 2; } elif (a == 2) { a = 3; } else { a = 4; }");
        // entry, next(1st), next(2nd), end
        assert_eq!(canon.global.len(), 4);
        let jumps: Vec<&Canon> = global_nodes(&canon)
            .into_iter()
            .filter(|n| matches!(n, Canon::Jump(_) | Canon::JumpIfFalse { .. }))
            .collect();
        assert_eq!(jumps.len(), 4);
    }

    #[test]
    fn test_while_loops_back_to_head() {
        let canon = lower("int i = 0; while (i < 3) { i = i + 1; }");
        let head = canon.global[1].label;
        let last_jump = canon.global[1].nodes.last().unwrap();
        assert_eq!(last_jump, &Canon::Jump(head));
    }

    #[test]
    fn test_function_gets_implicit_return() {
        let canon = lower("int F(int x) { if (x > 0) { return x; } }");
        let f = &canon.functions[0];
        let last = f.blocks.last().and_then(|b| b.nodes.last()).unwrap();
        assert_eq!(
            last,
            &Canon::Ret {
                value: Some(CExp::Zero(1)),
                words: 1
            }
        );
        assert_eq!(f.frame_size, 4);
    }

    #[test]
    fn test_natives_and_strings_are_deduplicated() {
        let canon = lower("echo(\"a\"); echo(\"a\"); echo(\"b\"); echo(1);");
        assert_eq!(canon.strings, vec!["a".to_string(), "b".to_string()]);
        let names: Vec<String> = canon.natives.iter().map(|n| n.signature()).collect();
        assert_eq!(names, vec!["echo(string)".to_string(), "echo(int)".to_string()]);
    }

    #[test]
    fn test_struct_constructors_lower_to_data() {
        let canon = lower("struct P { int a; float b; }; P z = P(); P m = P(1, 2.0);");
        let nodes = global_nodes(&canon);
        assert!(matches!(nodes[0], Canon::Store { value: CExp::Zero(2), .. }));
        assert!(matches!(nodes[1], Canon::Store { value: CExp::Pack(args), .. } if args.len() == 2));
    }

    #[test]
    fn test_member_of_temporary_is_extracted() {
        let canon = lower("struct P { int a; float b; }; P Make() { return P(1, 2.0); } float b = Make().b;");
        let nodes = global_nodes(&canon);
        assert!(matches!(
            nodes[0],
            Canon::Store {
                value: CExp::Extract {
                    total: 2,
                    offset: 1,
                    len: 1,
                    ..
                },
                ..
            }
        ));
    }

    #[test]
    fn test_index_place() {
        let canon = lower("float3 grid[2][4]; grid[1][3].y = 5.0;");
        let nodes = global_nodes(&canon);
        let Canon::StoreLanes { place, lanes, .. } = nodes[1] else {
            panic!("expected lane store, got {:?}", nodes[1]);
        };
        assert_eq!(lanes, &vec![1]);
        let Place::Index { stride, count, base, .. } = place else {
            panic!("expected index place");
        };
        assert_eq!((*stride, *count), (12, 4));
        assert!(matches!(**base, Place::Index { stride: 48, count: 2, .. }));
    }
}
