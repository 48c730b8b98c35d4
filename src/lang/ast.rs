//! # BlockScript Abstract Syntax Tree
//!
//! Produced by the parser, annotated in place by the builder and lowered by
//! the canonicalizer. Fields documented as *annotation* are `None` straight
//! out of the parser and filled during the semantic pass.

use std::sync::Arc;

use crate::frontend::lexer::Span;
use crate::lang::symbol_table::FunDesc;
use crate::lang::types::TypeDesc;

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub items: Vec<Stmt>,
}

/// A type as written in source: base name plus array dimensions,
/// outermost first.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeRef {
    pub name: String,
    pub dims: Vec<usize>,
    pub span: Span,
}

/// Byte offset of a variable in the global frame or the current call frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Global(usize),
    Local(usize),
}

#[derive(Debug, Clone)]
pub struct VarDecl {
    pub is_extern: bool,
    pub ty: TypeRef,
    pub name: String,
    pub init: Option<Exp>,
    pub span: Span,
    /// Annotation.
    pub storage: Option<Storage>,
    /// Annotation.
    pub resolved: Option<Arc<TypeDesc>>,
}

#[derive(Debug, Clone)]
pub struct IfBranch {
    pub cond: Exp,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct ArgDec {
    pub ty: TypeRef,
    pub name: String,
    pub span: Span,
}

/// Resolved layout of a script function.
#[derive(Debug, Clone)]
pub struct FunInfo {
    pub index: usize,
    pub desc: Arc<FunDesc>,
    /// Bytes of arguments plus locals.
    pub frame_size: usize,
}

#[derive(Debug, Clone)]
pub struct FunDef {
    pub ret: TypeRef,
    pub name: String,
    pub params: Vec<ArgDec>,
    /// `None` for a prototype, which the builder rejects.
    pub body: Option<Vec<Stmt>>,
    pub span: Span,
    /// Annotation.
    pub info: Option<FunInfo>,
}

#[derive(Debug, Clone)]
pub struct StructDef {
    pub name: String,
    pub members: Vec<(TypeRef, String)>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct EnumDef {
    pub name: String,
    pub values: Vec<(String, Option<i32>)>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    /// Expression statement; must be an assignment or a call.
    Expr(Exp),
    VarDecl(VarDecl),
    If {
        branches: Vec<IfBranch>,
        else_body: Option<Vec<Stmt>>,
        span: Span,
    },
    While {
        cond: Exp,
        body: Vec<Stmt>,
        span: Span,
    },
    Return {
        value: Option<Exp>,
        span: Span,
    },
    Struct(StructDef),
    Enum(EnumDef),
    Fun(FunDef),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Expr(e) => e.span,
            Stmt::VarDecl(v) => v.span,
            Stmt::If { span, .. } | Stmt::While { span, .. } | Stmt::Return { span, .. } => *span,
            Stmt::Struct(s) => s.span,
            Stmt::Enum(e) => e.span,
            Stmt::Fun(f) => f.span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge
        )
    }

    pub fn is_logic(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

/// What a bare identifier turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentRef {
    Var(Storage),
    Enum(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberAccess {
    /// Struct member at a byte offset.
    Field { offset: usize },
    /// Vector lanes, `0..=3` for `x y z w`.
    Swizzle { lanes: Vec<u8> },
}

#[derive(Debug, Clone)]
pub enum ArrowTarget {
    Method(Arc<FunDesc>),
    /// Index into the class's property list.
    Property { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    IntToFloat,
    FloatToInt,
    /// Scalar float to every lane of a vector.
    Splat(usize),
    /// Same bits, different type: enum <-> int.
    Retag,
}

#[derive(Debug, Clone)]
pub enum ExpKind {
    Int(i32),
    Float(f32),
    Str(String),
    Ident {
        name: String,
        /// Annotation.
        resolved: Option<IdentRef>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Exp>,
        rhs: Box<Exp>,
    },
    Unary {
        op: UnOp,
        operand: Box<Exp>,
    },
    Assign {
        target: Box<Exp>,
        value: Box<Exp>,
    },
    Call {
        name: String,
        args: Vec<Exp>,
        /// Annotation.
        target: Option<Arc<FunDesc>>,
    },
    Index {
        base: Box<Exp>,
        index: Box<Exp>,
    },
    Member {
        base: Box<Exp>,
        name: String,
        /// Annotation.
        access: Option<MemberAccess>,
    },
    /// `obj->name` or `obj->name(args)`.
    Arrow {
        object: Box<Exp>,
        name: String,
        args: Option<Vec<Exp>>,
        /// Annotation.
        target: Option<ArrowTarget>,
    },
    /// Only created by the builder, for promotions and explicit casts.
    Cast {
        kind: CastKind,
        operand: Box<Exp>,
    },
}

#[derive(Debug, Clone)]
pub struct Exp {
    pub kind: ExpKind,
    pub span: Span,
    /// Annotation.
    pub ty: Option<Arc<TypeDesc>>,
}

impl Exp {
    pub fn new(kind: ExpKind, span: Span) -> Self {
        Exp {
            kind,
            span,
            ty: None,
        }
    }

    pub fn typed(kind: ExpKind, span: Span, ty: Arc<TypeDesc>) -> Self {
        Exp {
            kind,
            span,
            ty: Some(ty),
        }
    }

    /// Moves the expression out, leaving a placeholder literal.
    pub fn take(&mut self) -> Exp {
        let span = self.span;
        std::mem::replace(self, Exp::new(ExpKind::Int(0), span))
    }

    /// Wraps `self` in a builder-inserted cast.
    pub fn cast(self, kind: CastKind, ty: Arc<TypeDesc>) -> Exp {
        let span = self.span;
        Exp::typed(
            ExpKind::Cast {
                kind,
                operand: Box::new(self),
            },
            span,
            ty,
        )
    }

    /// Whether the expression denotes a writable location.
    pub fn is_place(&self) -> bool {
        match &self.kind {
            ExpKind::Ident { .. } => true,
            ExpKind::Index { base, .. } | ExpKind::Member { base, .. } => base.is_place(),
            ExpKind::Arrow { args: None, .. } => true,
            _ => false,
        }
    }
}
