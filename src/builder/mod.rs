//! Semantic pass over the parsed program.
//!
//! The builder resolves every name, checks and annotates every expression
//! with its type, inserts implicit promotions as explicit casts and lays out
//! variables in the global frame or in their function's call frame. Errors
//! are collected, never thrown: one build reports every problem it finds.

pub mod canon;

use std::sync::Arc;

use tracing::debug;

use crate::frontend::lexer::Span;
use crate::lang::ast::{
    ArrowTarget, BinOp, CastKind, EnumDef, Exp, ExpKind, FunDef, FunInfo, IdentRef, MemberAccess,
    Program, Stmt, Storage, StructDef, UnOp, VarDecl,
};
use crate::lang::symbol_table::{FunDesc, FunImpl, Param, SymbolTable};
use crate::lang::types::{AluEngine, Enumerant, TypeDesc, TypeKind};

/// A semantic error: the line it was found on, what is wrong and the token
/// at fault.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub line: usize,
    pub message: String,
    pub token: String,
}

impl CompileError {
    pub fn new(line: usize, message: impl Into<String>, token: impl Into<String>) -> Self {
        CompileError {
            line,
            message: message.into(),
            token: token.into(),
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.token.is_empty() {
            write!(f, "{}: {}", self.line, self.message)
        } else {
            write!(f, "{}: {} (at '{}')", self.line, self.message, self.token)
        }
    }
}

impl std::error::Error for CompileError {}

/// A variable in the global frame.
#[derive(Debug, Clone)]
pub struct GlobalInfo {
    pub name: String,
    pub ty: Arc<TypeDesc>,
    pub offset: usize,
    pub is_extern: bool,
    /// Constant initial bytes of an `extern`.
    pub init: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct BuildOutput {
    /// The script's own table, linked to every library it sees.
    pub table: SymbolTable,
    /// Script functions in index order.
    pub functions: Vec<Arc<FunDesc>>,
    pub globals: Vec<GlobalInfo>,
    pub global_frame_size: usize,
}

struct Var {
    name: String,
    ty: Arc<TypeDesc>,
    storage: Storage,
}

struct FunctionCtx {
    ret: Arc<TypeDesc>,
    frame_top: usize,
}

pub struct BlockScriptBuilder {
    table: SymbolTable,
    scopes: Vec<Vec<Var>>,
    function: Option<FunctionCtx>,
    functions: Vec<Arc<FunDesc>>,
    globals: Vec<GlobalInfo>,
    global_top: usize,
    errors: Vec<CompileError>,
    int: Arc<TypeDesc>,
    float: Arc<TypeDesc>,
    string: Arc<TypeDesc>,
}

fn builtin(table: &SymbolTable, name: &str, fallback: impl FnOnce() -> TypeDesc) -> Arc<TypeDesc> {
    table
        .get_type_by_name(name)
        .unwrap_or_else(|| Arc::new(fallback()))
}

/// Variables, array elements and struct members of variables.
pub(crate) fn is_memory(exp: &Exp) -> bool {
    match &exp.kind {
        ExpKind::Ident {
            resolved: Some(IdentRef::Var(_)),
            ..
        } => true,
        ExpKind::Index { base, .. } => is_memory(base),
        ExpKind::Member {
            base,
            access: Some(MemberAccess::Field { .. }),
            ..
        } => is_memory(base),
        _ => false,
    }
}

impl BlockScriptBuilder {
    /// `table` is the script's own (empty) table with the runtime and
    /// library tables already linked.
    pub fn new(table: SymbolTable) -> Self {
        let int = builtin(&table, "int", || TypeDesc::scalar("int", AluEngine::Int));
        let float = builtin(&table, "float", || TypeDesc::scalar("float", AluEngine::Float));
        let string = builtin(&table, "string", || TypeDesc::class("string", Default::default()));
        BlockScriptBuilder {
            table,
            scopes: Vec::new(),
            function: None,
            functions: Vec::new(),
            globals: Vec::new(),
            global_top: 0,
            errors: Vec::new(),
            int,
            float,
            string,
        }
    }

    pub fn begin_build(&mut self) {
        self.scopes = vec![Vec::new()];
        self.function = None;
        self.functions.clear();
        self.globals.clear();
        self.global_top = 0;
        self.errors.clear();
    }

    pub fn build(&mut self, program: &mut Program) {
        for stmt in &mut program.items {
            self.stmt(stmt);
        }
    }

    pub fn end_build(self) -> Result<BuildOutput, Vec<CompileError>> {
        if !self.errors.is_empty() {
            debug!(errors = self.errors.len(), "build failed");
            return Err(self.errors);
        }
        debug!(
            functions = self.functions.len(),
            globals = self.globals.len(),
            global_frame = self.global_top,
            "build finished"
        );
        Ok(BuildOutput {
            table: self.table,
            functions: self.functions,
            globals: self.globals,
            global_frame_size: self.global_top,
        })
    }

    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    fn error(&mut self, span: Span, token: &str, message: impl Into<String>) {
        self.errors.push(CompileError::new(span.line, message, token));
    }

    fn at_global_scope(&self) -> bool {
        self.function.is_none() && self.scopes.len() == 1
    }

    fn lookup(&self, name: &str) -> Option<(Storage, Arc<TypeDesc>)> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.iter().rev().find(|v| v.name == name))
            .map(|v| (v.storage, v.ty.clone()))
    }

    fn vector_type(&self, width: usize) -> Option<Arc<TypeDesc>> {
        self.table.get_type_by_name(&format!("float{}", width))
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn stmt(&mut self, stmt: &mut Stmt) {
        let global = self.at_global_scope();
        match stmt {
            Stmt::Expr(exp) => self.expr_stmt(exp),
            Stmt::VarDecl(decl) => self.var_decl(decl),
            Stmt::If {
                branches,
                else_body,
                ..
            } => {
                for branch in branches.iter_mut() {
                    self.condition(&mut branch.cond, "if");
                    self.block(&mut branch.body);
                }
                if let Some(body) = else_body {
                    self.block(body);
                }
            }
            Stmt::While { cond, body, .. } => {
                self.condition(cond, "while");
                self.block(body);
            }
            Stmt::Return { value, span } => self.ret(value, *span),
            Stmt::Struct(def) if global => self.struct_def(def),
            Stmt::Enum(def) if global => self.enum_def(def),
            Stmt::Fun(def) if global => self.fun_def(def),
            Stmt::Struct(StructDef { name, span, .. })
            | Stmt::Enum(EnumDef { name, span, .. })
            | Stmt::Fun(FunDef { name, span, .. }) => {
                let (span, name) = (*span, name.clone());
                self.error(span, &name, "functions, structs and enums must be declared at global scope");
            }
        }
    }

    fn block(&mut self, body: &mut [Stmt]) {
        self.scopes.push(Vec::new());
        for stmt in body {
            self.stmt(stmt);
        }
        self.scopes.pop();
    }

    fn condition(&mut self, cond: &mut Exp, keyword: &str) {
        if let Some(ty) = self.exp(cond) {
            if !ty.is_int() {
                self.error(
                    cond.span,
                    keyword,
                    format!("'{}' condition must be int, found {}", keyword, ty),
                );
            }
        }
    }

    fn expr_stmt(&mut self, exp: &mut Exp) {
        let span = exp.span;
        match &mut exp.kind {
            ExpKind::Assign { target, value } => self.assign(target, value),
            ExpKind::Call { .. } | ExpKind::Arrow { args: Some(_), .. } => {
                self.exp(exp);
            }
            _ => {
                self.exp(exp);
                self.error(span, "", "expression statement must be an assignment or a call");
            }
        }
    }

    fn assign(&mut self, target: &mut Exp, value: &mut Exp) {
        let target_ty = self.exp(target);
        let value_ty = self.exp(value);
        let (Some(target_ty), Some(value_ty)) = (target_ty, value_ty) else {
            return;
        };

        if !Self::is_assignable(target) {
            self.error(target.span, "=", "cannot assign to this expression");
            return;
        }
        if let ExpKind::Member {
            access: Some(MemberAccess::Swizzle { lanes }),
            name,
            ..
        } = &target.kind
        {
            let repeats = lanes.iter().enumerate().any(|(i, l)| lanes[..i].contains(l));
            if repeats {
                let name = name.clone();
                self.error(target.span, &name, "swizzle assignment must not repeat a lane");
                return;
            }
        }
        if !self.coerce(value, &target_ty) {
            self.error(
                value.span,
                "=",
                format!("cannot assign {} to {}", value_ty, target_ty),
            );
        }
    }

    fn is_assignable(exp: &Exp) -> bool {
        match &exp.kind {
            ExpKind::Member {
                base,
                access: Some(MemberAccess::Swizzle { .. }),
                ..
            } => is_memory(base),
            ExpKind::Arrow {
                args: None,
                target: Some(ArrowTarget::Property { .. }),
                ..
            } => true,
            _ => is_memory(exp),
        }
    }

    fn var_decl(&mut self, decl: &mut VarDecl) {
        let span = decl.span;
        let name = decl.name.clone();

        if decl.is_extern && !self.at_global_scope() {
            self.error(span, &name, "extern variables must be declared at global scope");
        }

        let ty = match self.table.resolve_type(&decl.ty.name, &decl.ty.dims) {
            Ok(ty) => ty,
            Err(e) => {
                let type_name = decl.ty.name.clone();
                self.error(decl.ty.span, &type_name, e.to_string());
                return;
            }
        };
        if ty.is_void() {
            self.error(span, &name, format!("variable '{}' cannot be void", name));
            return;
        }
        let redeclared = self
            .scopes
            .last()
            .is_some_and(|scope| scope.iter().any(|v| v.name == name));
        if redeclared {
            self.error(span, &name, format!("'{}' is already declared in this scope", name));
        }

        if let Some(init) = &mut decl.init {
            if let Some(init_ty) = self.exp(init) {
                if !self.coerce(init, &ty) {
                    self.error(
                        init.span,
                        &name,
                        format!("cannot initialize '{}' ({}) with {}", name, ty, init_ty),
                    );
                }
            }
        }

        let mut init_bytes = None;
        if decl.is_extern {
            if let Some(init) = &decl.init {
                match constant_words(init) {
                    Some(words) => {
                        init_bytes = Some(words.iter().flat_map(|w| w.to_le_bytes()).collect());
                    }
                    None => self.error(init.span, &name, "extern initializer must be a constant"),
                }
            }
        }

        let storage = match &mut self.function {
            Some(ctx) => {
                let offset = ctx.frame_top;
                ctx.frame_top += ty.byte_size;
                Storage::Local(offset)
            }
            None => {
                let offset = self.global_top;
                self.global_top += ty.byte_size;
                self.globals.push(GlobalInfo {
                    name: name.clone(),
                    ty: ty.clone(),
                    offset,
                    is_extern: decl.is_extern,
                    init: init_bytes,
                });
                Storage::Global(offset)
            }
        };

        decl.storage = Some(storage);
        decl.resolved = Some(ty.clone());
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(Var { name, ty, storage });
        }
    }

    fn ret(&mut self, value: &mut Option<Exp>, span: Span) {
        let Some(ret_ty) = self.function.as_ref().map(|ctx| ctx.ret.clone()) else {
            self.error(span, "return", "return outside of a function");
            return;
        };
        match value {
            None if !ret_ty.is_void() => {
                self.error(span, "return", format!("missing return value in function returning {}", ret_ty));
            }
            None => {}
            Some(_) if ret_ty.is_void() => {
                self.error(span, "return", "void function cannot return a value");
            }
            Some(v) => {
                if let Some(ty) = self.exp(v) {
                    if !self.coerce(v, &ret_ty) {
                        self.error(
                            v.span,
                            "return",
                            format!("cannot return {} from function returning {}", ty, ret_ty),
                        );
                    }
                }
            }
        }
    }

    fn struct_def(&mut self, def: &StructDef) {
        if def.members.is_empty() {
            self.error(def.span, &def.name, format!("struct '{}' has no members", def.name));
            return;
        }
        let mut members: Vec<(String, Arc<TypeDesc>)> = Vec::new();
        let mut ok = true;
        for (tref, member) in &def.members {
            if members.iter().any(|(m, _)| m == member) {
                self.error(tref.span, member, format!("duplicate member '{}'", member));
                ok = false;
                continue;
            }
            match self.table.resolve_type(&tref.name, &tref.dims) {
                Ok(ty) if ty.is_void() => {
                    self.error(tref.span, member, "struct members cannot be void");
                    ok = false;
                }
                Ok(ty) => members.push((member.clone(), ty)),
                Err(e) => {
                    self.error(tref.span, &tref.name, e.to_string());
                    ok = false;
                }
            }
        }
        if !ok {
            return;
        }
        if let Err(e) = self.table.create_struct_type(&def.name, members) {
            self.error(def.span, &def.name, e.to_string());
        }
    }

    fn enum_def(&mut self, def: &EnumDef) {
        let mut enumerants: Vec<Enumerant> = Vec::new();
        let mut next = 0i32;
        for (name, value) in &def.values {
            let value = value.unwrap_or(next);
            next = value.wrapping_add(1);
            let taken = enumerants.iter().any(|e| &e.name == name)
                || self.table.find_enum_by_name(name).is_some();
            if taken {
                self.error(def.span, name, format!("enumerant '{}' is already defined", name));
                continue;
            }
            enumerants.push(Enumerant {
                name: name.clone(),
                value,
            });
        }
        if let Err(e) = self.table.create_enum_type(&def.name, enumerants) {
            self.error(def.span, &def.name, e.to_string());
        }
    }

    fn fun_def(&mut self, def: &mut FunDef) {
        let span = def.span;
        let name = def.name.clone();
        if def.body.is_none() {
            self.error(span, &name, format!("missing function body for '{}'", name));
            return;
        }

        let Some(ret) = self.table.get_type_by_name(&def.ret.name) else {
            let ret_name = def.ret.name.clone();
            self.error(def.ret.span, &ret_name, format!("unknown type '{}'", ret_name));
            return;
        };

        let mut params: Vec<Param> = Vec::new();
        let mut ok = true;
        for arg in &def.params {
            if params.iter().any(|p| p.name == arg.name) {
                self.error(arg.span, &arg.name, format!("duplicate argument '{}'", arg.name));
                ok = false;
                continue;
            }
            match self.table.resolve_type(&arg.ty.name, &arg.ty.dims) {
                Ok(ty) if ty.is_void() => {
                    self.error(arg.span, &arg.name, "arguments cannot be void");
                    ok = false;
                }
                Ok(ty) => params.push(Param::new(&arg.name, ty)),
                Err(e) => {
                    self.error(arg.ty.span, &arg.ty.name, e.to_string());
                    ok = false;
                }
            }
        }
        if !ok {
            return;
        }

        let index = self.functions.len();
        let desc = FunDesc {
            name: name.clone(),
            ret: ret.clone(),
            params,
            imp: FunImpl::Script(index),
        };
        let desc = match self.table.create_function_description(desc) {
            Ok(desc) => desc,
            Err(e) => {
                self.error(span, &name, e.to_string());
                return;
            }
        };
        self.functions.push(desc.clone());

        // arguments occupy the start of the frame, in order
        let mut scope = Vec::new();
        let mut frame_top = 0;
        for p in &desc.params {
            scope.push(Var {
                name: p.name.clone(),
                ty: p.ty.clone(),
                storage: Storage::Local(frame_top),
            });
            frame_top += p.ty.byte_size;
        }
        self.function = Some(FunctionCtx { ret, frame_top });
        self.scopes.push(scope);

        if let Some(body) = def.body.as_mut() {
            for stmt in body {
                self.stmt(stmt);
            }
        }

        self.scopes.pop();
        let frame_size = self.function.take().map_or(0, |ctx| ctx.frame_top);
        def.info = Some(FunInfo {
            index,
            desc,
            frame_size,
        });
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    /// Checks and annotates `exp`. `None` means an error was reported.
    fn exp(&mut self, exp: &mut Exp) -> Option<Arc<TypeDesc>> {
        if let ExpKind::Call { name, args, .. } = &exp.kind {
            if args.len() == 1 && self.is_cast_type(name) {
                return self.explicit_cast(exp);
            }
        }

        let span = exp.span;
        let ty = match &mut exp.kind {
            ExpKind::Int(_) => Some(self.int.clone()),
            ExpKind::Float(_) => Some(self.float.clone()),
            ExpKind::Str(_) => Some(self.string.clone()),

            ExpKind::Ident { name, resolved } => {
                if let Some((storage, ty)) = self.lookup(name) {
                    *resolved = Some(IdentRef::Var(storage));
                    Some(ty)
                } else if let Some((ty, value)) = self.table.find_enum_by_name(name) {
                    *resolved = Some(IdentRef::Enum(value));
                    Some(ty)
                } else {
                    let name = name.clone();
                    self.error(span, &name, format!("unknown identifier '{}'", name));
                    None
                }
            }

            ExpKind::Binary { op, lhs, rhs } => {
                let op = *op;
                let l = self.exp(lhs);
                let r = self.exp(rhs);
                match (l, r) {
                    (Some(l), Some(r)) => self.binary(op, lhs, rhs, l, r, span),
                    _ => None,
                }
            }

            ExpKind::Unary { op, operand } => {
                let op = *op;
                let ty = self.exp(operand)?;
                let numeric = ty.is_int() || ty.is_float() || ty.is_vector();
                match op {
                    UnOp::Neg if numeric => Some(ty),
                    UnOp::Not if ty.is_int() => Some(ty),
                    UnOp::Neg => {
                        self.error(span, "-", format!("cannot negate {}", ty));
                        None
                    }
                    UnOp::Not => {
                        self.error(span, "!", format!("'!' requires int, found {}", ty));
                        None
                    }
                }
            }

            ExpKind::Assign { target, value } => {
                self.exp(target);
                self.exp(value);
                self.error(span, "=", "assignment is only allowed as a statement");
                None
            }

            ExpKind::Call { name, args, target } => {
                let mut arg_tys = Vec::with_capacity(args.len());
                for arg in args.iter_mut() {
                    arg_tys.push(self.exp(arg));
                }
                let arg_tys: Option<Vec<Arc<TypeDesc>>> = arg_tys.into_iter().collect();
                let arg_tys = arg_tys?;
                let desc = self.resolve_call(name, &arg_tys, span)?;
                for (arg, param) in args.iter_mut().zip(&desc.params) {
                    self.coerce(arg, &param.ty);
                }
                let ret = desc.ret.clone();
                *target = Some(desc);
                Some(ret)
            }

            ExpKind::Index { base, index } => {
                let base_ty = self.exp(base);
                let index_ty = self.exp(index);
                let (base_ty, index_ty) = (base_ty?, index_ty?);
                if base_ty.kind != TypeKind::Array {
                    self.error(span, "[", format!("cannot index a value of type {}", base_ty));
                    None
                } else if !index_ty.is_int() {
                    self.error(index.span, "[", format!("array index must be int, found {}", index_ty));
                    None
                } else if !is_memory(base) {
                    self.error(span, "[", "only array variables can be indexed");
                    None
                } else {
                    base_ty.child.clone()
                }
            }

            ExpKind::Member { base, name, access } => {
                let base_ty = self.exp(base)?;
                match base_ty.kind {
                    TypeKind::Struct => match base_ty.member(name) {
                        Some(member) => {
                            *access = Some(MemberAccess::Field {
                                offset: member.offset,
                            });
                            Some(member.ty.clone())
                        }
                        None => {
                            let name = name.clone();
                            self.error(
                                span,
                                &name,
                                format!("struct '{}' has no member '{}'", base_ty, name),
                            );
                            None
                        }
                    },
                    TypeKind::Vector => {
                        let nested = matches!(
                            base.kind,
                            ExpKind::Member {
                                access: Some(MemberAccess::Swizzle { .. }),
                                ..
                            }
                        );
                        let lanes = parse_swizzle(name, base_ty.count);
                        let name = name.clone();
                        if nested {
                            self.error(span, &name, "nested swizzles are not allowed");
                            None
                        } else if let Some(lanes) = lanes {
                            let width = lanes.len();
                            *access = Some(MemberAccess::Swizzle { lanes });
                            if width == 1 {
                                Some(self.float.clone())
                            } else {
                                self.vector_type(width)
                            }
                        } else {
                            self.error(
                                span,
                                &name,
                                format!("invalid swizzle '.{}' on {}", name, base_ty),
                            );
                            None
                        }
                    }
                    _ => {
                        let name = name.clone();
                        self.error(span, &name, format!("type '{}' has no members", base_ty));
                        None
                    }
                }
            }

            ExpKind::Arrow {
                object,
                name,
                args,
                target,
            } => {
                let object_ty = self.exp(object)?;
                let name = name.clone();
                if object_ty.kind != TypeKind::Class {
                    self.error(
                        span,
                        &name,
                        format!("'->' requires a class object, found {}", object_ty),
                    );
                    return None;
                }
                match args {
                    Some(args) => {
                        let mut arg_tys = vec![Some(object_ty.clone())];
                        for arg in args.iter_mut() {
                            arg_tys.push(self.exp(arg));
                        }
                        let arg_tys: Vec<Arc<TypeDesc>> = arg_tys.into_iter().collect::<Option<_>>()?;
                        let desc = self.resolve_call(&name, &arg_tys, span)?;
                        let is_method = desc.params.first().is_some_and(|p| p.ty.name == object_ty.name);
                        if !is_method {
                            self.error(
                                span,
                                &name,
                                format!("'{}' is not a method of class '{}'", name, object_ty),
                            );
                            return None;
                        }
                        for (arg, param) in args.iter_mut().zip(desc.params.iter().skip(1)) {
                            self.coerce(arg, &param.ty);
                        }
                        let ret = desc.ret.clone();
                        *target = Some(ArrowTarget::Method(desc));
                        Some(ret)
                    }
                    None => match object_ty.property(&name) {
                        Some((index, property)) => {
                            *target = Some(ArrowTarget::Property { index });
                            Some(property.ty.clone())
                        }
                        None => {
                            self.error(
                                span,
                                &name,
                                format!("class '{}' has no property '{}'", object_ty, name),
                            );
                            None
                        }
                    },
                }
            }

            ExpKind::Cast { .. } => exp.ty.clone(),
        };

        exp.ty = ty.clone();
        ty
    }

    fn binary(
        &mut self,
        op: BinOp,
        lhs: &mut Exp,
        rhs: &mut Exp,
        l: Arc<TypeDesc>,
        r: Arc<TypeDesc>,
        span: Span,
    ) -> Option<Arc<TypeDesc>> {
        let symbol = op.symbol();

        if op.is_logic() {
            if l.is_int() && r.is_int() {
                return Some(self.int.clone());
            }
            self.error(
                span,
                symbol,
                format!("'{}' requires int operands, found {} and {}", symbol, l, r),
            );
            return None;
        }

        if l.kind == TypeKind::Enum || r.kind == TypeKind::Enum {
            if l.name == r.name && matches!(op, BinOp::Eq | BinOp::Ne) {
                return Some(self.int.clone());
            }
            self.error(
                span,
                symbol,
                format!("enums only support '==' and '!=' with the same enum, found {} {} {}", l, symbol, r),
            );
            return None;
        }

        let Some(common) = common_numeric(&l, &r) else {
            self.error(
                span,
                symbol,
                format!("operator '{}' is not defined for {} and {}", symbol, l, r),
            );
            return None;
        };
        self.coerce(lhs, &common);
        self.coerce(rhs, &common);

        let allowed = match common.kind {
            TypeKind::Vector => matches!(op, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div),
            _ if common.is_float() => op != BinOp::Mod,
            _ => true,
        };
        if !allowed {
            self.error(
                span,
                symbol,
                format!("operator '{}' is not defined for {}", symbol, common),
            );
            return None;
        }

        if op.is_comparison() {
            Some(self.int.clone())
        } else {
            Some(common)
        }
    }

    fn is_cast_type(&self, name: &str) -> bool {
        self.table
            .get_type_by_name(name)
            .is_some_and(|t| t.is_int() || t.is_float() || t.kind == TypeKind::Enum)
    }

    /// `int(x)`, `float(x)`, `Enum(x)`.
    fn explicit_cast(&mut self, exp: &mut Exp) -> Option<Arc<TypeDesc>> {
        let span = exp.span;
        let (name, operand) = match &mut exp.kind {
            ExpKind::Call { name, args, .. } => (name.clone(), args.pop()),
            _ => return None,
        };
        let mut operand = operand?;
        let target = self.table.get_type_by_name(&name)?;
        let from = self.exp(&mut operand)?;

        let kind = if from.name == target.name {
            None
        } else if target.is_int() && from.is_float() {
            Some(CastKind::FloatToInt)
        } else if target.is_int() && from.kind == TypeKind::Enum {
            Some(CastKind::Retag)
        } else if target.is_float() && from.is_int() {
            Some(CastKind::IntToFloat)
        } else if target.kind == TypeKind::Enum && from.is_int() {
            Some(CastKind::Retag)
        } else {
            self.error(span, &name, format!("cannot cast {} to {}", from, target));
            return None;
        };

        *exp = match kind {
            Some(kind) => operand.cast(kind, target.clone()),
            None => operand,
        };
        Some(target)
    }

    /// Exact match first, then the single overload reachable by promotion.
    fn resolve_call(&mut self, name: &str, args: &[Arc<TypeDesc>], span: Span) -> Option<Arc<FunDesc>> {
        let candidates = self.table.functions_named(name);
        if candidates.is_empty() {
            self.error(span, name, format!("unknown function '{}'", name));
            return None;
        }

        let names: Vec<&str> = args.iter().map(|t| t.name.as_str()).collect();
        if let Some(exact) = candidates.iter().find(|f| f.matches(name, &names)) {
            return Some(exact.clone());
        }

        let promotable: Vec<&Arc<FunDesc>> = candidates
            .iter()
            .filter(|f| {
                f.params.len() == args.len()
                    && f.params.iter().zip(args).all(|(p, a)| can_promote(a, &p.ty))
            })
            .collect();
        match promotable.as_slice() {
            [single] => Some((*single).clone()),
            [] => {
                self.error(
                    span,
                    name,
                    format!("no overload of '{}' accepts ({})", name, names.join(", ")),
                );
                None
            }
            _ => {
                self.error(
                    span,
                    name,
                    format!("ambiguous call to '{}({})'", name, names.join(", ")),
                );
                None
            }
        }
    }

    /// Converts `exp` to `target` if the types allow it implicitly.
    fn coerce(&self, exp: &mut Exp, target: &Arc<TypeDesc>) -> bool {
        let Some(from) = exp.ty.clone() else {
            return false;
        };
        if from.name == target.name {
            return true;
        }
        if from.is_int() && target.is_float() {
            *exp = exp.take().cast(CastKind::IntToFloat, target.clone());
            return true;
        }
        if target.is_vector() && (from.is_int() || from.is_float()) {
            if from.is_int() {
                *exp = exp.take().cast(CastKind::IntToFloat, self.float.clone());
            }
            *exp = exp.take().cast(CastKind::Splat(target.count), target.clone());
            return true;
        }
        false
    }
}

/// int -> float -> floatN.
fn can_promote(from: &TypeDesc, to: &TypeDesc) -> bool {
    from.name == to.name
        || (from.is_int() && to.is_float())
        || (to.is_vector() && (from.is_int() || from.is_float()))
}

fn common_numeric(l: &Arc<TypeDesc>, r: &Arc<TypeDesc>) -> Option<Arc<TypeDesc>> {
    let numeric = |t: &TypeDesc| t.is_int() || t.is_float() || t.is_vector();
    if !numeric(l) || !numeric(r) {
        return None;
    }
    match (l.is_vector(), r.is_vector()) {
        (true, true) if l.name == r.name => Some(l.clone()),
        (true, true) => None,
        (true, false) => Some(l.clone()),
        (false, true) => Some(r.clone()),
        (false, false) if l.is_float() => Some(l.clone()),
        (false, false) => Some(r.clone()),
    }
}

/// Lanes of `xyzw` swizzle text, each below `width`.
fn parse_swizzle(text: &str, width: usize) -> Option<Vec<u8>> {
    if text.is_empty() || text.len() > 4 {
        return None;
    }
    text.chars()
        .map(|c| {
            let lane: u8 = match c {
                'x' => 0,
                'y' => 1,
                'z' => 2,
                'w' => 3,
                _ => return None,
            };
            (usize::from(lane) < width).then_some(lane)
        })
        .collect()
}

/// Word values of a constant expression.
fn constant_words(exp: &Exp) -> Option<Vec<u32>> {
    match &exp.kind {
        ExpKind::Int(n) => Some(vec![*n as u32]),
        ExpKind::Float(f) => Some(vec![f.to_bits()]),
        ExpKind::Ident {
            resolved: Some(IdentRef::Enum(value)),
            ..
        } => Some(vec![*value as u32]),
        ExpKind::Cast { kind, operand } => {
            let words = constant_words(operand)?;
            let first = *words.first()?;
            Some(match kind {
                CastKind::IntToFloat => vec![(first as i32 as f32).to_bits()],
                CastKind::FloatToInt => vec![f32::from_bits(first) as i32 as u32],
                CastKind::Splat(n) => vec![first; *n],
                CastKind::Retag => words,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;
    use crate::frontend::parser::Parser;
    use crate::frontend::str_pool::IddStrPool;
    use crate::runtime::intrinsics::{HostEnvironment, create_runtime_table};

    fn build(source: &str) -> Result<(Program, BuildOutput), Vec<CompileError>> {
        let mut pool = IddStrPool::new();
        let tokens = Lexer::new(source, &mut pool).tokenize().unwrap();
        let mut program = Parser::new(tokens, &pool).parse().unwrap();

        let runtime = Arc::new(create_runtime_table(&HostEnvironment::default()).unwrap());
        let mut table = SymbolTable::new("script");
        table.register_child(runtime);

        let mut builder = BlockScriptBuilder::new(table);
        builder.begin_build();
        builder.build(&mut program);
        builder.end_build().map(|out| (program, out))
    }

    fn assert_compile_error(source: &str, needle: &str) {
        match build(source) {
            Ok(_) => panic!("expected a compile error containing '{}'", needle),
            Err(errs) => assert!(
                errs.iter().any(|e| e.message.contains(needle)),
                "no error contains '{}', errors were: {:?}",
                needle,
                errs
            ),
        }
    }

    fn global_decl(program: &Program, index: usize) -> &VarDecl {
        match &program.items[index] {
            Stmt::VarDecl(v) => v,
            other => panic!("expected declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_globals_are_laid_out_in_order() {
        let (program, out) = build("int a; float3 b; extern int c = 42;").unwrap();
        assert_eq!(global_decl(&program, 0).storage, Some(Storage::Global(0)));
        assert_eq!(global_decl(&program, 1).storage, Some(Storage::Global(4)));
        assert_eq!(global_decl(&program, 2).storage, Some(Storage::Global(16)));
        assert_eq!(out.global_frame_size, 20);
        assert_eq!(out.globals[2].init, Some(42i32.to_le_bytes().to_vec()));
    }

    #[test]
    fn test_arguments_come_first_in_frame() {
        let (program, _) = build("int F(int a, float3 b) { int c = a; return c; }").unwrap();
        let Stmt::Fun(f) = &program.items[0] else {
            panic!("expected function");
        };
        let info = f.info.as_ref().unwrap();
        assert_eq!(info.frame_size, 20);
        assert_eq!(info.desc.arg_size(), 16);
        let Some(body) = &f.body else { panic!("no body") };
        let Stmt::VarDecl(c) = &body[0] else {
            panic!("expected local");
        };
        assert_eq!(c.storage, Some(Storage::Local(16)));
    }

    #[test]
    fn test_int_is_promoted_in_float_context() {
        let (program, _) = build("float f = 1 + 2.5;").unwrap();
        let init = global_decl(&program, 0).init.as_ref().unwrap();
        let ExpKind::Binary { lhs, .. } = &init.kind else {
            panic!("expected binary");
        };
        assert!(matches!(
            lhs.kind,
            ExpKind::Cast {
                kind: CastKind::IntToFloat,
                ..
            }
        ));
        assert_eq!(init.ty.as_ref().map(|t| t.name.as_str()), Some("float"));
    }

    #[test]
    fn test_scalar_splats_to_vector() {
        let (program, _) = build("float3 v = float3(1, 2, 3) * 2;").unwrap();
        let init = global_decl(&program, 0).init.as_ref().unwrap();
        let ExpKind::Binary { rhs, .. } = &init.kind else {
            panic!("expected binary");
        };
        assert!(matches!(
            rhs.kind,
            ExpKind::Cast {
                kind: CastKind::Splat(3),
                ..
            }
        ));
    }

    #[test]
    fn test_comparison_and_logic_yield_int() {
        let (program, _) = build("int t = 1.5 < 2.0 && 3 == 3;").unwrap();
        let init = global_decl(&program, 0).init.as_ref().unwrap();
        assert_eq!(init.ty.as_ref().map(|t| t.name.as_str()), Some("int"));
    }

    #[test]
    fn test_logic_rejects_floats() {
        assert_compile_error("int t = 1.0 && 2;", "requires int operands");
    }

    #[test]
    fn test_modulo_rejects_floats() {
        assert_compile_error("float f = 1.5 % 2.0;", "not defined for float");
    }

    #[test]
    fn test_swizzle_rules() {
        let (program, _) = build("float4 v; float2 a = v.zx;").unwrap();
        let init = global_decl(&program, 1).init.as_ref().unwrap();
        assert!(matches!(
            &init.kind,
            ExpKind::Member { access: Some(MemberAccess::Swizzle { lanes }), .. } if lanes == &vec![2, 0]
        ));
        assert_compile_error("float2 v; float f = v.z;", "invalid swizzle");
        assert_compile_error("float4 v; float f = v.xy.x;", "nested swizzles");
        assert_compile_error("float4 v; v.xx = float2(1, 2);", "must not repeat a lane");
    }

    #[test]
    fn test_struct_member_offsets() {
        let (program, _) = build("struct P { int id; float3 pos; }; P p; float y = p.pos.y;").unwrap();
        let init = global_decl(&program, 2).init.as_ref().unwrap();
        let ExpKind::Member { base, .. } = &init.kind else {
            panic!("expected swizzle");
        };
        assert!(matches!(
            base.kind,
            ExpKind::Member {
                access: Some(MemberAccess::Field { offset: 4 }),
                ..
            }
        ));
    }

    #[test]
    fn test_struct_constructors_resolve() {
        assert!(build("struct P { int id; float w; }; P a = P(); P b = P(1, 2);").is_ok());
        assert_compile_error("struct P { int id; }; P a = P(1, 2);", "no overload of 'P'");
    }

    #[test]
    fn test_enums() {
        assert!(build("enum Color { Red, Green = 4, Blue }; Color c = Blue; int b = c == Red; int n = int(c);").is_ok());
        assert_compile_error("enum Color { Red }; int x = Red + 1;", "enums only support");
        assert_compile_error("enum A { X }; enum B { X };", "already defined");
    }

    #[test]
    fn test_explicit_casts() {
        let (program, _) = build("enum E { A, B }; int i = int(2.7); E e = E(1);").unwrap();
        let init = global_decl(&program, 1).init.as_ref().unwrap();
        assert!(matches!(
            init.kind,
            ExpKind::Cast {
                kind: CastKind::FloatToInt,
                ..
            }
        ));
        assert_compile_error("int i = int(\"x\");", "cannot cast string to int");
    }

    #[test]
    fn test_overload_resolution() {
        // exact beats promotion
        let (program, _) = build("int f(int a) { return 1; } int f(float a) { return 2; } int r = f(3);").unwrap();
        let init = global_decl(&program, 2).init.as_ref().unwrap();
        let ExpKind::Call { target, .. } = &init.kind else {
            panic!("expected call");
        };
        assert_eq!(target.as_ref().map(|t| t.signature()), Some("f(int)".to_string()));

        assert_compile_error(
            "int g(float a, int b) { return 1; } int g(int a, float b) { return 2; } int r = g(1, 1);",
            "ambiguous call",
        );
        assert_compile_error("int r = nothing(1);", "unknown function");
    }

    #[test]
    fn test_statement_rules() {
        assert_compile_error("int a; a + 1;", "must be an assignment or a call");
        assert_compile_error("int a; int b = (a = 2);", "only allowed as a statement");
        assert_compile_error("return 1;", "return outside of a function");
        assert_compile_error("if (1.0) { }", "condition must be int");
        assert_compile_error("void F() { return 1; }", "cannot return a value");
        assert_compile_error("int F() { return; }", "missing return value");
        assert_compile_error("int F() { return \"s\"; }", "cannot return string");
    }

    #[test]
    fn test_declaration_rules() {
        assert_compile_error("int F(int a);", "missing function body");
        assert_compile_error("int F(int a, int a) { return a; }", "duplicate argument");
        assert_compile_error("int F() { return 1; } int F() { return 2; }", "already defined");
        assert_compile_error("void F() { int G() { return 1; } }", "global scope");
        assert_compile_error("void F() { extern int x; }", "global scope");
        assert_compile_error("int a; int a;", "already declared");
        assert_compile_error("extern int x = 1 + 2;", "must be a constant");
        assert_compile_error("double d;", "unknown type 'double'");
        assert_compile_error("int x = y;", "unknown identifier 'y'");
    }

    #[test]
    fn test_extern_constant_promotion() {
        let (_, out) = build("extern float3 origin = 1;").unwrap();
        let init = out.globals[0].init.clone().unwrap();
        assert_eq!(init.len(), 12);
        assert_eq!(&init[8..12], &1.0f32.to_le_bytes());
    }

    #[test]
    fn test_arrays_need_int_index_and_variable() {
        assert!(build("int a[4]; a[2] = 3; int b = a[1];").is_ok());
        assert_compile_error("int a[4]; int b = a[1.0];", "index must be int");
        assert_compile_error("int x; int b = x[0];", "cannot index");
    }

    #[test]
    fn test_recursion_is_visible_inside_body() {
        assert!(build("int Fact(int n) { if (n < 2) { return 1; } return n * Fact(n - 1); }").is_ok());
    }

    #[test]
    fn test_errors_accumulate() {
        let errs = build("int a = x; float b = y; int c = 1.5 % 2;").unwrap_err();
        assert_eq!(errs.len(), 3, "errors were: {:?}", errs);
        assert_eq!(errs[0].token, "x");
    }
}
