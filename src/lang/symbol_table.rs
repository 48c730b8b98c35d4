//! Types and function descriptions visible to a compilation.
//!
//! A table owns the symbols registered into it and links other tables as
//! read-only fallbacks. Every script links the runtime library table plus the
//! tables of the libraries it includes; libraries themselves link the runtime
//! table. Lookups walk the own table first, then the linked ones in
//! registration order.

use std::sync::Arc;

use thiserror::Error;

use crate::lang::types::{AluEngine, ClassInfo, Enumerant, TypeDesc, TypeKind, array_name};
use crate::runtime::fun_callback::FunCallback;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SymbolError {
    #[error("type '{0}' is already defined")]
    DuplicateType(String),

    #[error("function '{0}' is already defined")]
    DuplicateFunction(String),

    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("array of '{0}' must have a positive size")]
    EmptyArray(String),
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Arc<TypeDesc>,
}

impl Param {
    pub fn new(name: &str, ty: Arc<TypeDesc>) -> Self {
        Param {
            name: name.to_string(),
            ty,
        }
    }
}

/// How a call is carried out.
#[derive(Clone)]
pub enum FunImpl {
    /// Script function, indexed into the function table of its assembly.
    Script(usize),
    /// Host callback.
    Native(FunCallback),
    /// Struct constructor returning a zeroed value.
    ZeroCtor,
    /// Struct constructor taking one argument per member.
    MemberCtor,
}

#[derive(Clone)]
pub struct FunDesc {
    pub name: String,
    pub ret: Arc<TypeDesc>,
    pub params: Vec<Param>,
    pub imp: FunImpl,
}

impl std::fmt::Debug for FunDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let imp = match &self.imp {
            FunImpl::Script(index) => format!("script#{}", index),
            FunImpl::Native(_) => "native".to_string(),
            FunImpl::ZeroCtor => "zero-ctor".to_string(),
            FunImpl::MemberCtor => "member-ctor".to_string(),
        };
        f.debug_struct("FunDesc")
            .field("signature", &self.signature())
            .field("ret", &self.ret.name)
            .field("imp", &imp)
            .finish()
    }
}

impl FunDesc {
    pub fn native(name: &str, ret: Arc<TypeDesc>, params: Vec<Param>, callback: FunCallback) -> Self {
        FunDesc {
            name: name.to_string(),
            ret,
            params,
            imp: FunImpl::Native(callback),
        }
    }

    /// `name(type, type)`, the key of overload identity.
    pub fn signature(&self) -> String {
        let params: Vec<&str> = self.params.iter().map(|p| p.ty.name.as_str()).collect();
        format!("{}({})", self.name, params.join(", "))
    }

    pub fn matches(&self, name: &str, params: &[&str]) -> bool {
        self.name == name
            && self.params.len() == params.len()
            && self.params.iter().zip(params).all(|(p, t)| p.ty.name == *t)
    }

    pub fn same_signature(&self, other: &FunDesc) -> bool {
        let params: Vec<&str> = other.params.iter().map(|p| p.ty.name.as_str()).collect();
        self.matches(&other.name, &params)
    }

    /// Bytes of packed arguments.
    pub fn arg_size(&self) -> usize {
        self.params.iter().map(|p| p.ty.byte_size).sum()
    }

    pub fn is_native(&self) -> bool {
        matches!(self.imp, FunImpl::Native(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    name: String,
    types: Vec<Arc<TypeDesc>>,
    functions: Vec<Arc<FunDesc>>,
    children: Vec<Arc<SymbolTable>>,
}

impl SymbolTable {
    pub fn new(name: &str) -> Self {
        SymbolTable {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Symbols registered directly into this table.
    pub fn types(&self) -> &[Arc<TypeDesc>] {
        &self.types
    }

    pub fn functions(&self) -> &[Arc<FunDesc>] {
        &self.functions
    }

    pub fn children(&self) -> &[Arc<SymbolTable>] {
        &self.children
    }

    pub fn register_child(&mut self, table: Arc<SymbolTable>) {
        if !self.children.iter().any(|c| Arc::ptr_eq(c, &table)) {
            self.children.push(table);
        }
    }

    /// Own table first, then every linked table once, depth first.
    fn visible_tables(&self) -> Vec<&SymbolTable> {
        let mut out: Vec<&SymbolTable> = vec![self];
        let mut i = 0;
        while i < out.len() {
            let table = out[i];
            for child in &table.children {
                let child: &SymbolTable = child;
                if !out.iter().any(|t| std::ptr::eq(*t, child)) {
                    out.push(child);
                }
            }
            i += 1;
        }
        out
    }

    // =========================================================================
    // Types
    // =========================================================================

    pub fn create_type(&mut self, desc: TypeDesc) -> Result<Arc<TypeDesc>, SymbolError> {
        if self.get_type_by_name(&desc.name).is_some() {
            return Err(SymbolError::DuplicateType(desc.name));
        }
        let desc = Arc::new(desc);
        self.types.push(desc.clone());
        Ok(desc)
    }

    pub fn create_scalar_type(&mut self, name: &str, alu: AluEngine) -> Result<Arc<TypeDesc>, SymbolError> {
        self.create_type(TypeDesc::scalar(name, alu))
    }

    pub fn create_vector_type(
        &mut self,
        name: &str,
        element: &str,
        width: usize,
    ) -> Result<Arc<TypeDesc>, SymbolError> {
        let element = self
            .get_type_by_name(element)
            .ok_or_else(|| SymbolError::UnknownType(element.to_string()))?;
        self.create_type(TypeDesc::vector(name, element, width))
    }

    /// Registers the struct plus its zero and memberwise constructors.
    pub fn create_struct_type(
        &mut self,
        name: &str,
        members: Vec<(String, Arc<TypeDesc>)>,
    ) -> Result<Arc<TypeDesc>, SymbolError> {
        let params: Vec<Param> = members
            .iter()
            .map(|(member, ty)| Param::new(member, ty.clone()))
            .collect();
        let ty = self.create_type(TypeDesc::structure(name, members))?;

        self.create_function_description(FunDesc {
            name: name.to_string(),
            ret: ty.clone(),
            params: Vec::new(),
            imp: FunImpl::ZeroCtor,
        })?;
        if !params.is_empty() {
            self.create_function_description(FunDesc {
                name: name.to_string(),
                ret: ty.clone(),
                params,
                imp: FunImpl::MemberCtor,
            })?;
        }
        Ok(ty)
    }

    pub fn create_enum_type(
        &mut self,
        name: &str,
        enumerants: Vec<Enumerant>,
    ) -> Result<Arc<TypeDesc>, SymbolError> {
        self.create_type(TypeDesc::enumeration(name, enumerants))
    }

    pub fn create_class_type(&mut self, name: &str, info: ClassInfo) -> Result<Arc<TypeDesc>, SymbolError> {
        self.create_type(TypeDesc::class(name, info))
    }

    /// Named lookup. Array types are not reachable by name.
    pub fn get_type_by_name(&self, name: &str) -> Option<Arc<TypeDesc>> {
        self.visible_tables().into_iter().find_map(|table| {
            table
                .types
                .iter()
                .find(|t| t.kind != TypeKind::Array && t.name == name)
                .cloned()
        })
    }

    fn find_array_type(&self, name: &str) -> Option<Arc<TypeDesc>> {
        self.visible_tables().into_iter().find_map(|table| {
            table
                .types
                .iter()
                .find(|t| t.kind == TypeKind::Array && t.name == name)
                .cloned()
        })
    }

    pub fn get_or_create_array_type(
        &mut self,
        element: &Arc<TypeDesc>,
        count: usize,
    ) -> Result<Arc<TypeDesc>, SymbolError> {
        if count == 0 {
            return Err(SymbolError::EmptyArray(element.name.clone()));
        }
        if let Some(existing) = self.find_array_type(&array_name(&element.name, count)) {
            return Ok(existing);
        }
        let desc = Arc::new(TypeDesc::array(element.clone(), count));
        self.types.push(desc.clone());
        Ok(desc)
    }

    /// Resolves `base[d0][d1]...`: `d0` is the outermost dimension.
    pub fn resolve_type(&mut self, base: &str, dims: &[usize]) -> Result<Arc<TypeDesc>, SymbolError> {
        let mut ty = self
            .get_type_by_name(base)
            .ok_or_else(|| SymbolError::UnknownType(base.to_string()))?;
        for &count in dims.iter().rev() {
            ty = self.get_or_create_array_type(&ty, count)?;
        }
        Ok(ty)
    }

    /// Looks a type up by its printed name, array names included. Array
    /// types that were never registered are built on the fly.
    pub fn type_from_name(&self, name: &str) -> Option<Arc<TypeDesc>> {
        let Some(at) = name.find('[') else {
            return self.get_type_by_name(name);
        };
        if let Some(existing) = self.find_array_type(name) {
            return Some(existing);
        }
        let mut dims = Vec::new();
        for dim in name[at..].split(']').filter(|d| !d.is_empty()) {
            dims.push(dim.strip_prefix('[')?.parse::<usize>().ok()?);
        }
        let mut ty = self.get_type_by_name(&name[..at])?;
        for &count in dims.iter().rev() {
            ty = Arc::new(TypeDesc::array(ty, count));
        }
        Some(ty)
    }

    /// Finds the enum that declares `enumerant`, with its value.
    pub fn find_enum_by_name(&self, enumerant: &str) -> Option<(Arc<TypeDesc>, i32)> {
        self.visible_tables().into_iter().find_map(|table| {
            table.types.iter().find_map(|t| {
                t.enumerants
                    .iter()
                    .find(|e| e.name == enumerant)
                    .map(|e| (t.clone(), e.value))
            })
        })
    }

    // =========================================================================
    // Functions
    // =========================================================================

    pub fn create_function_description(&mut self, desc: FunDesc) -> Result<Arc<FunDesc>, SymbolError> {
        let clash = self
            .visible_tables()
            .into_iter()
            .flat_map(|t| t.functions.iter())
            .any(|f| f.same_signature(&desc));
        if clash {
            return Err(SymbolError::DuplicateFunction(desc.signature()));
        }
        let desc = Arc::new(desc);
        self.functions.push(desc.clone());
        Ok(desc)
    }

    /// Exact match on name and parameter type names.
    pub fn find_function_description(&self, name: &str, params: &[&str]) -> Option<Arc<FunDesc>> {
        self.visible_tables()
            .into_iter()
            .flat_map(|t| t.functions.iter())
            .find(|f| f.matches(name, params))
            .cloned()
    }

    /// Every visible overload of `name`.
    pub fn functions_named(&self, name: &str) -> Vec<Arc<FunDesc>> {
        self.visible_tables()
            .into_iter()
            .flat_map(|t| t.functions.iter())
            .filter(|f| f.name == name)
            .cloned()
            .collect()
    }

    /// Signatures defined by more than one visible table.
    pub fn duplicate_functions(&self) -> Vec<String> {
        let tables = self.visible_tables();
        let mut dups: Vec<String> = Vec::new();
        for (i, a) in tables.iter().enumerate() {
            for b in &tables[i + 1..] {
                for fa in &a.functions {
                    if b.functions.iter().any(|fb| fa.same_signature(fb)) {
                        let sig = fa.signature();
                        if !dups.contains(&sig) {
                            dups.push(sig);
                        }
                    }
                }
            }
        }
        dups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_table() -> SymbolTable {
        let mut table = SymbolTable::new("runtime");
        table.create_scalar_type("int", AluEngine::Int).unwrap();
        table.create_scalar_type("float", AluEngine::Float).unwrap();
        table.create_type(TypeDesc::void()).unwrap();
        table
    }

    fn native(table: &SymbolTable, name: &str, params: &[&str]) -> FunDesc {
        let int = table.get_type_by_name("int").unwrap();
        let params = params
            .iter()
            .enumerate()
            .map(|(i, t)| Param::new(&format!("a{}", i), table.get_type_by_name(t).unwrap()))
            .collect();
        FunDesc::native(name, int, params, Arc::new(|_| Ok(())))
    }

    #[test]
    fn test_type_lookup_round_trips_by_name() {
        let table = base_table();
        let int = table.get_type_by_name("int").unwrap();
        assert_eq!(int.name, "int");
        assert!(Arc::ptr_eq(&int, &table.get_type_by_name("int").unwrap()));
        assert!(table.get_type_by_name("double").is_none());
    }

    #[test]
    fn test_duplicate_type_is_rejected() {
        let mut table = base_table();
        assert_eq!(
            table.create_scalar_type("int", AluEngine::Int),
            Err(SymbolError::DuplicateType("int".to_string()))
        );
    }

    #[test]
    fn test_child_types_visible_but_not_redefinable() {
        let base = Arc::new(base_table());
        let mut lib = SymbolTable::new("lib");
        lib.register_child(base);
        assert!(lib.get_type_by_name("float").is_some());
        assert!(lib.create_scalar_type("float", AluEngine::Float).is_err());
    }

    #[test]
    fn test_array_types_are_shared_and_hidden_by_name() {
        let mut table = base_table();
        let a = table.resolve_type("float", &[2, 3]).unwrap();
        let b = table.resolve_type("float", &[2, 3]).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name, "float[2][3]");
        assert_eq!(a.count, 2);
        assert_eq!(a.byte_size, 24);
        assert!(table.get_type_by_name("float[2][3]").is_none());
        assert!(table.resolve_type("float", &[0]).is_err());
    }

    #[test]
    fn test_type_from_name_builds_arrays() {
        let mut table = SymbolTable::new("t");
        table.create_scalar_type("float", AluEngine::Float).unwrap();
        let registered = table.resolve_type("float", &[4]).unwrap();
        assert!(Arc::ptr_eq(&table.type_from_name("float[4]").unwrap(), &registered));

        let nested = table.type_from_name("float[2][3]").unwrap();
        assert_eq!(nested.name, "float[2][3]");
        assert_eq!(nested.byte_size, 24);
        assert_eq!(nested.child.as_ref().map(|c| c.name.as_str()), Some("float[3]"));
        assert!(table.type_from_name("float[x]").is_none());
        assert!(table.type_from_name("double[2]").is_none());
    }

    #[test]
    fn test_struct_registers_constructors() {
        let mut table = base_table();
        let int = table.get_type_by_name("int").unwrap();
        let float = table.get_type_by_name("float").unwrap();
        table
            .create_struct_type("Pair", vec![("a".into(), int), ("b".into(), float)])
            .unwrap();
        let ctors = table.functions_named("Pair");
        assert_eq!(ctors.len(), 2);
        assert!(table.find_function_description("Pair", &[]).is_some());
        assert!(table.find_function_description("Pair", &["int", "float"]).is_some());
    }

    #[test]
    fn test_find_enum_by_enumerant() {
        let mut table = base_table();
        table
            .create_enum_type(
                "Color",
                vec![
                    Enumerant { name: "Red".into(), value: 0 },
                    Enumerant { name: "Blue".into(), value: 7 },
                ],
            )
            .unwrap();
        let (ty, value) = table.find_enum_by_name("Blue").unwrap();
        assert_eq!(ty.name, "Color");
        assert_eq!(value, 7);
        assert!(table.find_enum_by_name("Green").is_none());
    }

    #[test]
    fn test_duplicate_signature_rejected_overload_allowed() {
        let mut table = base_table();
        let f = native(&table, "f", &["int"]);
        table.create_function_description(f).unwrap();
        let again = native(&table, "f", &["int"]);
        assert!(matches!(
            table.create_function_description(again),
            Err(SymbolError::DuplicateFunction(_))
        ));
        let overload = native(&table, "f", &["float"]);
        assert!(table.create_function_description(overload).is_ok());
        assert_eq!(table.functions_named("f").len(), 2);
    }

    #[test]
    fn test_duplicates_across_linked_tables() {
        let base = Arc::new(base_table());

        let mut a = SymbolTable::new("a");
        a.register_child(base.clone());
        let fa = native(&a, "Hit", &["int"]);
        a.create_function_description(fa).unwrap();

        let mut b = SymbolTable::new("b");
        b.register_child(base.clone());
        let fb = native(&b, "Hit", &["int"]);
        b.create_function_description(fb).unwrap();

        let mut script = SymbolTable::new("script");
        script.register_child(base);
        script.register_child(Arc::new(a));
        script.register_child(Arc::new(b));
        assert_eq!(script.duplicate_functions(), vec!["Hit(int)".to_string()]);
    }
}
