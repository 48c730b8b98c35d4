//! Host-side registration of types and native functions.
//!
//! A [`BlockLib`] is a named symbol table that scripts can include. The host
//! fills it through descriptor structs; parameter and member lists keep
//! their declaration order, which is also their memory order.

use std::sync::Arc;

use tracing::debug;

use crate::lang::symbol_table::{SymbolError, SymbolTable};
use crate::lang::types::{ClassInfo, Enumerant, PropertyDesc, TypeDesc};
use crate::runtime::fun_callback::{
    CallbackError, FunCallback, FunCallbackContext, PropertyCallback, PropertyCallbackContext,
};
use crate::runtime::intrinsics::register_native;

/// A native function: name, return type and `(type, name)` parameters.
#[derive(Clone)]
pub struct IntrinsicFunction {
    pub name: String,
    pub ret: String,
    pub params: Vec<(String, String)>,
    pub callback: FunCallback,
}

impl std::fmt::Debug for IntrinsicFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntrinsicFunction")
            .field("name", &self.name)
            .field("ret", &self.ret)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl IntrinsicFunction {
    pub fn new<F>(name: &str, ret: &str, callback: F) -> Self
    where
        F: Fn(&mut FunCallbackContext<'_>) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        IntrinsicFunction {
            name: name.to_string(),
            ret: ret.to_string(),
            params: Vec::new(),
            callback: Arc::new(callback),
        }
    }

    pub fn param(mut self, ty: &str, name: &str) -> Self {
        self.params.push((ty.to_string(), name.to_string()));
        self
    }
}

/// Member types may be arrays: `StructTypeDesc::new("M").member("float[4]", "m")`.
#[derive(Debug, Clone)]
pub struct StructTypeDesc {
    pub name: String,
    pub members: Vec<(String, String)>,
}

impl StructTypeDesc {
    pub fn new(name: &str) -> Self {
        StructTypeDesc {
            name: name.to_string(),
            members: Vec::new(),
        }
    }

    pub fn member(mut self, ty: &str, name: &str) -> Self {
        self.members.push((ty.to_string(), name.to_string()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct EnumTypeDesc {
    pub name: String,
    pub enumerants: Vec<Enumerant>,
}

impl EnumTypeDesc {
    pub fn new(name: &str) -> Self {
        EnumTypeDesc {
            name: name.to_string(),
            enumerants: Vec::new(),
        }
    }

    /// Next value after the previous enumerant, 0 for the first.
    pub fn enumerant(self, name: &str) -> Self {
        let value = self.enumerants.last().map_or(0, |e| e.value + 1);
        self.value(name, value)
    }

    pub fn value(mut self, name: &str, value: i32) -> Self {
        self.enumerants.push(Enumerant {
            name: name.to_string(),
            value,
        });
        self
    }
}

/// A host class: an opaque handle type with properties served by one
/// accessor callback and methods that receive the object as their first
/// argument.
#[derive(Clone)]
pub struct ClassTypeDesc {
    pub name: String,
    /// `(type, name, id)`; `id` is handed back to the accessor.
    pub properties: Vec<(String, String, u32)>,
    pub methods: Vec<IntrinsicFunction>,
    pub accessor: Option<PropertyCallback>,
}

impl std::fmt::Debug for ClassTypeDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassTypeDesc")
            .field("name", &self.name)
            .field("properties", &self.properties)
            .field("methods", &self.methods)
            .field("accessor", &self.accessor.is_some())
            .finish()
    }
}

impl ClassTypeDesc {
    pub fn new(name: &str) -> Self {
        ClassTypeDesc {
            name: name.to_string(),
            properties: Vec::new(),
            methods: Vec::new(),
            accessor: None,
        }
    }

    pub fn property(mut self, ty: &str, name: &str, id: u32) -> Self {
        self.properties.push((ty.to_string(), name.to_string(), id));
        self
    }

    /// `method`'s parameters exclude the object itself.
    pub fn method(mut self, method: IntrinsicFunction) -> Self {
        self.methods.push(method);
        self
    }

    pub fn accessor<F>(mut self, accessor: F) -> Self
    where
        F: Fn(&mut PropertyCallbackContext<'_>) -> Result<(), CallbackError>
            + Send
            + Sync
            + 'static,
    {
        self.accessor = Some(Arc::new(accessor));
        self
    }
}

/// A named, reusable set of host types and functions.
///
/// Scripts include a snapshot of the library: registering into a library
/// after a script included it does not change what that script sees.
#[derive(Debug, Clone)]
pub struct BlockLib {
    table: Arc<SymbolTable>,
}

impl BlockLib {
    pub(crate) fn new(name: &str, runtime: Arc<SymbolTable>) -> Self {
        let mut table = SymbolTable::new(name);
        table.register_child(runtime);
        BlockLib {
            table: Arc::new(table),
        }
    }

    pub fn name(&self) -> &str {
        self.table.name()
    }

    pub fn table(&self) -> &Arc<SymbolTable> {
        &self.table
    }

    pub fn get_type_by_name(&self, name: &str) -> Option<Arc<TypeDesc>> {
        self.table.get_type_by_name(name)
    }

    fn table_mut(&mut self) -> &mut SymbolTable {
        Arc::make_mut(&mut self.table)
    }

    pub fn create_intrinsic_functions(
        &mut self,
        functions: Vec<IntrinsicFunction>,
    ) -> Result<(), SymbolError> {
        let table = self.table_mut();
        for f in functions {
            let params: Vec<(&str, &str)> = f
                .params
                .iter()
                .map(|(ty, name)| (ty.as_str(), name.as_str()))
                .collect();
            let desc = register_native(table, &f.name, &f.ret, &params, f.callback.clone())?;
            debug!(lib = %table.name(), function = %desc.signature(), "registered intrinsic");
        }
        Ok(())
    }

    pub fn create_struct_types(&mut self, structs: Vec<StructTypeDesc>) -> Result<(), SymbolError> {
        let table = self.table_mut();
        for s in structs {
            let mut members = Vec::with_capacity(s.members.len());
            for (ty, name) in &s.members {
                let ty = resolve_type_name(table, ty)?;
                members.push((name.clone(), ty));
            }
            table.create_struct_type(&s.name, members)?;
            debug!(lib = %table.name(), name = %s.name, "registered struct");
        }
        Ok(())
    }

    pub fn create_enum_types(&mut self, enums: Vec<EnumTypeDesc>) -> Result<(), SymbolError> {
        let table = self.table_mut();
        for e in enums {
            table.create_enum_type(&e.name, e.enumerants)?;
        }
        Ok(())
    }

    pub fn create_class_types(&mut self, classes: Vec<ClassTypeDesc>) -> Result<(), SymbolError> {
        let table = self.table_mut();
        for class in classes {
            let mut properties = Vec::with_capacity(class.properties.len());
            for (ty, name, id) in &class.properties {
                properties.push(PropertyDesc {
                    name: name.clone(),
                    ty: resolve_type_name(table, ty)?,
                    id: *id,
                });
            }
            let info = ClassInfo {
                methods: class.methods.iter().map(|m| m.name.clone()).collect(),
                properties,
                accessor: class.accessor.clone(),
            };
            table.create_class_type(&class.name, info)?;

            for method in &class.methods {
                let mut params: Vec<(&str, &str)> = vec![(class.name.as_str(), "this")];
                params.extend(
                    method
                        .params
                        .iter()
                        .map(|(ty, name)| (ty.as_str(), name.as_str())),
                );
                register_native(table, &method.name, &method.ret, &params, method.callback.clone())?;
            }
            debug!(lib = %table.name(), class = %class.name, "registered class");
        }
        Ok(())
    }
}

/// `base[d0][d1]...`, registering the array types it needs.
fn resolve_type_name(table: &mut SymbolTable, name: &str) -> Result<Arc<TypeDesc>, SymbolError> {
    let Some(at) = name.find('[') else {
        return table.resolve_type(name, &[]);
    };
    let mut dims = Vec::new();
    for dim in name[at..].split(']').filter(|d| !d.is_empty()) {
        let count = dim
            .strip_prefix('[')
            .and_then(|d| d.parse::<usize>().ok())
            .ok_or_else(|| SymbolError::UnknownType(name.to_string()))?;
        dims.push(count);
    }
    table.resolve_type(&name[..at], &dims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::types::TypeKind;
    use crate::runtime::intrinsics::{HostEnvironment, create_runtime_table};

    fn lib(name: &str) -> BlockLib {
        let runtime = Arc::new(create_runtime_table(&HostEnvironment::default()).unwrap());
        BlockLib::new(name, runtime)
    }

    fn noop() -> IntrinsicFunction {
        IntrinsicFunction::new("Noop", "void", |_| Ok(()))
    }

    #[test]
    fn test_registered_types_round_trip_by_name() {
        let mut l = lib("scene");
        l.create_struct_types(vec![
            StructTypeDesc::new("Light")
                .member("float3", "color")
                .member("float[4]", "falloff"),
        ])
        .unwrap();
        l.create_enum_types(vec![
            EnumTypeDesc::new("Blend")
                .enumerant("Opaque")
                .value("Additive", 4)
                .enumerant("Multiply"),
        ])
        .unwrap();
        l.create_class_types(vec![ClassTypeDesc::new("Mesh").property("int", "vertices", 1)])
            .unwrap();

        let light = l.get_type_by_name("Light").unwrap();
        assert_eq!(light.kind, TypeKind::Struct);
        assert_eq!(light.byte_size, 28);
        let blend = l.get_type_by_name("Blend").unwrap();
        let values: Vec<i32> = blend.enumerants.iter().map(|e| e.value).collect();
        assert_eq!(values, vec![0, 4, 5]);
        assert_eq!(l.get_type_by_name("Mesh").map(|t| t.kind), Some(TypeKind::Class));

        assert!(l.get_type_by_name("light").is_none());
        assert!(l.get_type_by_name("Mesh ").is_none());
        assert!(l.get_type_by_name("Blend.Opaque").is_none());
    }

    #[test]
    fn test_parameter_order_is_kept() {
        let mut l = lib("math");
        l.create_intrinsic_functions(vec![
            IntrinsicFunction::new("Mix", "float", |_| Ok(()))
                .param("float3", "a")
                .param("int", "mode")
                .param("float", "t"),
        ])
        .unwrap();
        let desc = l
            .table()
            .find_function_description("Mix", &["float3", "int", "float"])
            .unwrap();
        let names: Vec<&str> = desc.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "mode", "t"]);
        assert_eq!(desc.arg_size(), 20);
    }

    #[test]
    fn test_methods_take_the_object_first() {
        let mut l = lib("scene");
        l.create_class_types(vec![
            ClassTypeDesc::new("Camera").method(
                IntrinsicFunction::new("LookAt", "void", |_| Ok(())).param("float3", "target"),
            ),
        ])
        .unwrap();
        assert!(
            l.table()
                .find_function_description("LookAt", &["Camera", "float3"])
                .is_some()
        );
        let camera = l.get_type_by_name("Camera").unwrap();
        assert_eq!(camera.class.as_ref().unwrap().methods, vec!["LookAt".to_string()]);
    }

    #[test]
    fn test_duplicates_and_unknown_types() {
        let mut l = lib("dup");
        l.create_intrinsic_functions(vec![noop()]).unwrap();
        assert_eq!(
            l.create_intrinsic_functions(vec![noop()]),
            Err(SymbolError::DuplicateFunction("Noop()".to_string()))
        );
        assert_eq!(
            l.create_intrinsic_functions(vec![
                IntrinsicFunction::new("echo", "int", |_| Ok(())).param("int", "v")
            ]),
            Err(SymbolError::DuplicateFunction("echo(int)".to_string()))
        );
        assert_eq!(
            l.create_struct_types(vec![StructTypeDesc::new("S").member("double", "d")]),
            Err(SymbolError::UnknownType("double".to_string()))
        );
        assert_eq!(
            l.create_struct_types(vec![StructTypeDesc::new("T").member("int[x]", "d")]),
            Err(SymbolError::UnknownType("int[x]".to_string()))
        );
    }

    #[test]
    fn test_included_snapshot_is_not_changed() {
        let mut l = lib("snap");
        let snapshot = l.table().clone();
        l.create_intrinsic_functions(vec![noop()]).unwrap();
        assert!(snapshot.find_function_description("Noop", &[]).is_none());
        assert!(l.table().find_function_description("Noop", &[]).is_some());
    }
}
