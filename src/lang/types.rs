use std::sync::Arc;

use crate::runtime::fun_callback::PropertyCallback;

/// Every BlockScript value occupies a whole number of these.
pub const WORD_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Void,
    Scalar,
    Vector,
    Array,
    Struct,
    Enum,
    /// Host object reference (4-byte handle). `string` is one of these.
    Class,
}

/// Which arithmetic unit operates on a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluEngine {
    None,
    Int,
    Float,
    Float2,
    Float3,
    Float4,
}

impl AluEngine {
    pub fn vector(width: usize) -> AluEngine {
        match width {
            2 => AluEngine::Float2,
            3 => AluEngine::Float3,
            4 => AluEngine::Float4,
            _ => AluEngine::Float,
        }
    }

    /// Lane count of a float vector engine, 1 for scalars.
    pub fn width(self) -> usize {
        match self {
            AluEngine::Float2 => 2,
            AluEngine::Float3 => 3,
            AluEngine::Float4 => 4,
            _ => 1,
        }
    }

    pub fn is_float_family(self) -> bool {
        matches!(
            self,
            AluEngine::Float | AluEngine::Float2 | AluEngine::Float3 | AluEngine::Float4
        )
    }
}

#[derive(Debug, Clone)]
pub struct StructMember {
    pub name: String,
    pub ty: Arc<TypeDesc>,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enumerant {
    pub name: String,
    pub value: i32,
}

#[derive(Debug, Clone)]
pub struct PropertyDesc {
    pub name: String,
    pub ty: Arc<TypeDesc>,
    /// Host-chosen id handed back to the accessor.
    pub id: u32,
}

#[derive(Clone, Default)]
pub struct ClassInfo {
    pub methods: Vec<String>,
    pub properties: Vec<PropertyDesc>,
    pub accessor: Option<PropertyCallback>,
}

impl std::fmt::Debug for ClassInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassInfo")
            .field("methods", &self.methods)
            .field("properties", &self.properties)
            .field("accessor", &self.accessor.is_some())
            .finish()
    }
}

/// One type of the language.
///
/// Types are compared by name: names are unique across every symbol table a
/// compilation can see.
#[derive(Debug, Clone)]
pub struct TypeDesc {
    pub name: String,
    pub kind: TypeKind,
    pub alu: AluEngine,
    pub byte_size: usize,
    /// Element type of arrays and vectors.
    pub child: Option<Arc<TypeDesc>>,
    /// Element count of arrays and vectors.
    pub count: usize,
    pub members: Vec<StructMember>,
    pub enumerants: Vec<Enumerant>,
    pub class: Option<ClassInfo>,
}

impl PartialEq for TypeDesc {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl std::fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl TypeDesc {
    fn base(name: &str, kind: TypeKind, alu: AluEngine, byte_size: usize) -> Self {
        TypeDesc {
            name: name.to_string(),
            kind,
            alu,
            byte_size,
            child: None,
            count: 0,
            members: Vec::new(),
            enumerants: Vec::new(),
            class: None,
        }
    }

    pub fn void() -> Self {
        Self::base("void", TypeKind::Void, AluEngine::None, 0)
    }

    pub fn scalar(name: &str, alu: AluEngine) -> Self {
        Self::base(name, TypeKind::Scalar, alu, WORD_SIZE)
    }

    pub fn vector(name: &str, element: Arc<TypeDesc>, width: usize) -> Self {
        let mut desc = Self::base(
            name,
            TypeKind::Vector,
            AluEngine::vector(width),
            element.byte_size * width,
        );
        desc.child = Some(element);
        desc.count = width;
        desc
    }

    /// Arrays are named the way they are declared: an array of two
    /// `float[3]` is `float[2][3]`.
    pub fn array(element: Arc<TypeDesc>, count: usize) -> Self {
        let name = array_name(&element.name, count);
        let mut desc = Self::base(&name, TypeKind::Array, AluEngine::None, element.byte_size * count);
        desc.child = Some(element);
        desc.count = count;
        desc
    }

    /// Members are laid out in declaration order with no padding.
    pub fn structure(name: &str, members: Vec<(String, Arc<TypeDesc>)>) -> Self {
        let mut offset = 0;
        let members: Vec<StructMember> = members
            .into_iter()
            .map(|(name, ty)| {
                let member = StructMember {
                    name,
                    offset,
                    ty: ty.clone(),
                };
                offset += ty.byte_size;
                member
            })
            .collect();
        let mut desc = Self::base(name, TypeKind::Struct, AluEngine::None, offset);
        desc.members = members;
        desc
    }

    pub fn enumeration(name: &str, enumerants: Vec<Enumerant>) -> Self {
        let mut desc = Self::base(name, TypeKind::Enum, AluEngine::Int, WORD_SIZE);
        desc.enumerants = enumerants;
        desc
    }

    pub fn class(name: &str, info: ClassInfo) -> Self {
        let mut desc = Self::base(name, TypeKind::Class, AluEngine::None, WORD_SIZE);
        desc.class = Some(info);
        desc
    }

    pub fn words(&self) -> usize {
        self.byte_size / WORD_SIZE
    }

    pub fn is_void(&self) -> bool {
        self.kind == TypeKind::Void
    }

    pub fn is_int(&self) -> bool {
        self.kind == TypeKind::Scalar && self.alu == AluEngine::Int
    }

    pub fn is_float(&self) -> bool {
        self.kind == TypeKind::Scalar && self.alu == AluEngine::Float
    }

    pub fn is_vector(&self) -> bool {
        self.kind == TypeKind::Vector
    }

    pub fn member(&self, name: &str) -> Option<&StructMember> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn property(&self, name: &str) -> Option<(usize, &PropertyDesc)> {
        self.class
            .as_ref()?
            .properties
            .iter()
            .enumerate()
            .find(|(_, p)| p.name == name)
    }
}

pub fn array_name(element: &str, count: usize) -> String {
    match element.find('[') {
        Some(at) => format!("{}[{}]{}", &element[..at], count, &element[at..]),
        None => format!("{}[{}]", element, count),
    }
}
