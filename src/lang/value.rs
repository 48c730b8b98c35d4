use thiserror::Error;

use crate::lang::types::{AluEngine, TypeDesc, TypeKind, WORD_SIZE};

/// Host-side view of a BlockScript value.
///
/// Script memory is untyped words; a `Value` pairs those bytes with the type
/// they were declared as, for argument packing and for printing results.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `int` or an enum.
    Int(i32),

    Float(f32),

    /// `float2`, `float3` or `float4`.
    Vector(Vec<f32>),

    /// Heap handle: `string` or a host class.
    Handle(i32),

    /// Structs and arrays, kept as their packed bytes.
    Bytes(Vec<u8>),

    Void,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    #[error("cannot parse '{text}' as {type_name}")]
    Parse { text: String, type_name: String },

    #[error("{type_name} expects {expected} bytes, got {got}")]
    Size {
        type_name: String,
        expected: usize,
        got: usize,
    },
}

fn word(bytes: &[u8], index: usize) -> [u8; 4] {
    let mut w = [0u8; 4];
    let start = index * WORD_SIZE;
    if let Some(src) = bytes.get(start..start + WORD_SIZE) {
        w.copy_from_slice(src);
    }
    w
}

impl Value {
    /// Parses command-line text: `3`, `1.5`, `1,2,3` for vectors.
    pub fn parse(text: &str, ty: &TypeDesc) -> Result<Value, ValueError> {
        let fail = || ValueError::Parse {
            text: text.to_string(),
            type_name: ty.name.clone(),
        };
        let text = text.trim();
        match (ty.kind, ty.alu) {
            (TypeKind::Scalar | TypeKind::Enum, AluEngine::Int) => {
                text.parse().map(Value::Int).map_err(|_| fail())
            }
            (TypeKind::Scalar, AluEngine::Float) => {
                text.parse().map(Value::Float).map_err(|_| fail())
            }
            (TypeKind::Vector, _) => {
                let lanes: Result<Vec<f32>, _> = text.split(',').map(|s| s.trim().parse()).collect();
                match lanes {
                    Ok(lanes) if lanes.len() == ty.count => Ok(Value::Vector(lanes)),
                    _ => Err(fail()),
                }
            }
            (TypeKind::Class, _) => text.parse().map(Value::Handle).map_err(|_| fail()),
            _ => Err(fail()),
        }
    }

    /// Appends the packed little-endian bytes.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Value::Int(n) | Value::Handle(n) => out.extend_from_slice(&n.to_le_bytes()),
            Value::Float(f) => out.extend_from_slice(&f.to_le_bytes()),
            Value::Vector(lanes) => {
                for lane in lanes {
                    out.extend_from_slice(&lane.to_le_bytes());
                }
            }
            Value::Bytes(bytes) => out.extend_from_slice(bytes),
            Value::Void => {}
        }
    }

    pub fn decode(bytes: &[u8], ty: &TypeDesc) -> Result<Value, ValueError> {
        if bytes.len() != ty.byte_size {
            return Err(ValueError::Size {
                type_name: ty.name.clone(),
                expected: ty.byte_size,
                got: bytes.len(),
            });
        }
        Ok(match (ty.kind, ty.alu) {
            (TypeKind::Void, _) => Value::Void,
            (TypeKind::Scalar | TypeKind::Enum, AluEngine::Int) => {
                Value::Int(i32::from_le_bytes(word(bytes, 0)))
            }
            (TypeKind::Scalar, AluEngine::Float) => {
                Value::Float(f32::from_le_bytes(word(bytes, 0)))
            }
            (TypeKind::Vector, _) => Value::Vector(
                (0..ty.count)
                    .map(|i| f32::from_le_bytes(word(bytes, i)))
                    .collect(),
            ),
            (TypeKind::Class, _) => Value::Handle(i32::from_le_bytes(word(bytes, 0))),
            _ => Value::Bytes(bytes.to_vec()),
        })
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::Vector(lanes) => {
                let parts: Vec<String> = lanes.iter().map(|l| l.to_string()).collect();
                write!(f, "({})", parts.join(", "))
            }
            Value::Handle(h) => write!(f, "<handle {}>", h),
            Value::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::Void => write!(f, "void"),
        }
    }
}
