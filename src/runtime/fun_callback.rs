//! The native side of the calling convention.
//!
//! Arguments reach a native callback as one tightly packed little-endian
//! byte buffer laid out in parameter order; the callback writes its return
//! value into an output buffer of exactly the return type's size.
//! [`ArgUnpacker`] and [`ArgPacker`] walk those buffers with bounds checks so
//! callbacks never do offset arithmetic by hand.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::state::BsVmState;

/// Native implementation of a script-visible function.
pub type FunCallback =
    Arc<dyn Fn(&mut FunCallbackContext<'_>) -> Result<(), CallbackError> + Send + Sync>;

/// Reads or writes one property of a host object.
pub type PropertyCallback =
    Arc<dyn Fn(&mut PropertyCallbackContext<'_>) -> Result<(), CallbackError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallbackError {
    #[error("buffer overrun: {needed} bytes at offset {offset}, buffer holds {size}")]
    Overrun {
        offset: usize,
        needed: usize,
        size: usize,
    },

    #[error("buffer not fully used: {used} of {size} bytes")]
    SizeMismatch { used: usize, size: usize },

    #[error("invalid heap handle {0}")]
    InvalidHandle(i32),

    #[error("unknown property '{0}'")]
    UnknownProperty(String),

    #[error("{0}")]
    Failed(String),
}

pub struct FunCallbackContext<'a> {
    state: &'a mut BsVmState,
    input: &'a [u8],
    output: &'a mut [u8],
}

impl<'a> FunCallbackContext<'a> {
    pub fn new(state: &'a mut BsVmState, input: &'a [u8], output: &'a mut [u8]) -> Self {
        FunCallbackContext {
            state,
            input,
            output,
        }
    }

    pub fn state(&mut self) -> &mut BsVmState {
        self.state
    }

    pub fn state_ref(&self) -> &BsVmState {
        self.state
    }

    pub fn input(&self) -> &[u8] {
        self.input
    }

    pub fn input_size(&self) -> usize {
        self.input.len()
    }

    pub fn output_size(&self) -> usize {
        self.output.len()
    }

    pub fn output_mut(&mut self) -> &mut [u8] {
        self.output
    }

    /// Reader over the packed arguments.
    pub fn args(&self) -> ArgUnpacker<'a> {
        ArgUnpacker::new(self.input)
    }

    /// Writer over the return buffer.
    pub fn ret(&mut self) -> ArgPacker<'_> {
        ArgPacker::new(self.output)
    }

    /// Resolves a `string` argument handle.
    pub fn heap_str(&self, handle: i32) -> Result<&str, CallbackError> {
        self.state
            .heap_string(handle)
            .ok_or(CallbackError::InvalidHandle(handle))
    }
}

/// Host-visible description of a class property, as recorded in an assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyRef {
    pub name: String,
    pub type_name: String,
    pub id: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyAccess {
    Read,
    Write,
}

pub struct PropertyCallbackContext<'a> {
    pub state: &'a mut BsVmState,
    /// Handle of the object whose property is accessed.
    pub object: i32,
    pub property: &'a PropertyRef,
    pub access: PropertyAccess,
    /// Destination on reads, source on writes. Sized to the property type.
    pub buffer: &'a mut [u8],
}

/// Sequential reader over a packed argument buffer.
pub struct ArgUnpacker<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ArgUnpacker<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ArgUnpacker { buf, pos: 0 }
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CallbackError> {
        let end = self.pos + len;
        if end > self.buf.len() {
            return Err(CallbackError::Overrun {
                offset: self.pos,
                needed: len,
                size: self.buf.len(),
            });
        }
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_word(&mut self) -> Result<[u8; 4], CallbackError> {
        let bytes = self.read_bytes(4)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(bytes);
        Ok(word)
    }

    pub fn read_i32(&mut self) -> Result<i32, CallbackError> {
        Ok(i32::from_le_bytes(self.read_word()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, CallbackError> {
        Ok(f32::from_le_bytes(self.read_word()?))
    }

    /// Heap or object handle.
    pub fn read_handle(&mut self) -> Result<i32, CallbackError> {
        self.read_i32()
    }

    pub fn read_floats<const N: usize>(&mut self) -> Result<[f32; N], CallbackError> {
        let mut out = [0.0f32; N];
        for lane in out.iter_mut() {
            *lane = self.read_f32()?;
        }
        Ok(out)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Fails unless every byte was consumed.
    pub fn finish(&self) -> Result<(), CallbackError> {
        if self.pos != self.buf.len() {
            return Err(CallbackError::SizeMismatch {
                used: self.pos,
                size: self.buf.len(),
            });
        }
        Ok(())
    }
}

/// Sequential writer into a fixed-size return buffer.
pub struct ArgPacker<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> ArgPacker<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        ArgPacker { buf, pos: 0 }
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, CallbackError> {
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            return Err(CallbackError::Overrun {
                offset: self.pos,
                needed: bytes.len(),
                size: self.buf.len(),
            });
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(self)
    }

    pub fn push_i32(&mut self, value: i32) -> Result<&mut Self, CallbackError> {
        self.push_bytes(&value.to_le_bytes())
    }

    pub fn push_f32(&mut self, value: f32) -> Result<&mut Self, CallbackError> {
        self.push_bytes(&value.to_le_bytes())
    }

    pub fn push_floats(&mut self, values: &[f32]) -> Result<&mut Self, CallbackError> {
        for v in values {
            self.push_f32(*v)?;
        }
        Ok(self)
    }

    pub fn written(&self) -> usize {
        self.pos
    }

    /// Fails unless the buffer was filled exactly.
    pub fn finish(&self) -> Result<(), CallbackError> {
        if self.pos != self.buf.len() {
            return Err(CallbackError::SizeMismatch {
                used: self.pos,
                size: self.buf.len(),
            });
        }
        Ok(())
    }
}

/// Owned argument buffer for host-initiated calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgBuffer {
    bytes: Vec<u8>,
}

impl ArgBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn int(mut self, value: i32) -> Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn float(mut self, value: f32) -> Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn floats(mut self, values: &[f32]) -> Self {
        for v in values {
            self.bytes.extend_from_slice(&v.to_le_bytes());
        }
        self
    }

    /// Heap or object handle.
    pub fn handle(self, handle: i32) -> Self {
        self.int(handle)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
