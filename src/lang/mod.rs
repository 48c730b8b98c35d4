//! # BlockScript language model
//!
//! Types, symbol tables and the syntax tree shared by the compiler stages.
//! The parser produces a [`ast::Program`]; the builder annotates it in place
//! with types and resolved symbols.

pub mod ast;
pub mod pretty;
pub mod symbol_table;
pub mod types;
pub mod value;
