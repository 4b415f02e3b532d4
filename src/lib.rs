//! A compiler for a tiny imperative language, emitting x86-64 NASM.
//!
//! Source flows through four stages:
//! - `tokenizer` turns text into tokens ending in an `Eof` sentinel.
//! - `parser` runs backtracking descent over them and returns the AST.
//! - `semantic` checks names and records every scope in a `symbol::ScopeTree`.
//! - `codegen` assigns stack slots and replays the tree to emit assembly.

pub mod codegen;
pub mod error;
pub mod parser;
pub mod semantic;
pub mod symbol;
pub mod tokenizer;

pub use error::{CompileError, CompileResult};

/// Compile a source string into NASM assembly.
pub fn generate_assembly(source: &str) -> CompileResult<String> {
  let tokens = tokenizer::tokenize(source)?;
  let program = parser::parse(tokens, source)?;
  let mut scopes = semantic::analyze(&program, source)?;
  codegen::generate(&program, &mut scopes)
}
