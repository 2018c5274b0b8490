//! The sandboxed script language: lexer, parser, and tree-walking
//! evaluator, plus the runtime value model.

pub mod ast;
pub mod evaluator;
pub mod lexer;
pub mod parser;
pub mod value;

use crate::error::ScriptError;
use ast::Program;
use lexer::Lexer;
use parser::Parser;

/// Lexes and parses `source` without evaluating it.
pub fn parse_source(source: &str) -> Result<Program, ScriptError> {
    let tokens = Lexer::new(source).scan_tokens()?;
    Parser::new(tokens).parse()
}
