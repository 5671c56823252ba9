//! Line-oriented reader for device decks.
//!
//! # Grammar Overview
//!
//! ```text
//! deck        = { line }
//! line        = comment | model | device | empty
//! comment     = ('#' | ';') { any_char } | '*' { any_char } (first on a line)
//! model       = ".model" name "LTRA" ['('] { param } [')']
//! device      = ltra | pde
//! ltra        = 'O' name node node node node model_ref { param }
//! pde         = 'Y' name node node [node] { param }
//! param       = key '=' (number | text)
//!
//! number      = ['-'] digit+ ['.' digit+] [('e'|'E') ['-'|'+'] digit+] [unit_suffix]
//! unit_suffix = 'p' | 'n' | 'u' | 'm' | 'k' | 'M' | 'G'
//! key         = identifier, may contain '.' (ANODE.BC)
//! ```
//!
//! # Example
//!
//! ```text
//! * RC line between two sources
//! .model rcline LTRA (R=10 C=1n LEN=1)
//! O1 in 0 out 0 rcline
//! YD1 anode cathode NA=1e16 ND=1e16 MOBMODEL=carr
//! ```

mod ast;
mod lexer;
mod parser;

pub use ast::*;
pub use lexer::{parse_value, Lexer, Token, TokenKind};
pub use parser::Parser;

use crate::error::{DevsimError, Result};

/// Parse a deck string.
pub fn parse(input: &str) -> Result<Netlist> {
    let lexer = Lexer::new(input);
    let mut parser = Parser::new(lexer)?;
    parser.parse()
}

/// Parse a deck file.
pub fn parse_file(path: &std::path::Path) -> Result<Netlist> {
    let content = std::fs::read_to_string(path).map_err(|e| DevsimError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    parse(&content)
}
