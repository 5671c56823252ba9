//! Lexer (tokenizer) for device decks.

use crate::error::{DevsimError, Result};

/// A token produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The token's text
    pub text: String,
    /// Line number (1-indexed)
    pub line: usize,
    /// Column number (1-indexed)
    pub column: usize,
}

/// Token types in a deck.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// An identifier (device name, node name, parameter key, text value)
    Identifier,
    /// A number (integer or floating point, possibly with suffix)
    Number,
    /// A directive (starts with '.')
    Directive,
    /// Open parenthesis '('
    OpenParen,
    /// Close parenthesis ')'
    CloseParen,
    /// Equals sign '='
    Equals,
    /// Newline
    Newline,
    /// End of file
    Eof,
}

/// Lexer for tokenizing deck input.
pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
    /// No token has been produced on the current line yet
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given input.
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            line: 1,
            column: 1,
            at_line_start: true,
        }
    }

    /// Get the next token.
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace_and_comments();

        let start_line = self.line;
        let start_column = self.column;
        let make = |kind: TokenKind, text: String| Token {
            kind,
            text,
            line: start_line,
            column: start_column,
        };

        let ch = match self.chars.peek().copied() {
            Some(ch) => ch,
            None => return Ok(make(TokenKind::Eof, String::new())),
        };
        self.at_line_start = false;

        let token = match ch {
            '\n' => {
                self.advance();
                self.at_line_start = true;
                make(TokenKind::Newline, "\n".to_string())
            }
            '.' => {
                self.advance();
                if self.chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                    let text = format!("0.{}", self.read_number());
                    make(TokenKind::Number, text)
                } else {
                    let text = self.read_identifier();
                    make(TokenKind::Directive, format!(".{}", text))
                }
            }
            '(' => {
                self.advance();
                make(TokenKind::OpenParen, "(".to_string())
            }
            ')' => {
                self.advance();
                make(TokenKind::CloseParen, ")".to_string())
            }
            '=' => {
                self.advance();
                make(TokenKind::Equals, "=".to_string())
            }
            '-' | '+' | '0'..='9' => {
                let text = self.read_number();
                // Node names such as "1a" start with a digit
                if self.chars.peek().is_some_and(|c| is_identifier_char(*c)) {
                    let rest = self.read_identifier();
                    make(TokenKind::Identifier, format!("{}{}", text, rest))
                } else {
                    make(TokenKind::Number, text)
                }
            }
            _ if ch.is_alphabetic() || ch == '_' => {
                let text = self.read_identifier();
                make(TokenKind::Identifier, text)
            }
            _ => {
                return Err(DevsimError::lexer(
                    start_line,
                    start_column,
                    format!("unexpected character '{}'", ch),
                ));
            }
        };

        Ok(token)
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(&ch) = self.chars.peek() {
            if ch == ' ' || ch == '\t' || ch == '\r' {
                self.advance();
            } else if ch == '#' || ch == ';' || (ch == '*' && self.at_line_start) {
                while let Some(&c) = self.chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    fn read_identifier(&mut self) -> String {
        let mut text = String::new();
        while let Some(&ch) = self.chars.peek() {
            if is_identifier_char(ch) {
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        text
    }

    fn read_digits(&mut self, text: &mut String) {
        while let Some(&ch) = self.chars.peek() {
            if ch.is_ascii_digit() {
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_number(&mut self) -> String {
        let mut text = String::new();

        if let Some(&ch) = self.chars.peek() {
            if ch == '-' || ch == '+' {
                text.push(ch);
                self.advance();
            }
        }

        self.read_digits(&mut text);

        if let Some(&'.') = self.chars.peek() {
            text.push('.');
            self.advance();
            self.read_digits(&mut text);
        }

        if let Some(&ch) = self.chars.peek() {
            if ch == 'e' || ch == 'E' {
                text.push(ch);
                self.advance();
                if let Some(&sign) = self.chars.peek() {
                    if sign == '-' || sign == '+' {
                        text.push(sign);
                        self.advance();
                    }
                }
                self.read_digits(&mut text);
            }
        }

        if let Some(&ch) = self.chars.peek() {
            if is_unit_suffix(ch) {
                text.push(ch);
                self.advance();
            }
        }

        text
    }
}

fn is_identifier_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '.'
}

fn is_unit_suffix(ch: char) -> bool {
    matches!(ch, 'p' | 'n' | 'u' | 'µ' | 'm' | 'k' | 'K' | 'M' | 'G')
}

/// Parse a number string with optional unit suffix.
pub fn parse_value(text: &str) -> Option<f64> {
    let text = text.trim();
    let last = text.chars().last()?;

    let multiplier = match last {
        'p' => 1e-12,
        'n' => 1e-9,
        'u' | 'µ' => 1e-6,
        'm' => 1e-3,
        'k' | 'K' => 1e3,
        'M' => 1e6,
        'G' => 1e9,
        _ => 1.0,
    };
    let num_str = if multiplier != 1.0 {
        &text[..text.len() - last.len_utf8()]
    } else {
        text
    };

    num_str.parse::<f64>().ok().map(|v| v * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn kinds(input: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(input);
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token().unwrap();
            if tok.kind == TokenKind::Eof {
                break;
            }
            out.push(tok.kind);
        }
        out
    }

    #[test]
    fn test_parse_value() {
        assert_relative_eq!(parse_value("10k").unwrap(), 10_000.0);
        assert_relative_eq!(parse_value("1n").unwrap(), 1e-9);
        assert_relative_eq!(parse_value("0.5m").unwrap(), 0.5e-3);
        assert_relative_eq!(parse_value("1e15").unwrap(), 1e15);
        assert_relative_eq!(parse_value("2.2").unwrap(), 2.2);
        assert!(parse_value("carr").is_none());
    }

    #[test]
    fn test_dotted_identifier() {
        let mut lexer = Lexer::new("ANODE.BC=0.7");
        let tok = lexer.next_token().unwrap();
        assert_eq!(tok.kind, TokenKind::Identifier);
        assert_eq!(tok.text, "ANODE.BC");
        assert_eq!(lexer.next_token().unwrap().kind, TokenKind::Equals);
        assert_eq!(lexer.next_token().unwrap().text, "0.7");
    }

    #[test]
    fn test_star_comment_only_at_line_start() {
        let input = "* header\n  * indented\nO1 a b c d m1\n";
        assert_eq!(
            kinds(input),
            vec![
                TokenKind::Newline,
                TokenKind::Newline,
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Newline,
            ]
        );
    }

    #[test]
    fn test_lexer_directive() {
        let mut lexer = Lexer::new(".model line LTRA (R=10)");
        let tok = lexer.next_token().unwrap();
        assert_eq!(tok.kind, TokenKind::Directive);
        assert_eq!(tok.text, ".model");
    }

    #[test]
    fn test_unexpected_character() {
        let mut lexer = Lexer::new("O1 a $b");
        lexer.next_token().unwrap();
        lexer.next_token().unwrap();
        let err = lexer.next_token().unwrap_err();
        assert!(matches!(err, DevsimError::LexerError { line: 1, column: 6, .. }));
    }
}
