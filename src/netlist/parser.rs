//! Parser for device decks.

use std::collections::HashSet;

use super::ast::*;
use super::lexer::{parse_value, Lexer, Token, TokenKind};
use crate::error::{DevsimError, Result};

/// Parser for device decks.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
}

impl<'a> Parser<'a> {
    /// Create a new parser with the given lexer.
    pub fn new(mut lexer: Lexer<'a>) -> Result<Self> {
        let current = lexer.next_token()?;
        Ok(Self { lexer, current })
    }

    /// Parse the entire deck.
    pub fn parse(&mut self) -> Result<Netlist> {
        let mut netlist = Netlist::new();
        let mut model_names = HashSet::new();
        let mut device_names = HashSet::new();

        while self.current.kind != TokenKind::Eof {
            if self.current.kind == TokenKind::Newline {
                self.advance()?;
                continue;
            }

            match &self.current.kind {
                TokenKind::Directive => {
                    if let Some(model) = self.parse_directive()? {
                        if !model_names.insert(model.name.to_ascii_lowercase()) {
                            return Err(DevsimError::DuplicateModel { name: model.name });
                        }
                        netlist.models.push(model);
                    }
                }
                TokenKind::Identifier => {
                    let device = self.parse_device()?;
                    if !device_names.insert(device.name.to_ascii_lowercase()) {
                        return Err(DevsimError::DuplicateDevice { name: device.name });
                    }
                    netlist.devices.push(device);
                }
                _ => {
                    return Err(DevsimError::parse(
                        self.current.line,
                        format!("unexpected token: {:?}", self.current.text),
                    ));
                }
            }

            match self.current.kind {
                TokenKind::Newline => self.advance()?,
                TokenKind::Eof => {}
                _ => {
                    return Err(DevsimError::parse(
                        self.current.line,
                        format!("unexpected trailing token: {:?}", self.current.text),
                    ));
                }
            }
        }

        Ok(netlist)
    }

    fn advance(&mut self) -> Result<()> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn at_line_end(&self) -> bool {
        matches!(self.current.kind, TokenKind::Newline | TokenKind::Eof)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if self.current.kind == kind {
            let tok = self.current.clone();
            self.advance()?;
            Ok(tok)
        } else {
            Err(DevsimError::parse(
                self.current.line,
                format!("expected {:?}, got {:?}", kind, self.current.kind),
            ))
        }
    }

    fn parse_directive(&mut self) -> Result<Option<ModelDef>> {
        let directive = self.current.text.clone();
        let line = self.current.line;
        self.advance()?;

        match directive.to_ascii_lowercase().as_str() {
            ".model" => self.parse_model_def(line).map(Some),
            ".end" => {
                while !self.at_line_end() {
                    self.advance()?;
                }
                Ok(None)
            }
            _ => Err(DevsimError::parse(line, format!("unknown directive: {}", directive))),
        }
    }

    fn parse_model_def(&mut self, line: usize) -> Result<ModelDef> {
        let name = self.expect(TokenKind::Identifier)?.text;
        let type_tok = self.expect(TokenKind::Identifier)?;
        let model_type = type_tok.text.to_ascii_uppercase();

        if model_type != "LTRA" {
            return Err(DevsimError::UnknownDeviceType {
                device_type: type_tok.text,
                line,
            });
        }

        let mut params = ParamMap::new();
        let parenthesized = self.current.kind == TokenKind::OpenParen;
        if parenthesized {
            self.advance()?;
        }

        while !self.at_line_end() && self.current.kind != TokenKind::CloseParen {
            let key = self.expect(TokenKind::Identifier)?.text;
            self.expect(TokenKind::Equals)?;
            let value = self.parse_param_value(line)?;
            params.insert(&key, value);
        }

        if parenthesized {
            self.expect(TokenKind::CloseParen)?;
        }

        Ok(ModelDef {
            name,
            model_type,
            params,
            line,
        })
    }

    fn parse_param_value(&mut self, line: usize) -> Result<ParamValue> {
        let tok = self.current.clone();
        match tok.kind {
            TokenKind::Number => {
                self.advance()?;
                parse_value(&tok.text)
                    .map(ParamValue::Number)
                    .ok_or_else(|| DevsimError::parse(line, format!("invalid number: {}", tok.text)))
            }
            TokenKind::Identifier => {
                self.advance()?;
                Ok(parse_value(&tok.text)
                    .map(ParamValue::Number)
                    .unwrap_or(ParamValue::Text(tok.text)))
            }
            _ => Err(DevsimError::parse(line, "expected parameter value")),
        }
    }

    fn parse_device(&mut self) -> Result<DeviceDef> {
        let name = self.current.text.clone();
        let line = self.current.line;
        self.advance()?;

        let prefix = name.chars().next().unwrap_or('?');
        let kind = DeviceKind::from_prefix(prefix).ok_or_else(|| DevsimError::UnknownDeviceType {
            device_type: name.clone(),
            line,
        })?;
        let (min_nodes, max_nodes) = kind.node_range();

        // Positional words up to the first key=value pair
        let mut words = Vec::new();
        let mut params = ParamMap::new();
        while !self.at_line_end() {
            let tok = self.current.clone();
            match tok.kind {
                TokenKind::Identifier | TokenKind::Number => {
                    self.advance()?;
                    if self.current.kind == TokenKind::Equals {
                        self.advance()?;
                        let value = self.parse_param_value(line)?;
                        params.insert(&tok.text, value);
                    } else if params.is_empty() {
                        words.push(tok.text);
                    } else {
                        return Err(DevsimError::invalid_device(
                            &name,
                            line,
                            format!("positional value '{}' after parameters", tok.text),
                        ));
                    }
                }
                _ => {
                    return Err(DevsimError::parse(
                        line,
                        format!("unexpected token: {:?}", tok.text),
                    ));
                }
            }
        }

        let model = match kind {
            DeviceKind::Ltra => {
                if words.len() != max_nodes + 1 {
                    return Err(DevsimError::invalid_device(
                        &name,
                        line,
                        format!("expected {} nodes and a model, got {} words", max_nodes, words.len()),
                    ));
                }
                words.pop()
            }
            DeviceKind::DiodePde => None,
        };

        if words.len() < min_nodes || words.len() > max_nodes {
            return Err(DevsimError::invalid_device(
                &name,
                line,
                format!(
                    "expected {} to {} nodes, got {}",
                    min_nodes,
                    max_nodes,
                    words.len()
                ),
            ));
        }

        Ok(DeviceDef {
            kind,
            name,
            nodes: words,
            model,
            params,
            line,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlist::parse;

    #[test]
    fn test_parse_ltra_model_and_instance() {
        let input = "\
* lossy line
.model line1 LTRA (R=10 L=0 G=0 C=1n LEN=1)
O1 in 0 out 0 line1 V1=0.5
";
        let netlist = parse(input).unwrap();
        assert_eq!(netlist.models.len(), 1);
        let model = netlist.model("LINE1").unwrap();
        assert_eq!(model.model_type, "LTRA");
        assert_eq!(model.params.number("line1", "c").unwrap(), Some(1e-9));

        let dev = netlist.device("o1").unwrap();
        assert_eq!(dev.kind, DeviceKind::Ltra);
        assert_eq!(dev.nodes, vec!["in", "0", "out", "0"]);
        assert_eq!(dev.model.as_deref(), Some("line1"));
        assert_eq!(dev.params.number("O1", "V1").unwrap(), Some(0.5));
    }

    #[test]
    fn test_parse_pde_instance_with_text_params() {
        let input = "YPN a c NA=1e16 ND=1e16 MOBMODEL=carr ANODE.BC=0.3 ; diode\n";
        let netlist = parse(input).unwrap();
        let dev = &netlist.devices[0];
        assert_eq!(dev.kind, DeviceKind::DiodePde);
        assert_eq!(dev.nodes.len(), 2);
        assert_eq!(dev.params.text("YPN", "mobmodel").unwrap(), Some("carr".to_string()));
        assert_eq!(dev.params.number("YPN", "anode.bc").unwrap(), Some(0.3));
    }

    #[test]
    fn test_parse_errors_carry_line_numbers() {
        let err = parse("\n\nO1 a b c line\n").unwrap_err();
        assert!(matches!(err, DevsimError::InvalidDevice { line: 3, .. }));

        let err = parse(".model m1 TLINE (R=1)\n").unwrap_err();
        assert!(matches!(err, DevsimError::UnknownDeviceType { line: 1, .. }));

        let err = parse("Y1 a\n").unwrap_err();
        assert!(matches!(err, DevsimError::InvalidDevice { line: 1, .. }));

        let err = parse("R1 a b 10\n").unwrap_err();
        assert!(matches!(err, DevsimError::UnknownDeviceType { .. }));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = parse("Y1 a b\nY1 c d\n").unwrap_err();
        assert!(matches!(err, DevsimError::DuplicateDevice { .. }));

        let err = parse(".model m LTRA R=1 C=1\n.model M LTRA R=1 C=1\n").unwrap_err();
        assert!(matches!(err, DevsimError::DuplicateModel { .. }));
    }
}
