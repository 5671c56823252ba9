//! Parsed netlist types.

use std::collections::HashMap;

use crate::error::{DevsimError, Result};

/// Complete parsed device deck.
#[derive(Debug, Clone, Default)]
pub struct Netlist {
    /// `.model` cards in file order
    pub models: Vec<ModelDef>,
    /// Device instance cards in file order
    pub devices: Vec<DeviceDef>,
}

impl Netlist {
    /// Create an empty netlist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a model card by name (case-insensitive).
    pub fn model(&self, name: &str) -> Option<&ModelDef> {
        self.models.iter().find(|m| m.name.eq_ignore_ascii_case(name))
    }

    /// Find a device card by name (case-insensitive).
    pub fn device(&self, name: &str) -> Option<&DeviceDef> {
        self.devices.iter().find(|d| d.name.eq_ignore_ascii_case(name))
    }
}

/// A `.model` card.
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// Model name
    pub name: String,
    /// Model type keyword, upper-cased
    pub model_type: String,
    /// Model parameters
    pub params: ParamMap,
    /// Source line number for error reporting
    pub line: usize,
}

/// Device families the reader knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Lossy transmission line (`O` prefix)
    Ltra,
    /// 1-D drift-diffusion device (`Y` prefix)
    DiodePde,
}

impl DeviceKind {
    /// Parse a device kind from its card prefix.
    pub fn from_prefix(prefix: char) -> Option<Self> {
        match prefix.to_ascii_uppercase() {
            'O' => Some(Self::Ltra),
            'Y' => Some(Self::DiodePde),
            _ => None,
        }
    }

    /// Smallest and largest number of nodes on the card.
    pub fn node_range(&self) -> (usize, usize) {
        match self {
            Self::Ltra => (4, 4),
            Self::DiodePde => (2, 3),
        }
    }
}

/// A device instance card.
#[derive(Debug, Clone)]
pub struct DeviceDef {
    /// Device family
    pub kind: DeviceKind,
    /// Unique instance name
    pub name: String,
    /// Connected node names
    pub nodes: Vec<String>,
    /// Referenced `.model` card
    pub model: Option<String>,
    /// Instance parameters
    pub params: ParamMap,
    /// Source line number for error reporting
    pub line: usize,
}

/// A parameter value as written on a card.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Numeric value, unit suffix already applied
    Number(f64),
    /// Anything that is not a number (`MOBMODEL=carr`)
    Text(String),
}

/// Case-insensitive parameter map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamMap {
    values: HashMap<String, ParamValue>,
}

impl ParamMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any earlier one with the same key.
    pub fn insert(&mut self, key: &str, value: ParamValue) {
        self.values.insert(key.to_ascii_uppercase(), value);
    }

    /// Builder-style insert of a number.
    pub fn with_number(mut self, key: &str, value: f64) -> Self {
        self.insert(key, ParamValue::Number(value));
        self
    }

    /// Builder-style insert of a text value.
    pub fn with_text(mut self, key: &str, value: &str) -> Self {
        self.insert(key, ParamValue::Text(value.to_string()));
        self
    }

    /// Raw lookup.
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(&key.to_ascii_uppercase())
    }

    /// True if the key was given.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if no parameters were given.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Numeric parameter; text is an error.
    pub fn number(&self, device: &str, key: &str) -> Result<Option<f64>> {
        match self.get(key) {
            None => Ok(None),
            Some(ParamValue::Number(v)) => Ok(Some(*v)),
            Some(ParamValue::Text(t)) => Err(DevsimError::invalid_parameter(
                device,
                key,
                format!("expected a number, got '{}'", t),
            )),
        }
    }

    /// Boolean parameter: nonzero numbers and `true`/`yes`/`on` are set.
    pub fn flag(&self, device: &str, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(ParamValue::Number(v)) => Ok(Some(*v != 0.0)),
            Some(ParamValue::Text(t)) => match t.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" => Ok(Some(true)),
                "false" | "no" | "off" => Ok(Some(false)),
                _ => Err(DevsimError::invalid_parameter(
                    device,
                    key,
                    format!("expected a boolean, got '{}'", t),
                )),
            },
        }
    }

    /// Text parameter, lower-cased. Numbers are an error.
    pub fn text(&self, device: &str, key: &str) -> Result<Option<String>> {
        match self.get(key) {
            None => Ok(None),
            Some(ParamValue::Text(t)) => Ok(Some(t.to_ascii_lowercase())),
            Some(ParamValue::Number(v)) => Err(DevsimError::invalid_parameter(
                device,
                key,
                format!("expected a name, got {}", v),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_map_is_case_insensitive() {
        let params = ParamMap::new().with_number("Base.Loc", 2e-4).with_text("mobmodel", "Carr");
        assert_eq!(params.number("Y1", "BASE.LOC").unwrap(), Some(2e-4));
        assert_eq!(params.text("Y1", "MOBMODEL").unwrap(), Some("carr".to_string()));
    }

    #[test]
    fn test_param_map_type_errors() {
        let params = ParamMap::new().with_text("NA", "lots").with_number("MOBMODEL", 1.0);
        assert!(params.number("Y1", "na").is_err());
        assert!(params.text("Y1", "mobmodel").is_err());
    }

    #[test]
    fn test_param_map_flags() {
        let params = ParamMap::new()
            .with_number("graded", 1.0)
            .with_text("auger", "false")
            .with_text("srh", "maybe");
        assert_eq!(params.flag("Y1", "GRADED").unwrap(), Some(true));
        assert_eq!(params.flag("Y1", "AUGER").unwrap(), Some(false));
        assert!(params.flag("Y1", "SRH").is_err());
        assert_eq!(params.flag("Y1", "VOLTLIM").unwrap(), None);
    }
}
