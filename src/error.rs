//! Error types for the device core.
//!
//! This module provides a unified error type [`DevsimError`] that covers
//! netlist reading, device configuration, solver topology registration,
//! numerical failures and restart records.

use thiserror::Error;

/// Result type alias using [`DevsimError`].
pub type Result<T> = std::result::Result<T, DevsimError>;

/// Unified error type for all device operations.
#[derive(Error, Debug)]
pub enum DevsimError {
    // ============ Netlist Errors ============
    /// Error during lexical analysis
    #[error("Lexer error at line {line}, column {column}: {message}")]
    LexerError {
        line: usize,
        column: usize,
        message: String,
    },

    /// Error during parsing
    #[error("Parse error at line {line}: {message}")]
    ParseError { line: usize, message: String },

    /// Invalid device card
    #[error("Invalid device '{name}' at line {line}: {message}")]
    InvalidDevice {
        name: String,
        line: usize,
        message: String,
    },

    /// Unknown device or model type
    #[error("Unknown device type '{device_type}' at line {line}")]
    UnknownDeviceType { device_type: String, line: usize },

    /// Undefined model reference
    #[error("Undefined model '{model}' referenced by device '{device}'")]
    UndefinedModel { model: String, device: String },

    /// Duplicate device name
    #[error("Duplicate device name '{name}'")]
    DuplicateDevice { name: String },

    /// Duplicate model name
    #[error("Duplicate model name '{name}'")]
    DuplicateModel { name: String },

    /// Invalid parameter value
    #[error("Invalid parameter '{param}' for '{device}': {message}")]
    InvalidParameter {
        device: String,
        param: String,
        message: String,
    },

    // ============ Configuration Errors ============
    /// R/L/G/C combination with no supported impulse response
    #[error("Transmission line model '{model}': {message}")]
    UnsupportedLineType { model: String, message: String },

    /// RLC line whose attenuation constant came out negative
    #[error("Transmission line model '{model}': negative alpha ({alpha})")]
    NegativeAttenuation { model: String, alpha: f64 },

    /// Material name missing from the material tables
    #[error("Material '{material}' not recognized")]
    UnknownMaterial { material: String },

    /// Mobility model name not recognized, or not tabulated for a material
    #[error("Mobility model '{model}' not supported for material '{material}'")]
    UnknownMobilityModel { model: String, material: String },

    /// Doping profile left one carrier type with no dopant
    #[error("Device '{device}': doping mistake, Na={na:e} Nd={nd:e}")]
    ZeroDoping { device: String, na: f64, nd: f64 },

    /// More external nodes than the 1-D device supports
    #[error("Device '{device}': {count} external nodes given, at most 3 are supported")]
    TooManyTerminals { device: String, count: usize },

    /// Two electrodes resolved to the same mesh node
    #[error("Device '{device}': electrode '{electrode}' lands on an occupied mesh node {mesh_index}")]
    ElectrodeSlotInUse {
        device: String,
        electrode: String,
        mesh_index: usize,
    },

    /// Electrode side keyword not recognized
    #[error("Device '{device}': unrecognized side '{side}' for electrode '{electrode}'")]
    UnknownElectrodeSide {
        device: String,
        electrode: String,
        side: String,
    },

    // ============ Topology Errors ============
    /// Solver handed a LID vector of the wrong length
    #[error("Device '{device}': expected {expected} {kind} LIDs, got {actual}")]
    LidCountMismatch {
        device: String,
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Jacobian LID table does not match the device stamp
    #[error("Device '{device}': Jacobian LID table does not match stamp at row {row}")]
    JacobianLidMismatch { device: String, row: usize },

    /// A load routine tried to write outside the registered stencil
    #[error("Write to ({row}, {col}) is outside the registered Jacobian stencil")]
    OutOfStencil { row: usize, col: usize },

    // ============ Numerical Errors ============
    /// Singular matrix (no unique solution)
    #[error("Singular matrix - check circuit topology")]
    SingularMatrix,

    /// Newton-Raphson failed to converge
    #[error("Newton-Raphson failed to converge after {iterations} iterations (residual: {residual:.2e})")]
    ConvergenceFailure { iterations: usize, residual: f64 },

    /// No stored time point precedes the delayed time
    #[error("Device '{device}': delayed time point {time:e} not found in history")]
    DelayedPointNotFound { device: String, time: f64 },

    /// One or more instances failed during a master-level pass
    #[error("{} device instance(s) failed; first: {}", .failures.len(), .failures.first().map(|e| e.to_string()).unwrap_or_default())]
    LoadFailures { failures: Vec<DevsimError> },

    // ============ Bench Errors ============
    /// Bench wiring or analysis request that cannot be carried out
    #[error("Bench: {message}")]
    Bench { message: String },

    // ============ Restart Errors ============
    /// Restart record belongs to another instance
    #[error("Restart record '{found}' does not belong to device '{device}'")]
    RestartIdMismatch { device: String, found: String },

    /// Restart record has the wrong shape
    #[error("Restart record for '{device}' is malformed: {message}")]
    RestartSizeMismatch { device: String, message: String },

    // ============ I/O Errors ============
    /// Error reading file
    #[error("Failed to read file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl DevsimError {
    /// Create a lexer error.
    pub fn lexer(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::LexerError {
            line,
            column,
            message: message.into(),
        }
    }

    /// Create a parse error.
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::ParseError {
            line,
            message: message.into(),
        }
    }

    /// Create an invalid device error.
    pub fn invalid_device(name: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self::InvalidDevice {
            name: name.into(),
            line,
            message: message.into(),
        }
    }

    /// Create an invalid parameter error.
    pub fn invalid_parameter(
        device: impl Into<String>,
        param: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            device: device.into(),
            param: param.into(),
            message: message.into(),
        }
    }

    /// Create a LID count mismatch error.
    pub fn lid_count(device: impl Into<String>, kind: &'static str, expected: usize, actual: usize) -> Self {
        Self::LidCountMismatch {
            device: device.into(),
            kind,
            expected,
            actual,
        }
    }

    /// Create a bench error.
    pub fn bench(message: impl Into<String>) -> Self {
        Self::Bench {
            message: message.into(),
        }
    }

    /// Create a convergence failure error.
    pub fn convergence_failure(iterations: usize, residual: f64) -> Self {
        Self::ConvergenceFailure {
            iterations,
            residual,
        }
    }

    /// Fold the failures collected over a set of instances into one result.
    pub fn collect(failures: Vec<DevsimError>) -> Result<()> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Self::LoadFailures { failures })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_empty_is_ok() {
        assert!(DevsimError::collect(Vec::new()).is_ok());
    }

    #[test]
    fn test_collect_reports_first_failure() {
        let err = DevsimError::collect(vec![
            DevsimError::SingularMatrix,
            DevsimError::convergence_failure(3, 1.0),
        ])
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("2 device instance(s) failed"));
        assert!(msg.contains("Singular matrix"));
    }
}
