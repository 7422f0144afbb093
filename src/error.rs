//! Error types and handling for the EVSE Modbus reflector
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for reflector operations
pub type Result<T> = std::result::Result<T, EvseError>;

/// Main error type for the reflector
#[derive(Debug, Error)]
pub enum EvseError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Register map errors (bad address, width mismatch)
    #[error("Register map error: {message}")]
    Registers { message: String },

    /// Modbus TCP server errors
    #[error("Modbus error: {message}")]
    Modbus { message: String },

    /// Event bus (IPC) errors
    #[error("Event bus error: {message}")]
    EventBus { message: String },

    /// Cold-start persistence errors (SQLite reads)
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Watchdog/failsafe loop errors
    #[error("Watchdog error: {message}")]
    Watchdog { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl EvseError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        EvseError::Config {
            message: message.into(),
        }
    }

    /// Create a new register map error
    pub fn registers<S: Into<String>>(message: S) -> Self {
        EvseError::Registers {
            message: message.into(),
        }
    }

    /// Create a new Modbus error
    pub fn modbus<S: Into<String>>(message: S) -> Self {
        EvseError::Modbus {
            message: message.into(),
        }
    }

    /// Create a new event bus error
    pub fn event_bus<S: Into<String>>(message: S) -> Self {
        EvseError::EventBus {
            message: message.into(),
        }
    }

    /// Create a new persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        EvseError::Persistence {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        EvseError::Io {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        EvseError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new watchdog error
    pub fn watchdog<S: Into<String>>(message: S) -> Self {
        EvseError::Watchdog {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        EvseError::Generic {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for EvseError {
    fn from(err: std::io::Error) -> Self {
        EvseError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for EvseError {
    fn from(err: serde_yaml::Error) -> Self {
        EvseError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EvseError {
    fn from(err: serde_json::Error) -> Self {
        EvseError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for EvseError {
    fn from(err: rusqlite::Error) -> Self {
        EvseError::Persistence {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = EvseError::config("test config error");
        assert!(matches!(err, EvseError::Config { .. }));

        let err = EvseError::modbus("test modbus error");
        assert!(matches!(err, EvseError::Modbus { .. }));

        let err = EvseError::validation("field", "test validation error");
        assert!(matches!(err, EvseError::Validation { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = EvseError::config("test error");
        let error_string = format!("{}", err);
        assert_eq!(error_string, "Configuration error: test error");

        let err = EvseError::validation("test_field", "invalid value");
        let error_string = format!("{}", err);
        assert_eq!(error_string, "Validation error: test_field - invalid value");
    }
}
