//! Error types for the analytics dispatch core

/// Validation and configuration errors raised at the public call boundary.
///
/// Public operations on [`crate::Analytics`] log these and turn into no-ops;
/// the lower level constructors return them so tests and embedders can
/// inspect the exact rejection.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    /// Event name missing or blank after trimming
    #[error("event name must be a non-empty string")]
    InvalidEventName,

    /// Integration name missing or blank after trimming
    #[error("integration name must be a non-empty string")]
    InvalidIntegrationName,

    /// A second definition was supplied for an already defined integration
    #[error("integration '{0}' has already been defined and is attempting to be defined again")]
    AlreadyDefined(String),

    /// User traits were not a key/value mapping
    #[error("user traits must be an object, got: {0}")]
    InvalidUserTraits(String),

    /// Configuration failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error while reading or writing configuration
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Failure reported by an integration capability.
///
/// This is the payload carried on an integration's `error` topic, so it is
/// cheap to clone and comparable in tests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrationError {
    /// The capability returned or resolved to an error
    #[error("{0}")]
    Failed(String),

    /// The capability panicked while running
    #[error("integration panicked: {0}")]
    Panicked(String),
}

impl IntegrationError {
    /// Shorthand for [`IntegrationError::Failed`]
    pub fn failed(message: impl Into<String>) -> Self {
        IntegrationError::Failed(message.into())
    }

    /// Convert a caught panic payload into an error, keeping the message when
    /// the payload is a string.
    pub fn from_panic(panic_info: Box<dyn std::any::Any + Send>) -> Self {
        IntegrationError::Panicked(crate::utils::panic_message(panic_info.as_ref()))
    }
}

impl From<String> for IntegrationError {
    fn from(message: String) -> Self {
        IntegrationError::Failed(message)
    }
}

impl From<&str> for IntegrationError {
    fn from(message: &str) -> Self {
        IntegrationError::Failed(message.to_string())
    }
}

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, AnalyticsError>;
