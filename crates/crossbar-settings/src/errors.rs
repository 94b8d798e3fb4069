//! Settings error types.

use thiserror::Error;

/// Errors that can occur when loading or parsing settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read the settings file from disk.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON in the settings file.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A bridge address did not parse as `ip:port`.
    #[error("{field} `{value}` is not a socket address: {source}")]
    InvalidAddress {
        /// Settings key, e.g. `bridge.workerAddr`.
        field: &'static str,
        /// The rejected value.
        value: String,
        /// Parser error.
        source: std::net::AddrParseError,
    },
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_error_display() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err = SettingsError::Json(json_err);
        assert!(err.to_string().contains("parse settings JSON"));
    }

    #[test]
    fn invalid_address_names_field_and_value() {
        let source = "nope".parse::<std::net::SocketAddr>().unwrap_err();
        let err = SettingsError::InvalidAddress {
            field: "bridge.workerAddr",
            value: "nope".to_string(),
            source,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("bridge.workerAddr `nope` is not a socket address"), "{msg}");
    }

    #[test]
    fn io_error_from_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SettingsError = io_err.into();
        assert!(matches!(err, SettingsError::Io(_)));
    }
}
