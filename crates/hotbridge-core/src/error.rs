//! Parse errors for core identity types.

use thiserror::Error;

/// Errors raised while parsing device identity values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A vendor or product id was not 1-4 hexadecimal digits.
    #[error("invalid hexadecimal id '{0}': expected 1-4 hex digits with optional 0x prefix")]
    InvalidHexId(String),

    /// A bus location did not have the `<bus>-<port path>` shape.
    #[error("invalid bus location '{0}': expected '<bus>-<port path>'")]
    InvalidBusLocation(String),

    /// An action name other than `attach` or `detach`.
    #[error("invalid device action '{0}': expected 'attach' or 'detach'")]
    InvalidAction(String),
}

/// Result type for core parsing operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::InvalidHexId("zz".to_string());
        assert_eq!(
            err.to_string(),
            "invalid hexadecimal id 'zz': expected 1-4 hex digits with optional 0x prefix"
        );
    }
}
