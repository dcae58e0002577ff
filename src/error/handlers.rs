//! Standardized error handling patterns for registry and object-store responses

use crate::error::MirrorError;
use reqwest::StatusCode;

/// Standard error handler for HTTP responses
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Map a registry response status to an error carrying the operation context
    pub fn handle_registry_error(status: StatusCode, error_text: &str, operation: &str) -> MirrorError {
        let message = match status.as_u16() {
            401 => format!("Unauthorized to perform {}: {}", operation, error_text),
            403 => format!("Forbidden: insufficient permissions for {}: {}", operation, error_text),
            404 => return MirrorError::NotFound(format!("{}: {}", operation, error_text)),
            429 => format!("Rate limited during {}: {}", operation, error_text),
            500 => format!("Registry server error during {}: {}", operation, error_text),
            502 | 503 => format!("Registry unavailable for {}: {}", operation, error_text),
            _ => format!("{} failed: {}", operation, error_text),
        };

        MirrorError::Http {
            status: status.as_u16(),
            message,
        }
    }

    /// Map a blob upload response status to an error
    pub fn handle_upload_error(status: StatusCode, error_text: &str, context: &str) -> MirrorError {
        let message = match status.as_u16() {
            400 if error_text.contains("DIGEST_INVALID") => format!(
                "Digest validation failed - uploaded content does not match the expected digest: {}",
                error_text
            ),
            400 => format!("Bad request during {}: {}", context, error_text),
            401 => format!("Authentication failed during {}: {}", context, error_text),
            403 => format!("Permission denied for {}: {}", context, error_text),
            404 => format!("Repository not found or {} session expired: {}", context, error_text),
            413 => format!("Blob too large for {}: {}", context, error_text),
            507 => format!("Registry out of storage during {}: {}", context, error_text),
            _ => format!("{} failed (status {}): {}", context, status, error_text),
        };

        MirrorError::BlobTransfer(message)
    }
}

/// Network error categorization and handling
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    /// Categorize and format network errors with helpful context
    pub fn handle_network_error(error: &reqwest::Error, context: &str) -> MirrorError {
        if error.is_connect() {
            MirrorError::Connection(format!("Connection error during {}: {}", context, error))
        } else if error.is_timeout() {
            MirrorError::Network(format!("{} timeout: {}", context, error))
        } else if error.to_string().contains("certificate") {
            MirrorError::Connection(format!("TLS certificate error during {}: {}", context, error))
        } else {
            MirrorError::Network(format!("{} network error: {}", context, error))
        }
    }
}
