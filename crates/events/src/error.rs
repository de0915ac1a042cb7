//! Decoding error types.

use thiserror::Error;

/// Errors raised while decoding broker payloads.
///
/// All of these are permanent: redelivering the same bytes yields the same
/// error, so consumers drop the message instead of retrying it.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not valid JSON or does not match the expected shape.
    #[error("Malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The envelope carries an event type this build does not know.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// The event type is known but the schema version is not.
    #[error("Unsupported schema version {version} for event type {event_type}")]
    UnsupportedVersion { event_type: String, version: u32 },

    /// The payload decoded but violates an invariant of the event.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A reserved CDC metadata key is absent.
    #[error("Missing metadata field: {0}")]
    MissingMetadata(&'static str),

    /// A CDC operation code outside {c, r, u, d}.
    #[error("Unknown operation code: {0}")]
    UnknownOperation(String),

    /// A timestamp column in neither accepted encoding.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Result type for decoding operations.
pub type Result<T> = std::result::Result<T, DecodeError>;
