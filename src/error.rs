//! Error types for the overlay pipeline.
//!
//! Nothing in the load pipeline propagates an error to its caller; failures
//! are logged and surface only as the Failed tile state. These types exist
//! for the boundaries where an error value is still in flight: the asset
//! fetcher, the image decoder, and overlay provider creation.

use thiserror::Error;

/// Errors that can occur while fetching or decoding overlay imagery.
///
/// Clone-able because in-flight fetches are deduplicated and their results
/// fanned out to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OverlayError {
    /// The request could not be completed (connection failure, timeout).
    #[error("Transport error for {url}: {message}")]
    Transport { url: String, message: String },

    /// The server responded with a non-success status code.
    #[error("Received response code {status} for image {url}")]
    HttpStatus { status: u16, url: String },

    /// The response body was empty.
    #[error("Image response for {url} is empty")]
    EmptyResponse { url: String },

    /// The image bytes could not be decoded.
    #[error("Failed to decode image: {0}")]
    Decode(String),
}

/// Details of a failed overlay activation handshake.
///
/// Produced when an overlay's `create_tile_provider` fails; the activation
/// logs it and substitutes an empty provider so the tileset keeps rendering.
#[derive(Debug, Clone)]
pub struct OverlayLoadFailure {
    /// Name of the overlay that failed to activate.
    pub overlay_name: String,
    /// Human-readable description of the failure.
    pub message: String,
}

impl std::fmt::Display for OverlayLoadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Overlay '{}' failed to activate: {}",
            self.overlay_name, self.message
        )
    }
}

impl std::error::Error for OverlayLoadFailure {}
