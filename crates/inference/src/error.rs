/// Errors from collaborator calls.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The collaborator returned a non-2xx status code.
    #[error("Collaborator API error ({status}): {body}")]
    Api {
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response parsed but violates the contract (wrong count, bad box).
    #[error("Invalid collaborator response: {0}")]
    InvalidResponse(String),

    /// An inline payload (base64 raster) could not be decoded.
    #[error("Decode failed: {0}")]
    Decode(String),

    /// The image store has no object under the given reference.
    #[error("Image not found: {0}")]
    NotFound(String),
}
