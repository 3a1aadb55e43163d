use thiserror::Error;

/// Failures of the admin surface.
#[derive(Error, Debug)]
pub enum AdminError {
    /// Binding or accepting on the socket failed
    #[error("admin socket error: {0}")]
    Io(#[from] std::io::Error),

    /// The server info document could not be encoded
    #[error("failed to encode server info: {0}")]
    Encode(#[from] serde_json::Error),
}
