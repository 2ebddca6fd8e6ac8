use buscmd_frame::ResponseCode;

/// Errors that can occur in listener, registry and master operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] buscmd_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] buscmd_frame::FrameError),

    /// Every deferred-response slot is in use.
    #[error("deferred response registry full ({capacity} slots)")]
    RegistryFull { capacity: usize },

    /// The configuration is out of range.
    #[error("invalid listener config: {0}")]
    InvalidConfig(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The device answered with a response the request cannot use.
    #[error("unexpected {code} response to {command}")]
    UnexpectedResponse {
        command: &'static str,
        code: ResponseCode,
    },

    /// A deferred response did not become ready in time.
    #[error("deferred response {response_id} from 0x{address:02X} not ready after {timeout:?}")]
    DeferredTimeout {
        address: u8,
        response_id: u8,
        timeout: std::time::Duration,
    },
}

pub type Result<T> = std::result::Result<T, ListenerError>;
