use http::StatusCode;
use thiserror::Error;
use trident_core::HttpError;

use crate::transport::TransportError;

/// Errors surfaced to gateway callers
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The exchange did not produce response headers in time
    #[error("upstream timed out: {0}")]
    Timeout(String),

    /// The exchange was canceled before completing
    #[error("upstream request canceled")]
    Canceled,

    /// The transport process could not be started
    #[error("failed to start transport process: {0}")]
    SpawnFailure(String),

    /// The transport process rejected its local configuration
    #[error("transport configuration error: {0}")]
    Configuration(String),

    /// The transport process failed without a more specific cause
    #[error("network error: {0}")]
    Network(String),

    /// Upstream answered with a 4xx status
    #[error("upstream rejected the request ({status}): {body}")]
    BadRequest { status: u16, body: String },

    /// Upstream answered with a 5xx status
    #[error("upstream failed ({status}): {body}")]
    BadResponse { status: u16, body: String },

    /// The upstream response could not be processed after receipt
    #[error("failed to process upstream response: {0}")]
    ResponseProcessing(String),

    /// 403 caused by a prompt exceeding the model's context window
    #[error("context too large for model (403): {body}")]
    ContextTooLarge { body: String },

    /// 403 indicating the account no longer has access
    #[error("account disabled by upstream (403): {body}")]
    AccountDisabled { body: String },

    /// Any other non-success upstream answer
    #[error("upstream error ({status}): {body}")]
    Upstream { status: u16, body: String },

    /// Client request could not be encoded
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No usable upstream account
    #[error("no upstream account available")]
    NoToken,
}

impl GatewayError {
    /// Upstream HTTP status carried by this error, if any
    pub const fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::BadRequest { status, .. } | Self::BadResponse { status, .. } | Self::Upstream { status, .. } => {
                Some(*status)
            }
            Self::ContextTooLarge { .. } | Self::AccountDisabled { .. } => Some(403),
            _ => None,
        }
    }
}

impl From<TransportError> for GatewayError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Timeout(message) => Self::Timeout(message),
            TransportError::Canceled => Self::Canceled,
            TransportError::Spawn(message) => Self::SpawnFailure(message),
            TransportError::Configuration(message) => Self::Configuration(message),
            TransportError::Network(message) => Self::Network(message),
            TransportError::BadRequest { status, body } => Self::BadRequest { status, body },
            TransportError::BadResponse { status, body } => Self::BadResponse { status, body },
            TransportError::ResponseProcessing(message) => Self::ResponseProcessing(message),
        }
    }
}

impl HttpError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Canceled | Self::NoToken => StatusCode::SERVICE_UNAVAILABLE,
            Self::SpawnFailure(_) | Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Network(_) | Self::BadResponse { .. } | Self::ResponseProcessing(_) => StatusCode::BAD_GATEWAY,
            Self::BadRequest { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
            }
            Self::Upstream { status, .. } => StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
            Self::ContextTooLarge { .. } | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::AccountDisabled { .. } => StatusCode::FORBIDDEN,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::Timeout(_) => "timeout_error",
            Self::Canceled => "canceled",
            Self::SpawnFailure(_) | Self::Configuration(_) => "transport_error",
            Self::Network(_) => "network_error",
            Self::BadRequest { .. } => "upstream_bad_request",
            Self::BadResponse { .. } | Self::Upstream { .. } => "upstream_error",
            Self::ResponseProcessing(_) => "response_processing_error",
            Self::ContextTooLarge { .. } => "context_too_large",
            Self::AccountDisabled { .. } => "permission_error",
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::NoToken => "overloaded_error",
        }
    }

    fn client_message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_keep_status_and_body() {
        let error: GatewayError = TransportError::BadRequest {
            status: 429,
            body: "{\"error\":\"quota\"}".to_owned(),
        }
        .into();

        assert_eq!(error.upstream_status(), Some(429));
        assert_eq!(error.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert!(error.client_message().contains("{\"error\":\"quota\"}"));
    }

    #[test]
    fn exit_code_classes_map_to_distinct_kinds() {
        assert!(matches!(
            GatewayError::from(TransportError::Timeout("slow".to_owned())),
            GatewayError::Timeout(message) if message == "slow"
        ));
        assert!(matches!(
            GatewayError::from(TransportError::Spawn("missing".to_owned())),
            GatewayError::SpawnFailure(_)
        ));
    }

    #[test]
    fn permission_split_maps_to_http() {
        let context = GatewayError::ContextTooLarge { body: "b".to_owned() };
        let disabled = GatewayError::AccountDisabled { body: "b".to_owned() };

        assert_eq!(context.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(disabled.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(disabled.error_type(), "permission_error");
    }
}
