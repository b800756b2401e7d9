use http::StatusCode;

/// Domain error that knows how to present itself over HTTP
///
/// The gateway handlers wrap implementors in the client protocol's own
/// error envelope, so the domain crates never depend on axum.
pub trait HttpError: std::error::Error {
    /// Status code returned to the client
    fn status_code(&self) -> StatusCode;

    /// Machine-readable error type (e.g. `invalid_request_error`)
    fn error_type(&self) -> &str;

    /// Message safe to show to API consumers
    fn client_message(&self) -> String;
}
