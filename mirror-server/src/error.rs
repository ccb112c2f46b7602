use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mirror_access::Denial;
use serde_json::json;

/// The single place HTTP status mapping happens: every handler returns
/// `Result<_, ProxyError>` and lets `IntoResponse` translate it, instead of
/// hand-rolling a status code per call site.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid input")]
    ClassifyMiss,
    #[error("access denied")]
    IpDenied,
    #[error("{}", .0.reason())]
    AccessDenied(Denial),
    #[error("rate limited")]
    RateLimited,
    #[error("content type is not proxied")]
    ContentBlocked,
    #[error("response exceeds the configured size limit")]
    TooLarge,
    #[error("too many redirects")]
    RedirectLoop,
    #[error("upstream request failed: {0}")]
    UpstreamTransport(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::ClassifyMiss => StatusCode::FORBIDDEN,
            ProxyError::IpDenied => StatusCode::FORBIDDEN,
            ProxyError::AccessDenied(_) => StatusCode::FORBIDDEN,
            ProxyError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::ContentBlocked => StatusCode::FORBIDDEN,
            ProxyError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::RedirectLoop => StatusCode::LOOP_DETECTED,
            ProxyError::UpstreamTransport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<mirror_ghproxy::Error> for ProxyError {
    fn from(e: mirror_ghproxy::Error) -> Self {
        match e {
            mirror_ghproxy::Error::ClassifyMiss => ProxyError::ClassifyMiss,
            mirror_ghproxy::Error::AccessDenied(d) => ProxyError::AccessDenied(d),
            mirror_ghproxy::Error::ContentBlocked => ProxyError::ContentBlocked,
            mirror_ghproxy::Error::TooLarge => ProxyError::TooLarge,
            mirror_ghproxy::Error::RedirectLoop => ProxyError::RedirectLoop,
            mirror_ghproxy::Error::Transport(e) => ProxyError::UpstreamTransport(e.to_string()),
        }
    }
}

impl From<mirror_registry::Error> for ProxyError {
    fn from(e: mirror_registry::Error) -> Self {
        match e {
            mirror_registry::Error::Transport(e) => ProxyError::UpstreamTransport(e.to_string()),
        }
    }
}
