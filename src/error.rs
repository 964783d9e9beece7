use http::Method;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    Validation,
    Configuration,
    InvalidUrl,
    InvalidHeaderName,
    InvalidHeaderValue,
    Serialize,
    Transport,
    Timeout,
    Aborted,
    HttpStatus,
    ReadBody,
    Deserialize,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Configuration => "configuration",
            Self::InvalidUrl => "invalid_url",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::Serialize => "serialize_json",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Aborted => "aborted",
            Self::HttpStatus => "http_status",
            Self::ReadBody => "read_body",
            Self::Deserialize => "deserialize",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request configuration: {message}")]
    Validation { message: String },
    #[error("required capability missing: {message}")]
    Configuration { message: String },
    #[error("invalid request url: {url}")]
    InvalidUrl { url: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to serialize request json: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    // Display text is load-bearing: callers match on the exact message.
    #[error("Request timed out")]
    Timeout { method: Method, uri: String },
    #[error("request aborted for {method} {uri}")]
    Aborted {
        reason: Option<String>,
        method: Method,
        uri: String,
    },
    #[error("http status error {status} for {method} {uri}")]
    HttpStatus {
        status: u16,
        method: Method,
        uri: String,
        headers: Box<http::HeaderMap>,
        body: String,
    },
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: BoxError,
    },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::Validation,
            Self::Configuration { .. } => ErrorCode::Configuration,
            Self::InvalidUrl { .. } => ErrorCode::InvalidUrl,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::Serialize { .. } => ErrorCode::Serialize,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Aborted { .. } => ErrorCode::Aborted,
            Self::HttpStatus { .. } => ErrorCode::HttpStatus,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
        }
    }

    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Status code of a terminal `HttpStatus` failure, if that is what this is.
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Request URL the failing call was issued against, where one exists.
    pub fn uri(&self) -> Option<&str> {
        match self {
            Self::Transport { uri, .. }
            | Self::Timeout { uri, .. }
            | Self::Aborted { uri, .. }
            | Self::HttpStatus { uri, .. } => Some(uri),
            Self::InvalidUrl { url } => Some(url),
            _ => None,
        }
    }

    /// Cancellation reason supplied by the caller, for aborted requests.
    pub fn abort_reason(&self) -> Option<&str> {
        match self {
            Self::Aborted { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }
}
