//! Gateway error taxonomy.
//!
//! A single enum realizes every failure kind the gateway can surface, split
//! into transport-level failures (rejected before an MCP session exists, or
//! during `initialize`) and tool-level failures (returned as the content of
//! a `CallToolResult`, never as a panic).

use std::fmt;

/// Why a bearer or subject token failed authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureKind {
    MissingToken,
    BadSignature,
    BadAudience,
    Expired,
    IssuerMismatch,
    SubjectTokenInvalid,
    DownstreamRejected,
}

impl fmt::Display for AuthFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MissingToken => "missing_token",
            Self::BadSignature => "bad_signature",
            Self::BadAudience => "bad_audience",
            Self::Expired => "expired",
            Self::IssuerMismatch => "issuer_mismatch",
            Self::SubjectTokenInvalid => "subject_token_invalid",
            Self::DownstreamRejected => "downstream_rejected",
        };
        write!(f, "{s}")
    }
}

/// What kind of entity was not found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Server,
    Tool,
}

impl fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// Which upstream dependency failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamKind {
    IdpUnavailable,
    DownstreamUnavailable,
}

impl fmt::Display for UpstreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdpUnavailable => write!(f, "idp_unavailable"),
            Self::DownstreamUnavailable => write!(f, "downstream_unavailable"),
        }
    }
}

/// Every failure the gateway can produce, from token validation through
/// proxy dispatch.
#[derive(Debug, Clone)]
pub enum GatewayError {
    Unauthenticated {
        kind: AuthFailureKind,
        message: String,
    },
    PermissionDenied(String),
    NotFound {
        kind: NotFoundKind,
        name: String,
    },
    PreconditionFailedNotEnabled(String),
    InvalidArgument(String),
    ConflictToolNameCollision(String),
    Upstream {
        kind: UpstreamKind,
        message: String,
    },
    Internal(String),
}

impl GatewayError {
    pub fn missing_token() -> Self {
        Self::Unauthenticated {
            kind: AuthFailureKind::MissingToken,
            message: "no bearer token present".to_string(),
        }
    }

    pub fn expired() -> Self {
        Self::Unauthenticated {
            kind: AuthFailureKind::Expired,
            message: "token has expired".to_string(),
        }
    }

    pub fn downstream_rejected(message: impl Into<String>) -> Self {
        Self::Unauthenticated {
            kind: AuthFailureKind::DownstreamRejected,
            message: message.into(),
        }
    }

    pub fn subject_token_invalid(message: impl Into<String>) -> Self {
        Self::Unauthenticated {
            kind: AuthFailureKind::SubjectTokenInvalid,
            message: message.into(),
        }
    }

    /// Short, stable label identifying the error kind, independent of the
    /// human-readable detail carried in `Display` — used wherever a tool
    /// result needs `error`/`message` split into separate fields.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Unauthenticated { .. } => "Unauthenticated",
            Self::PermissionDenied(_) => "PermissionDenied",
            Self::NotFound { .. } => "NotFound",
            Self::PreconditionFailedNotEnabled(_) => "PreconditionFailedNotEnabled",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::ConflictToolNameCollision(_) => "ConflictToolNameCollision",
            Self::Upstream { .. } => "Upstream",
            Self::Internal(_) => "Internal",
        }
    }

    /// HTTP status a transport-level rejection should be mapped to.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthenticated { .. } => 401,
            Self::PermissionDenied(_) => 403,
            Self::NotFound { .. } => 404,
            Self::PreconditionFailedNotEnabled(_) => 412,
            Self::InvalidArgument(_) => 400,
            Self::ConflictToolNameCollision(_) => 409,
            Self::Upstream { .. } => 502,
            Self::Internal(_) => 500,
        }
    }

    /// A user-readable message suitable for `CallToolResult` content, never
    /// leaking internal detail for `Internal` failures.
    pub fn tool_error_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated { kind, message } => {
                write!(f, "unauthenticated ({kind}): {message}")
            }
            Self::PermissionDenied(msg) => write!(f, "permission denied: {msg}"),
            Self::NotFound { kind, name } => write!(f, "{kind} not found: {name}"),
            Self::PreconditionFailedNotEnabled(name) => {
                write!(f, "server not enabled for this session: {name}")
            }
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::ConflictToolNameCollision(name) => {
                write!(f, "tool name collision: {name}")
            }
            Self::Upstream { kind, message } => write!(f, "upstream error ({kind}): {message}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_maps_unauthenticated_to_401() {
        assert_eq!(GatewayError::missing_token().http_status(), 401);
    }

    #[test]
    fn http_status_maps_not_found_to_404() {
        let err = GatewayError::NotFound {
            kind: NotFoundKind::Server,
            name: "weather".to_string(),
        };
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn internal_errors_do_not_leak_detail_to_tool_callers() {
        let err = GatewayError::Internal("db connection string leaked here".to_string());
        assert_eq!(err.tool_error_message(), "internal error");
    }

    #[test]
    fn non_internal_errors_pass_their_display_through() {
        let err = GatewayError::PreconditionFailedNotEnabled("weather".to_string());
        assert!(err.tool_error_message().contains("weather"));
    }

    #[test]
    fn kind_label_is_stable_and_short() {
        assert_eq!(
            GatewayError::PermissionDenied("x".to_string()).kind_label(),
            "PermissionDenied"
        );
        assert_eq!(
            GatewayError::NotFound {
                kind: NotFoundKind::Server,
                name: "weather".to_string()
            }
            .kind_label(),
            "NotFound"
        );
    }

    #[test]
    fn subject_token_invalid_constructs_the_right_kind() {
        let err = GatewayError::subject_token_invalid("invalid_grant");
        assert!(matches!(
            err,
            GatewayError::Unauthenticated {
                kind: AuthFailureKind::SubjectTokenInvalid,
                ..
            }
        ));
    }
}
