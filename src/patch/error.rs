//! Typed failure taxonomy for the patch pipeline.
//!
//! Everything that can go wrong between "user typed a request" and "a new
//! version exists" is one of these variants. REST handlers map each variant
//! to an HTTP status; nothing here ever crashes the process.

use axum::http::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// Missing or unusable server-side credential/config. Fatal — no retry.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The model/API upstream failed. Surfaced verbatim; retryable by resubmitting.
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// The model returned nothing usable.
    #[error("model returned an empty response")]
    EmptyResponse,

    /// The plan failed schema validation. Never partially applied.
    #[error("invalid patch plan: {0}")]
    Schema(String),

    /// A replace-snippet target no longer exists in the current file content.
    /// Requires a fresh plan — the content changed since the plan was generated.
    #[error("match not found in current file content: {0:?}")]
    MatchNotFound(String),

    /// The plan references a path outside the allowed root. Rejected outright,
    /// no silent path-clamping.
    #[error("unsafe file path: {0:?}")]
    UnsafePath(String),

    /// Unknown project id (and no template slug to seed it from).
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PatchError {
    /// HTTP status for the REST boundary.
    pub fn status(&self) -> StatusCode {
        match self {
            PatchError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PatchError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            PatchError::EmptyResponse => StatusCode::BAD_GATEWAY,
            PatchError::Schema(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PatchError::MatchNotFound(_) => StatusCode::CONFLICT,
            PatchError::UnsafePath(_) => StatusCode::BAD_REQUEST,
            PatchError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
            PatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_status_passes_through() {
        let e = PatchError::Upstream {
            status: 429,
            message: "rate limited".into(),
        };
        assert_eq!(e.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn schema_maps_to_422() {
        assert_eq!(
            PatchError::Schema("bad".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn invalid_upstream_status_falls_back_to_502() {
        let e = PatchError::Upstream {
            status: 0,
            message: "broken".into(),
        };
        assert_eq!(e.status(), StatusCode::BAD_GATEWAY);
    }
}
