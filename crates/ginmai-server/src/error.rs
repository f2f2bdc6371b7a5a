use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ginmai_shared::protocol::ErrorBody;
use ginmai_shared::GinmaiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Domain(#[from] GinmaiError),

    #[error("Missing or malformed bearer token")]
    MissingIdentity,

    #[error("Too many requests")]
    RateLimited,
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::Domain(e) => match e {
                GinmaiError::Validation(_) => StatusCode::BAD_REQUEST,
                GinmaiError::NotFound(_) => StatusCode::NOT_FOUND,
                GinmaiError::Conflict(_) => StatusCode::CONFLICT,
                GinmaiError::Unauthorized(_) => StatusCode::FORBIDDEN,
                GinmaiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            ServerError::MissingIdentity => StatusCode::UNAUTHORIZED,
            ServerError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Machine-readable code the client maps back to a [`GinmaiError`].
    fn code(&self) -> &'static str {
        match self {
            ServerError::Domain(e) => e.code(),
            ServerError::MissingIdentity => "unauthorized",
            ServerError::RateLimited => "unavailable",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        let body = ErrorBody {
            error: self.to_string(),
            code: self.code().to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use ginmai_shared::Conflict;

    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServerError::from(GinmaiError::validation("x")), StatusCode::BAD_REQUEST),
            (ServerError::from(GinmaiError::not_found("x")), StatusCode::NOT_FOUND),
            (ServerError::from(GinmaiError::Conflict(Conflict::Full)), StatusCode::CONFLICT),
            (ServerError::from(GinmaiError::unauthorized("x")), StatusCode::FORBIDDEN),
            (ServerError::from(GinmaiError::unavailable("x")), StatusCode::SERVICE_UNAVAILABLE),
            (ServerError::MissingIdentity, StatusCode::UNAUTHORIZED),
            (ServerError::RateLimited, StatusCode::TOO_MANY_REQUESTS),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_conflict_code_round_trips() {
        let err = ServerError::from(GinmaiError::Conflict(Conflict::AlreadyJoined));
        let code = err.code();
        assert_eq!(
            GinmaiError::from_wire(code, "ignored".into()),
            GinmaiError::Conflict(Conflict::AlreadyJoined)
        );
    }
}
