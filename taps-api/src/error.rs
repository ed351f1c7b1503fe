use actix_web::{
    HttpResponse, ResponseError,
    http::{StatusCode, header::ContentType},
};
use taps::error::{ErrorKind, TapsError};
use taps::protocol::ErrorPayload;
use thiserror::Error;

/// Error returned by every session route.
///
/// The status code tells the client how to recover, the [`ErrorPayload`] body carries the
/// original error so the client can re-raise it.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] TapsError);

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        self.0.kind()
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::CorruptedData => StatusCode::PRECONDITION_FAILED,
            ErrorKind::DuplicatePrimaryKey => StatusCode::CONFLICT,
            ErrorKind::InvalidData => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::SessionNotFound => StatusCode::NOT_FOUND,
            ErrorKind::VersionMismatch => StatusCode::EXPECTATION_FAILED,
            ErrorKind::ConfigError | ErrorKind::DeserializationError => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let payload = ErrorPayload::from_error(&self.0);
        let body = match serde_json::to_string(&payload) {
            Ok(body) => body,
            Err(_) => format!(
                r#"{{"kind":"Unknown","class":"Unknown","message":"{}"}}"#,
                payload.class
            ),
        };

        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(body)
    }
}

#[cfg(test)]
mod tests {
    use actix_web::body::to_bytes;
    use taps::taps_error;

    use super::*;

    #[test]
    fn recovery_relevant_kinds_have_distinct_statuses() {
        let status = |kind| ApiError::from(taps_error!(kind, "failed")).status_code();

        assert_eq!(
            status(ErrorKind::CorruptedData),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(status(ErrorKind::DuplicatePrimaryKey), StatusCode::CONFLICT);
        assert_eq!(
            status(ErrorKind::InvalidData),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status(ErrorKind::SessionNotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status(ErrorKind::AuthenticationFailed),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status(ErrorKind::DatabaseQueryFailed),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[actix_web::test]
    async fn body_carries_the_error_payload() {
        let err = ApiError::from(taps_error!(
            ErrorKind::InvalidData,
            "Value exceeds the column length",
            "widgets.name"
        ));
        let body = to_bytes(err.error_response().into_body()).await.unwrap();
        let payload: ErrorPayload = serde_json::from_slice(&body).unwrap();

        assert_eq!(payload.kind, ErrorKind::InvalidData);
        assert!(payload.message.contains("widgets.name"));
    }
}
