use actix_web::{
    HttpResponse, Responder, delete, post,
    web::{Data, Json, Path},
};
use bytes::Bytes;
use taps::protocol::SessionResponse;

use crate::error::ApiError;
use crate::routes::text_body;
use crate::session::SessionRegistry;

/// Opens a session. The body may carry the database URL when the server has no default.
#[post("/sessions")]
pub async fn open_session(
    registry: Data<SessionRegistry>,
    body: Bytes,
) -> Result<impl Responder, ApiError> {
    let requested = text_body(&body)?;
    let requested = (!requested.is_empty()).then_some(requested.as_str());

    let key = registry.open(requested).await?;

    Ok(Json(SessionResponse {
        session_uri: format!("/sessions/{key}"),
        key,
    }))
}

#[delete("/sessions/{key}")]
pub async fn close_session(
    registry: Data<SessionRegistry>,
    key: Path<String>,
) -> Result<impl Responder, ApiError> {
    registry.close(&key).await?;

    Ok(HttpResponse::Ok().finish())
}
