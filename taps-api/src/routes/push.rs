use actix_web::{
    HttpRequest, HttpResponse, Responder, post,
    http::header::CONTENT_TYPE,
    web::{Data, Json, Path},
};
use bytes::Bytes;
use taps::error::{ErrorKind, TapsError};
use taps::multipart::Envelope;
use taps::protocol::parse_checked_json;
use taps::service;
use taps::state::TransferState;
use taps::taps_error;
use taps::types::{IndexDefinition, TableSchema};
use taps::version::CHECKSUM_HEADER;
use taps_config::shared::StreamConfig;

use crate::error::ApiError;
use crate::routes::header;
use crate::session::SessionRegistry;

#[post("/sessions/{key}/push/schema")]
pub async fn push_schema(
    registry: Data<SessionRegistry>,
    key: Path<String>,
    req: HttpRequest,
    body: Bytes,
) -> Result<impl Responder, ApiError> {
    let schema: TableSchema = parse_checked_json(&body, header(&req, CHECKSUM_HEADER))?;

    let session = registry.acquire(&key).await?;
    service::push_schema(session.db()?, &schema).await?;
    registry.release(session);

    Ok(HttpResponse::Ok().finish())
}

#[post("/sessions/{key}/push/indexes")]
pub async fn push_indexes(
    registry: Data<SessionRegistry>,
    key: Path<String>,
    req: HttpRequest,
    body: Bytes,
) -> Result<impl Responder, ApiError> {
    let indexes: Vec<IndexDefinition> =
        parse_checked_json(&body, header(&req, CHECKSUM_HEADER))?;

    let session = registry.acquire(&key).await?;
    service::push_indexes(session.db()?, &indexes).await?;
    registry.release(session);

    Ok(HttpResponse::Ok().finish())
}

/// Imports one multipart batch. Checksum failures answer 412 so the client resends it.
#[post("/sessions/{key}/push/table")]
pub async fn push_table(
    registry: Data<SessionRegistry>,
    config: Data<StreamConfig>,
    key: Path<String>,
    req: HttpRequest,
    body: Bytes,
) -> Result<impl Responder, ApiError> {
    let Some(content_type) = header(&req, CONTENT_TYPE.as_str()) else {
        let err = taps_error!(ErrorKind::CorruptedData, "Batch has no content type");
        return Err(err.into());
    };
    let envelope = Envelope::from_multipart(&body, content_type)?;

    let session = registry.acquire(&key).await?;
    let response = service::push_table(session.db()?, &config, &envelope).await?;
    registry.release(session);

    Ok(Json(response))
}

/// Returns the client's stream state realigned with the rows already imported.
#[post("/sessions/{key}/push/verify_stream")]
pub async fn verify_stream(
    registry: Data<SessionRegistry>,
    config: Data<StreamConfig>,
    key: Path<String>,
    body: Bytes,
) -> Result<impl Responder, ApiError> {
    let state: TransferState = serde_json::from_slice(&body).map_err(TapsError::from)?;

    let session = registry.acquire(&key).await?;
    let state = service::push_verify_stream(session.db()?, &config, state).await?;
    registry.release(session);

    Ok(Json(state))
}

#[post("/sessions/{key}/push/reset_sequences")]
pub async fn reset_sequences(
    registry: Data<SessionRegistry>,
    key: Path<String>,
) -> Result<impl Responder, ApiError> {
    let session = registry.acquire(&key).await?;
    service::push_reset_sequences(session.db()?).await?;
    registry.release(session);

    Ok(HttpResponse::Ok().finish())
}
