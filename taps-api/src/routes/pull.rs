use actix_web::{
    HttpResponse, Responder, get, post,
    web::{Data, Json, Path},
};
use bytes::Bytes;
use taps::error::TapsError;
use taps::service;
use taps::state::TransferState;
use taps_config::shared::StreamConfig;

use crate::error::ApiError;
use crate::routes::text_body;
use crate::session::SessionRegistry;

#[post("/sessions/{key}/pull/schema")]
pub async fn pull_schema(
    registry: Data<SessionRegistry>,
    key: Path<String>,
    body: Bytes,
) -> Result<impl Responder, ApiError> {
    let table = text_body(&body)?;

    let session = registry.acquire(&key).await?;
    let schema = service::pull_schema(session.db()?, &table).await?;
    registry.release(session);

    Ok(Json(schema))
}

#[get("/sessions/{key}/pull/indexes")]
pub async fn pull_indexes(
    registry: Data<SessionRegistry>,
    key: Path<String>,
) -> Result<impl Responder, ApiError> {
    let session = registry.acquire(&key).await?;
    let indexes = service::pull_indexes(session.db()?).await?;
    registry.release(session);

    Ok(Json(indexes))
}

#[get("/sessions/{key}/pull/table_names")]
pub async fn pull_table_names(
    registry: Data<SessionRegistry>,
    key: Path<String>,
) -> Result<impl Responder, ApiError> {
    let session = registry.acquire(&key).await?;
    let tables = service::pull_table_names(session.db()?).await?;
    registry.release(session);

    Ok(Json(tables))
}

#[post("/sessions/{key}/pull/table_count")]
pub async fn pull_table_count(
    registry: Data<SessionRegistry>,
    key: Path<String>,
    body: Bytes,
) -> Result<impl Responder, ApiError> {
    let table = text_body(&body)?;

    let session = registry.acquire(&key).await?;
    let count = service::pull_table_count(session.db()?, &table).await?;
    registry.release(session);

    Ok(Json(count))
}

/// Serves the next batch of the table named in the posted stream state.
#[post("/sessions/{key}/pull/table")]
pub async fn pull_table(
    registry: Data<SessionRegistry>,
    config: Data<StreamConfig>,
    key: Path<String>,
    body: Bytes,
) -> Result<impl Responder, ApiError> {
    let state: TransferState = serde_json::from_slice(&body).map_err(TapsError::from)?;

    let session = registry.acquire(&key).await?;
    let batch = service::pull_table(session.db()?, &config, state).await?;
    registry.release(session);

    Ok(HttpResponse::Ok()
        .content_type(batch.content_type)
        .body(batch.data))
}
