use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use taps::client::SessionClient;
use taps::codec::encode_batch;
use taps::db::{Database, MemoryDatabase};
use taps::error::ErrorKind;
use taps::multipart::Envelope;
use taps::protocol::{ErrorPayload, PushTableResponse, checked_json};
use taps::state::TransferState;
use taps::test_utils::table::{memory_database, widget_rows, widgets_schema};
use taps::types::RowBatch;
use taps::version::CHECKSUM_HEADER;
use taps_telemetry::tracing::init_test_tracing;

use crate::support::test_app::spawn_test_app;

mod support;

fn widgets_envelope(ids: std::ops::RangeInclusive<i64>) -> Envelope {
    let header = widgets_schema()
        .columns
        .iter()
        .map(|column| column.name.clone())
        .collect();
    let data = widget_rows(ids).into_iter().map(|row| row.values).collect();
    let encoded = encode_batch(Some(&RowBatch::new(header, data))).unwrap();

    Envelope::new(encoded, TransferState::new("widgets", 5), Duration::ZERO)
}

async fn error_payload(response: reqwest::Response) -> ErrorPayload {
    response
        .json()
        .await
        .expect("failed to deserialize error payload")
}

#[tokio::test(flavor = "multi_thread")]
async fn sessions_can_be_opened_and_closed() {
    init_test_tracing();
    let app = spawn_test_app(MemoryDatabase::new()).await;

    let mut client = app.session_client();
    let session_uri = client.open_session().await.unwrap();
    assert!(session_uri.starts_with("/sessions/"));
    assert_eq!(
        client.pull_table_names().await.unwrap(),
        Vec::<String>::new()
    );

    client.close_session().await.unwrap();
    assert_eq!(client.session_uri(), None);

    let response = app
        .delete_authenticated(format!("{}{session_uri}", app.address))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        error_payload(response).await.kind,
        ErrorKind::SessionNotFound
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_sessions_are_reported_to_the_client() {
    init_test_tracing();
    let app = spawn_test_app(MemoryDatabase::new()).await;

    let mut client = app.session_client();
    client.resume_session("/sessions/does-not-exist".to_string());

    let err = client.pull_indexes().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionNotFound);
}

#[tokio::test(flavor = "multi_thread")]
async fn tampered_schema_is_rejected_as_corrupted() {
    init_test_tracing();
    let app = spawn_test_app(MemoryDatabase::new()).await;
    let session_uri = app.open_session().await;

    let (mut body, crc) = checked_json(&widgets_schema()).unwrap();
    body[3] ^= 0x01;

    let response = app
        .post_authenticated(format!("{}{session_uri}/push/schema", app.address))
        .header(CONTENT_TYPE, "application/json")
        .header(CHECKSUM_HEADER, crc)
        .body(body)
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(error_payload(response).await.kind, ErrorKind::CorruptedData);
    assert!(app.remote.table_names().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn pushed_batches_are_imported_once() {
    init_test_tracing();
    let remote = memory_database(vec![(widgets_schema(), vec![])]).await;
    let app = spawn_test_app(remote).await;
    let session_uri = app.open_session().await;
    let url = format!("{}{session_uri}/push/table", app.address);

    let (body, content_type) = widgets_envelope(1..=5).to_multipart().unwrap();
    let response = app
        .post_authenticated(&url)
        .header(CONTENT_TYPE, content_type.clone())
        .body(body.clone())
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::OK);
    let imported: PushTableResponse = response.json().await.unwrap();
    assert_eq!(imported.row_count, 5);
    assert_eq!(app.remote.count_rows("widgets").await.unwrap(), 5);

    // The same batch again collides with the imported keys.
    let response = app
        .post_authenticated(&url)
        .header(CONTENT_TYPE, content_type)
        .body(body)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(
        error_payload(response).await.kind,
        ErrorKind::DuplicatePrimaryKey
    );
    assert_eq!(app.remote.count_rows("widgets").await.unwrap(), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn corrupted_batches_are_rejected_before_import() {
    init_test_tracing();
    let remote = memory_database(vec![(widgets_schema(), vec![])]).await;
    let app = spawn_test_app(remote).await;
    let mut client = app.session_client();
    client.open_session().await.unwrap();

    let mut envelope = widgets_envelope(1..=5);
    let mut data = envelope.encoded_data.to_vec();
    data[0] ^= 0x55;
    envelope.encoded_data = data.into();

    let err = client.push_table(&envelope).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptedData);
    assert_eq!(app.remote.count_rows("widgets").await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn pull_table_serves_multipart_batches() {
    init_test_tracing();
    let remote = memory_database(vec![(widgets_schema(), widget_rows(1..=12))]).await;
    let app = spawn_test_app(remote).await;
    let mut client = app.session_client();
    client.open_session().await.unwrap();

    assert_eq!(client.pull_table_names().await.unwrap(), vec!["widgets"]);
    assert_eq!(client.pull_table_count("widgets").await.unwrap(), 12);
    assert_eq!(
        client.pull_schema("widgets").await.unwrap(),
        widgets_schema()
    );

    let body = client
        .pull_table(&TransferState::new("widgets", 5))
        .await
        .unwrap();
    let envelope = Envelope::from_multipart(&body.data, &body.content_type).unwrap();
    envelope.verify().unwrap();

    let batch = taps::codec::decode_batch(&envelope.encoded_data)
        .unwrap()
        .unwrap();
    assert_eq!(batch.len(), 5);
}
