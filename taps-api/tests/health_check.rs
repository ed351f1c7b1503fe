use taps::db::MemoryDatabase;
use taps_telemetry::tracing::init_test_tracing;

use crate::support::test_app::spawn_test_app;

mod support;

#[tokio::test(flavor = "multi_thread")]
async fn health_check_returns_200_without_credentials() {
    init_test_tracing();
    let app = spawn_test_app(MemoryDatabase::new()).await;

    let response = app
        .api_client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("Failed to execute request.");

    assert!(response.status().is_success());
    assert_eq!(response.text().await.unwrap(), "ok");
}
