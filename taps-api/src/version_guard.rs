use actix_web::{
    Error,
    body::MessageBody,
    dev::{ServiceRequest, ServiceResponse},
    error::ErrorExpectationFailed,
    middleware::Next,
};
use taps::version::{VERSION, VERSION_HEADER, is_compatible};
use tracing::warn;

/// Rejects requests whose protocol version header is missing or incompatible with this
/// server before any other processing.
pub async fn version_guard(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let client_version = req
        .headers()
        .get(VERSION_HEADER)
        .and_then(|value| value.to_str().ok());

    if !client_version.is_some_and(is_compatible) {
        warn!(
            client_version = client_version.unwrap_or("none"),
            server_version = VERSION,
            "rejected request with incompatible protocol version"
        );
        return Err(ErrorExpectationFailed(format!(
            "taps version mismatch: the server runs taps {VERSION}, upgrade or downgrade the client to match"
        )));
    }

    next.call(req).await
}
