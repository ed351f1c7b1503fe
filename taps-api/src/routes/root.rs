use actix_web::{HttpResponse, Responder, get};
use taps::version::VERSION;

/// Banner the client logs after verifying the server.
#[get("/")]
pub async fn banner() -> impl Responder {
    HttpResponse::Ok().body(format!("taps v{VERSION}"))
}
