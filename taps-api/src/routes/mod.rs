use actix_web::HttpRequest;
use bytes::Bytes;
use taps::error::TapsResult;

pub mod health_check;
pub mod pull;
pub mod push;
pub mod root;
pub mod sessions;

fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|value| value.to_str().ok())
}

/// Reads a plain text body such as a table name or a database URL.
fn text_body(body: &Bytes) -> TapsResult<String> {
    let text = String::from_utf8(body.to_vec())?;
    Ok(text.trim().to_string())
}
