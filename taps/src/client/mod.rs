mod base;
mod http;

pub use base::SessionClient;
pub use http::HttpSessionClient;
