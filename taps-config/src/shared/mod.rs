mod base;
mod client;
mod server;
mod stream;

pub use base::*;
pub use client::*;
pub use server::*;
pub use stream::*;
