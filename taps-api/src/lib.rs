//! HTTP server side of taps.
//!
//! Exposes the session API that push and pull operations talk to. Every route except the
//! health check sits behind HTTP Basic authentication and the protocol version guard.

pub mod authentication;
pub mod error;
pub mod routes;
pub mod session;
pub mod startup;
pub mod version_guard;
