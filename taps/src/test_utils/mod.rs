//! Helpers shared by the unit and integration tests of this crate and of the server.
//!
//! [`loopback::LoopbackClient`] serves every session request in process against a
//! [`crate::db::MemoryDatabase`] and can inject the failures a real network produces.
//! [`table`] builds the tables used across tests.
pub mod loopback;
pub mod table;
