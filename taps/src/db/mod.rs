pub mod base;
pub mod connector;
pub mod memory;
pub mod postgres;

pub use base::Database;
pub use connector::{AnyDatabase, Connector};
pub use memory::MemoryDatabase;
pub use postgres::PgDatabase;
