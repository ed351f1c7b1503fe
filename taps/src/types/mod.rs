mod batch;
mod cell;
mod schema;

pub use batch::RowBatch;
pub use cell::{Cell, TableRow};
pub use schema::{ColumnSchema, IndexDefinition, TableSchema};
