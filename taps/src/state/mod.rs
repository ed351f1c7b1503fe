mod operation;
mod transfer;

pub use operation::{Direction, OperationState, resume_file_name};
pub use transfer::{CHUNKSIZE_TRAINING_WINDOW, TransferState};
