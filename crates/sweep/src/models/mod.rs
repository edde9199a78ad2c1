//! Domain models shared by the job, scan and action modules

mod message;
mod sender;
mod status;

pub use message::{EmailAddress, MessageId};
pub use sender::{SenderSummary, rank_by_count};
pub use status::{OperationKind, OperationStatus};
