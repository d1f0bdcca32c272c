//! Batch change sets: several sub-requests submitted as one all-or-nothing unit.

pub mod coordinator;
pub mod handler;
pub mod property;

pub use coordinator::{ChangeSetRequestItem, SubRequest, SubResponse};
pub use handler::{DataModificationHandler, SubRequestHandler};
pub use property::{ChangeSetFailure, ChangeSetOutcome, ChangeSetProperty};
