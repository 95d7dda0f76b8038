//! Approval consensus for access requests
//!
//! Every approver captured when a request is created must approve it; a
//! single rejection ends it.

pub mod consensus;
pub mod engine;

pub use consensus::{next_status, Tally};
pub use engine::{ApprovalEngine, ApprovalEvent};
