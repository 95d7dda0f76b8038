//! Consensus rules for deriving a request's status from its vote table
//!
//! One rejection decides the request; approval needs every approver. Once the
//! request has left `Pending` no vote changes it again.

use serde::Serialize;

use crate::models::{ApprovalStatus, RequestStatus};

/// Counts of a request's vote rows by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
}

impl Tally {
    pub fn add(&mut self, status: ApprovalStatus, count: usize) {
        match status {
            ApprovalStatus::Pending => self.pending += count,
            ApprovalStatus::Approved => self.approved += count,
            ApprovalStatus::Rejected => self.rejected += count,
        }
    }

    pub fn from_statuses(statuses: impl IntoIterator<Item = ApprovalStatus>) -> Self {
        let mut tally = Self::default();
        for status in statuses {
            tally.add(status, 1);
        }
        tally
    }

    /// Number of approvers on the request
    pub fn total(&self) -> usize {
        self.pending + self.approved + self.rejected
    }

    pub fn is_unanimous(&self) -> bool {
        self.total() > 0 && self.approved == self.total()
    }
}

/// Status of a request after `cast` has been recorded.
///
/// `tally` must already include the new vote.
pub fn next_status(current: RequestStatus, cast: ApprovalStatus, tally: &Tally) -> RequestStatus {
    if current.is_decided() {
        return current;
    }

    match cast {
        ApprovalStatus::Pending => current,
        ApprovalStatus::Rejected => RequestStatus::Rejected,
        ApprovalStatus::Approved if tally.is_unanimous() => RequestStatus::Approved,
        ApprovalStatus::Approved => RequestStatus::Pending,
    }
}
