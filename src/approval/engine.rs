//! Approval engine for access requests
//!
//! The engine handles:
//! - Approver snapshots when a request is created
//! - Recording approver votes and recomputing the request status
//! - Administrative revocation
//! - Event broadcasting

use std::collections::BTreeSet;

use chrono::Utc;
use sqlx::SqliteConnection;
use tokio::sync::{broadcast, Mutex};

use super::consensus::{next_status, Tally};
use crate::error::{AppError, Result};
use crate::graph::{require_role, role_approver_ids};
use crate::ledger;
use crate::models::{ApprovalStatus, Request, RequestId, RequestStatus, RoleId, UserId};
use crate::store::{require_user, Store};

/// Events emitted by the approval engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalEvent {
    /// A request was created with a fixed approver snapshot
    RequestCreated {
        request_id: RequestId,
        role_id: RoleId,
        requested_for_id: UserId,
        approvers: Vec<UserId>,
    },
    /// An approver's vote was recorded
    VoteCast {
        request_id: RequestId,
        approver_id: UserId,
        decision: ApprovalStatus,
    },
    /// The aggregate status of a request changed
    StatusChanged {
        request_id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
    },
}

/// Creates requests and drives them to a decision
pub struct ApprovalEngine {
    store: Store,
    /// Serializes request creation, votes and revocation within the process
    write_gate: Mutex<()>,
    event_tx: broadcast::Sender<ApprovalEvent>,
}

impl ApprovalEngine {
    pub fn new(store: Store) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            store,
            write_gate: Mutex::new(()),
            event_tx,
        }
    }

    /// Subscribe to approval events
    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalEvent> {
        self.event_tx.subscribe()
    }

    /// Create a request to grant `role_id` to `requested_for_id`.
    ///
    /// The approvers are the role's approvers at this instant plus the
    /// target's manager, each starting at `Pending`. Later changes to the
    /// role's approvers do not affect the request.
    pub async fn create_request(
        &self,
        role_id: RoleId,
        requested_for_id: UserId,
        requested_by_id: UserId,
        comment: impl Into<String>,
    ) -> Result<Request> {
        let comment = comment.into();
        let _guard = self.write_gate.lock().await;
        let mut tx = self.store.begin_write().await?;

        let (request, approvers) =
            create_in(&mut tx, role_id, requested_for_id, requested_by_id, &comment).await?;

        tx.commit().await?;

        self.announce_created(&request, approvers);
        Ok(request)
    }

    /// Request every role in `role_ids` for every user in `user_ids`.
    ///
    /// Pairs that already have an active request are skipped. The batch is
    /// atomic: an invalid id anywhere means no request is created.
    pub async fn assign_access(
        &self,
        user_ids: &[UserId],
        role_ids: &[RoleId],
        requested_by_id: UserId,
        comment: &str,
    ) -> Result<Vec<Request>> {
        let _guard = self.write_gate.lock().await;
        let mut tx = self.store.begin_write().await?;

        let mut created = Vec::new();
        for &user_id in user_ids {
            for &role_id in role_ids {
                if let Some(active) = ledger::fetch_active_request(&mut tx, role_id, user_id).await? {
                    tracing::debug!(
                        request_id = active.id,
                        role_id,
                        user_id,
                        "active request exists, skipping"
                    );
                    continue;
                }
                created.push(create_in(&mut tx, role_id, user_id, requested_by_id, comment).await?);
            }
        }

        tx.commit().await?;

        let mut requests = Vec::with_capacity(created.len());
        for (request, approvers) in created {
            self.announce_created(&request, approvers);
            requests.push(request);
        }
        Ok(requests)
    }

    /// Record `voter_id`'s decision and recompute the request status.
    ///
    /// Only approvers in the request's snapshot may vote. A `Pending`
    /// decision changes nothing. Votes on a decided request are stored but
    /// leave its status alone.
    pub async fn cast_vote(
        &self,
        request_id: RequestId,
        voter_id: UserId,
        decision: ApprovalStatus,
    ) -> Result<Request> {
        let _guard = self.write_gate.lock().await;
        let mut tx = self.store.begin_write().await?;

        let outcome = vote_in(&mut tx, request_id, voter_id, decision).await?;
        let Some(tally) = outcome.tally else {
            return Ok(outcome.request);
        };

        tx.commit().await?;

        let status = outcome.request.status;
        tracing::info!(
            request_id,
            voter_id,
            decision = decision.as_str(),
            approved = tally.approved,
            total = tally.total(),
            status = status.as_str(),
            "vote recorded"
        );

        let _ = self.event_tx.send(ApprovalEvent::VoteCast {
            request_id,
            approver_id: voter_id,
            decision,
        });
        if status != outcome.previous {
            let _ = self.event_tx.send(ApprovalEvent::StatusChanged {
                request_id,
                from: outcome.previous,
                to: status,
            });
        }

        Ok(outcome.request)
    }

    /// Withdraw a request or granted access, bypassing the vote table
    pub async fn revoke(&self, request_id: RequestId) -> Result<Request> {
        let _guard = self.write_gate.lock().await;
        let mut tx = self.store.begin_write().await?;
        let (request, previous) = revoke_in(&mut tx, request_id).await?;
        tx.commit().await?;

        tracing::info!(request_id, from = previous.as_str(), "request revoked");

        let _ = self.event_tx.send(ApprovalEvent::StatusChanged {
            request_id,
            from: previous,
            to: RequestStatus::Revoked,
        });

        Ok(request)
    }

    fn announce_created(&self, request: &Request, approvers: Vec<UserId>) {
        tracing::info!(
            request_id = request.id,
            role_id = request.role_id,
            requested_for_id = request.requested_for_id,
            requested_by_id = request.requested_by_id,
            approvers = approvers.len(),
            "created request"
        );
        if approvers.is_empty() {
            tracing::warn!(request_id = request.id, "request has no approvers");
        }

        let _ = self.event_tx.send(ApprovalEvent::RequestCreated {
            request_id: request.id,
            role_id: request.role_id,
            requested_for_id: request.requested_for_id,
            approvers,
        });
    }
}

/// What a single vote did to its request
pub(crate) struct VoteOutcome {
    pub(crate) request: Request,
    pub(crate) previous: RequestStatus,
    /// `None` when the decision was `Pending` and nothing was written
    pub(crate) tally: Option<Tally>,
}

pub(crate) async fn vote_in(
    conn: &mut SqliteConnection,
    request_id: RequestId,
    voter_id: UserId,
    decision: ApprovalStatus,
) -> Result<VoteOutcome> {
    let mut request = ledger::fetch_request(conn, request_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Request {} not found", request_id)))?;
    let previous = request.status;

    if !ledger::is_approver(conn, request_id, voter_id).await? {
        tracing::warn!(request_id, voter_id, "vote refused: not an approver");
        return Err(AppError::Unauthorized(format!(
            "User {} is not an approver for request {}",
            voter_id, request_id
        )));
    }

    if decision == ApprovalStatus::Pending {
        tracing::debug!(request_id, voter_id, "pending vote ignored");
        return Ok(VoteOutcome {
            request,
            previous,
            tally: None,
        });
    }

    let now = Utc::now();
    ledger::record_vote(conn, request_id, voter_id, decision, now).await?;

    let tally = ledger::count_votes(conn, request_id).await?;
    let status = next_status(previous, decision, &tally);

    if status != previous {
        ledger::update_status(conn, request_id, status, now).await?;
        request.status = status;
        request.updated_at = now;
    }

    Ok(VoteOutcome {
        request,
        previous,
        tally: Some(tally),
    })
}

/// Move a request to `Revoked`, returning it with its previous status
pub(crate) async fn revoke_in(
    conn: &mut SqliteConnection,
    request_id: RequestId,
) -> Result<(Request, RequestStatus)> {
    let mut request = ledger::fetch_request(conn, request_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Request {} not found", request_id)))?;

    if !request.status.can_revoke() {
        return Err(AppError::InvalidTransition(format!(
            "Cannot revoke request {} with status: {}",
            request_id,
            request.status.as_str()
        )));
    }

    let now = Utc::now();
    let previous = request.status;
    ledger::update_status(conn, request_id, RequestStatus::Revoked, now).await?;

    request.status = RequestStatus::Revoked;
    request.updated_at = now;
    Ok((request, previous))
}

pub(crate) async fn create_in(
    conn: &mut SqliteConnection,
    role_id: RoleId,
    requested_for_id: UserId,
    requested_by_id: UserId,
    comment: &str,
) -> Result<(Request, Vec<UserId>)> {
    require_role(conn, role_id).await?;
    require_user(conn, requested_by_id).await?;
    let approvers = snapshot_approvers(conn, role_id, requested_for_id).await?;

    let now = Utc::now();
    let request =
        ledger::insert_request(conn, role_id, requested_for_id, requested_by_id, comment, now)
            .await?;
    for &approver_id in &approvers {
        ledger::insert_vote_row(conn, request.id, approver_id, now).await?;
    }

    Ok((request, approvers))
}

/// Role approvers plus the target's manager, each counted once
async fn snapshot_approvers(
    conn: &mut SqliteConnection,
    role_id: RoleId,
    requested_for_id: UserId,
) -> Result<Vec<UserId>> {
    let target = require_user(conn, requested_for_id).await?;

    let mut approvers: BTreeSet<UserId> = role_approver_ids(conn, role_id).await?.into_iter().collect();
    if let Some(manager_id) = target.manager_id {
        approvers.insert(manager_id);
    }

    Ok(approvers.into_iter().collect())
}
