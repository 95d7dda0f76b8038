//! Request ledger: access requests and their approver vote tables

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::approval::Tally;
use crate::error::{AppError, Result};
use crate::models::{ApprovalStatus, Request, RequestId, RequestStatus, Role, RoleId, UserId, Vote};
use crate::store::{RequestRow, RoleRow, Store, VoteRow};

const REQUEST_COLUMNS: &str = "r.id, r.role_id, r.requested_for_id, r.requested_by_id, r.comment, r.status, r.created_at, r.updated_at";

/// Read access to stored requests.
///
/// Requests are created and voted on through
/// [`ApprovalEngine`](crate::approval::ApprovalEngine), which owns the write
/// path; everything here is read-only.
#[derive(Clone)]
pub struct RequestLedger {
    store: Store,
}

impl RequestLedger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Most recent request for the pair that has not been rejected.
    ///
    /// Callers consult this before creating a request so that a role is never
    /// requested twice for the same user while one request is still live.
    pub async fn get_active_request(
        &self,
        role_id: RoleId,
        user_id: UserId,
    ) -> Result<Option<Request>> {
        let mut conn = self.store.pool().acquire().await?;
        fetch_active_request(&mut conn, role_id, user_id).await
    }

    pub async fn get(&self, id: RequestId) -> Result<Request> {
        let mut conn = self.store.pool().acquire().await?;
        fetch_request(&mut conn, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Request {} not found", id)))
    }

    /// The vote table of a request, ordered by approver id
    pub async fn votes(&self, id: RequestId) -> Result<Vec<Vote>> {
        let mut conn = self.store.pool().acquire().await?;
        if fetch_request(&mut conn, id).await?.is_none() {
            return Err(AppError::NotFound(format!("Request {} not found", id)));
        }
        fetch_votes(&mut conn, id).await
    }

    /// Vote counts for a request, e.g. for showing "2 of 3 approved"
    pub async fn tally(&self, id: RequestId) -> Result<Tally> {
        let mut conn = self.store.pool().acquire().await?;
        if fetch_request(&mut conn, id).await?.is_none() {
            return Err(AppError::NotFound(format!("Request {} not found", id)));
        }
        count_votes(&mut conn, id).await
    }

    /// All requests, most recent first
    pub async fn list(&self) -> Result<Vec<Request>> {
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {} FROM requests r ORDER BY r.id DESC",
            REQUEST_COLUMNS
        ))
        .fetch_all(self.store.pool())
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Substring search over the role name and the target's and requester's
    /// names and ids. Matching ignores ASCII case.
    pub async fn search(&self, query: &str) -> Result<Vec<Request>> {
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            r#"
            SELECT {}
            FROM requests r
            JOIN roles ro ON ro.id = r.role_id
            JOIN users f ON f.id = r.requested_for_id
            JOIN users b ON b.id = r.requested_by_id
            WHERE instr(lower(ro.name), lower(?1)) > 0
               OR instr(lower(f.name), lower(?1)) > 0
               OR instr(CAST(f.id AS TEXT), ?1) > 0
               OR instr(lower(b.name), lower(?1)) > 0
               OR instr(CAST(b.id AS TEXT), ?1) > 0
            ORDER BY r.id DESC
            "#,
            REQUEST_COLUMNS
        ))
        .bind(query)
        .fetch_all(self.store.pool())
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Requests still waiting on `user_id`'s vote, oldest first
    pub async fn pending_approvals(&self, user_id: UserId) -> Result<Vec<Request>> {
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            r#"
            SELECT {}
            FROM requests r
            JOIN request_approvers ra ON ra.request_id = r.id
            WHERE ra.user_id = ?
              AND ra.approval_status = 'pending'
              AND r.status = 'pending'
            ORDER BY r.id ASC
            "#,
            REQUEST_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(self.store.pool())
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Requests made by `user_id`, most recent first
    pub async fn requests_by(&self, user_id: UserId) -> Result<Vec<Request>> {
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {} FROM requests r WHERE r.requested_by_id = ? ORDER BY r.id DESC",
            REQUEST_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(self.store.pool())
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Requests made on behalf of `user_id`, most recent first
    pub async fn requests_for(&self, user_id: UserId) -> Result<Vec<Request>> {
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT {} FROM requests r WHERE r.requested_for_id = ? ORDER BY r.id DESC",
            REQUEST_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(self.store.pool())
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Roles currently granted to `user_id` through an approved request
    pub async fn active_roles(&self, user_id: UserId) -> Result<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT DISTINCT ro.id, ro.name, ro.description, ro.role_type, ro.created_at
            FROM roles ro
            JOIN requests r ON r.role_id = ro.id
            WHERE r.requested_for_id = ?
              AND r.status = 'approved'
            ORDER BY ro.name ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.store.pool())
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }
}

pub(crate) async fn fetch_request(conn: &mut SqliteConnection, id: RequestId) -> Result<Option<Request>> {
    let row = sqlx::query_as::<_, RequestRow>(&format!(
        "SELECT {} FROM requests r WHERE r.id = ?",
        REQUEST_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(Request::try_from).transpose()
}

pub(crate) async fn fetch_active_request(
    conn: &mut SqliteConnection,
    role_id: RoleId,
    user_id: UserId,
) -> Result<Option<Request>> {
    let row = sqlx::query_as::<_, RequestRow>(&format!(
        r#"
        SELECT {}
        FROM requests r
        WHERE r.role_id = ? AND r.requested_for_id = ? AND r.status <> 'rejected'
        ORDER BY r.id DESC
        LIMIT 1
        "#,
        REQUEST_COLUMNS
    ))
    .bind(role_id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(Request::try_from).transpose()
}

pub(crate) async fn insert_request(
    conn: &mut SqliteConnection,
    role_id: RoleId,
    requested_for_id: UserId,
    requested_by_id: UserId,
    comment: &str,
    now: DateTime<Utc>,
) -> Result<Request> {
    let status = RequestStatus::Pending;

    let id = sqlx::query(
        r#"
        INSERT INTO requests (role_id, requested_for_id, requested_by_id, comment, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(role_id)
    .bind(requested_for_id)
    .bind(requested_by_id)
    .bind(comment)
    .bind(status.as_str())
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(Request {
        id,
        role_id,
        requested_for_id,
        requested_by_id,
        comment: comment.to_string(),
        status,
        created_at: now,
        updated_at: now,
    })
}

pub(crate) async fn insert_vote_row(
    conn: &mut SqliteConnection,
    request_id: RequestId,
    approver_id: UserId,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO request_approvers (request_id, user_id, approval_status, updated_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(request_id)
    .bind(approver_id)
    .bind(ApprovalStatus::Pending.as_str())
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn fetch_votes(conn: &mut SqliteConnection, request_id: RequestId) -> Result<Vec<Vote>> {
    let rows = sqlx::query_as::<_, VoteRow>(
        r#"
        SELECT request_id, user_id, approval_status, updated_at
        FROM request_approvers
        WHERE request_id = ?
        ORDER BY user_id ASC
        "#,
    )
    .bind(request_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(|r| r.try_into()).collect()
}

/// Overwrite an approver's row. Returns `false` if the user has no row.
pub(crate) async fn record_vote(
    conn: &mut SqliteConnection,
    request_id: RequestId,
    approver_id: UserId,
    status: ApprovalStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE request_approvers
        SET approval_status = ?, updated_at = ?
        WHERE request_id = ? AND user_id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(now)
    .bind(request_id)
    .bind(approver_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn is_approver(
    conn: &mut SqliteConnection,
    request_id: RequestId,
    user_id: UserId,
) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM request_approvers WHERE request_id = ? AND user_id = ?",
    )
    .bind(request_id)
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count > 0)
}

/// Count the rows of a request's vote table by status
pub(crate) async fn count_votes(conn: &mut SqliteConnection, request_id: RequestId) -> Result<Tally> {
    let counts = sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT approval_status, COUNT(*)
        FROM request_approvers
        WHERE request_id = ?
        GROUP BY approval_status
        "#,
    )
    .bind(request_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut tally = Tally::default();
    for (status, count) in counts {
        let status: ApprovalStatus = status
            .parse()
            .map_err(|e| AppError::Internal(format!("Invalid approval status: {}", e)))?;
        tally.add(status, count as usize);
    }
    Ok(tally)
}

pub(crate) async fn update_status(
    conn: &mut SqliteConnection,
    request_id: RequestId,
    status: RequestStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE requests SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(now)
        .bind(request_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}
