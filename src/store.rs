//! Database store: connection pool, migrations and the identity tables

use std::ops::{Deref, DerefMut};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool};

use crate::error::{AppError, Result};
use crate::models::{NewUser, Request, Role, User, UserId, Vote};

/// Database store
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `url`
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a write transaction, waiting for any other writer to finish
    pub(crate) async fn begin_write(&self) -> Result<WriteTx> {
        WriteTx::begin(&self.pool).await
    }

    // User operations

    pub async fn create_user(&self, user: &NewUser) -> Result<User> {
        let mut tx = self.begin_write().await?;
        let created = insert_user(&mut tx, user).await?;
        tx.commit().await?;

        tracing::info!(user_id = user.id, name = %user.name, "provisioned user");
        Ok(created)
    }

    pub async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let mut conn = self.pool.acquire().await?;
        fetch_user(&mut conn, id).await
    }

    /// The manager of `user_id`, if one is set
    pub async fn get_manager(&self, user_id: UserId) -> Result<Option<User>> {
        let mut conn = self.pool.acquire().await?;
        let user = fetch_user(&mut conn, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;

        match user.manager_id {
            Some(manager_id) => fetch_user(&mut conn, manager_id).await,
            None => Ok(None),
        }
    }

    /// Users whose manager is `manager_id`
    pub async fn subordinates(&self, manager_id: UserId) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, name, manager_id, active
            FROM users
            WHERE manager_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(manager_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    /// Case-insensitive substring search over user id and name
    pub async fn search_users(&self, query: &str) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, name, manager_id, active
            FROM users
            WHERE instr(CAST(id AS TEXT), ?1) > 0
               OR instr(lower(name), lower(?1)) > 0
            ORDER BY id ASC
            "#,
        )
        .bind(query)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    pub async fn count_users(&self) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        fetch_user_count(&mut conn).await
    }
}

/// Validate and insert a user inside the caller's transaction
pub(crate) async fn insert_user(conn: &mut SqliteConnection, user: &NewUser) -> Result<User> {
    if fetch_user(conn, user.id).await?.is_some() {
        return Err(AppError::DuplicateName(format!(
            "User {} already exists",
            user.id
        )));
    }

    if let Some(manager_id) = user.manager_id {
        if manager_id == user.id {
            return Err(AppError::InvalidReference(format!(
                "User {} cannot be their own manager",
                user.id
            )));
        }
        require_user(conn, manager_id).await?;
    }

    sqlx::query(
        r#"
        INSERT INTO users (id, name, manager_id, active)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(user.id)
    .bind(&user.name)
    .bind(user.manager_id)
    .bind(user.active)
    .execute(&mut *conn)
    .await?;

    Ok(User {
        id: user.id,
        name: user.name.clone(),
        manager_id: user.manager_id,
        active: user.active,
    })
}

pub(crate) async fn fetch_user_count(conn: &mut SqliteConnection) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

/// A write transaction opened with `BEGIN IMMEDIATE`.
///
/// SQLite grants the write lock when the transaction starts, so a second
/// writer waits out the busy timeout instead of failing when a deferred
/// transaction tries to upgrade its read lock. Dropping the guard without
/// committing rolls the transaction back before the connection returns to
/// the pool.
pub(crate) struct WriteTx {
    conn: Option<PoolConnection<Sqlite>>,
}

impl WriteTx {
    async fn begin(pool: &SqlitePool) -> Result<Self> {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(Self { conn: Some(conn) })
    }

    pub(crate) async fn commit(mut self) -> Result<()> {
        if let Some(conn) = self.conn.as_mut() {
            sqlx::query("COMMIT").execute(&mut **conn).await?;
        }
        // Committed; hand the connection back without a rollback
        self.conn = None;
        Ok(())
    }
}

impl Deref for WriteTx {
    type Target = SqliteConnection;

    fn deref(&self) -> &SqliteConnection {
        match &self.conn {
            Some(conn) => &**conn,
            None => unreachable!("write transaction used after commit"),
        }
    }
}

impl DerefMut for WriteTx {
    fn deref_mut(&mut self) -> &mut SqliteConnection {
        match &mut self.conn {
            Some(conn) => &mut **conn,
            None => unreachable!("write transaction used after commit"),
        }
    }
}

impl Drop for WriteTx {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                        tracing::warn!(%error, "rollback failed, closing connection");
                        drop(conn.detach());
                    }
                });
            }
            // Closing the connection discards the open transaction
            Err(_) => drop(conn.detach()),
        }
    }
}

pub(crate) async fn fetch_user(conn: &mut SqliteConnection, id: UserId) -> Result<Option<User>> {
    let row = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT id, name, manager_id, active
        FROM users
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(User::from))
}

/// Look up a user that another record is about to point at
pub(crate) async fn require_user(conn: &mut SqliteConnection, id: UserId) -> Result<User> {
    fetch_user(conn, id)
        .await?
        .ok_or_else(|| AppError::InvalidReference(format!("User {} does not exist", id)))
}

// Internal row types for sqlx

#[derive(sqlx::FromRow)]
pub(crate) struct UserRow {
    id: i64,
    name: String,
    manager_id: Option<i64>,
    active: bool,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            name: row.name,
            manager_id: row.manager_id,
            active: row.active,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct RoleRow {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) role_type: String,
    pub(crate) created_at: DateTime<Utc>,
}

impl TryFrom<RoleRow> for Role {
    type Error = AppError;

    fn try_from(row: RoleRow) -> Result<Self> {
        Ok(Role {
            id: row.id,
            name: row.name,
            description: row.description,
            role_type: row
                .role_type
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid role type: {}", e)))?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct RequestRow {
    pub(crate) id: i64,
    pub(crate) role_id: i64,
    pub(crate) requested_for_id: i64,
    pub(crate) requested_by_id: i64,
    pub(crate) comment: String,
    pub(crate) status: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl TryFrom<RequestRow> for Request {
    type Error = AppError;

    fn try_from(row: RequestRow) -> Result<Self> {
        Ok(Request {
            id: row.id,
            role_id: row.role_id,
            requested_for_id: row.requested_for_id,
            requested_by_id: row.requested_by_id,
            comment: row.comment,
            status: row
                .status
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid status: {}", e)))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct VoteRow {
    pub(crate) request_id: i64,
    pub(crate) user_id: i64,
    pub(crate) approval_status: String,
    pub(crate) updated_at: DateTime<Utc>,
}

impl TryFrom<VoteRow> for Vote {
    type Error = AppError;

    fn try_from(row: VoteRow) -> Result<Self> {
        Ok(Vote {
            request_id: row.request_id,
            approver_id: row.user_id,
            status: row
                .approval_status
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid approval status: {}", e)))?,
            updated_at: row.updated_at,
        })
    }
}
