//! Role hierarchy and role approvers
//!
//! Parent and child sets are two projections of a single `role_parents`
//! relation, so every edge is written once and is visible from both ends.
//! Edge insertion checks, before writing:
//! - permission roles never gain children
//! - a role is never both parent and child of another role
//! - the hierarchy stays acyclic

use chrono::Utc;
use sqlx::SqliteConnection;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{NewRole, Role, RoleId, User, UserId};
use crate::store::{require_user, RoleRow, Store, UserRow};

/// Which end of the edge the other role sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    Parent,
    Child,
}

/// Roles, their hierarchy edges and their approvers
pub struct RoleGraph {
    store: Store,
    /// Serializes graph mutations within the process
    write_gate: Mutex<()>,
}

impl RoleGraph {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            write_gate: Mutex::new(()),
        }
    }

    /// Create a role together with its initial parents, children and approvers.
    ///
    /// Nothing is written unless every edge passes validation.
    pub async fn create_role(&self, new_role: NewRole) -> Result<Role> {
        let _guard = self.write_gate.lock().await;
        let mut tx = self.store.begin_write().await?;
        let role = create_role_in(&mut tx, &new_role).await?;
        tx.commit().await?;

        tracing::info!(
            role_id = role.id,
            name = %role.name,
            role_type = role.role_type.as_str(),
            parents = new_role.parents.len(),
            children = new_role.children.len(),
            approvers = new_role.approvers.len(),
            "created role"
        );

        Ok(role)
    }

    pub async fn add_parent(&self, role_id: RoleId, parent_id: RoleId) -> Result<()> {
        self.add_edges(role_id, &[parent_id], Relation::Parent).await
    }

    /// Add several parents; the first failure rolls back the whole batch
    pub async fn add_parents(&self, role_id: RoleId, parent_ids: &[RoleId]) -> Result<()> {
        self.add_edges(role_id, parent_ids, Relation::Parent).await
    }

    pub async fn add_child(&self, role_id: RoleId, child_id: RoleId) -> Result<()> {
        self.add_edges(role_id, &[child_id], Relation::Child).await
    }

    /// Add several children; the first failure rolls back the whole batch
    pub async fn add_children(&self, role_id: RoleId, child_ids: &[RoleId]) -> Result<()> {
        self.add_edges(role_id, child_ids, Relation::Child).await
    }

    async fn add_edges(&self, role_id: RoleId, others: &[RoleId], relation: Relation) -> Result<()> {
        let _guard = self.write_gate.lock().await;
        let mut tx = self.store.begin_write().await?;

        let role = fetch_role(&mut tx, role_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Role {} not found", role_id)))?;

        let mut added = 0;
        for &other_id in others {
            let other = require_role(&mut tx, other_id).await?;
            let inserted = match relation {
                Relation::Parent => link(&mut tx, &role, &other).await?,
                Relation::Child => link(&mut tx, &other, &role).await?,
            };
            if inserted {
                added += 1;
            }
        }

        tx.commit().await?;

        tracing::info!(role_id, relation = ?relation, added, "updated role hierarchy");
        Ok(())
    }

    /// Add an approver. Adding an existing approver is a no-op.
    pub async fn add_approver(&self, role_id: RoleId, user_id: UserId) -> Result<()> {
        self.add_approvers(role_id, &[user_id]).await
    }

    pub async fn add_approvers(&self, role_id: RoleId, user_ids: &[UserId]) -> Result<()> {
        let _guard = self.write_gate.lock().await;
        let mut tx = self.store.begin_write().await?;

        if fetch_role(&mut tx, role_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Role {} not found", role_id)));
        }

        let mut added = 0;
        for &user_id in user_ids {
            require_user(&mut tx, user_id).await?;
            if insert_approver(&mut tx, role_id, user_id).await? {
                added += 1;
            } else {
                tracing::debug!(role_id, user_id, "approver already assigned");
            }
        }

        tx.commit().await?;

        tracing::info!(role_id, added, "updated role approvers");
        Ok(())
    }

    // Read projections

    pub async fn get_role(&self, id: RoleId) -> Result<Role> {
        let mut conn = self.store.pool().acquire().await?;
        fetch_role(&mut conn, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Role {} not found", id)))
    }

    pub async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let mut conn = self.store.pool().acquire().await?;
        fetch_role_by_name(&mut conn, name).await
    }

    pub async fn list_roles(&self) -> Result<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT id, name, description, role_type, created_at
            FROM roles
            ORDER BY name ASC
            "#,
        )
        .fetch_all(self.store.pool())
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Case-insensitive substring search over role names
    pub async fn search_roles(&self, query: &str) -> Result<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT id, name, description, role_type, created_at
            FROM roles
            WHERE instr(lower(name), lower(?)) > 0
            ORDER BY name ASC
            "#,
        )
        .bind(query)
        .fetch_all(self.store.pool())
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    pub async fn parents_of(&self, role_id: RoleId) -> Result<Vec<Role>> {
        let mut conn = self.store.pool().acquire().await?;
        ensure_role(&mut conn, role_id).await?;

        let rows = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT r.id, r.name, r.description, r.role_type, r.created_at
            FROM roles r
            JOIN role_parents rp ON rp.parent_id = r.id
            WHERE rp.role_id = ?
            ORDER BY r.id ASC
            "#,
        )
        .bind(role_id)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    pub async fn children_of(&self, role_id: RoleId) -> Result<Vec<Role>> {
        let mut conn = self.store.pool().acquire().await?;
        ensure_role(&mut conn, role_id).await?;

        let rows = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT r.id, r.name, r.description, r.role_type, r.created_at
            FROM roles r
            JOIN role_parents rp ON rp.role_id = r.id
            WHERE rp.parent_id = ?
            ORDER BY r.id ASC
            "#,
        )
        .bind(role_id)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    pub async fn approvers_of(&self, role_id: RoleId) -> Result<Vec<User>> {
        let mut conn = self.store.pool().acquire().await?;
        ensure_role(&mut conn, role_id).await?;

        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.id, u.name, u.manager_id, u.active
            FROM users u
            JOIN role_approvers ra ON ra.user_id = u.id
            WHERE ra.role_id = ?
            ORDER BY u.id ASC
            "#,
        )
        .bind(role_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    /// Roles that `user_id` approves requests for
    pub async fn approver_for(&self, user_id: UserId) -> Result<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT r.id, r.name, r.description, r.role_type, r.created_at
            FROM roles r
            JOIN role_approvers ra ON ra.role_id = r.id
            WHERE ra.user_id = ?
            ORDER BY r.id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.store.pool())
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }
}

/// Validate and insert a role and its edges inside the caller's transaction
pub(crate) async fn create_role_in(conn: &mut SqliteConnection, new_role: &NewRole) -> Result<Role> {
    if fetch_role_by_name(conn, &new_role.name).await?.is_some() {
        return Err(AppError::DuplicateName(format!(
            "A role named '{}' already exists",
            new_role.name
        )));
    }

    if !new_role.role_type.allows_children() && !new_role.children.is_empty() {
        return Err(AppError::HierarchyViolation(format!(
            "Permission role '{}' cannot have children",
            new_role.name
        )));
    }

    if let Some(both) = new_role
        .parents
        .iter()
        .find(|id| new_role.children.contains(id))
    {
        return Err(AppError::HierarchyViolation(format!(
            "Role {} cannot be both a parent and a child of '{}'",
            both, new_role.name
        )));
    }

    let mut parents = Vec::with_capacity(new_role.parents.len());
    for &id in &new_role.parents {
        parents.push(require_role(conn, id).await?);
    }
    let mut children = Vec::with_capacity(new_role.children.len());
    for &id in &new_role.children {
        children.push(require_role(conn, id).await?);
    }
    for &id in &new_role.approvers {
        require_user(conn, id).await?;
    }

    let role = insert_role(conn, new_role).await?;

    for parent in &parents {
        link(conn, &role, parent).await?;
    }
    for child in &children {
        link(conn, child, &role).await?;
    }
    for &user_id in &new_role.approvers {
        insert_approver(conn, role.id, user_id).await?;
    }

    Ok(role)
}

/// Insert the edge `child -> parent` after checking the hierarchy rules.
///
/// Returns `false` when the edge already exists.
async fn link(conn: &mut SqliteConnection, child: &Role, parent: &Role) -> Result<bool> {
    if child.id == parent.id {
        return Err(AppError::HierarchyViolation(format!(
            "Role '{}' cannot be its own parent",
            child.name
        )));
    }

    if !parent.role_type.allows_children() {
        return Err(AppError::HierarchyViolation(format!(
            "Permission role '{}' cannot have children",
            parent.name
        )));
    }

    if edge_exists(conn, child.id, parent.id).await? {
        tracing::debug!(child_id = child.id, parent_id = parent.id, "edge already present");
        return Ok(false);
    }

    if edge_exists(conn, parent.id, child.id).await? {
        return Err(AppError::HierarchyViolation(format!(
            "Role '{}' is already a child of '{}'",
            parent.name, child.name
        )));
    }

    if is_descendant(conn, child.id, parent.id).await? {
        return Err(AppError::HierarchyViolation(format!(
            "Making '{}' a parent of '{}' would create a cycle",
            parent.name, child.name
        )));
    }

    sqlx::query("INSERT INTO role_parents (role_id, parent_id) VALUES (?, ?)")
        .bind(child.id)
        .bind(parent.id)
        .execute(&mut *conn)
        .await?;

    Ok(true)
}

async fn edge_exists(conn: &mut SqliteConnection, child_id: RoleId, parent_id: RoleId) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM role_parents WHERE role_id = ? AND parent_id = ?",
    )
    .bind(child_id)
    .bind(parent_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count > 0)
}

/// Whether `candidate` is reachable from `root` by following child edges
async fn is_descendant(conn: &mut SqliteConnection, root: RoleId, candidate: RoleId) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        WITH RECURSIVE descendants(id) AS (
            SELECT role_id FROM role_parents WHERE parent_id = ?1
            UNION
            SELECT rp.role_id FROM role_parents rp
            JOIN descendants d ON rp.parent_id = d.id
        )
        SELECT COUNT(*) FROM descendants WHERE id = ?2
        "#,
    )
    .bind(root)
    .bind(candidate)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count > 0)
}

async fn insert_role(conn: &mut SqliteConnection, new_role: &NewRole) -> Result<Role> {
    let now = Utc::now();

    let id = sqlx::query(
        r#"
        INSERT INTO roles (name, description, role_type, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&new_role.name)
    .bind(&new_role.description)
    .bind(new_role.role_type.as_str())
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(Role {
        id,
        name: new_role.name.clone(),
        description: new_role.description.clone(),
        role_type: new_role.role_type,
        created_at: now,
    })
}

/// Returns `false` when the user already approves the role
async fn insert_approver(conn: &mut SqliteConnection, role_id: RoleId, user_id: UserId) -> Result<bool> {
    let result = sqlx::query("INSERT OR IGNORE INTO role_approvers (role_id, user_id) VALUES (?, ?)")
        .bind(role_id)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn fetch_role(conn: &mut SqliteConnection, id: RoleId) -> Result<Option<Role>> {
    let row = sqlx::query_as::<_, RoleRow>(
        r#"
        SELECT id, name, description, role_type, created_at
        FROM roles
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(Role::try_from).transpose()
}

async fn fetch_role_by_name(conn: &mut SqliteConnection, name: &str) -> Result<Option<Role>> {
    let row = sqlx::query_as::<_, RoleRow>(
        r#"
        SELECT id, name, description, role_type, created_at
        FROM roles
        WHERE name = ?
        "#,
    )
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(Role::try_from).transpose()
}

/// Look up a role that another record is about to point at
pub(crate) async fn require_role(conn: &mut SqliteConnection, id: RoleId) -> Result<Role> {
    fetch_role(conn, id)
        .await?
        .ok_or_else(|| AppError::InvalidReference(format!("Role {} does not exist", id)))
}

async fn ensure_role(conn: &mut SqliteConnection, id: RoleId) -> Result<()> {
    match fetch_role(conn, id).await? {
        Some(_) => Ok(()),
        None => Err(AppError::NotFound(format!("Role {} not found", id))),
    }
}

/// Current approver ids of a role
pub(crate) async fn role_approver_ids(conn: &mut SqliteConnection, role_id: RoleId) -> Result<Vec<UserId>> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT user_id FROM role_approvers WHERE role_id = ? ORDER BY user_id ASC",
    )
    .bind(role_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewUser, RoleType};
    use crate::store::tests::setup_test_db;

    async fn setup() -> RoleGraph {
        let store = setup_test_db().await;
        store.create_user(&NewUser::new(1, "Alice")).await.unwrap();
        store.create_user(&NewUser::new(2, "Bob")).await.unwrap();
        RoleGraph::new(store)
    }

    async fn role(graph: &RoleGraph, name: &str, role_type: RoleType) -> Role {
        graph.create_role(NewRole::new(name, role_type)).await.unwrap()
    }

    fn ids(roles: &[Role]) -> Vec<RoleId> {
        roles.iter().map(|r| r.id).collect()
    }

    #[tokio::test]
    async fn test_create_role() {
        let graph = setup().await;
        let created = graph
            .create_role(
                NewRole::new("UPS User", RoleType::Application)
                    .with_description("UPS Access")
                    .with_approvers([1, 2]),
            )
            .await
            .unwrap();

        let fetched = graph.get_role(created.id).await.unwrap();
        assert_eq!(fetched.name, "UPS User");
        assert_eq!(fetched.description, "UPS Access");
        assert_eq!(fetched.role_type, RoleType::Application);

        let approvers: Vec<_> = graph
            .approvers_of(created.id)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(approvers, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_create_role_duplicate_name() {
        let graph = setup().await;
        role(&graph, "UPS User", RoleType::Permission).await;
        let result = graph
            .create_role(NewRole::new("UPS User", RoleType::Functional))
            .await;
        assert!(matches!(result, Err(AppError::DuplicateName(_))));
    }

    #[tokio::test]
    async fn test_create_role_with_edges() {
        let graph = setup().await;
        let parent = role(&graph, "Admin", RoleType::Functional).await;
        let child = role(&graph, "Read", RoleType::Permission).await;

        let middle = graph
            .create_role(
                NewRole::new("Maintenance", RoleType::Application)
                    .with_parents([parent.id])
                    .with_children([child.id]),
            )
            .await
            .unwrap();

        assert_eq!(ids(&graph.parents_of(middle.id).await.unwrap()), vec![parent.id]);
        assert_eq!(ids(&graph.children_of(middle.id).await.unwrap()), vec![child.id]);
        assert_eq!(ids(&graph.children_of(parent.id).await.unwrap()), vec![middle.id]);
        assert_eq!(ids(&graph.parents_of(child.id).await.unwrap()), vec![middle.id]);
    }

    #[tokio::test]
    async fn test_create_permission_with_children_fails() {
        let graph = setup().await;
        let child = role(&graph, "Read", RoleType::Permission).await;
        let result = graph
            .create_role(NewRole::new("Write", RoleType::Permission).with_children([child.id]))
            .await;
        assert!(matches!(result, Err(AppError::HierarchyViolation(_))));
        assert!(graph.get_role_by_name("Write").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_role_parent_and_child_overlap_fails() {
        let graph = setup().await;
        let other = role(&graph, "Other", RoleType::Functional).await;
        let result = graph
            .create_role(
                NewRole::new("Both", RoleType::Functional)
                    .with_parents([other.id])
                    .with_children([other.id]),
            )
            .await;
        assert!(matches!(result, Err(AppError::HierarchyViolation(_))));
    }

    #[tokio::test]
    async fn test_create_role_under_permission_parent_fails_atomically() {
        let graph = setup().await;
        let permission = role(&graph, "Read", RoleType::Permission).await;
        let result = graph
            .create_role(
                NewRole::new("Child", RoleType::Permission)
                    .with_parents([permission.id])
                    .with_approvers([1]),
            )
            .await;

        assert!(matches!(result, Err(AppError::HierarchyViolation(_))));
        assert!(graph.get_role_by_name("Child").await.unwrap().is_none());
        assert!(graph.children_of(permission.id).await.unwrap().is_empty());
        assert!(graph.approver_for(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_role_invalid_references() {
        let graph = setup().await;
        let result = graph
            .create_role(NewRole::new("A", RoleType::Functional).with_parents([42]))
            .await;
        assert!(matches!(result, Err(AppError::InvalidReference(_))));

        let result = graph
            .create_role(NewRole::new("A", RoleType::Functional).with_approvers([42]))
            .await;
        assert!(matches!(result, Err(AppError::InvalidReference(_))));
        assert!(graph.list_roles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_parent_and_child() {
        let graph = setup().await;
        let top = role(&graph, "Top", RoleType::Functional).await;
        let mid = role(&graph, "Mid", RoleType::Application).await;
        let leaf = role(&graph, "Leaf", RoleType::Permission).await;

        graph.add_parent(mid.id, top.id).await.unwrap();
        graph.add_child(mid.id, leaf.id).await.unwrap();

        assert_eq!(ids(&graph.children_of(top.id).await.unwrap()), vec![mid.id]);
        assert_eq!(ids(&graph.parents_of(leaf.id).await.unwrap()), vec![mid.id]);
    }

    #[tokio::test]
    async fn test_add_existing_edge_is_noop() {
        let graph = setup().await;
        let top = role(&graph, "Top", RoleType::Functional).await;
        let leaf = role(&graph, "Leaf", RoleType::Permission).await;

        graph.add_child(top.id, leaf.id).await.unwrap();
        graph.add_parent(leaf.id, top.id).await.unwrap();

        assert_eq!(graph.children_of(top.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_add_child_to_permission_fails() {
        let graph = setup().await;
        let permission = role(&graph, "Read", RoleType::Permission).await;
        let other = role(&graph, "Other", RoleType::Permission).await;

        let result = graph.add_child(permission.id, other.id).await;
        assert!(matches!(result, Err(AppError::HierarchyViolation(_))));

        let result = graph.add_parent(other.id, permission.id).await;
        assert!(matches!(result, Err(AppError::HierarchyViolation(_))));
        assert!(graph.children_of(permission.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reverse_edge_rejected() {
        let graph = setup().await;
        let a = role(&graph, "A", RoleType::Functional).await;
        let b = role(&graph, "B", RoleType::Functional).await;

        graph.add_parent(a.id, b.id).await.unwrap();
        let result = graph.add_child(a.id, b.id).await;
        assert!(matches!(result, Err(AppError::HierarchyViolation(_))));

        assert_eq!(ids(&graph.parents_of(a.id).await.unwrap()), vec![b.id]);
        assert!(graph.children_of(a.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_self_edge_rejected() {
        let graph = setup().await;
        let a = role(&graph, "A", RoleType::Functional).await;
        let result = graph.add_parent(a.id, a.id).await;
        assert!(matches!(result, Err(AppError::HierarchyViolation(_))));
    }

    #[tokio::test]
    async fn test_multi_hop_cycle_rejected() {
        let graph = setup().await;
        let a = role(&graph, "A", RoleType::Functional).await;
        let b = role(&graph, "B", RoleType::Functional).await;
        let c = role(&graph, "C", RoleType::Functional).await;

        // a -> b -> c
        graph.add_child(a.id, b.id).await.unwrap();
        graph.add_child(b.id, c.id).await.unwrap();

        let result = graph.add_parent(a.id, c.id).await;
        assert!(matches!(result, Err(AppError::HierarchyViolation(_))));
        assert!(graph.parents_of(a.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_roles() {
        let graph = setup().await;
        let a = role(&graph, "A", RoleType::Functional).await;

        let result = graph.add_parent(a.id, 99).await;
        assert!(matches!(result, Err(AppError::InvalidReference(_))));

        let result = graph.add_child(99, a.id).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        assert!(matches!(graph.get_role(99).await, Err(AppError::NotFound(_))));
        assert!(matches!(graph.parents_of(99).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_bulk_add_children_rolls_back_on_error() {
        let graph = setup().await;
        let top = role(&graph, "Top", RoleType::Functional).await;
        let a = role(&graph, "A", RoleType::Permission).await;
        let b = role(&graph, "B", RoleType::Permission).await;

        let result = graph.add_children(top.id, &[a.id, 404, b.id]).await;
        assert!(matches!(result, Err(AppError::InvalidReference(_))));
        assert!(graph.children_of(top.id).await.unwrap().is_empty());

        graph.add_children(top.id, &[a.id, b.id]).await.unwrap();
        assert_eq!(ids(&graph.children_of(top.id).await.unwrap()), vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn test_bulk_add_parents_rolls_back_on_violation() {
        let graph = setup().await;
        let a = role(&graph, "A", RoleType::Functional).await;
        let b = role(&graph, "B", RoleType::Functional).await;
        let leaf = role(&graph, "Leaf", RoleType::Permission).await;

        let result = graph.add_parents(a.id, &[b.id, leaf.id]).await;
        assert!(matches!(result, Err(AppError::HierarchyViolation(_))));
        assert!(graph.parents_of(a.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_approver_idempotent() {
        let graph = setup().await;
        let r = role(&graph, "R", RoleType::Permission).await;

        graph.add_approver(r.id, 1).await.unwrap();
        graph.add_approver(r.id, 1).await.unwrap();
        graph.add_approvers(r.id, &[1, 2]).await.unwrap();

        assert_eq!(graph.approvers_of(r.id).await.unwrap().len(), 2);
        assert_eq!(ids(&graph.approver_for(2).await.unwrap()), vec![r.id]);
    }

    #[tokio::test]
    async fn test_add_approvers_rolls_back_on_missing_user() {
        let graph = setup().await;
        let r = role(&graph, "R", RoleType::Permission).await;

        let result = graph.add_approvers(r.id, &[1, 77]).await;
        assert!(matches!(result, Err(AppError::InvalidReference(_))));
        assert!(graph.approvers_of(r.id).await.unwrap().is_empty());

        let result = graph.add_approver(99, 1).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_search_roles_case_insensitive() {
        let graph = setup().await;
        role(&graph, "UPS User", RoleType::Permission).await;
        role(&graph, "UPS Admin", RoleType::Functional).await;
        role(&graph, "Other", RoleType::Permission).await;

        assert_eq!(graph.search_roles("ups").await.unwrap().len(), 2);
        assert_eq!(graph.search_roles("ADMIN").await.unwrap().len(), 1);
        assert!(graph.search_roles("zzz").await.unwrap().is_empty());
        assert_eq!(graph.list_roles().await.unwrap().len(), 3);
    }
}
