//! Role hierarchy integration tests
//!
//! Applies a long sequence of edge additions and checks the hierarchy
//! invariants after every step, whether the step succeeded or not.

use std::collections::HashSet;
use std::sync::Arc;

use accessflow::error::AppError;
use accessflow::models::{NewRole, NewUser, RoleId, RoleType};
use accessflow::AppState;
use sqlx::sqlite::SqlitePoolOptions;

async fn setup() -> Arc<AppState> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    let state = AppState::new(pool);
    state.store.migrate().await.expect("Failed to run migrations");
    state
}

async fn edges(state: &AppState, ids: &[RoleId]) -> HashSet<(RoleId, RoleId)> {
    let mut edges = HashSet::new();
    for &id in ids {
        for parent in state.roles.parents_of(id).await.unwrap() {
            edges.insert((id, parent.id));
        }
    }
    edges
}

async fn assert_invariants(state: &AppState, ids: &[RoleId]) {
    for &id in ids {
        let role = state.roles.get_role(id).await.unwrap();
        let parents: HashSet<_> = state
            .roles
            .parents_of(id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        let children: HashSet<_> = state
            .roles
            .children_of(id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();

        assert!(parents.is_disjoint(&children), "role {} overlaps", id);
        assert!(!parents.contains(&id));
        if role.role_type == RoleType::Permission {
            assert!(children.is_empty(), "permission {} has children", id);
        }
    }

    // No role reaches itself through child edges
    let edges = edges(state, ids).await;
    for &start in ids {
        let mut stack = vec![start];
        let mut seen = HashSet::new();
        while let Some(node) = stack.pop() {
            for &(child, parent) in &edges {
                if parent == node {
                    assert_ne!(child, start, "cycle through {}", start);
                    if seen.insert(child) {
                        stack.push(child);
                    }
                }
            }
        }
    }
}

#[tokio::test]
async fn test_hierarchy_invariants_hold_under_edge_sequence() {
    let state = setup().await;
    let types = [
        RoleType::Functional,
        RoleType::Application,
        RoleType::Functional,
        RoleType::Permission,
        RoleType::Application,
        RoleType::Permission,
    ];

    let mut ids = Vec::new();
    for (i, role_type) in types.into_iter().enumerate() {
        let role = state
            .roles
            .create_role(NewRole::new(format!("Role {}", i), role_type))
            .await
            .unwrap();
        ids.push(role.id);
    }

    // Deterministic walk over every ordered pair, alternating direction
    let mut step = 0usize;
    for &a in &ids {
        for &b in &ids {
            let before = edges(&state, &ids).await;
            let result = if step % 2 == 0 {
                state.roles.add_parent(a, b).await
            } else {
                state.roles.add_child(b, a).await
            };
            step += 1;

            match result {
                Ok(()) => {}
                Err(AppError::HierarchyViolation(_)) => {
                    assert_eq!(edges(&state, &ids).await, before, "failed step mutated graph");
                }
                Err(other) => panic!("unexpected error: {:?}", other),
            }
            assert_invariants(&state, &ids).await;
        }
    }

    assert!(!edges(&state, &ids).await.is_empty());
}

#[tokio::test]
async fn test_approver_edges_visible_from_both_ends() {
    let state = setup().await;
    state.store.create_user(&NewUser::new(1, "A")).await.unwrap();
    state.store.create_user(&NewUser::new(2, "B")).await.unwrap();

    let first = state
        .roles
        .create_role(NewRole::new("First", RoleType::Permission).with_approvers([1]))
        .await
        .unwrap();
    let second = state
        .roles
        .create_role(NewRole::new("Second", RoleType::Permission))
        .await
        .unwrap();

    state.roles.add_approvers(second.id, &[1, 2]).await.unwrap();

    let for_a: Vec<_> = state
        .roles
        .approver_for(1)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(for_a, vec![first.id, second.id]);

    let of_second: Vec<_> = state
        .roles
        .approvers_of(second.id)
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.id)
        .collect();
    assert_eq!(of_second, vec![1, 2]);
}
