//! Sample organisation for demos and manual testing

use crate::approval::engine::{create_in, revoke_in, vote_in};
use crate::error::Result;
use crate::graph::create_role_in;
use crate::models::{ApprovalStatus, NewRole, NewUser, RoleType};
use crate::store::{fetch_user_count, insert_user};
use crate::AppState;

/// What [`load_sample_data`] wrote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub users: usize,
    pub roles: usize,
    pub requests: usize,
}

/// Load a small organisation: six users in a management chain, a role
/// hierarchy and one request in each status.
///
/// Everything is written in one transaction, so a failure leaves the
/// database as it was. Returns `None` without writing anything if users
/// already exist.
pub async fn load_sample_data(state: &AppState) -> Result<Option<SeedSummary>> {
    let mut tx = state.store.begin_write().await?;

    if fetch_user_count(&mut tx).await? > 0 {
        tracing::warn!("database already has users, skipping sample data");
        return Ok(None);
    }

    let users = [
        NewUser::new(604048, "Shawn McCarthy"),
        NewUser::new(604049, "Steve Vingerhoet").with_manager(604048),
        NewUser::new(604050, "Jacob Taylor").with_manager(604049),
        NewUser::new(604051, "Regan Yee").with_manager(604049),
        NewUser::new(604052, "Random Guy").with_manager(604048).inactive(),
        NewUser::new(604053, "Some Intern").with_manager(604051),
    ];
    for user in &users {
        insert_user(&mut tx, user).await?;
    }

    let ups_user = create_role_in(
        &mut tx,
        &NewRole::new("UPS User", RoleType::Application)
            .with_description("UPS Access")
            .with_approvers([604048, 604049]),
    )
    .await?;
    let role_create = create_role_in(
        &mut tx,
        &NewRole::new("UPS Role Create", RoleType::Permission)
            .with_description("UPS Role Creation Access"),
    )
    .await?;
    let maintenance = create_role_in(
        &mut tx,
        &NewRole::new("UPS Maintenance", RoleType::Permission)
            .with_description("UPS Admin Read Access"),
    )
    .await?;
    let admin = create_role_in(
        &mut tx,
        &NewRole::new("UPS Admin", RoleType::Functional)
            .with_description("UPS Admin Access")
            .with_children([role_create.id, maintenance.id]),
    )
    .await?;
    create_role_in(
        &mut tx,
        &NewRole::new("My Role 1", RoleType::Permission)
            .with_description("Child UPS Role")
            .with_parents([ups_user.id]),
    )
    .await?;
    create_role_in(
        &mut tx,
        &NewRole::new("My Role 2", RoleType::Permission)
            .with_description("Child UPS Admin Role")
            .with_parents([admin.id]),
    )
    .await?;

    let fillers = [
        ("Test Role 1", "Where am I"),
        ("Test Role 2", "Whats happening"),
        ("Test Role 3", "Test"),
        ("Test Role 4", "Test"),
        ("Test Role 5", "Testing123"),
    ];
    for (name, description) in fillers {
        create_role_in(
            &mut tx,
            &NewRole::new(name, RoleType::Permission).with_description(description),
        )
        .await?;
    }

    // Shawn has no manager and the admin role no approvers: only revocation ends it
    let (revoked, _) = create_in(&mut tx, admin.id, 604048, 604048, "TestComment").await?;
    revoke_in(&mut tx, revoked.id).await?;

    let (approved, _) = create_in(&mut tx, maintenance.id, 604049, 604048, "TestComment").await?;
    vote_in(&mut tx, approved.id, 604048, ApprovalStatus::Approved).await?;

    create_in(&mut tx, role_create.id, 604050, 604049, "TestComment").await?;

    let (rejected, _) = create_in(&mut tx, maintenance.id, 604051, 604050, "TestComment").await?;
    vote_in(&mut tx, rejected.id, 604049, ApprovalStatus::Rejected).await?;

    tx.commit().await?;

    let summary = SeedSummary {
        users: users.len(),
        roles: 6 + fillers.len(),
        requests: 4,
    };
    tracing::info!(?summary, "loaded sample data");
    Ok(Some(summary))
}
