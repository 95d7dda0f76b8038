//! accessflow - role access requests with unanimous approver consensus

pub mod approval;
pub mod config;
pub mod error;
pub mod graph;
pub mod ledger;
pub mod models;
pub mod seed;
pub mod store;

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::approval::ApprovalEngine;
use crate::graph::RoleGraph;
use crate::ledger::RequestLedger;
use crate::store::Store;

/// Application state shared across handlers
pub struct AppState {
    pub store: Store,
    pub roles: RoleGraph,
    pub requests: RequestLedger,
    pub approvals: ApprovalEngine,
}

impl AppState {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        let store = Store::new(pool);
        Arc::new(Self {
            roles: RoleGraph::new(store.clone()),
            requests: RequestLedger::new(store.clone()),
            approvals: ApprovalEngine::new(store.clone()),
            store,
        })
    }
}
