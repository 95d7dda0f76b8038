//! Data models for users, roles, requests and approver votes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type RoleId = i64;
pub type RequestId = i64;

/// A user as provided by the identity store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager_id: Option<UserId>,
    pub active: bool,
}

/// User provisioning input
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub manager_id: Option<UserId>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl NewUser {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            manager_id: None,
            active: true,
        }
    }

    pub fn with_manager(mut self, manager_id: UserId) -> Self {
        self.manager_id = Some(manager_id);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Kind of role; permissions are leaves of the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleType {
    Permission,
    Application,
    Functional,
}

impl RoleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleType::Permission => "permission",
            RoleType::Application => "application",
            RoleType::Functional => "functional",
        }
    }

    /// Whether roles of this type may have child roles
    pub fn allows_children(&self) -> bool {
        !matches!(self, RoleType::Permission)
    }
}

impl std::str::FromStr for RoleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "permission" => Ok(RoleType::Permission),
            "application" => Ok(RoleType::Application),
            "functional" => Ok(RoleType::Functional),
            _ => Err(format!("Invalid role type: {}", s)),
        }
    }
}

/// A named permission grouping that users can be granted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub description: String,
    pub role_type: RoleType,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a role together with its initial edges.
///
/// The role type has no default and must always be given.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRole {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub role_type: RoleType,
    #[serde(default)]
    pub parents: Vec<RoleId>,
    #[serde(default)]
    pub children: Vec<RoleId>,
    #[serde(default)]
    pub approvers: Vec<UserId>,
}

impl NewRole {
    pub fn new(name: impl Into<String>, role_type: RoleType) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            role_type,
            parents: Vec::new(),
            children: Vec::new(),
            approvers: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parents(mut self, parents: impl IntoIterator<Item = RoleId>) -> Self {
        self.parents = parents.into_iter().collect();
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = RoleId>) -> Self {
        self.children = children.into_iter().collect();
        self
    }

    pub fn with_approvers(mut self, approvers: impl IntoIterator<Item = UserId>) -> Self {
        self.approvers = approvers.into_iter().collect();
        self
    }
}

/// Aggregate status of an access request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Rejected,
    Approved,
    Revoked,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Approved => "approved",
            RequestStatus::Revoked => "revoked",
        }
    }

    /// Active requests block a second request for the same role and user
    pub fn is_active(&self) -> bool {
        !matches!(self, RequestStatus::Rejected)
    }

    /// Whether voting has settled the outcome
    pub fn is_decided(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }

    /// Whether an administrator may withdraw the request
    pub fn can_revoke(&self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::Approved)
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "rejected" => Ok(RequestStatus::Rejected),
            "approved" => Ok(RequestStatus::Approved),
            "revoked" => Ok(RequestStatus::Revoked),
            _ => Err(format!("Invalid request status: {}", s)),
        }
    }
}

/// A single approver's decision on a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Rejected,
    Approved,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Approved => "approved",
        }
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ApprovalStatus::Pending),
            "rejected" => Ok(ApprovalStatus::Rejected),
            "approved" => Ok(ApprovalStatus::Approved),
            _ => Err(format!("Invalid approval status: {}", s)),
        }
    }
}

/// A request to grant a role to a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub role_id: RoleId,
    pub requested_for_id: UserId,
    pub requested_by_id: UserId,
    pub comment: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of a request's vote table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub request_id: RequestId,
    pub approver_id: UserId,
    pub status: ApprovalStatus,
    pub updated_at: DateTime<Utc>,
}
