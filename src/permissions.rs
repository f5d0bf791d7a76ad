// 🔐 Permission Resolver - Ownership and share-grant capabilities
// Pure read-and-combine over externally supplied grant records. Ownership
// always dominates; otherwise capabilities are the union of active grants.
// Absence of a grant is a normal empty result, never an error.

use crate::limiter::ResourceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// CAPABILITY SET
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    View,
    Edit,
    Delete,
}

/// Subset of {view, edit, delete} a user holds over a resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub view: bool,
    pub edit: bool,
    pub delete: bool,
}

impl CapabilitySet {
    /// No access at all
    pub fn empty() -> Self {
        CapabilitySet::default()
    }

    /// Full {view, edit, delete} - what an owner holds
    pub fn full() -> Self {
        CapabilitySet {
            view: true,
            edit: true,
            delete: true,
        }
    }

    pub fn view_only() -> Self {
        CapabilitySet {
            view: true,
            edit: false,
            delete: false,
        }
    }

    pub fn contains(&self, capability: Capability) -> bool {
        match capability {
            Capability::View => self.view,
            Capability::Edit => self.edit,
            Capability::Delete => self.delete,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.view && !self.edit && !self.delete
    }

    /// Union with another set. Capabilities only grow across grants;
    /// there is no downward conflict resolution.
    pub fn union(&self, other: &CapabilitySet) -> CapabilitySet {
        CapabilitySet {
            view: self.view || other.view,
            edit: self.edit || other.edit,
            delete: self.delete || other.delete,
        }
    }
}

impl std::fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if self.view {
            parts.push("view");
        }
        if self.edit {
            parts.push("edit");
        }
        if self.delete {
            parts.push("delete");
        }
        write!(f, "{{{}}}", parts.join(", "))
    }
}

// ============================================================================
// SHARE GRANT
// ============================================================================

/// A delegated, capability-scoped access right from an owner to another
/// user for one resource type.
///
/// Identity: UUID (never changes). Revocation sets `revoked_at` and keeps
/// the row, so grant history survives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareGrant {
    /// Stable identity (UUID)
    pub id: String,

    /// User who owns the shared resources
    pub owner_id: String,

    /// User receiving access
    pub grantee_id: String,

    /// Resource type the grant covers
    pub resource: ResourceKind,

    /// Capabilities delegated by this grant
    pub capabilities: CapabilitySet,

    pub created_at: DateTime<Utc>,

    /// None = still active
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ShareGrant {
    pub fn new(
        owner_id: String,
        grantee_id: String,
        resource: ResourceKind,
        capabilities: CapabilitySet,
    ) -> Self {
        ShareGrant {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id,
            grantee_id,
            resource,
            capabilities,
            created_at: Utc::now(),
            revoked_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }

    fn matches(&self, grantee_id: &str, owner_id: &str, resource: ResourceKind) -> bool {
        self.is_active()
            && self.owner_id == owner_id
            && self.grantee_id == grantee_id
            && self.resource == resource
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Effective capabilities of `grantee_id` over `resource` owned by
/// `resource_owner_id`.
///
/// - Owner: full set, regardless of grants.
/// - Non-owner: union of all active matching grants (order-independent).
/// - No grants: empty set. No implicit access.
pub fn resolve(
    grantee_id: &str,
    resource_owner_id: &str,
    resource: ResourceKind,
    grants: &[ShareGrant],
) -> CapabilitySet {
    if grantee_id == resource_owner_id {
        return CapabilitySet::full();
    }

    grants
        .iter()
        .filter(|grant| grant.matches(grantee_id, resource_owner_id, resource))
        .fold(CapabilitySet::empty(), |acc, grant| {
            acc.union(&grant.capabilities)
        })
}

// ============================================================================
// TESTS
// ============================================================================
