//! Collaborator traits: the seams between the scheduler and the outside world.
//!
//! Every method is async and may fail; the scheduler bounds each call with
//! its own deadline and decides per call site whether an error skips the
//! tenant, suppresses one notification, or is merely logged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;
use crate::types::{
    Bookkeeping, ContractTerm, PackageType, TeamMember, TemplateId, TenantId, TenantRecord,
    TierName, User,
};

/// Enumerates tenants whose tier belongs to a segment.
#[async_trait]
pub trait EnrollmentSource: Send + Sync {
    async fn list_tenants_in_segment(&self, tier: TierName) -> Result<Vec<TenantRecord>>;
}

/// Durable per-tenant bookkeeping.
#[async_trait]
pub trait BookkeepingStore: Send + Sync {
    /// `Ok(None)` when the tenant has never been written.
    async fn get(&self, tenant: &TenantId) -> Result<Option<Bookkeeping>>;

    /// Full-record replace.
    async fn set(&self, tenant: &TenantId, record: &Bookkeeping) -> Result<()>;
}

/// Tenant users and account team.
#[async_trait]
pub trait RecipientSource: Send + Sync {
    async fn get_admin_users(&self, tenant: &TenantId) -> Result<Vec<User>>;
    async fn get_account_team(&self, tenant: &TenantId) -> Result<Vec<TeamMember>>;
}

/// Feature-adoption signals consulted by usage nudges.
#[async_trait]
pub trait UsageSignals: Send + Sync {
    async fn has_custom_groupings(&self, tenant: &TenantId) -> Result<bool>;
    async fn has_alerts(&self, tenant: &TenantId) -> Result<bool>;
    async fn has_budgets(&self, tenant: &TenantId) -> Result<bool>;
}

/// Active, non-zero-value assets held by a tenant.
#[async_trait]
pub trait AssetInventory: Send + Sync {
    /// Returns asset type names, e.g. `"google-cloud"`.
    async fn list_active_assets(&self, tenant: &TenantId) -> Result<Vec<String>>;
}

/// Earliest product activation among a set of users.
#[async_trait]
pub trait ActivationSource: Send + Sync {
    async fn first_activation(
        &self,
        tenant: &TenantId,
        users: &[User],
    ) -> Result<Option<DateTime<Utc>>>;
}

/// Contract dates, used as a trial-period fallback.
#[async_trait]
pub trait ContractSource: Send + Sync {
    async fn contract_term(
        &self,
        tenant: &TenantId,
        package: PackageType,
    ) -> Result<Option<ContractTerm>>;
}

/// Sends one templated message to one address.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send_templated(&self, address: &str, template: &TemplateId, data: &Value)
    -> Result<()>;
}
