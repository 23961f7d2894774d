use async_trait::async_trait;

use synapse_core::tenant::{JobsData, UserContext};
use synapse_core::types::{TenantId, UserId};

/// Tenant profile / function-table / job-snapshot loads. The production
/// implementation reads the document store; tests use
/// [`crate::testing::FixtureTenantStore`].
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Reconstruct the tenant profile for this user. `client_uuid`
    /// identifies the client installation whose settings apply.
    async fn load_user_context(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        client_uuid: &str,
    ) -> Result<UserContext, String>;

    /// Load the tenant's job lists and derive the per-department metrics.
    async fn load_jobs(&self, tenant_id: &TenantId) -> Result<JobsData, String>;
}
