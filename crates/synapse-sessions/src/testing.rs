//! Fixture tenant store for tests and local development.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use synapse_core::tenant::{JobsData, JobsMetrics, UserContext};
use synapse_core::types::{TenantId, UserId};

use crate::tenant_store::TenantStore;

pub struct FixtureTenantStore {
    context: Mutex<UserContext>,
    jobs: Mutex<JobsData>,
    /// Number of load_user_context calls, for refresh assertions.
    pub context_loads: Mutex<u32>,
}

impl FixtureTenantStore {
    pub fn new(company_name: &str) -> Self {
        Self {
            context: Mutex::new(UserContext {
                mandate_path: format!("tenants/{}", company_name.to_lowercase()),
                company_name: company_name.to_string(),
                ..Default::default()
            }),
            jobs: Mutex::new(JobsData::default()),
            context_loads: Mutex::new(0),
        }
    }

    pub fn set_context(&self, ctx: UserContext) {
        *self.context.lock().unwrap() = ctx;
    }

    pub fn set_jobs(&self, jobs: Value, metrics: JobsMetrics) {
        *self.jobs.lock().unwrap() = JobsData { jobs, metrics };
    }
}

#[async_trait]
impl TenantStore for FixtureTenantStore {
    async fn load_user_context(
        &self,
        _user_id: &UserId,
        _tenant_id: &TenantId,
        client_uuid: &str,
    ) -> Result<UserContext, String> {
        if client_uuid.is_empty() {
            return Err("client_uuid is required".to_string());
        }
        *self.context_loads.lock().unwrap() += 1;
        Ok(self.context.lock().unwrap().clone())
    }

    async fn load_jobs(&self, _tenant_id: &TenantId) -> Result<JobsData, String> {
        Ok(self.jobs.lock().unwrap().clone())
    }
}
