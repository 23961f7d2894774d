//! Scripted worker launcher for tests and local development.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use synapse_core::types::{TenantId, ThreadKey, UserId};

use crate::worker::{LaunchReceipt, WorkerLauncher};

#[derive(Default)]
pub struct ScriptedWorkerLauncher {
    pub launches: Mutex<Vec<(String, String, String)>>,
    next_id: AtomicU64,
}

impl ScriptedWorkerLauncher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerLauncher for ScriptedWorkerLauncher {
    async fn launch_onboarding_job(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        thread_key: &ThreadKey,
    ) -> Result<LaunchReceipt, String> {
        self.launches.lock().unwrap().push((
            user_id.0.clone(),
            tenant_id.0.clone(),
            thread_key.0.clone(),
        ));
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(LaunchReceipt {
            job_id: thread_key.0.clone(),
            lpt_status: if n == 1 { "in queue" } else { "running" }.to_string(),
            already_launched: false,
        })
    }
}
