use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use synapse_core::types::{TenantId, ThreadKey, UserId};

/// Receipt from launching a backend onboarding job.
#[derive(Debug, Clone)]
pub struct LaunchReceipt {
    pub job_id: String,
    /// Worker-reported status, e.g. "in queue" or "running".
    pub lpt_status: String,
    pub already_launched: bool,
}

/// Launch RPC to the backend worker fleet.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch_onboarding_job(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        thread_key: &ThreadKey,
    ) -> Result<LaunchReceipt, String>;
}

/// Stop a set of worker jobs over HTTP.
///
/// `POST <base>/stop-onboarding/<job_id>` with `{job_ids, mandates_path}`;
/// 200 and 202 both count as accepted. Returns the HTTP status (0 when the
/// request never got through).
pub async fn stop_jobs_http(
    http: &reqwest::Client,
    base_url: &str,
    timeout_secs: u64,
    job_ids: &[String],
    mandate_path: &str,
) -> u16 {
    let Some(first_job) = job_ids.first() else {
        return 0;
    };
    let url = format!("{}/stop-onboarding/{}", base_url.trim_end_matches('/'), first_job);
    let body = json!({
        "job_ids": job_ids,
        "mandates_path": mandate_path,
    });

    match http
        .post(&url)
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .json(&body)
        .send()
        .await
    {
        Ok(resp) => {
            let status = resp.status().as_u16();
            if status == 200 || status == 202 {
                info!(status, url = %url, "worker stop accepted");
            } else {
                warn!(status, url = %url, "worker stop returned unexpected status");
            }
            status
        }
        Err(e) => {
            warn!(url = %url, error = %e, "worker stop request failed");
            0
        }
    }
}
