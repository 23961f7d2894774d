//! Production-side implementations of the core's ports.
//!
//! The RTDB transport itself is pluggable; locally the in-process tree
//! serves as the store. Contexts, executions, and task definitions live
//! under deterministic RTDB paths; worker interactions go over HTTP.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use synapse_brain::ports::{
    ContextStore, ContextType, DriveDocs, ExecutionStore, LptDispatcher, TaskStore,
};
use synapse_brain::task::{Checklist, ExecutionReport};
use synapse_core::tenant::{JobsData, JobsMetrics, UserContext};
use synapse_core::types::{TenantId, ThreadKey, UserId};
use synapse_manager::{LaunchReceipt, WorkerLauncher};
use synapse_rtdb::RtdbPort;
use synapse_sessions::TenantStore;

// ── Tenant store over the RTDB ──────────────────────────────────────────────

/// Tenant profile at `<tenant>/config/profile`, job lists at
/// `<tenant>/jobs/<department>`.
pub struct RtdbTenantStore {
    rtdb: Arc<dyn RtdbPort>,
}

impl RtdbTenantStore {
    pub fn new(rtdb: Arc<dyn RtdbPort>) -> Self {
        Self { rtdb }
    }
}

#[async_trait]
impl TenantStore for RtdbTenantStore {
    async fn load_user_context(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        client_uuid: &str,
    ) -> Result<UserContext, String> {
        if client_uuid.is_empty() {
            return Err("client_uuid is required".to_string());
        }
        let path = format!("{}/config/profile", tenant_id);
        let value = self
            .rtdb
            .get(&path)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("no tenant profile at {path}"))?;
        debug!(user = %user_id, tenant = %tenant_id, "tenant profile loaded");
        serde_json::from_value(value).map_err(|e| format!("malformed tenant profile: {e}"))
    }

    async fn load_jobs(&self, tenant_id: &TenantId) -> Result<JobsData, String> {
        let path = format!("{}/jobs", tenant_id);
        let jobs = self
            .rtdb
            .get(&path)
            .await
            .map_err(|e| e.to_string())?
            .unwrap_or_else(|| json!({}));

        let pending = |department: &str| -> u32 {
            jobs.get(department)
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter(|j| j.get("status").and_then(Value::as_str) == Some("pending"))
                        .count() as u32
                })
                .unwrap_or(0)
        };
        let metrics = JobsMetrics {
            apbookeeper_pending: pending("apbookeeper"),
            router_pending: pending("router"),
            banker_pending: pending("banker"),
        };
        Ok(JobsData { jobs, metrics })
    }
}

// ── Context texts over the RTDB ─────────────────────────────────────────────

pub struct RtdbContextStore {
    rtdb: Arc<dyn RtdbPort>,
}

impl RtdbContextStore {
    pub fn new(rtdb: Arc<dyn RtdbPort>) -> Self {
        Self { rtdb }
    }

    fn path(mandate_path: &str, context_type: ContextType, service_name: Option<&str>) -> String {
        format!(
            "{}/contexts/{}/{}",
            mandate_path.trim_matches('/'),
            context_type.as_str(),
            service_name.unwrap_or("default")
        )
    }
}

#[async_trait]
impl ContextStore for RtdbContextStore {
    async fn read_context(
        &self,
        mandate_path: &str,
        context_type: ContextType,
        service_name: Option<&str>,
    ) -> Result<String, String> {
        let path = Self::path(mandate_path, context_type, service_name);
        let value = self.rtdb.get(&path).await.map_err(|e| e.to_string())?;
        Ok(value
            .and_then(|v| v.get("text").and_then(Value::as_str).map(String::from))
            .unwrap_or_default())
    }

    async fn write_context(
        &self,
        mandate_path: &str,
        context_type: ContextType,
        service_name: Option<&str>,
        text: &str,
    ) -> Result<(), String> {
        let path = Self::path(mandate_path, context_type, service_name);
        self.rtdb
            .set(
                &path,
                json!({
                    "text": text,
                    "updated_at": chrono::Utc::now().to_rfc3339(),
                }),
            )
            .await
            .map_err(|e| e.to_string())
    }
}

// ── Execution + task stores over the RTDB ───────────────────────────────────

pub struct RtdbExecutionStore {
    rtdb: Arc<dyn RtdbPort>,
}

impl RtdbExecutionStore {
    pub fn new(rtdb: Arc<dyn RtdbPort>) -> Self {
        Self { rtdb }
    }
}

#[async_trait]
impl ExecutionStore for RtdbExecutionStore {
    async fn save_checklist(
        &self,
        execution_id: &str,
        checklist: &Checklist,
    ) -> Result<(), String> {
        let value = serde_json::to_value(checklist).map_err(|e| e.to_string())?;
        self.rtdb
            .set(&format!("task_executions/{}/checklist", execution_id), value)
            .await
            .map_err(|e| e.to_string())
    }

    async fn write_final_report(
        &self,
        task_id: &str,
        execution_id: &str,
        report: &ExecutionReport,
    ) -> Result<(), String> {
        let value = serde_json::to_value(report).map_err(|e| e.to_string())?;
        self.rtdb
            .set(
                &format!("task_reports/{}/{}", task_id, execution_id),
                value,
            )
            .await
            .map_err(|e| e.to_string())
    }

    async fn clear_running_execution(
        &self,
        task_id: &str,
        execution_id: &str,
    ) -> Result<(), String> {
        self.rtdb
            .delete(&format!("task_executions/{}", execution_id))
            .await
            .map_err(|e| e.to_string())?;
        debug!(task_id, execution_id, "running execution cleared");
        Ok(())
    }
}

pub struct RtdbTaskStore {
    rtdb: Arc<dyn RtdbPort>,
}

impl RtdbTaskStore {
    pub fn new(rtdb: Arc<dyn RtdbPort>) -> Self {
        Self { rtdb }
    }
}

#[async_trait]
impl TaskStore for RtdbTaskStore {
    async fn create_task(&self, definition: Value) -> Result<String, String> {
        self.rtdb
            .push("scheduled_tasks", definition)
            .await
            .map_err(|e| e.to_string())
    }
}

// ── Worker HTTP adapters ────────────────────────────────────────────────────

pub struct HttpWorkerLauncher {
    http: reqwest::Client,
    base_url: String,
}

impl HttpWorkerLauncher {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl WorkerLauncher for HttpWorkerLauncher {
    async fn launch_onboarding_job(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        thread_key: &ThreadKey,
    ) -> Result<LaunchReceipt, String> {
        let url = format!(
            "{}/start-onboarding/{}",
            self.base_url.trim_end_matches('/'),
            thread_key
        );
        let body = json!({
            "user_id": user_id.as_str(),
            "tenant_id": tenant_id.as_str(),
        });
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("launch request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("launch returned status {}", resp.status()));
        }
        let payload: Value = resp.json().await.map_err(|e| e.to_string())?;
        Ok(LaunchReceipt {
            job_id: payload
                .get("job_id")
                .and_then(Value::as_str)
                .unwrap_or(thread_key.as_str())
                .to_string(),
            lpt_status: payload
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("in queue")
                .to_string(),
            already_launched: payload
                .get("already_launched")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

/// Long-process dispatch to the worker fleet.
pub struct HttpLptDispatcher {
    http: reqwest::Client,
    base_url: String,
}

impl HttpLptDispatcher {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl LptDispatcher for HttpLptDispatcher {
    async fn dispatch(
        &self,
        thread_key: &str,
        agent: &str,
        action: &str,
        params: Value,
        task_title: &str,
    ) -> Result<String, String> {
        let url = format!("{}/dispatch-lpt/{}", self.base_url.trim_end_matches('/'), agent);
        let task_id = Uuid::new_v4().to_string();
        let body = json!({
            "task_id": task_id,
            "thread_key": thread_key,
            "action": action,
            "params": params,
            "task_title": task_title,
        });
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("dispatch request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("dispatch returned status {}", resp.status()));
        }
        Ok(task_id)
    }
}

/// Document vision via the worker's describe endpoint.
pub struct HttpDriveDocs {
    http: reqwest::Client,
    base_url: String,
}

impl HttpDriveDocs {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl DriveDocs for HttpDriveDocs {
    async fn describe_document(&self, file_id: &str, question: &str) -> Result<String, String> {
        let url = format!(
            "{}/describe-document/{}",
            self.base_url.trim_end_matches('/'),
            file_id
        );
        let resp = self
            .http
            .post(&url)
            .json(&json!({ "question": question }))
            .send()
            .await
            .map_err(|e| format!("describe request failed: {e}"))?;
        if !resp.status().is_success() {
            warn!(file_id, status = %resp.status(), "describe-document failed");
            return Err(format!("describe returned status {}", resp.status()));
        }
        let payload: Value = resp.json().await.map_err(|e| e.to_string())?;
        Ok(payload
            .get("answer")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}
