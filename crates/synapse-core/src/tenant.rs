use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tenant metadata loaded once per session and mutated only by explicit
/// invalidation. The brain holds a shared read handle; the session owns the
/// slot.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserContext {
    /// Storage root for the tenant's documents and contexts.
    pub mandate_path: String,
    pub company_name: String,
    /// BCP-47-ish language tag used for localized system messages ("fr", "en").
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Document-management-system flavor ("drive", "sharepoint", …).
    #[serde(default)]
    pub dms_kind: String,
    /// Raw ERP connector configuration, passed through to tools untouched.
    #[serde(default)]
    pub erp_configs: Value,
    /// Per-department workflow approval rules from the function table.
    #[serde(default)]
    pub approval_rules: Value,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Per-department job counters composed into the system prompt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct JobsMetrics {
    pub apbookeeper_pending: u32,
    pub router_pending: u32,
    pub banker_pending: u32,
}

impl JobsMetrics {
    pub fn total(&self) -> u32 {
        self.apbookeeper_pending + self.router_pending + self.banker_pending
    }
}

/// Snapshot of the tenant's domain job lists plus derived metrics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobsData {
    /// Department name → list of job records (opaque to the core).
    #[serde(default)]
    pub jobs: Value,
    #[serde(default)]
    pub metrics: JobsMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_total_sums_departments() {
        let m = JobsMetrics {
            apbookeeper_pending: 2,
            router_pending: 3,
            banker_pending: 1,
        };
        assert_eq!(m.total(), 6);
    }

    #[test]
    fn user_context_defaults_fill_language_and_timezone() {
        let ctx: UserContext = serde_json::from_str(
            r#"{"mandate_path": "tenants/acme", "company_name": "Acme"}"#,
        )
        .unwrap();
        assert_eq!(ctx.language, "en");
        assert_eq!(ctx.timezone, "UTC");
    }
}
