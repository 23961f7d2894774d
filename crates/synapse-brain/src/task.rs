use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Record describing an active scheduled-task execution, bound to the brain
/// while the workflow runs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTaskData {
    pub task_id: String,
    pub execution_id: String,
    pub mission: String,
    pub mandate_path: String,
    #[serde(default)]
    pub execution_plan: Value,
    #[serde(default)]
    pub last_execution_report: Option<Value>,
    /// One-shot runs (`NOW`) skip the final report persistence.
    #[serde(default)]
    pub persist_report: bool,
    #[serde(default)]
    pub checklist: Option<Checklist>,
    #[serde(skip, default = "default_started_at")]
    pub started_at: chrono::DateTime<chrono::Utc>,
}

fn default_started_at() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistStep {
    pub index: u32,
    pub title: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Mission checklist created by CREATE_CHECKLIST and advanced by
/// UPDATE_STEP.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Checklist {
    pub steps: Vec<ChecklistStep>,
}

impl Checklist {
    pub fn from_titles(titles: &[String]) -> Self {
        Self {
            steps: titles
                .iter()
                .enumerate()
                .map(|(i, t)| ChecklistStep {
                    index: i as u32,
                    title: t.clone(),
                    status: StepStatus::Pending,
                    note: None,
                })
                .collect(),
        }
    }

    pub fn update_step(
        &mut self,
        index: u32,
        status: StepStatus,
        note: Option<String>,
    ) -> Result<(), String> {
        let step = self
            .steps
            .iter_mut()
            .find(|s| s.index == index)
            .ok_or_else(|| format!("no checklist step with index {}", index))?;
        step.status = status;
        if note.is_some() {
            step.note = note;
        }
        Ok(())
    }

    pub fn completed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count()
    }
}

/// Final execution report written when a persisted task terminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// `completed`, `partial`, or `failed`.
    pub status: String,
    pub steps_completed: usize,
    pub steps_total: usize,
    pub errors: Vec<String>,
    pub duration_secs: i64,
    pub conclusion: String,
}

impl ExecutionReport {
    /// Derive the report from the final checklist state and the terminate
    /// arguments. No checklist at all counts as `completed` when nothing
    /// failed — simple missions are allowed to skip CREATE_CHECKLIST.
    pub fn derive(
        checklist: Option<&Checklist>,
        terminate_input: &Value,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        let conclusion = terminate_input
            .get("conclusion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut errors: Vec<String> = terminate_input
            .get("errors")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let (completed, total) = match checklist {
            Some(c) => {
                for step in c.steps.iter().filter(|s| s.status == StepStatus::Failed) {
                    errors.push(format!("step {} failed: {}", step.index, step.title));
                }
                (c.completed_count(), c.steps.len())
            }
            None => (0, 0),
        };

        let status = if total > 0 && completed == total && errors.is_empty() {
            "completed"
        } else if total == 0 && errors.is_empty() {
            "completed"
        } else if completed > 0 {
            "partial"
        } else {
            "failed"
        };

        Self {
            status: status.to_string(),
            steps_completed: completed,
            steps_total: total,
            errors,
            duration_secs: (chrono::Utc::now() - started_at).num_seconds(),
            conclusion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn checklist_with(statuses: &[StepStatus]) -> Checklist {
        let mut c = Checklist::from_titles(
            &statuses
                .iter()
                .enumerate()
                .map(|(i, _)| format!("step {}", i))
                .collect::<Vec<_>>(),
        );
        for (i, s) in statuses.iter().enumerate() {
            c.update_step(i as u32, *s, None).unwrap();
        }
        c
    }

    #[test]
    fn all_steps_done_is_completed() {
        let c = checklist_with(&[StepStatus::Completed, StepStatus::Completed]);
        let r = ExecutionReport::derive(Some(&c), &json!({"conclusion": "done"}), chrono::Utc::now());
        assert_eq!(r.status, "completed");
        assert_eq!(r.steps_completed, 2);
        assert_eq!(r.steps_total, 2);
        assert!(r.errors.is_empty());
    }

    #[test]
    fn mixed_steps_are_partial_with_failure_noted() {
        let c = checklist_with(&[StepStatus::Completed, StepStatus::Failed]);
        let r = ExecutionReport::derive(Some(&c), &json!({}), chrono::Utc::now());
        assert_eq!(r.status, "partial");
        assert_eq!(r.errors.len(), 1);
    }

    #[test]
    fn nothing_done_is_failed() {
        let c = checklist_with(&[StepStatus::Failed, StepStatus::Pending]);
        let r = ExecutionReport::derive(Some(&c), &json!({}), chrono::Utc::now());
        assert_eq!(r.status, "failed");
    }

    #[test]
    fn unknown_step_index_is_rejected() {
        let mut c = Checklist::from_titles(&["a".into()]);
        assert!(c.update_step(5, StepStatus::Completed, None).is_err());
    }
}
