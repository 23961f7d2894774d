//! In-process implementations of the brain's ports, used by tests and local
//! development (mirroring `MemoryRtdb` in the rtdb crate).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::ports::{ContextStore, ContextType, DriveDocs, ExecutionStore, LptDispatcher, TaskStore};
use crate::task::{Checklist, ExecutionReport};

type ContextKey = (String, &'static str, Option<String>);

/// Context texts held in a map; preload with [`MemoryContextStore::seed`].
#[derive(Default)]
pub struct MemoryContextStore {
    texts: Mutex<HashMap<ContextKey, String>>,
}

impl MemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(
        &self,
        mandate_path: &str,
        context_type: ContextType,
        service_name: Option<&str>,
        text: &str,
    ) {
        self.texts.lock().unwrap().insert(
            (
                mandate_path.to_string(),
                context_type.as_str(),
                service_name.map(String::from),
            ),
            text.to_string(),
        );
    }

    pub fn read_sync(
        &self,
        mandate_path: &str,
        context_type: ContextType,
        service_name: Option<&str>,
    ) -> Option<String> {
        self.texts
            .lock()
            .unwrap()
            .get(&(
                mandate_path.to_string(),
                context_type.as_str(),
                service_name.map(String::from),
            ))
            .cloned()
    }
}

#[async_trait]
impl ContextStore for MemoryContextStore {
    async fn read_context(
        &self,
        mandate_path: &str,
        context_type: ContextType,
        service_name: Option<&str>,
    ) -> Result<String, String> {
        Ok(self
            .read_sync(mandate_path, context_type, service_name)
            .unwrap_or_default())
    }

    async fn write_context(
        &self,
        mandate_path: &str,
        context_type: ContextType,
        service_name: Option<&str>,
        text: &str,
    ) -> Result<(), String> {
        self.seed(mandate_path, context_type, service_name, text);
        Ok(())
    }
}

/// Execution records kept in memory for assertions.
#[derive(Default)]
pub struct MemoryExecutionStore {
    pub checklists: Mutex<Vec<(String, Checklist)>>,
    pub reports: Mutex<Vec<(String, String, ExecutionReport)>>,
    pub cleared: Mutex<Vec<(String, String)>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn save_checklist(
        &self,
        execution_id: &str,
        checklist: &Checklist,
    ) -> Result<(), String> {
        self.checklists
            .lock()
            .unwrap()
            .push((execution_id.to_string(), checklist.clone()));
        Ok(())
    }

    async fn write_final_report(
        &self,
        task_id: &str,
        execution_id: &str,
        report: &ExecutionReport,
    ) -> Result<(), String> {
        self.reports.lock().unwrap().push((
            task_id.to_string(),
            execution_id.to_string(),
            report.clone(),
        ));
        Ok(())
    }

    async fn clear_running_execution(
        &self,
        task_id: &str,
        execution_id: &str,
    ) -> Result<(), String> {
        self.cleared
            .lock()
            .unwrap()
            .push((task_id.to_string(), execution_id.to_string()));
        Ok(())
    }
}

/// Task definitions kept in memory; ids are sequential.
#[derive(Default)]
pub struct MemoryTaskStore {
    pub tasks: Mutex<Vec<(String, Value)>>,
    next_id: AtomicU64,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create_task(&self, definition: Value) -> Result<String, String> {
        let id = format!("task{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.tasks.lock().unwrap().push((id.clone(), definition));
        Ok(id)
    }
}

/// Canned document descriptions.
#[derive(Default)]
pub struct StaticDriveDocs {
    answers: Mutex<HashMap<String, String>>,
}

impl StaticDriveDocs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, file_id: &str, answer: &str) {
        self.answers
            .lock()
            .unwrap()
            .insert(file_id.to_string(), answer.to_string());
    }
}

#[async_trait]
impl DriveDocs for StaticDriveDocs {
    async fn describe_document(&self, file_id: &str, _question: &str) -> Result<String, String> {
        self.answers
            .lock()
            .unwrap()
            .get(file_id)
            .cloned()
            .ok_or_else(|| format!("unknown document: {file_id}"))
    }
}

/// Records dispatches and hands back sequential task ids.
#[derive(Default)]
pub struct RecordingLptDispatcher {
    pub dispatched: Mutex<Vec<(String, String, String, Value, String)>>,
    next_id: AtomicU64,
}

impl RecordingLptDispatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LptDispatcher for RecordingLptDispatcher {
    async fn dispatch(
        &self,
        thread_key: &str,
        agent: &str,
        action: &str,
        params: Value,
        task_title: &str,
    ) -> Result<String, String> {
        let id = format!("lpt{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.dispatched.lock().unwrap().push((
            thread_key.to_string(),
            agent.to_string(),
            action.to_string(),
            params,
            task_title.to_string(),
        ));
        Ok(id)
    }
}
