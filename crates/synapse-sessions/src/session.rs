use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info};

use synapse_brain::Brain;
use synapse_core::tenant::{JobsData, UserContext};
use synapse_core::types::{ChatMode, SessionId, TenantId, ThreadKey, UserId};

use crate::callback_loop::CallbackLoop;
use crate::listener_handle::ListenerHandle;

/// On-page flags. `leave_chat` clears the page flag but keeps the last
/// thread for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct Presence {
    pub on_chat_page: bool,
    pub current_active_thread: Option<ThreadKey>,
}

/// Per-(user, tenant) aggregate. Owned exclusively by the manager registry;
/// brains, listener handles, and the callback loop are owned here.
pub struct Session {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub tenant_id: TenantId,
    client_uuid: Mutex<String>,
    chat_mode: Mutex<ChatMode>,
    user_context: Arc<RwLock<Option<UserContext>>>,
    jobs: Arc<RwLock<JobsData>>,
    presence: Mutex<Presence>,
    brains: Mutex<HashMap<ThreadKey, Arc<Brain>>>,
    /// Per-thread creation locks make enter_chat idempotent under
    /// concurrent callers.
    brain_locks: Mutex<HashMap<ThreadKey, Arc<tokio::sync::Mutex<()>>>>,
    intermediation: Mutex<HashMap<ThreadKey, bool>>,
    listeners: Mutex<HashMap<ThreadKey, Arc<ListenerHandle>>>,
    callback_loop: Mutex<Option<Arc<CallbackLoop>>>,
}

impl Session {
    pub fn new(user_id: UserId, tenant_id: TenantId) -> Self {
        let session_id = SessionId::new();
        info!(user = %user_id, tenant = %tenant_id, session = %session_id, "session allocated");
        Self {
            session_id,
            user_id,
            tenant_id,
            client_uuid: Mutex::new(String::new()),
            chat_mode: Mutex::new(ChatMode::General),
            user_context: Arc::new(RwLock::new(None)),
            jobs: Arc::new(RwLock::new(JobsData::default())),
            presence: Mutex::new(Presence::default()),
            brains: Mutex::new(HashMap::new()),
            brain_locks: Mutex::new(HashMap::new()),
            intermediation: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            callback_loop: Mutex::new(None),
        }
    }

    // ── Initialization state ────────────────────────────────────────────────

    /// A session is fully initialized iff its user context is loaded.
    pub fn is_initialized(&self) -> bool {
        self.user_context.read().unwrap().is_some()
    }

    pub fn client_uuid(&self) -> String {
        self.client_uuid.lock().unwrap().clone()
    }

    pub fn set_client_uuid(&self, uuid: &str) {
        *self.client_uuid.lock().unwrap() = uuid.to_string();
    }

    pub fn chat_mode(&self) -> ChatMode {
        *self.chat_mode.lock().unwrap()
    }

    pub fn set_chat_mode(&self, mode: ChatMode) {
        *self.chat_mode.lock().unwrap() = mode;
    }

    /// Shared handle the brains read tenant context through.
    pub fn user_context_handle(&self) -> Arc<RwLock<Option<UserContext>>> {
        Arc::clone(&self.user_context)
    }

    pub fn user_context(&self) -> Option<UserContext> {
        self.user_context.read().unwrap().clone()
    }

    pub fn set_user_context(&self, ctx: Option<UserContext>) {
        *self.user_context.write().unwrap() = ctx;
    }

    pub fn jobs_handle(&self) -> Arc<RwLock<JobsData>> {
        Arc::clone(&self.jobs)
    }

    pub fn set_jobs(&self, jobs: JobsData) {
        *self.jobs.write().unwrap() = jobs;
    }

    pub fn jobs(&self) -> JobsData {
        self.jobs.read().unwrap().clone()
    }

    // ── Presence ────────────────────────────────────────────────────────────

    pub fn enter_page(&self, thread_key: &ThreadKey) {
        let mut presence = self.presence.lock().unwrap();
        presence.on_chat_page = true;
        presence.current_active_thread = Some(thread_key.clone());
        debug!(user = %self.user_id, thread = %thread_key, "presence: on page");
    }

    pub fn switch_thread(&self, thread_key: &ThreadKey) {
        let mut presence = self.presence.lock().unwrap();
        presence.current_active_thread = Some(thread_key.clone());
    }

    /// Returns (was_on_chat_page, was_on_thread).
    pub fn leave_page(&self, thread_key: Option<&ThreadKey>) -> (bool, bool) {
        let mut presence = self.presence.lock().unwrap();
        let was_on_page = presence.on_chat_page;
        let was_on_thread = match thread_key {
            Some(t) => presence.current_active_thread.as_ref() == Some(t),
            None => presence.current_active_thread.is_some(),
        };
        presence.on_chat_page = false;
        // current_active_thread is preserved for diagnostics.
        (was_on_page, was_on_thread)
    }

    pub fn presence(&self) -> Presence {
        self.presence.lock().unwrap().clone()
    }

    /// The single authority the resume path uses to pick UI vs BACKEND mode.
    pub fn is_user_on_specific_thread(&self, thread_key: &ThreadKey) -> bool {
        let presence = self.presence.lock().unwrap();
        presence.on_chat_page && presence.current_active_thread.as_ref() == Some(thread_key)
    }

    // ── Brains ──────────────────────────────────────────────────────────────

    pub fn brain(&self, thread_key: &ThreadKey) -> Option<Arc<Brain>> {
        self.brains.lock().unwrap().get(thread_key).cloned()
    }

    pub fn insert_brain(&self, thread_key: ThreadKey, brain: Arc<Brain>) {
        self.brains.lock().unwrap().insert(thread_key, brain);
    }

    pub fn remove_brain(&self, thread_key: &ThreadKey) -> Option<Arc<Brain>> {
        self.brains.lock().unwrap().remove(thread_key)
    }

    pub fn brains_count(&self) -> usize {
        self.brains.lock().unwrap().len()
    }

    pub fn all_brains(&self) -> Vec<Arc<Brain>> {
        self.brains.lock().unwrap().values().cloned().collect()
    }

    pub fn thread_keys(&self) -> Vec<ThreadKey> {
        self.brains.lock().unwrap().keys().cloned().collect()
    }

    /// Per-thread creation lock; hold it across the check-create sequence.
    pub fn brain_creation_lock(&self, thread_key: &ThreadKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.brain_locks.lock().unwrap();
        Arc::clone(locks.entry(thread_key.clone()).or_default())
    }

    // ── Intermediation ──────────────────────────────────────────────────────

    pub fn intermediation_active(&self, thread_key: &ThreadKey) -> bool {
        self.intermediation
            .lock()
            .unwrap()
            .get(thread_key)
            .copied()
            .unwrap_or(false)
    }

    /// Returns the previous value.
    pub fn set_intermediation(&self, thread_key: &ThreadKey, active: bool) -> bool {
        self.intermediation
            .lock()
            .unwrap()
            .insert(thread_key.clone(), active)
            .unwrap_or(false)
    }

    pub fn clear_intermediation(&self, thread_key: &ThreadKey) {
        self.intermediation.lock().unwrap().remove(thread_key);
    }

    // ── Listeners ───────────────────────────────────────────────────────────

    pub fn listener(&self, thread_key: &ThreadKey) -> Option<Arc<ListenerHandle>> {
        self.listeners.lock().unwrap().get(thread_key).cloned()
    }

    pub fn has_listener(&self, thread_key: &ThreadKey) -> bool {
        self.listeners.lock().unwrap().contains_key(thread_key)
    }

    pub fn set_listener(&self, thread_key: ThreadKey, handle: Arc<ListenerHandle>) {
        self.listeners.lock().unwrap().insert(thread_key, handle);
    }

    pub fn take_listener(&self, thread_key: &ThreadKey) -> Option<Arc<ListenerHandle>> {
        self.listeners.lock().unwrap().remove(thread_key)
    }

    // ── Callback loop ───────────────────────────────────────────────────────

    /// The per-session callback loop, created on first use.
    pub fn callback_loop(&self) -> Arc<CallbackLoop> {
        let mut slot = self.callback_loop.lock().unwrap();
        match slot.as_ref() {
            Some(cb) => Arc::clone(cb),
            None => {
                let cb = Arc::new(CallbackLoop::new(format!(
                    "{}:{}",
                    self.user_id, self.tenant_id
                )));
                *slot = Some(Arc::clone(&cb));
                cb
            }
        }
    }

    /// Tear down one thread: close its brain, drop intermediation and the
    /// listener subscription. Returns whether a brain existed.
    pub fn flush_thread(&self, thread_key: &ThreadKey) -> bool {
        if let Some(handle) = self.take_listener(thread_key) {
            handle.unsubscribe();
        }
        self.clear_intermediation(thread_key);
        match self.remove_brain(thread_key) {
            Some(brain) => {
                brain.close();
                true
            }
            None => false,
        }
    }

    /// Tear down every thread plus the callback loop.
    pub fn teardown(&self) -> usize {
        let threads = self.thread_keys();
        let mut cleared = 0;
        for thread in &threads {
            if self.flush_thread(thread) {
                cleared += 1;
            }
        }
        if let Some(cb) = self.callback_loop.lock().unwrap().take() {
            cb.stop();
        }
        info!(user = %self.user_id, tenant = %self.tenant_id, cleared, "session torn down");
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("u1".into(), "acme".into())
    }

    #[test]
    fn presence_enter_switch_leave() {
        let s = session();
        let t1: ThreadKey = "t1".into();
        let t2: ThreadKey = "t2".into();

        s.enter_page(&t1);
        assert!(s.is_user_on_specific_thread(&t1));
        assert!(!s.is_user_on_specific_thread(&t2));

        s.switch_thread(&t2);
        assert!(s.is_user_on_specific_thread(&t2));

        let (was_on_page, was_on_thread) = s.leave_page(Some(&t2));
        assert!(was_on_page);
        assert!(was_on_thread);
        assert!(!s.is_user_on_specific_thread(&t2));
        // Thread reference survives leave for diagnostics.
        assert_eq!(s.presence().current_active_thread, Some(t2));
    }

    #[test]
    fn intermediation_flags_default_off() {
        let s = session();
        let t1: ThreadKey = "t1".into();
        assert!(!s.intermediation_active(&t1));
        assert!(!s.set_intermediation(&t1, true));
        assert!(s.intermediation_active(&t1));
        assert!(s.set_intermediation(&t1, true));
        s.clear_intermediation(&t1);
        assert!(!s.intermediation_active(&t1));
    }

    #[test]
    fn initialized_iff_user_context_present() {
        let s = session();
        assert!(!s.is_initialized());
        s.set_user_context(Some(Default::default()));
        assert!(s.is_initialized());
    }
}
