use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use synapse_core::types::{TenantId, ThreadKey, UserId};

/// Per-thread registry of active streaming workflows.
///
/// Invariant: at most one workflow is registered per thread. `begin` cancels
/// any previous task and awaits it, so a new `send_message` only starts once
/// the prior cancellation has been observed.
pub struct StreamingController {
    tasks: DashMap<String, StreamTask>,
    next_gen: std::sync::atomic::AtomicU64,
}

struct StreamTask {
    /// Registration generation — lets a finished task remove only its own
    /// entry, never a successor's.
    gen: u64,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

fn key(user_id: &UserId, tenant_id: &TenantId, thread_key: &ThreadKey) -> String {
    format!("{}:{}:{}", user_id, tenant_id, thread_key)
}

impl StreamingController {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            next_gen: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Register a new workflow for the thread, displacing (cancel + await)
    /// any previous one. Returns the new task's cancellation token and its
    /// registration generation for [`StreamingController::finish`].
    pub async fn begin(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        thread_key: &ThreadKey,
    ) -> (CancellationToken, u64) {
        let k = key(user_id, tenant_id, thread_key);
        if let Some((_, mut previous)) = self.tasks.remove(&k) {
            previous.token.cancel();
            if let Some(handle) = previous.handle.take() {
                debug!(key = %k, "awaiting displaced streaming task");
                let _ = handle.await;
            }
        }
        let token = CancellationToken::new();
        let gen = self
            .next_gen
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.tasks.insert(
            k,
            StreamTask {
                gen,
                token: token.clone(),
                handle: None,
            },
        );
        (token, gen)
    }

    /// Attach the spawned task handle so a displacing caller can await it.
    pub fn attach(
        &self,
        user_id: &UserId,
        tenant_id: &TenantId,
        thread_key: &ThreadKey,
        handle: JoinHandle<()>,
    ) {
        if let Some(mut entry) = self.tasks.get_mut(&key(user_id, tenant_id, thread_key)) {
            entry.handle = Some(handle);
        }
    }

    /// The workflow finished (any outcome) — drop its registration, unless
    /// a newer one has already displaced it.
    pub fn finish(&self, user_id: &UserId, tenant_id: &TenantId, thread_key: &ThreadKey, gen: u64) {
        self.tasks
            .remove_if(&key(user_id, tenant_id, thread_key), |_, task| {
                task.gen == gen
            });
    }

    /// Cancel the workflow on one thread. Returns whether one was active.
    pub fn stop(&self, user_id: &UserId, tenant_id: &TenantId, thread_key: &ThreadKey) -> bool {
        match self.tasks.get(&key(user_id, tenant_id, thread_key)) {
            Some(entry) => {
                entry.token.cancel();
                info!(user = %user_id, thread = %thread_key, "streaming task cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every workflow of a session. Returns how many were cancelled.
    pub fn stop_session(&self, user_id: &UserId, tenant_id: &TenantId) -> usize {
        let prefix = format!("{}:{}:", user_id, tenant_id);
        let mut stopped = 0;
        for entry in self.tasks.iter() {
            if entry.key().starts_with(&prefix) {
                entry.value().token.cancel();
                stopped += 1;
            }
        }
        if stopped > 0 {
            info!(user = %user_id, tenant = %tenant_id, stopped, "session streaming tasks cancelled");
        }
        stopped
    }

    /// Whether a workflow is currently registered for the thread.
    pub fn is_active(&self, user_id: &UserId, tenant_id: &TenantId, thread_key: &ThreadKey) -> bool {
        self.tasks.contains_key(&key(user_id, tenant_id, thread_key))
    }
}

impl Default for StreamingController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn begin_displaces_and_awaits_previous_task() {
        let controller = StreamingController::new();
        let (user, tenant, thread): (UserId, TenantId, ThreadKey) =
            ("u1".into(), "acme".into(), "t1".into());

        let (token, _gen) = controller.begin(&user, &tenant, &thread).await;
        let observed = Arc::new(AtomicBool::new(false));
        let observed_task = Arc::clone(&observed);
        let handle = tokio::spawn(async move {
            token.cancelled().await;
            observed_task.store(true, Ordering::SeqCst);
        });
        controller.attach(&user, &tenant, &thread, handle);

        // Second begin must observe the first task's cancellation.
        let (_token2, gen2) = controller.begin(&user, &tenant, &thread).await;
        assert!(observed.load(Ordering::SeqCst));
        assert!(controller.is_active(&user, &tenant, &thread));

        // A stale finish (wrong generation) must not drop the live entry.
        controller.finish(&user, &tenant, &thread, gen2 + 100);
        assert!(controller.is_active(&user, &tenant, &thread));
        controller.finish(&user, &tenant, &thread, gen2);
        assert!(!controller.is_active(&user, &tenant, &thread));
    }

    #[tokio::test]
    async fn stop_cancels_only_matching_session() {
        let controller = StreamingController::new();
        let u1: UserId = "u1".into();
        let u2: UserId = "u2".into();
        let tenant: TenantId = "acme".into();
        let thread: ThreadKey = "t1".into();

        let (t1, _) = controller.begin(&u1, &tenant, &thread).await;
        let (t2, _) = controller.begin(&u2, &tenant, &thread).await;

        assert_eq!(controller.stop_session(&u1, &tenant), 1);
        assert!(t1.is_cancelled());
        assert!(!t2.is_cancelled());

        assert!(controller.stop(&u2, &tenant, &thread));
        assert!(t2.is_cancelled());
        assert!(!controller.stop(&"nobody".into(), &tenant, &thread));
    }
}
