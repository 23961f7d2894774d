use std::collections::HashSet;
use std::sync::Mutex;

use synapse_rtdb::RtdbSubscription;

/// State of one installed follow-up listener.
///
/// `processed_message_ids` guards against the same worker message being
/// re-injected into history across reconnects and reloads; `log_entries` is
/// the formatted buffer re-injected wholesale as the job's system-log
/// section.
pub struct ListenerHandle {
    pub job_id: String,
    log_entries: Mutex<Vec<String>>,
    processed_message_ids: Mutex<HashSet<String>>,
    subscription: Mutex<Option<RtdbSubscription>>,
}

impl ListenerHandle {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            log_entries: Mutex::new(Vec::new()),
            processed_message_ids: Mutex::new(HashSet::new()),
            subscription: Mutex::new(None),
        }
    }

    pub fn attach_subscription(&self, sub: RtdbSubscription) {
        *self.subscription.lock().unwrap() = Some(sub);
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.lock().unwrap().is_some()
    }

    /// Detach the RTDB subscription (idempotent).
    pub fn unsubscribe(&self) {
        if let Some(sub) = self.subscription.lock().unwrap().take() {
            sub.close();
        }
    }

    /// Record a message id; returns false when it was already processed.
    pub fn mark_processed(&self, message_id: &str) -> bool {
        self.processed_message_ids
            .lock()
            .unwrap()
            .insert(message_id.to_string())
    }

    pub fn is_processed(&self, message_id: &str) -> bool {
        self.processed_message_ids
            .lock()
            .unwrap()
            .contains(message_id)
    }

    /// Append a formatted log line and return the concatenated buffer.
    pub fn push_log_entry(&self, line: String) -> String {
        let mut entries = self.log_entries.lock().unwrap();
        entries.push(line);
        entries.join("\n")
    }

    pub fn log_entries_len(&self) -> usize {
        self.log_entries.lock().unwrap().len()
    }

    pub fn log_buffer(&self) -> String {
        self.log_entries.lock().unwrap().join("\n")
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(sub) = self.subscription.get_mut().unwrap().take() {
            sub.close();
        }
    }
}
