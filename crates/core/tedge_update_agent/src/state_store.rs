//! The in-memory State Store: the single source of truth the topic
//! modules and the update worker read and write every tick.
//!
//! Grounded on `tedge_agent`'s central `AgentState`/`StateRepository`
//! split: an in-memory struct the rest of the process reads synchronously,
//! paired with a repository that persists it to disk (see
//! [`crate::persist`]). This module is only the in-memory half; the state
//! store never touches the filesystem itself.

use std::sync::Arc;
use std::sync::RwLock;

use crate::worker::WorkQueue;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSnapshot {
    pub is_device_enrolled: bool,
    pub is_agent_info_reported: bool,
    pub external_device_id: Option<String>,
    pub device_update_service_instance: Option<String>,
}

#[derive(Default)]
struct Inner {
    snapshot: StateSnapshot,
    work_queue: Option<Arc<WorkQueue>>,
}

/// Shared, lock-protected agent state.
///
/// A plain `RwLock` rather than message-passing through an actor mailbox:
/// every topic module needs to read and write this every tick on the same
/// thread, so a lock adds nothing an actor round-trip wouldn't also need,
/// and reads vastly outnumber writes.
pub struct StateStore {
    inner: RwLock<Inner>,
}

impl StateStore {
    pub fn new() -> Self {
        StateStore {
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn from_snapshot(snapshot: StateSnapshot) -> Self {
        StateStore {
            inner: RwLock::new(Inner {
                snapshot,
                work_queue: None,
            }),
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.inner.read().expect("state store lock poisoned").snapshot.clone()
    }

    pub fn is_device_enrolled(&self) -> bool {
        self.inner.read().expect("state store lock poisoned").snapshot.is_device_enrolled
    }

    pub fn is_agent_info_reported(&self) -> bool {
        self.inner
            .read()
            .expect("state store lock poisoned")
            .snapshot
            .is_agent_info_reported
    }

    pub fn external_device_id(&self) -> Option<String> {
        self.inner
            .read()
            .expect("state store lock poisoned")
            .snapshot
            .external_device_id
            .clone()
    }

    pub fn set_enrolled(&self, external_device_id: String) {
        let mut inner = self.inner.write().expect("state store lock poisoned");
        inner.snapshot.is_device_enrolled = true;
        inner.snapshot.external_device_id = Some(external_device_id);
    }

    pub fn set_agent_info_reported(&self, service_instance: String) {
        let mut inner = self.inner.write().expect("state store lock poisoned");
        inner.snapshot.is_agent_info_reported = true;
        inner.snapshot.device_update_service_instance = Some(service_instance);
    }

    /// Resets enrollment and agent-info-reported in one atomic step.
    ///
    /// Used when the broker rejects a publish as a gating violation (e.g.
    /// an update request arrives for a device the cloud no longer
    /// recognises as enrolled): both flags must flip back together, never
    /// one tick apart, or a topic module could observe an inconsistent
    /// in-between state.
    pub fn reset_enrollment(&self) {
        let mut inner = self.inner.write().expect("state store lock poisoned");
        inner.snapshot.is_device_enrolled = false;
        inner.snapshot.is_agent_info_reported = false;
        inner.snapshot.external_device_id = None;
        inner.snapshot.device_update_service_instance = None;
    }

    pub fn work_queue(&self) -> Option<Arc<WorkQueue>> {
        self.inner.read().expect("state store lock poisoned").work_queue.clone()
    }

    pub fn set_work_queue(&self, queue: Arc<WorkQueue>) {
        self.inner.write().expect("state store lock poisoned").work_queue = Some(queue);
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unenrolled() {
        let store = StateStore::new();
        assert!(!store.is_device_enrolled());
        assert!(!store.is_agent_info_reported());
    }

    #[test]
    fn enrollment_and_agent_info_are_independent_flags() {
        let store = StateStore::new();
        store.set_enrolled("device-123".to_string());
        assert!(store.is_device_enrolled());
        assert!(!store.is_agent_info_reported());

        store.set_agent_info_reported("svc-1".to_string());
        assert!(store.is_agent_info_reported());
    }

    #[test]
    fn reset_enrollment_clears_both_flags_together() {
        let store = StateStore::new();
        store.set_enrolled("device-123".to_string());
        store.set_agent_info_reported("svc-1".to_string());

        store.reset_enrollment();

        assert!(!store.is_device_enrolled());
        assert!(!store.is_agent_info_reported());
        assert_eq!(store.external_device_id(), None);
    }
}
