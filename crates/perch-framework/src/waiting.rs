use crate::status::{Code, Status};
use perch_core::{pod_name, pod_uid, Pod};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::debug;

fn lock_or_recover<T>(lock: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A pod held at the Permit stage, waiting for out-of-band signals.
///
/// Each entry is a single-slot rendezvous: the Permit stage registers it,
/// `wait_on_permit` consumes the one-shot signal, and external callers
/// resolve it through [`allow`](Self::allow) / [`reject`](Self::reject).
/// The first resolution wins; later calls are no-ops.
pub struct WaitingPod {
    pod: Pod,
    /// Plugins that asked to wait and have not allowed yet.
    pending: Mutex<HashSet<String>>,
    tx: Mutex<Option<oneshot::Sender<Status>>>,
    rx: Mutex<Option<oneshot::Receiver<Status>>>,
    deadline: Instant,
    timeout: Duration,
}

impl WaitingPod {
    pub(crate) fn new(
        pod: Pod,
        plugins: impl IntoIterator<Item = String>,
        timeout: Duration,
    ) -> Arc<Self> {
        let (tx, rx) = oneshot::channel();
        Arc::new(Self {
            pod,
            pending: Mutex::new(plugins.into_iter().collect()),
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            deadline: Instant::now() + timeout,
            timeout,
        })
    }

    pub fn pod(&self) -> &Pod {
        &self.pod
    }

    /// Plugins still holding this pod.
    pub fn pending_plugins(&self) -> Vec<String> {
        lock_or_recover(&self.pending).iter().cloned().collect()
    }

    /// The maximum wait registered at Permit time.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Record that `plugin` allows the pod. Once every pending plugin has
    /// allowed, the wait resolves with Success.
    pub fn allow(&self, plugin: &str) {
        {
            let mut pending = lock_or_recover(&self.pending);
            pending.remove(plugin);
            if !pending.is_empty() {
                debug!(
                    pod = pod_name(&self.pod),
                    plugin,
                    remaining = pending.len(),
                    "permit plugin allowed waiting pod"
                );
                return;
            }
        }
        self.resolve(Status::success());
    }

    /// Reject the pod immediately with the given reason.
    pub fn reject(&self, reason: &str) {
        self.resolve(Status::new(
            Code::Unschedulable,
            format!(
                "pod \"{}\" rejected while waiting on permit: {}",
                pod_name(&self.pod),
                reason
            ),
        ));
    }

    fn resolve(&self, status: Status) {
        if let Some(tx) = lock_or_recover(&self.tx).take() {
            // The receiver may already be gone (cancelled waiter).
            let _ = tx.send(status);
        }
    }

    /// Take the one-shot signal. Only the `wait_on_permit` consumer calls
    /// this, exactly once.
    pub(crate) fn take_signal(&self) -> Option<oneshot::Receiver<Status>> {
        lock_or_recover(&self.rx).take()
    }
}

/// Registry of pods currently held at Permit, keyed by pod uid.
///
/// The registry-wide lock covers only insertion and removal; each entry
/// synchronizes its own state transitions.
#[derive(Default)]
pub struct WaitingPods {
    pods: RwLock<HashMap<String, Arc<WaitingPod>>>,
}

impl WaitingPods {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, waiting_pod: Arc<WaitingPod>) {
        let uid = pod_uid(waiting_pod.pod()).to_string();
        let mut pods = match self.pods.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pods.insert(uid, waiting_pod);
    }

    pub fn get(&self, uid: &str) -> Option<Arc<WaitingPod>> {
        let pods = match self.pods.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pods.get(uid).cloned()
    }

    pub(crate) fn remove(&self, uid: &str) {
        let mut pods = match self.pods.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pods.remove(uid);
    }

    pub fn len(&self) -> usize {
        let pods = match self.pods.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pod(name: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.uid = Some(name.to_string());
        pod
    }

    #[tokio::test]
    async fn test_allow_resolves_after_all_plugins() {
        let wp = WaitingPod::new(
            make_pod("pod"),
            ["a".to_string(), "b".to_string()],
            Duration::from_secs(10),
        );
        let rx = wp.take_signal().unwrap();

        wp.allow("a");
        assert_eq!(wp.pending_plugins(), vec!["b".to_string()]);

        wp.allow("b");
        let status = rx.await.unwrap();
        assert!(status.is_success());
        assert_eq!(status.message(), "");
    }

    #[tokio::test]
    async fn test_reject_resolves_with_message() {
        let wp = WaitingPod::new(
            make_pod("pod"),
            ["permit".to_string()],
            Duration::from_secs(10),
        );
        let rx = wp.take_signal().unwrap();

        wp.reject("reject message");
        let status = rx.await.unwrap();
        assert_eq!(status.code(), Code::Unschedulable);
        assert_eq!(
            status.message(),
            "pod \"pod\" rejected while waiting on permit: reject message"
        );
    }

    #[tokio::test]
    async fn test_second_resolution_is_noop() {
        let wp = WaitingPod::new(
            make_pod("pod"),
            ["permit".to_string()],
            Duration::from_secs(10),
        );
        let rx = wp.take_signal().unwrap();

        wp.reject("first");
        wp.allow("permit");

        let status = rx.await.unwrap();
        assert_eq!(status.code(), Code::Unschedulable);
        assert!(status.message().contains("first"));
    }

    #[test]
    fn test_registry_add_get_remove() {
        let registry = WaitingPods::new();
        let wp = WaitingPod::new(
            make_pod("pod"),
            ["permit".to_string()],
            Duration::from_secs(1),
        );
        registry.add(wp);

        assert!(registry.get("pod").is_some());
        assert_eq!(registry.len(), 1);

        registry.remove("pod");
        assert!(registry.get("pod").is_none());
        assert!(registry.is_empty());
    }
}
