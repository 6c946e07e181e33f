use crate::binding::{binding_for, scheduled_event_message, BindingSink};
use crate::cluster::{pod_key, ClusterSnapshot};
use crate::error::{Result, SchedulerError};
use crate::plugins::{default_registry, DEFAULT_BINDER, PRIORITY_SORT};
use perch_core::{node_name, pod_name, Node, Pod};
use perch_framework::{
    Code, CycleState, Framework, FrameworkOptions, NodeInfo, NodeLister, NodeToStatus,
    PluginConfig, PluginToNodeScores, Plugins, QueuedPodInfo, Status,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for the scheduler driver
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between scheduling cycles
    pub schedule_interval: Duration,
    /// Percentage of attempts that record per-plugin metrics
    pub plugin_metrics_sample_percent: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedule_interval: Duration::from_secs(1),
            plugin_metrics_sample_percent: 10,
        }
    }
}

/// Compose a framework over the in-tree registry, wiring the snapshot in
/// as the handle's listers and installing the default queue sort and
/// binder.
pub fn build_framework(
    snapshot: Arc<ClusterSnapshot>,
    plugins: &Plugins,
    plugin_configs: &[PluginConfig],
    options: FrameworkOptions,
) -> Result<Framework> {
    let registry = default_registry()?;
    let framework = Framework::new(
        &registry,
        plugins,
        plugin_configs,
        options
            .with_node_lister(snapshot.clone())
            .with_pod_lister(snapshot)
            .with_default_queue_sort(PRIORITY_SORT)
            .with_default_binder(DEFAULT_BINDER),
    )?;
    Ok(framework)
}

/// Pod scheduler: feeds pending pods through the framework pipeline and
/// hands binding decisions to the sink.
pub struct Scheduler {
    framework: Arc<Framework>,
    snapshot: Arc<ClusterSnapshot>,
    sink: Arc<dyn BindingSink>,
    config: SchedulerConfig,
    attempts: AtomicU64,
    /// Pods whose rejection was unresolvable; they are not requeued.
    rejected: Mutex<HashSet<String>>,
}

impl Scheduler {
    pub fn new(
        framework: Arc<Framework>,
        snapshot: Arc<ClusterSnapshot>,
        sink: Arc<dyn BindingSink>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            framework,
            snapshot,
            sink,
            config,
            attempts: AtomicU64::new(0),
            rejected: Mutex::new(HashSet::new()),
        }
    }

    /// Scheduling attempts started so far.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Run the scheduler loop until the token is cancelled.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!("Starting scheduler");

        loop {
            if let Err(e) = self.schedule_cycle(&token).await {
                error!("Scheduling cycle failed: {e}");
            }

            tokio::select! {
                _ = token.cancelled() => {
                    info!("Scheduler shutting down");
                    return Ok(());
                }
                _ = sleep(self.config.schedule_interval) => {}
            }
        }
    }

    /// Run a single scheduling cycle over all pending pods, in queue
    /// order.
    pub async fn schedule_cycle(&self, token: &CancellationToken) -> Result<()> {
        let rejected = {
            let guard = match self.rejected.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.clone()
        };

        let mut queue: Vec<QueuedPodInfo> = self
            .snapshot
            .unscheduled_pods()
            .into_iter()
            .filter(|pod| !rejected.contains(&pod_key(pod)))
            .map(QueuedPodInfo::new)
            .collect();

        if queue.is_empty() {
            debug!("no pending pods");
            return Ok(());
        }

        queue.sort_by(|a, b| {
            if self.framework.queue_sort_less(a, b) {
                std::cmp::Ordering::Less
            } else if self.framework.queue_sort_less(b, a) {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Equal
            }
        });

        info!("Found {} pending pods", queue.len());

        for info in queue {
            let name = pod_name(&info.pod).to_string();
            match self.schedule_pod(token, &info.pod).await {
                Ok(node) => {
                    info!("Scheduled pod {name} to node {node}");
                }
                Err(e) => {
                    warn!("Failed to schedule pod {name}: {e}");
                }
            }
            if token.is_cancelled() {
                return Ok(());
            }
        }

        Ok(())
    }

    /// Run one full scheduling attempt for `pod`, returning the chosen
    /// node.
    pub async fn schedule_pod(&self, token: &CancellationToken, pod: &Pod) -> Result<String> {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed);
        let state = CycleState::new();
        state.set_record_plugin_metrics(
            attempt % 100 < self.config.plugin_metrics_sample_percent,
        );

        let name = pod_name(pod).to_string();

        let status = self
            .framework
            .run_pre_filter_plugins(token, &state, pod)
            .await;
        if !status.is_success() {
            self.note_unresolvable(pod, &status);
            return Err(SchedulerError::attempt_failed(
                name,
                "PreFilter",
                status.message(),
            ));
        }

        let nodes = NodeLister::list(self.snapshot.as_ref());
        if nodes.is_empty() {
            return Err(SchedulerError::no_suitable_nodes(
                name,
                "no nodes registered",
            ));
        }

        let mut feasible: Vec<Node> = Vec::new();
        let mut failures = NodeToStatus::new();
        for node in &nodes {
            let node_info = NodeInfo {
                node: node.clone(),
                pods: self.snapshot.pods_on_node(node_name(node)),
            };
            let statuses = self
                .framework
                .run_filter_plugins(token, &state, pod, &node_info)
                .await;
            let merged = statuses.merge();
            if merged.is_success() {
                feasible.push(node.clone());
            } else {
                debug!(node = node_name(node), status = %merged, "node filtered out");
                failures.insert(node_name(node).to_string(), merged);
            }
        }

        if feasible.is_empty() {
            let (result, status) = self
                .framework
                .run_post_filter_plugins(token, &state, pod, &failures)
                .await;
            if status.is_success() {
                if let Some(result) = result {
                    info!(
                        pod = %name,
                        nominated = %result.nominated_node_name,
                        "a node was nominated for a later attempt"
                    );
                }
            }
            if !failures.is_empty()
                && failures
                    .values()
                    .all(|s| s.code() == Code::UnschedulableAndUnresolvable)
            {
                self.mark_rejected(pod);
            }
            return Err(SchedulerError::no_suitable_nodes(
                name,
                summarize_failures(&failures),
            ));
        }

        info!("Pod {} has {} feasible nodes", name, feasible.len());

        let status = self
            .framework
            .run_pre_score_plugins(token, &state, pod, &feasible)
            .await;
        if !status.is_success() {
            return Err(SchedulerError::attempt_failed(
                name,
                "PreScore",
                status.message(),
            ));
        }

        let (scores, status) = self
            .framework
            .run_score_plugins(token, &state, pod, &feasible)
            .await;
        if !status.is_success() {
            return Err(SchedulerError::attempt_failed(
                name,
                "Score",
                status.message(),
            ));
        }

        let target = select_node(&feasible, &scores)?;

        let status = self
            .framework
            .run_reserve_plugins_reserve(token, &state, pod, &target)
            .await;
        if !status.is_success() {
            // The framework rolled back the reserved prefix already.
            return Err(SchedulerError::attempt_failed(
                name,
                "Reserve",
                status.message(),
            ));
        }

        let mut status = self
            .framework
            .run_permit_plugins(token, &state, pod, &target)
            .await;
        if status.is_wait() {
            status = self.framework.wait_on_permit(token, pod).await;
        }
        if !status.is_success() {
            self.framework
                .run_reserve_plugins_unreserve(token, &state, pod, &target)
                .await;
            self.note_unresolvable(pod, &status);
            return Err(SchedulerError::attempt_failed(
                name,
                "Permit",
                status.message(),
            ));
        }

        let status = self
            .framework
            .run_pre_bind_plugins(token, &state, pod, &target)
            .await;
        if !status.is_success() {
            // PreBind unreserves on failure.
            return Err(SchedulerError::attempt_failed(
                name,
                "PreBind",
                status.message(),
            ));
        }

        let status = self
            .framework
            .run_bind_plugins(token, &state, pod, &target)
            .await;
        if status.is_skip() {
            self.framework
                .run_reserve_plugins_unreserve(token, &state, pod, &target)
                .await;
            return Err(SchedulerError::attempt_failed(
                name,
                "Bind",
                "no bind plugin accepted the pod",
            ));
        }
        if !status.is_success() {
            self.framework
                .run_reserve_plugins_unreserve(token, &state, pod, &target)
                .await;
            return Err(SchedulerError::attempt_failed(
                name,
                "Bind",
                status.message(),
            ));
        }

        // The pipeline committed; persist the decision and emit the event.
        let binding = binding_for(pod, &target);
        let message = scheduled_event_message(pod, &target);
        if let Err(e) = self.sink.bind(&binding).await {
            self.framework
                .run_reserve_plugins_unreserve(token, &state, pod, &target)
                .await;
            return Err(SchedulerError::binding_failed(name, target, e.to_string()));
        }
        if let Err(e) = self.sink.emit_scheduled(pod, &target, &message).await {
            warn!("Failed to emit scheduled event for pod {name}: {e}");
        }
        self.snapshot.assign(&pod_key(pod), &target);
        info!("{message}");

        self.framework
            .run_post_bind_plugins(token, &state, pod, &target)
            .await;

        Ok(target)
    }

    fn mark_rejected(&self, pod: &Pod) {
        warn!(
            pod = pod_name(pod),
            "rejection is unresolvable; pod will not be requeued"
        );
        let mut rejected = match self.rejected.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        rejected.insert(pod_key(pod));
    }

    fn note_unresolvable(&self, pod: &Pod, status: &Status) {
        if status.code() == Code::UnschedulableAndUnresolvable {
            self.mark_rejected(pod);
        }
    }
}

/// Highest total score wins; ties keep node-list order.
fn select_node(feasible: &[Node], scores: &PluginToNodeScores) -> Result<String> {
    let mut best: Option<(&str, i64)> = None;
    for node in feasible {
        let name = node_name(node);
        let total: i64 = scores
            .values()
            .map(|node_scores| {
                node_scores
                    .iter()
                    .find(|ns| ns.name == name)
                    .map(|ns| ns.score)
                    .unwrap_or(0)
            })
            .sum();
        debug!(node = name, total, "node score");
        if best.map_or(true, |(_, top)| total > top) {
            best = Some((name, total));
        }
    }
    best.map(|(name, _)| name.to_string())
        .ok_or_else(|| SchedulerError::internal_error("no feasible nodes to select from"))
}

fn summarize_failures(failures: &NodeToStatus) -> String {
    if failures.is_empty() {
        return "all nodes filtered out".to_string();
    }
    let mut parts: Vec<String> = failures
        .iter()
        .map(|(node, status)| format!("{node}: {status}"))
        .collect();
    parts.sort();
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::RecordingBindingSink;
    use crate::plugins::default_plugins;
    use k8s_openapi::api::core::v1::{Container, ResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::collections::BTreeMap;

    fn quantity_map(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
        let mut map = BTreeMap::new();
        map.insert("cpu".to_string(), Quantity(cpu.to_string()));
        map.insert("memory".to_string(), Quantity(memory.to_string()));
        map
    }

    fn make_node(name: &str, cpu: &str, memory: &str) -> Node {
        let mut node = Node::default();
        node.metadata.name = Some(name.to_string());
        node.status = Some(Default::default());
        node.status.as_mut().unwrap().allocatable = Some(quantity_map(cpu, memory));
        node
    }

    fn make_pod(name: &str, cpu: &str, memory: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some("default".to_string());
        pod.metadata.uid = Some(format!("uid-{name}"));
        pod.spec = Some(Default::default());
        let mut container = Container::default();
        container.name = "main".to_string();
        container.resources = Some(ResourceRequirements {
            requests: Some(quantity_map(cpu, memory)),
            ..Default::default()
        });
        pod.spec.as_mut().unwrap().containers.push(container);
        pod
    }

    fn make_scheduler(
        nodes: Vec<Node>,
        pods: Vec<Pod>,
    ) -> (Scheduler, Arc<RecordingBindingSink>, Arc<ClusterSnapshot>) {
        let snapshot = Arc::new(ClusterSnapshot::new());
        for node in nodes {
            snapshot.insert_node(node);
        }
        for pod in pods {
            snapshot.insert_pod(pod);
        }
        let framework = build_framework(
            snapshot.clone(),
            &default_plugins(),
            &[],
            FrameworkOptions::new(),
        )
        .unwrap();
        let sink = Arc::new(RecordingBindingSink::default());
        let scheduler = Scheduler::new(
            Arc::new(framework),
            snapshot.clone(),
            sink.clone(),
            SchedulerConfig::default(),
        );
        (scheduler, sink, snapshot)
    }

    #[tokio::test]
    async fn test_schedules_pod_to_feasible_node() {
        let (scheduler, sink, snapshot) = make_scheduler(
            vec![make_node("node1", "4", "8Gi"), make_node("node2", "1", "1Gi")],
            vec![],
        );

        let pod = make_pod("test-pod", "2", "2Gi");
        snapshot.insert_pod(pod.clone());

        let node = scheduler
            .schedule_pod(&CancellationToken::new(), &pod)
            .await
            .unwrap();
        assert_eq!(node, "node1");

        let events = sink.events.lock().unwrap();
        assert_eq!(
            *events,
            vec!["Successfully assigned default/test-pod to node1".to_string()]
        );
        drop(events);

        let bindings = sink.bindings.lock().unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].target.name.as_deref(), Some("node1"));
        drop(bindings);

        assert!(snapshot.unscheduled_pods().is_empty());
        assert_eq!(snapshot.pods_on_node("node1").len(), 1);
    }

    #[tokio::test]
    async fn test_prefers_less_loaded_node() {
        let mut existing = make_pod("existing", "2", "4Gi");
        existing.spec.as_mut().unwrap().node_name = Some("node1".to_string());

        let (scheduler, _, snapshot) = make_scheduler(
            vec![make_node("node1", "4", "8Gi"), make_node("node2", "4", "8Gi")],
            vec![existing],
        );

        let pod = make_pod("test-pod", "1", "2Gi");
        snapshot.insert_pod(pod.clone());

        let node = scheduler
            .schedule_pod(&CancellationToken::new(), &pod)
            .await
            .unwrap();
        assert_eq!(node, "node2");
    }

    #[tokio::test]
    async fn test_no_suitable_nodes() {
        let (scheduler, sink, snapshot) =
            make_scheduler(vec![make_node("node1", "1", "1Gi")], vec![]);

        let pod = make_pod("test-pod", "2", "2Gi");
        snapshot.insert_pod(pod.clone());

        let err = scheduler
            .schedule_pod(&CancellationToken::new(), &pod)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NoSuitableNodes { .. }));
        assert!(sink.bindings.lock().unwrap().is_empty());
        assert_eq!(snapshot.unscheduled_pods().len(), 1);
    }

    #[tokio::test]
    async fn test_cycle_schedules_by_priority() {
        let (scheduler, sink, snapshot) =
            make_scheduler(vec![make_node("node1", "8", "16Gi")], vec![]);

        let mut low = make_pod("low", "1", "1Gi");
        low.spec.as_mut().unwrap().priority = Some(1);
        let mut high = make_pod("high", "1", "1Gi");
        high.spec.as_mut().unwrap().priority = Some(100);
        snapshot.insert_pod(low);
        snapshot.insert_pod(high);

        scheduler
            .schedule_cycle(&CancellationToken::new())
            .await
            .unwrap();

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].contains("default/high"));
        assert!(events[1].contains("default/low"));
    }

    #[tokio::test]
    async fn test_unresolvable_rejection_is_not_requeued() {
        let (scheduler, _, snapshot) =
            make_scheduler(vec![make_node("node1", "4", "8Gi")], vec![]);

        let mut pod = make_pod("picky", "1", "1Gi");
        let mut selector = BTreeMap::new();
        selector.insert("zone".to_string(), "nowhere".to_string());
        pod.spec.as_mut().unwrap().node_selector = Some(selector);
        snapshot.insert_pod(pod);

        let token = CancellationToken::new();
        scheduler.schedule_cycle(&token).await.unwrap();
        assert_eq!(scheduler.attempts(), 1);

        // Still unscheduled, but no further attempts are made.
        assert_eq!(snapshot.unscheduled_pods().len(), 1);
        scheduler.schedule_cycle(&token).await.unwrap();
        assert_eq!(scheduler.attempts(), 1);
    }
}
