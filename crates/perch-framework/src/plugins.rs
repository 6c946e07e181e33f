use crate::cycle_state::CycleState;
use crate::status::Status;
use async_trait::async_trait;
use perch_core::{Node, Pod};
use std::collections::HashMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Lowest score a Score plugin may produce.
pub const MIN_NODE_SCORE: i64 = 0;
/// Highest score a Score plugin may produce.
pub const MAX_NODE_SCORE: i64 = 100;

/// A candidate node together with the pods currently assigned to it.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub node: Node,
    pub pods: Vec<Pod>,
}

impl NodeInfo {
    pub fn new(node: Node) -> Self {
        Self {
            node,
            pods: Vec::new(),
        }
    }

    pub fn node_name(&self) -> &str {
        perch_core::node_name(&self.node)
    }
}

/// A pod queued for scheduling, as seen by QueueSort plugins.
#[derive(Debug, Clone)]
pub struct QueuedPodInfo {
    pub pod: Pod,
    /// When the pod was first added to the queue.
    pub timestamp: Instant,
    /// Number of scheduling attempts so far.
    pub attempts: u32,
}

impl QueuedPodInfo {
    pub fn new(pod: Pod) -> Self {
        Self {
            pod,
            timestamp: Instant::now(),
            attempts: 0,
        }
    }
}

/// Score of one node as produced by one Score plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeScore {
    pub name: String,
    pub score: i64,
}

/// Scores keyed by plugin name; each entry holds one `NodeScore` per
/// candidate node, in node order.
pub type PluginToNodeScores = HashMap<String, Vec<NodeScore>>;

/// Filter outcomes keyed by node name, handed to PostFilter plugins.
pub type NodeToStatus = HashMap<String, Status>;

/// What a successful PostFilter plugin proposes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostFilterResult {
    pub nominated_node_name: String,
}

/// Base contract every plugin satisfies: a stable name plus one accessor
/// per extension-point capability. A concrete plugin overrides the
/// accessors for the capabilities it implements and leaves the rest at
/// the default `None`; the framework inspects the accessors once, at
/// construction.
pub trait Plugin: Send + Sync {
    /// Unique name, stable for the lifetime of the framework.
    fn name(&self) -> &str;

    fn queue_sort_plugin(&self) -> Option<&dyn QueueSortPlugin> {
        None
    }

    fn pre_filter_plugin(&self) -> Option<&dyn PreFilterPlugin> {
        None
    }

    fn filter_plugin(&self) -> Option<&dyn FilterPlugin> {
        None
    }

    fn post_filter_plugin(&self) -> Option<&dyn PostFilterPlugin> {
        None
    }

    fn pre_score_plugin(&self) -> Option<&dyn PreScorePlugin> {
        None
    }

    fn score_plugin(&self) -> Option<&dyn ScorePlugin> {
        None
    }

    fn reserve_plugin(&self) -> Option<&dyn ReservePlugin> {
        None
    }

    fn permit_plugin(&self) -> Option<&dyn PermitPlugin> {
        None
    }

    fn pre_bind_plugin(&self) -> Option<&dyn PreBindPlugin> {
        None
    }

    fn bind_plugin(&self) -> Option<&dyn BindPlugin> {
        None
    }

    fn post_bind_plugin(&self) -> Option<&dyn PostBindPlugin> {
        None
    }
}

/// Orders the scheduling queue.
pub trait QueueSortPlugin: Send + Sync {
    /// True when `a` should be scheduled before `b`.
    fn less(&self, a: &QueuedPodInfo, b: &QueuedPodInfo) -> bool;
}

/// Callbacks invoked when the scheduler hypothesizes adding or removing a
/// pod on a node, for plugins whose PreFilter state depends on the pod set.
#[async_trait]
pub trait PreFilterExtensions: Send + Sync {
    async fn add_pod(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod_to_schedule: &Pod,
        pod_to_add: &Pod,
        node_info: &NodeInfo,
    ) -> Status;

    async fn remove_pod(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod_to_schedule: &Pod,
        pod_to_remove: &Pod,
        node_info: &NodeInfo,
    ) -> Status;
}

/// Runs once per attempt before any node is examined.
#[async_trait]
pub trait PreFilterPlugin: Send + Sync {
    async fn pre_filter(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
    ) -> Status;

    /// AddPod/RemovePod callbacks, for plugins that expose them.
    fn extensions(&self) -> Option<&dyn PreFilterExtensions> {
        None
    }
}

/// Decides whether one node can host the pod.
#[async_trait]
pub trait FilterPlugin: Send + Sync {
    async fn filter(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
        node_info: &NodeInfo,
    ) -> Status;
}

/// Runs after all nodes were filtered out, e.g. to nominate a node.
#[async_trait]
pub trait PostFilterPlugin: Send + Sync {
    async fn post_filter(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
        filtered: &NodeToStatus,
    ) -> (Option<PostFilterResult>, Status);
}

/// Prepares shared state for the Score stage.
#[async_trait]
pub trait PreScorePlugin: Send + Sync {
    async fn pre_score(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
        nodes: &[Node],
    ) -> Status;
}

/// Post-processes the raw scores of one plugin across all nodes.
#[async_trait]
pub trait ScoreExtensions: Send + Sync {
    async fn normalize_score(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
        scores: &mut Vec<NodeScore>,
    ) -> Status;
}

/// Ranks one node for the pod.
#[async_trait]
pub trait ScorePlugin: Send + Sync {
    /// Raw score in `[MIN_NODE_SCORE, MAX_NODE_SCORE]`.
    async fn score(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
        node_name: &str,
    ) -> (i64, Status);

    fn score_extensions(&self) -> Option<&dyn ScoreExtensions> {
        None
    }
}

/// Reserves node-local resources ahead of binding.
#[async_trait]
pub trait ReservePlugin: Send + Sync {
    async fn reserve(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
        node_name: &str,
    ) -> Status;

    /// Rolls back a prior `reserve`. Infallible and best-effort.
    async fn unreserve(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
        node_name: &str,
    );
}

/// Approves, rejects, or delays the binding of a reserved pod.
#[async_trait]
pub trait PermitPlugin: Send + Sync {
    /// Returns the status plus, for `Wait`, the requested timeout.
    async fn permit(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
        node_name: &str,
    ) -> (Status, std::time::Duration);
}

/// Last chance to fail before the binding is committed.
#[async_trait]
pub trait PreBindPlugin: Send + Sync {
    async fn pre_bind(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
        node_name: &str,
    ) -> Status;
}

/// Commits the pod-to-node decision. `Skip` passes the pod to the next
/// bind plugin.
#[async_trait]
pub trait BindPlugin: Send + Sync {
    async fn bind(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
        node_name: &str,
    ) -> Status;
}

/// Informational hook after a successful bind.
#[async_trait]
pub trait PostBindPlugin: Send + Sync {
    async fn post_bind(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
        node_name: &str,
    );
}
