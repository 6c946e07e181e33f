use async_trait::async_trait;
use perch_core::{pod_name, Node, Pod, ResourceQuantities};
use perch_framework::args::{
    decode_plugin_args, NodeResourcesLeastAllocatedArgs, ResourceSpec,
};
use perch_framework::{
    Code, CycleState, FrameworkHandle, NodeLister, Plugin, PodLister, Result, ScorePlugin, Status,
    MAX_NODE_SCORE,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const NODE_RESOURCES_LEAST_ALLOCATED: &str = "NodeResourcesLeastAllocated";
pub const NODE_RESOURCES_BALANCED_ALLOCATION: &str = "NodeResourcesBalancedAllocation";

/// CPU and memory committed on a node once the pod lands there.
fn projected_usage(
    pods: &dyn PodLister,
    pod: &Pod,
    node: &str,
) -> ResourceQuantities {
    let mut usage = ResourceQuantities::pod_requests(pod);
    for assigned in pods.list() {
        let on_node = assigned
            .spec
            .as_ref()
            .and_then(|spec| spec.node_name.as_deref())
            == Some(node);
        if on_node {
            let req = ResourceQuantities::pod_requests(&assigned);
            usage.cpu_millicores += req.cpu_millicores;
            usage.memory_bytes += req.memory_bytes;
        }
    }
    usage
}

fn requested_fraction(requested: i64, allocatable: i64) -> f64 {
    if allocatable <= 0 {
        return 1.0;
    }
    (requested as f64 / allocatable as f64).clamp(0.0, 1.0)
}

fn node_not_found(plugin: &str, node: &str) -> Status {
    Status::new(Code::Error, format!("{plugin}: node \"{node}\" not found"))
}

/// Prefers nodes with the most free resources after placing the pod,
/// weighted per the configured resource specs.
pub struct NodeResourcesLeastAllocated {
    args: NodeResourcesLeastAllocatedArgs,
    nodes: Arc<dyn NodeLister>,
    pods: Arc<dyn PodLister>,
}

impl NodeResourcesLeastAllocated {
    pub fn factory(
        args: Option<&serde_json::Value>,
        handle: &FrameworkHandle,
    ) -> Result<Arc<dyn Plugin>> {
        Ok(Arc::new(Self {
            args: decode_plugin_args(NODE_RESOURCES_LEAST_ALLOCATED, args)?,
            nodes: handle.node_lister(),
            pods: handle.pod_lister(),
        }))
    }

    fn score_node(&self, pod: &Pod, node: &Node) -> i64 {
        let allocatable = ResourceQuantities::node_allocatable(node);
        let usage = projected_usage(
            self.pods.as_ref(),
            pod,
            perch_core::node_name(node),
        );

        let mut weighted = 0.0;
        let mut weight_sum = 0i64;
        for ResourceSpec { name, weight } in &self.args.resources {
            let fraction = match name.as_str() {
                "cpu" => requested_fraction(usage.cpu_millicores, allocatable.cpu_millicores),
                "memory" => requested_fraction(usage.memory_bytes, allocatable.memory_bytes),
                _ => continue,
            };
            weighted += (1.0 - fraction) * MAX_NODE_SCORE as f64 * *weight as f64;
            weight_sum += weight;
        }

        if weight_sum == 0 {
            return 0;
        }
        (weighted / weight_sum as f64) as i64
    }
}

impl Plugin for NodeResourcesLeastAllocated {
    fn name(&self) -> &str {
        NODE_RESOURCES_LEAST_ALLOCATED
    }

    fn score_plugin(&self) -> Option<&dyn ScorePlugin> {
        Some(self)
    }
}

#[async_trait]
impl ScorePlugin for NodeResourcesLeastAllocated {
    async fn score(
        &self,
        _: &CancellationToken,
        _: &CycleState,
        pod: &Pod,
        node_name: &str,
    ) -> (i64, Status) {
        let Some(node) = self.nodes.get(node_name) else {
            return (0, node_not_found(NODE_RESOURCES_LEAST_ALLOCATED, node_name));
        };
        let score = self.score_node(pod, &node);
        debug!(
            pod = pod_name(pod),
            node = node_name,
            score,
            "least allocated score"
        );
        (score, Status::success())
    }
}

/// Prefers nodes whose CPU and memory utilization stay balanced once the
/// pod lands there.
pub struct NodeResourcesBalancedAllocation {
    nodes: Arc<dyn NodeLister>,
    pods: Arc<dyn PodLister>,
}

impl NodeResourcesBalancedAllocation {
    pub fn factory(
        _args: Option<&serde_json::Value>,
        handle: &FrameworkHandle,
    ) -> Result<Arc<dyn Plugin>> {
        Ok(Arc::new(Self {
            nodes: handle.node_lister(),
            pods: handle.pod_lister(),
        }))
    }

    fn score_node(&self, pod: &Pod, node: &Node) -> i64 {
        let allocatable = ResourceQuantities::node_allocatable(node);
        if allocatable.cpu_millicores == 0 || allocatable.memory_bytes == 0 {
            return 0;
        }

        let usage = projected_usage(
            self.pods.as_ref(),
            pod,
            perch_core::node_name(node),
        );
        let cpu_fraction = requested_fraction(usage.cpu_millicores, allocatable.cpu_millicores);
        let memory_fraction = requested_fraction(usage.memory_bytes, allocatable.memory_bytes);

        let variance = (cpu_fraction - memory_fraction).abs();
        ((1.0 - variance) * MAX_NODE_SCORE as f64) as i64
    }
}

impl Plugin for NodeResourcesBalancedAllocation {
    fn name(&self) -> &str {
        NODE_RESOURCES_BALANCED_ALLOCATION
    }

    fn score_plugin(&self) -> Option<&dyn ScorePlugin> {
        Some(self)
    }
}

#[async_trait]
impl ScorePlugin for NodeResourcesBalancedAllocation {
    async fn score(
        &self,
        _: &CancellationToken,
        _: &CycleState,
        pod: &Pod,
        node_name: &str,
    ) -> (i64, Status) {
        let Some(node) = self.nodes.get(node_name) else {
            return (
                0,
                node_not_found(NODE_RESOURCES_BALANCED_ALLOCATION, node_name),
            );
        };
        let score = self.score_node(pod, &node);
        debug!(
            pod = pod_name(pod),
            node = node_name,
            score,
            "balanced allocation score"
        );
        (score, Status::success())
    }
}
