use async_trait::async_trait;
use perch_core::{node_name, Pod, ResourceQuantities};
use perch_framework::args::{decode_plugin_args, NodeResourcesFitArgs};
use perch_framework::{
    Code, CycleState, FilterPlugin, FrameworkHandle, NodeInfo, Plugin, PreFilterPlugin, Result,
    Status,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const NODE_RESOURCES_FIT: &str = "NodeResourcesFit";
pub const NODE_SELECTOR: &str = "NodeSelector";
pub const TAINT_TOLERATION: &str = "TaintToleration";

const FIT_STATE_KEY: &str = "PreFilter/NodeResourcesFit";

/// Pod resource requests computed once per attempt and carried through the
/// cycle state.
#[derive(Debug, Clone, Copy)]
struct FitState {
    requests: ResourceQuantities,
}

/// Rejects nodes whose free CPU or memory cannot hold the pod's requests.
pub struct NodeResourcesFit {
    args: NodeResourcesFitArgs,
}

impl NodeResourcesFit {
    pub fn factory(
        args: Option<&serde_json::Value>,
        _handle: &FrameworkHandle,
    ) -> Result<Arc<dyn Plugin>> {
        Ok(Arc::new(Self {
            args: decode_plugin_args(NODE_RESOURCES_FIT, args)?,
        }))
    }

    fn ignores(&self, resource: &str) -> bool {
        self.args.ignored_resources.iter().any(|r| r == resource)
    }
}

impl Plugin for NodeResourcesFit {
    fn name(&self) -> &str {
        NODE_RESOURCES_FIT
    }

    fn pre_filter_plugin(&self) -> Option<&dyn PreFilterPlugin> {
        Some(self)
    }

    fn filter_plugin(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }
}

#[async_trait]
impl PreFilterPlugin for NodeResourcesFit {
    async fn pre_filter(&self, _: &CancellationToken, state: &CycleState, pod: &Pod) -> Status {
        state.write(
            FIT_STATE_KEY,
            FitState {
                requests: ResourceQuantities::pod_requests(pod),
            },
        );
        Status::success()
    }
}

#[async_trait]
impl FilterPlugin for NodeResourcesFit {
    async fn filter(
        &self,
        _: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
        node_info: &NodeInfo,
    ) -> Status {
        // PreFilter normally seeds the state; recompute when the stage ran
        // standalone.
        let requests = state
            .read::<FitState>(FIT_STATE_KEY)
            .map(|fit| fit.requests)
            .unwrap_or_else(|_| ResourceQuantities::pod_requests(pod));

        let allocatable = ResourceQuantities::node_allocatable(&node_info.node);
        let mut used = ResourceQuantities::default();
        for assigned in &node_info.pods {
            let req = ResourceQuantities::pod_requests(assigned);
            used.cpu_millicores += req.cpu_millicores;
            used.memory_bytes += req.memory_bytes;
        }

        debug!(
            node = node_info.node_name(),
            free_cpu = allocatable.cpu_millicores - used.cpu_millicores,
            free_memory = allocatable.memory_bytes - used.memory_bytes,
            requested_cpu = requests.cpu_millicores,
            requested_memory = requests.memory_bytes,
            "checking node resources"
        );

        if !self.ignores("cpu")
            && used.cpu_millicores + requests.cpu_millicores > allocatable.cpu_millicores
        {
            return Status::new(Code::Unschedulable, "Insufficient cpu");
        }

        if !self.ignores("memory")
            && used.memory_bytes + requests.memory_bytes > allocatable.memory_bytes
        {
            return Status::new(Code::Unschedulable, "Insufficient memory");
        }

        Status::success()
    }
}

/// Rejects nodes whose labels do not satisfy the pod's node selector.
#[derive(Debug, Default)]
pub struct NodeSelector;

impl NodeSelector {
    pub fn factory(
        _args: Option<&serde_json::Value>,
        _handle: &FrameworkHandle,
    ) -> Result<Arc<dyn Plugin>> {
        Ok(Arc::new(Self))
    }
}

impl Plugin for NodeSelector {
    fn name(&self) -> &str {
        NODE_SELECTOR
    }

    fn filter_plugin(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }
}

#[async_trait]
impl FilterPlugin for NodeSelector {
    async fn filter(
        &self,
        _: &CancellationToken,
        _: &CycleState,
        pod: &Pod,
        node_info: &NodeInfo,
    ) -> Status {
        let Some(selector) = pod.spec.as_ref().and_then(|spec| spec.node_selector.as_ref())
        else {
            return Status::success();
        };

        let labels = node_info.node.metadata.labels.as_ref();
        for (key, value) in selector {
            if labels.and_then(|l| l.get(key)) != Some(value) {
                return Status::new(
                    Code::UnschedulableAndUnresolvable,
                    "node(s) didn't match node selector",
                );
            }
        }
        Status::success()
    }
}

/// Rejects nodes carrying taints the pod does not tolerate.
#[derive(Debug, Default)]
pub struct TaintToleration;

impl TaintToleration {
    pub fn factory(
        _args: Option<&serde_json::Value>,
        _handle: &FrameworkHandle,
    ) -> Result<Arc<dyn Plugin>> {
        Ok(Arc::new(Self))
    }
}

impl Plugin for TaintToleration {
    fn name(&self) -> &str {
        TAINT_TOLERATION
    }

    fn filter_plugin(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }
}

fn tolerates(
    tolerations: &[k8s_openapi::api::core::v1::Toleration],
    taint: &k8s_openapi::api::core::v1::Taint,
) -> bool {
    tolerations.iter().any(|toleration| {
        // An empty key with Exists matches every taint.
        let key_matches = match toleration.key.as_deref() {
            None | Some("") => toleration.operator.as_deref() == Some("Exists"),
            Some(key) => key == taint.key,
        };
        if !key_matches {
            return false;
        }

        let effect_matches = match toleration.effect.as_deref() {
            None | Some("") => true,
            Some(effect) => effect == taint.effect,
        };
        if !effect_matches {
            return false;
        }

        match toleration.operator.as_deref() {
            Some("Exists") => true,
            _ => toleration.value.as_deref() == taint.value.as_deref(),
        }
    })
}

#[async_trait]
impl FilterPlugin for TaintToleration {
    async fn filter(
        &self,
        _: &CancellationToken,
        _: &CycleState,
        pod: &Pod,
        node_info: &NodeInfo,
    ) -> Status {
        let Some(taints) = node_info
            .node
            .spec
            .as_ref()
            .and_then(|spec| spec.taints.as_ref())
        else {
            return Status::success();
        };

        let no_tolerations = Vec::new();
        let tolerations = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.tolerations.as_ref())
            .unwrap_or(&no_tolerations);

        for taint in taints {
            if !tolerates(tolerations, taint) {
                debug!(
                    node = node_name(&node_info.node),
                    taint = %taint.key,
                    "pod does not tolerate taint"
                );
                return Status::new(
                    Code::UnschedulableAndUnresolvable,
                    format!(
                        "node(s) had taint {{{}: {}}}, that the pod didn't tolerate",
                        taint.key, taint.effect
                    ),
                );
            }
        }
        Status::success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, Node, ResourceRequirements, Taint, Toleration};
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

    fn make_pod(cpu: &str, memory: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some("test-pod".to_string());
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

    async fn run_fit(pod: &Pod, node_info: &NodeInfo) -> Status {
        let plugin = NodeResourcesFit {
            args: Default::default(),
        };
        plugin
            .filter(&CancellationToken::new(), &CycleState::new(), pod, node_info)
            .await
    }

    #[tokio::test]
    async fn test_fit_passes_with_room() {
        let node_info = NodeInfo::new(make_node("node1", "4", "8Gi"));
        let status = run_fit(&make_pod("1", "1Gi"), &node_info).await;
        assert!(status.is_success());
    }

    #[tokio::test]
    async fn test_fit_rejects_insufficient_cpu() {
        let node_info = NodeInfo::new(make_node("node1", "1", "8Gi"));
        let status = run_fit(&make_pod("2", "1Gi"), &node_info).await;
        assert_eq!(status.code(), Code::Unschedulable);
        assert_eq!(status.message(), "Insufficient cpu");
    }

    #[tokio::test]
    async fn test_fit_rejects_insufficient_memory() {
        let node_info = NodeInfo::new(make_node("node1", "4", "1Gi"));
        let status = run_fit(&make_pod("1", "2Gi"), &node_info).await;
        assert_eq!(status.code(), Code::Unschedulable);
        assert_eq!(status.message(), "Insufficient memory");
    }

    #[tokio::test]
    async fn test_fit_counts_assigned_pods() {
        let mut node_info = NodeInfo::new(make_node("node1", "2", "4Gi"));
        node_info.pods.push(make_pod("1500m", "1Gi"));

        let status = run_fit(&make_pod("1", "1Gi"), &node_info).await;
        assert_eq!(status.code(), Code::Unschedulable);
        assert_eq!(status.message(), "Insufficient cpu");
    }

    #[tokio::test]
    async fn test_fit_honors_ignored_resources() {
        let plugin = NodeResourcesFit {
            args: NodeResourcesFitArgs {
                ignored_resources: vec!["cpu".to_string()],
            },
        };
        let node_info = NodeInfo::new(make_node("node1", "1", "8Gi"));
        let status = plugin
            .filter(
                &CancellationToken::new(),
                &CycleState::new(),
                &make_pod("2", "1Gi"),
                &node_info,
            )
            .await;
        assert!(status.is_success());
    }

    #[tokio::test]
    async fn test_fit_uses_pre_filter_state() {
        let plugin = NodeResourcesFit {
            args: Default::default(),
        };
        let state = CycleState::new();
        let pod = make_pod("1", "1Gi");
        let token = CancellationToken::new();

        let status = plugin.pre_filter(&token, &state, &pod).await;
        assert!(status.is_success());
        assert!(state.read::<FitState>(FIT_STATE_KEY).is_ok());

        let node_info = NodeInfo::new(make_node("node1", "4", "8Gi"));
        let status = plugin.filter(&token, &state, &pod, &node_info).await;
        assert!(status.is_success());
    }

    #[tokio::test]
    async fn test_node_selector_mismatch() {
        let mut pod = make_pod("1", "1Gi");
        let mut selector = BTreeMap::new();
        selector.insert("zone".to_string(), "us-east".to_string());
        pod.spec.as_mut().unwrap().node_selector = Some(selector);

        let node_info = NodeInfo::new(make_node("node1", "4", "8Gi"));
        let status = NodeSelector
            .filter(&CancellationToken::new(), &CycleState::new(), &pod, &node_info)
            .await;
        assert_eq!(status.code(), Code::UnschedulableAndUnresolvable);
    }

    #[tokio::test]
    async fn test_node_selector_match() {
        let mut pod = make_pod("1", "1Gi");
        let mut selector = BTreeMap::new();
        selector.insert("zone".to_string(), "us-east".to_string());
        pod.spec.as_mut().unwrap().node_selector = Some(selector.clone());

        let mut node = make_node("node1", "4", "8Gi");
        node.metadata.labels = Some(selector);

        let status = NodeSelector
            .filter(
                &CancellationToken::new(),
                &CycleState::new(),
                &pod,
                &NodeInfo::new(node),
            )
            .await;
        assert!(status.is_success());
    }

    fn tainted_node(key: &str, value: &str, effect: &str) -> Node {
        let mut node = make_node("node1", "4", "8Gi");
        node.spec = Some(Default::default());
        node.spec.as_mut().unwrap().taints = Some(vec![Taint {
            key: key.to_string(),
            value: Some(value.to_string()),
            effect: effect.to_string(),
            ..Default::default()
        }]);
        node
    }

    #[tokio::test]
    async fn test_taint_without_toleration_rejects() {
        let pod = make_pod("1", "1Gi");
        let status = TaintToleration
            .filter(
                &CancellationToken::new(),
                &CycleState::new(),
                &pod,
                &NodeInfo::new(tainted_node("dedicated", "infra", "NoSchedule")),
            )
            .await;
        assert_eq!(status.code(), Code::UnschedulableAndUnresolvable);
        assert!(status.message().contains("dedicated"));
    }

    #[tokio::test]
    async fn test_matching_toleration_passes() {
        let mut pod = make_pod("1", "1Gi");
        pod.spec.as_mut().unwrap().tolerations = Some(vec![Toleration {
            key: Some("dedicated".to_string()),
            operator: Some("Equal".to_string()),
            value: Some("infra".to_string()),
            effect: Some("NoSchedule".to_string()),
            ..Default::default()
        }]);

        let status = TaintToleration
            .filter(
                &CancellationToken::new(),
                &CycleState::new(),
                &pod,
                &NodeInfo::new(tainted_node("dedicated", "infra", "NoSchedule")),
            )
            .await;
        assert!(status.is_success());
    }

    #[tokio::test]
    async fn test_exists_toleration_matches_any_value() {
        let mut pod = make_pod("1", "1Gi");
        pod.spec.as_mut().unwrap().tolerations = Some(vec![Toleration {
            key: Some("dedicated".to_string()),
            operator: Some("Exists".to_string()),
            ..Default::default()
        }]);

        let status = TaintToleration
            .filter(
                &CancellationToken::new(),
                &CycleState::new(),
                &pod,
                &NodeInfo::new(tainted_node("dedicated", "anything", "NoExecute")),
            )
            .await;
        assert!(status.is_success());
    }
}
