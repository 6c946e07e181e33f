use perch_core::{node_name, pod_name, pod_uid, Node, Pod};
use perch_framework::{NodeLister, PodLister};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Stable key for a pod: its uid, or `namespace/name` when no uid is set.
pub fn pod_key(pod: &Pod) -> String {
    let uid = pod_uid(pod);
    if !uid.is_empty() {
        return uid.to_string();
    }
    format!(
        "{}/{}",
        pod.metadata.namespace.as_deref().unwrap_or("default"),
        pod_name(pod)
    )
}

/// In-memory view of the cluster consumed by the scheduler: the nodes and
/// pods the surrounding controller would feed from its informers.
#[derive(Debug, Default)]
pub struct ClusterSnapshot {
    nodes: RwLock<HashMap<String, Node>>,
    pods: RwLock<HashMap<String, Pod>>,
}

impl ClusterSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_node(&self, node: Node) {
        let mut nodes = match self.nodes.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        nodes.insert(node_name(&node).to_string(), node);
    }

    pub fn insert_pod(&self, pod: Pod) {
        let mut pods = match self.pods.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pods.insert(pod_key(&pod), pod);
    }

    /// Record a binding decision: the pod now lives on `node`.
    pub fn assign(&self, key: &str, node: &str) {
        let mut pods = match self.pods.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(pod) = pods.get_mut(key) {
            pod.spec.get_or_insert_with(Default::default).node_name = Some(node.to_string());
        }
    }

    /// Pods with no node assigned yet, in name order.
    pub fn unscheduled_pods(&self) -> Vec<Pod> {
        let pods = match self.pods.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut unscheduled: Vec<Pod> = pods
            .values()
            .filter(|pod| {
                pod.spec
                    .as_ref()
                    .map_or(true, |spec| spec.node_name.is_none())
            })
            .cloned()
            .collect();
        unscheduled.sort_by(|a, b| pod_name(a).cmp(pod_name(b)));
        unscheduled
    }

    /// Pods currently assigned to `node`, in name order.
    pub fn pods_on_node(&self, node: &str) -> Vec<Pod> {
        let pods = match self.pods.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut assigned: Vec<Pod> = pods
            .values()
            .filter(|pod| {
                pod.spec
                    .as_ref()
                    .and_then(|spec| spec.node_name.as_deref())
                    == Some(node)
            })
            .cloned()
            .collect();
        assigned.sort_by(|a, b| pod_name(a).cmp(pod_name(b)));
        assigned
    }
}

impl NodeLister for ClusterSnapshot {
    fn list(&self) -> Vec<Node> {
        let nodes = match self.nodes.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut all: Vec<Node> = nodes.values().cloned().collect();
        all.sort_by(|a, b| node_name(a).cmp(node_name(b)));
        all
    }

    fn get(&self, name: &str) -> Option<Node> {
        let nodes = match self.nodes.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        nodes.get(name).cloned()
    }
}

impl PodLister for ClusterSnapshot {
    fn list(&self) -> Vec<Pod> {
        let pods = match self.pods.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut all: Vec<Pod> = pods.values().cloned().collect();
        all.sort_by(|a, b| pod_name(a).cmp(pod_name(b)));
        all
    }
}

/// Declarative cluster content loaded from a YAML fixture by the binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterFixture {
    pub nodes: Vec<Node>,
    pub pods: Vec<Pod>,
}

impl ClusterFixture {
    pub fn into_snapshot(self) -> ClusterSnapshot {
        let snapshot = ClusterSnapshot::new();
        for node in self.nodes {
            snapshot.insert_node(node);
        }
        for pod in self.pods {
            snapshot.insert_pod(pod);
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_node(name: &str) -> Node {
        let mut node = Node::default();
        node.metadata.name = Some(name.to_string());
        node
    }

    fn make_pod(name: &str, node: Option<&str>) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.uid = Some(format!("uid-{name}"));
        pod.spec = Some(Default::default());
        pod.spec.as_mut().unwrap().node_name = node.map(str::to_string);
        pod
    }

    #[test]
    fn test_unscheduled_pods() {
        let snapshot = ClusterSnapshot::new();
        snapshot.insert_pod(make_pod("b", None));
        snapshot.insert_pod(make_pod("a", None));
        snapshot.insert_pod(make_pod("c", Some("node1")));

        let unscheduled = snapshot.unscheduled_pods();
        assert_eq!(unscheduled.len(), 2);
        assert_eq!(pod_name(&unscheduled[0]), "a");
        assert_eq!(pod_name(&unscheduled[1]), "b");
    }

    #[test]
    fn test_assign_moves_pod_off_the_pending_list() {
        let snapshot = ClusterSnapshot::new();
        let pod = make_pod("a", None);
        let key = pod_key(&pod);
        snapshot.insert_pod(pod);

        snapshot.assign(&key, "node1");
        assert!(snapshot.unscheduled_pods().is_empty());
        assert_eq!(snapshot.pods_on_node("node1").len(), 1);
    }

    #[test]
    fn test_node_lister_is_sorted() {
        let snapshot = ClusterSnapshot::new();
        snapshot.insert_node(make_node("node2"));
        snapshot.insert_node(make_node("node1"));

        let nodes = NodeLister::list(&snapshot);
        assert_eq!(node_name(&nodes[0]), "node1");
        assert_eq!(node_name(&nodes[1]), "node2");
        assert!(snapshot.get("node2").is_some());
        assert!(snapshot.get("node3").is_none());
    }

    #[test]
    fn test_pod_key_falls_back_to_namespaced_name() {
        let mut pod = Pod::default();
        pod.metadata.name = Some("web".to_string());
        assert_eq!(pod_key(&pod), "default/web");

        pod.metadata.uid = Some("abc".to_string());
        assert_eq!(pod_key(&pod), "abc");
    }
}
