use crate::error::{CoreError, Result};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

/// Resource quantities for nodes and pods
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceQuantities {
    /// CPU in millicores (1000 = 1 core)
    pub cpu_millicores: i64,
    /// Memory in bytes
    pub memory_bytes: i64,
}

impl ResourceQuantities {
    /// Parse a CPU quantity string (e.g., "2", "1000m", "0.5")
    pub fn parse_cpu(s: &str) -> Result<i64> {
        if let Some(m) = s.strip_suffix('m') {
            m.parse::<i64>()
                .map_err(|e| CoreError::invalid_quantity("cpu", s, e.to_string()))
        } else {
            s.parse::<f64>()
                .map(|cores| (cores * 1000.0) as i64)
                .map_err(|e| CoreError::invalid_quantity("cpu", s, e.to_string()))
        }
    }

    /// Parse a memory quantity string (e.g., "128Mi", "1Gi", "1024")
    pub fn parse_memory(s: &str) -> Result<i64> {
        const UNITS: &[(&str, i64)] = &[
            ("Ki", 1 << 10),
            ("Mi", 1 << 20),
            ("Gi", 1 << 30),
            ("Ti", 1 << 40),
        ];

        for (suffix, multiplier) in UNITS {
            if let Some(num) = s.strip_suffix(suffix) {
                return num
                    .parse::<i64>()
                    .map(|n| n * multiplier)
                    .map_err(|e| CoreError::invalid_quantity("memory", s, e.to_string()));
            }
        }

        // Plain bytes
        s.parse::<i64>()
            .map_err(|e| CoreError::invalid_quantity("memory", s, e.to_string()))
    }

    /// Read CPU and memory out of a k8s resource map, treating unparsable
    /// or absent entries as zero.
    pub fn from_resource_map(resources: &BTreeMap<String, Quantity>) -> Self {
        let cpu_millicores = resources
            .get("cpu")
            .and_then(|q| Self::parse_cpu(&q.0).ok())
            .unwrap_or(0);

        let memory_bytes = resources
            .get("memory")
            .and_then(|q| Self::parse_memory(&q.0).ok())
            .unwrap_or(0);

        Self {
            cpu_millicores,
            memory_bytes,
        }
    }

    /// Total CPU and memory requested by all containers of a pod.
    pub fn pod_requests(pod: &Pod) -> Self {
        let mut total = Self::default();

        let containers = match &pod.spec {
            Some(spec) => &spec.containers,
            None => return total,
        };

        for container in containers {
            let requests = container
                .resources
                .as_ref()
                .and_then(|r| r.requests.as_ref());

            if let Some(requests) = requests {
                let req = Self::from_resource_map(requests);
                total.cpu_millicores += req.cpu_millicores;
                total.memory_bytes += req.memory_bytes;
            }
        }

        total
    }

    /// Allocatable CPU and memory reported by a node's status.
    pub fn node_allocatable(node: &Node) -> Self {
        node.status
            .as_ref()
            .and_then(|s| s.allocatable.as_ref())
            .map(Self::from_resource_map)
            .unwrap_or_default()
    }
}
