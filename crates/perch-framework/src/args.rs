//! Typed argument structs for the in-tree plugins that accept
//! configuration, together with their defaults.
//!
//! When a plugin declares defaults here and the profile carries no
//! override, framework construction materializes the defaults before
//! invoking the factory, so factories always see fully-formed arguments.

use serde::{Deserialize, Serialize};

/// One resource dimension with its scoring weight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    pub name: String,
    pub weight: i64,
}

impl ResourceSpec {
    pub fn new(name: impl Into<String>, weight: i64) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

fn default_cpu_memory_resources() -> Vec<ResourceSpec> {
    vec![
        ResourceSpec::new("cpu", 1),
        ResourceSpec::new("memory", 1),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InterPodAffinityArgs {
    pub hard_pod_affinity_weight: i64,
}

impl Default for InterPodAffinityArgs {
    fn default() -> Self {
        Self {
            hard_pod_affinity_weight: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeLabelArgs {
    pub present_labels: Vec<String>,
    pub absent_labels: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeResourcesFitArgs {
    pub ignored_resources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeResourcesLeastAllocatedArgs {
    pub resources: Vec<ResourceSpec>,
}

impl Default for NodeResourcesLeastAllocatedArgs {
    fn default() -> Self {
        Self {
            resources: default_cpu_memory_resources(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeResourcesMostAllocatedArgs {
    pub resources: Vec<ResourceSpec>,
}

impl Default for NodeResourcesMostAllocatedArgs {
    fn default() -> Self {
        Self {
            resources: default_cpu_memory_resources(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestedToCapacityRatioArgs {
    pub resources: Vec<ResourceSpec>,
}

impl Default for RequestedToCapacityRatioArgs {
    fn default() -> Self {
        Self {
            resources: default_cpu_memory_resources(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefaultingType {
    /// Constraints are read from the plugin arguments.
    ListDefaulting,
    /// Constraints are derived from built-in cluster topology defaults.
    SystemDefaulting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PodTopologySpreadArgs {
    pub defaulting_type: DefaultingType,
}

impl Default for PodTopologySpreadArgs {
    fn default() -> Self {
        Self {
            defaulting_type: DefaultingType::SystemDefaulting,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VolumeBindingArgs {
    pub bind_timeout_seconds: i64,
}

impl Default for VolumeBindingArgs {
    fn default() -> Self {
        Self {
            bind_timeout_seconds: 600,
        }
    }
}

/// Decode a factory's opaque config blob into its typed arguments,
/// falling back to the defaults when no blob was provided.
pub fn decode_plugin_args<T>(plugin: &str, args: Option<&serde_json::Value>) -> crate::error::Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match args {
        None => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| crate::error::FrameworkError::factory_failed(plugin, e.to_string())),
    }
}

/// Default arguments for a plugin that declares them, serialized to the
/// opaque blob form factories consume. `None` for plugins without
/// arguments.
pub fn default_plugin_args(name: &str) -> Option<serde_json::Value> {
    let args = match name {
        "InterPodAffinity" => serde_json::to_value(InterPodAffinityArgs::default()),
        "NodeLabel" => serde_json::to_value(NodeLabelArgs::default()),
        "NodeResourcesFit" => serde_json::to_value(NodeResourcesFitArgs::default()),
        "NodeResourcesLeastAllocated" => {
            serde_json::to_value(NodeResourcesLeastAllocatedArgs::default())
        }
        "NodeResourcesMostAllocated" => {
            serde_json::to_value(NodeResourcesMostAllocatedArgs::default())
        }
        "RequestedToCapacityRatio" => {
            serde_json::to_value(RequestedToCapacityRatioArgs::default())
        }
        "PodTopologySpread" => serde_json::to_value(PodTopologySpreadArgs::default()),
        "VolumeBinding" => serde_json::to_value(VolumeBindingArgs::default()),
        _ => return None,
    };

    // Serializing plain derive structs cannot fail.
    args.ok()
}
