//! Perch Core - Fundamental types for the Perch pod scheduler
//!
//! This crate provides:
//! - Re-exports of the Kubernetes resource types used across the workspace
//! - Resource quantity parsing (CPU millicores, memory bytes)
//! - Feature gates protecting forward-compatible API fields
//! - Error types with miette diagnostics

pub mod error;
pub mod featuregate;
pub mod quantities;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use featuregate::FeatureGates;
pub use quantities::ResourceQuantities;

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::{Binding, Node, ObjectReference, Pod};
pub use k8s_openapi::api::discovery::v1::{Endpoint, EndpointConditions, EndpointSlice};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Pod uid, or the empty string when the pod carries none.
pub fn pod_uid(pod: &Pod) -> &str {
    pod.metadata.uid.as_deref().unwrap_or("")
}

/// Pod name, or the empty string when the pod carries none.
pub fn pod_name(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or("")
}

/// Node name, or the empty string when the node carries none.
pub fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or("")
}
