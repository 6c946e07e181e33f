use miette::Diagnostic;
use thiserror::Error;

/// Scheduler error type
#[derive(Error, Debug, Diagnostic)]
pub enum SchedulerError {
    /// No node survived the Filter stage
    #[error("No suitable nodes found for pod {pod_name}")]
    #[diagnostic(
        code(perch::scheduler::no_suitable_nodes),
        help("Check node resources, taints, and pod requirements")
    )]
    NoSuitableNodes { pod_name: String, reason: String },

    /// A pipeline stage rejected the attempt
    #[error("Scheduling pod {pod_name} failed at {stage}: {message}")]
    #[diagnostic(
        code(perch::scheduler::attempt_failed),
        help("The pod is requeued unless the rejection was unresolvable")
    )]
    AttemptFailed {
        pod_name: String,
        stage: &'static str,
        message: String,
    },

    /// Persisting the binding decision failed
    #[error("Binding pod {pod_name} to node {node_name} failed: {message}")]
    #[diagnostic(
        code(perch::scheduler::binding_failed),
        help("Check the binding sink (API connectivity, permissions)")
    )]
    BindingFailed {
        pod_name: String,
        node_name: String,
        message: String,
    },

    /// Framework construction error
    #[error("Framework error: {0}")]
    #[diagnostic(
        code(perch::scheduler::framework_error),
        help("Check the scheduling profile against the registered plugins")
    )]
    Framework(#[from] perch_framework::FrameworkError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(perch::scheduler::internal_error),
        help("This is likely a bug. Please report it")
    )]
    InternalError { message: String },
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    /// Create a NoSuitableNodes error
    pub fn no_suitable_nodes(pod_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NoSuitableNodes {
            pod_name: pod_name.into(),
            reason: reason.into(),
        }
    }

    /// Create an AttemptFailed error
    pub fn attempt_failed(
        pod_name: impl Into<String>,
        stage: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::AttemptFailed {
            pod_name: pod_name.into(),
            stage,
            message: message.into(),
        }
    }

    /// Create a BindingFailed error
    pub fn binding_failed(
        pod_name: impl Into<String>,
        node_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::BindingFailed {
            pod_name: pod_name.into(),
            node_name: node_name.into(),
            message: message.into(),
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}
