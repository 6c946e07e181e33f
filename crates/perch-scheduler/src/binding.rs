use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Binding, ObjectReference};
use perch_core::{pod_name, Pod};
use std::sync::Mutex;
use tracing::info;

/// The message attached to the "Scheduled" event after a successful bind.
pub fn scheduled_event_message(pod: &Pod, node: &str) -> String {
    format!(
        "Successfully assigned {}/{} to {}",
        pod.metadata.namespace.as_deref().unwrap_or("default"),
        pod_name(pod),
        node
    )
}

/// Build the Binding object persisted after a successful Bind stage.
pub fn binding_for(pod: &Pod, node: &str) -> Binding {
    Binding {
        metadata: perch_core::ObjectMeta {
            name: pod.metadata.name.clone(),
            namespace: pod.metadata.namespace.clone(),
            ..Default::default()
        },
        target: ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Node".to_string()),
            name: Some(node.to_string()),
            ..Default::default()
        },
    }
}

/// Where binding decisions go once the pipeline commits them. The
/// surrounding controller persists the Binding object and emits a
/// "Scheduled" event; the pipeline itself performs no I/O.
#[async_trait]
pub trait BindingSink: Send + Sync {
    async fn bind(&self, binding: &Binding) -> Result<()>;

    async fn emit_scheduled(&self, pod: &Pod, node: &str, message: &str) -> Result<()>;
}

/// Sink that only logs, for local runs without an API server.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingBindingSink;

#[async_trait]
impl BindingSink for LoggingBindingSink {
    async fn bind(&self, binding: &Binding) -> Result<()> {
        info!(
            pod = binding.metadata.name.as_deref().unwrap_or(""),
            node = binding.target.name.as_deref().unwrap_or(""),
            "persisted binding"
        );
        Ok(())
    }

    async fn emit_scheduled(&self, _pod: &Pod, _node: &str, message: &str) -> Result<()> {
        info!("{message}");
        Ok(())
    }
}

/// Sink that records everything it is handed, for tests.
#[derive(Debug, Default)]
pub struct RecordingBindingSink {
    pub bindings: Mutex<Vec<Binding>>,
    pub events: Mutex<Vec<String>>,
}

#[async_trait]
impl BindingSink for RecordingBindingSink {
    async fn bind(&self, binding: &Binding) -> Result<()> {
        let mut bindings = match self.bindings.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        bindings.push(binding.clone());
        Ok(())
    }

    async fn emit_scheduled(&self, _pod: &Pod, _node: &str, message: &str) -> Result<()> {
        let mut events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.push(message.to_string());
        Ok(())
    }
}
