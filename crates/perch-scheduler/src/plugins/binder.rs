use async_trait::async_trait;
use perch_core::{pod_name, Pod};
use perch_framework::{
    BindPlugin, Code, CycleState, FrameworkHandle, Plugin, Result, Status,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_BINDER: &str = "DefaultBinder";

/// Accepts the pod-to-node decision. The surrounding driver persists the
/// Binding object after this plugin reports Success; the plugin itself
/// performs no I/O.
#[derive(Debug, Default)]
pub struct DefaultBinder;

impl DefaultBinder {
    pub fn factory(
        _args: Option<&serde_json::Value>,
        _handle: &FrameworkHandle,
    ) -> Result<Arc<dyn Plugin>> {
        Ok(Arc::new(Self))
    }
}

impl Plugin for DefaultBinder {
    fn name(&self) -> &str {
        DEFAULT_BINDER
    }

    fn bind_plugin(&self) -> Option<&dyn BindPlugin> {
        Some(self)
    }
}

#[async_trait]
impl BindPlugin for DefaultBinder {
    async fn bind(
        &self,
        _: &CancellationToken,
        _: &CycleState,
        pod: &Pod,
        node_name: &str,
    ) -> Status {
        if node_name.is_empty() {
            return Status::new(Code::Error, "no target node for binding");
        }
        debug!(pod = pod_name(pod), node = node_name, "accepting binding");
        Status::success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_accepts_named_node() {
        let mut pod = Pod::default();
        pod.metadata.name = Some("web".to_string());

        let status = DefaultBinder
            .bind(&CancellationToken::new(), &CycleState::new(), &pod, "node1")
            .await;
        assert!(status.is_success());
    }

    #[tokio::test]
    async fn test_bind_rejects_empty_node() {
        let status = DefaultBinder
            .bind(
                &CancellationToken::new(),
                &CycleState::new(),
                &Pod::default(),
                "",
            )
            .await;
        assert_eq!(status.code(), Code::Error);
    }
}
