use perch_framework::{
    FrameworkHandle, Plugin, QueueSortPlugin, QueuedPodInfo, Result,
};
use std::sync::Arc;

pub const PRIORITY_SORT: &str = "PrioritySort";

/// Orders the queue by pod priority, highest first; equal priorities keep
/// arrival order.
#[derive(Debug, Default)]
pub struct PrioritySort;

impl PrioritySort {
    pub fn factory(
        _args: Option<&serde_json::Value>,
        _handle: &FrameworkHandle,
    ) -> Result<Arc<dyn Plugin>> {
        Ok(Arc::new(Self))
    }
}

fn priority(info: &QueuedPodInfo) -> i32 {
    info.pod
        .spec
        .as_ref()
        .and_then(|spec| spec.priority)
        .unwrap_or(0)
}

impl Plugin for PrioritySort {
    fn name(&self) -> &str {
        PRIORITY_SORT
    }

    fn queue_sort_plugin(&self) -> Option<&dyn QueueSortPlugin> {
        Some(self)
    }
}

impl QueueSortPlugin for PrioritySort {
    fn less(&self, a: &QueuedPodInfo, b: &QueuedPodInfo) -> bool {
        let (pa, pb) = (priority(a), priority(b));
        if pa != pb {
            return pa > pb;
        }
        a.timestamp < b.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perch_core::Pod;

    fn queued(name: &str, priority: Option<i32>) -> QueuedPodInfo {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.spec = Some(Default::default());
        pod.spec.as_mut().unwrap().priority = priority;
        QueuedPodInfo::new(pod)
    }

    #[test]
    fn test_higher_priority_first() {
        let sort = PrioritySort;
        let high = queued("high", Some(100));
        let low = queued("low", Some(1));

        assert!(sort.less(&high, &low));
        assert!(!sort.less(&low, &high));
    }

    #[test]
    fn test_equal_priority_keeps_arrival_order() {
        let sort = PrioritySort;
        let first = queued("first", None);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = queued("second", None);

        assert!(sort.less(&first, &second));
        assert!(!sort.less(&second, &first));
    }
}
