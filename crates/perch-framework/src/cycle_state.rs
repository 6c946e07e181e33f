use crate::error::{FrameworkError, Result};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Per-attempt scratchpad passed through every extension point.
///
/// Plugins stash intermediate results under opaque string keys and read
/// them back in later stages. A CycleState is owned by exactly one
/// in-flight scheduling attempt and is discarded when the pipeline exits;
/// it is never shared across attempts.
#[derive(Debug, Default)]
pub struct CycleState {
    storage: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    record_plugin_metrics: AtomicBool,
}

impl CycleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this attempt records per-plugin and per-stage metrics.
    pub fn should_record_plugin_metrics(&self) -> bool {
        self.record_plugin_metrics.load(Ordering::Relaxed)
    }

    pub fn set_record_plugin_metrics(&self, flag: bool) {
        self.record_plugin_metrics.store(flag, Ordering::Relaxed);
    }

    /// Store a value under `key`, replacing any previous entry.
    pub fn write<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        let mut storage = match self.storage.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        storage.insert(key.into(), Arc::new(value));
    }

    /// Read back a value of type `T` stored under `key`.
    pub fn read<T: Any + Send + Sync>(&self, key: &str) -> Result<Arc<T>> {
        let storage = match self.storage.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = storage
            .get(key)
            .ok_or_else(|| FrameworkError::state_key_not_found(key))?;
        entry
            .clone()
            .downcast::<T>()
            .map_err(|_| FrameworkError::state_key_not_found(key))
    }

    pub fn delete(&self, key: &str) {
        let mut storage = match self.storage.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        storage.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct PreFilterData {
        feasible: usize,
    }

    #[test]
    fn test_write_read_roundtrip() {
        let state = CycleState::new();
        state.write("prefilter/fit", PreFilterData { feasible: 3 });

        let data = state.read::<PreFilterData>("prefilter/fit").unwrap();
        assert_eq!(*data, PreFilterData { feasible: 3 });
    }

    #[test]
    fn test_read_missing_key() {
        let state = CycleState::new();
        let err = state.read::<PreFilterData>("nope").unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_read_wrong_type() {
        let state = CycleState::new();
        state.write("key", 42u64);
        assert!(state.read::<PreFilterData>("key").is_err());
    }

    #[test]
    fn test_delete() {
        let state = CycleState::new();
        state.write("key", 1u32);
        state.delete("key");
        assert!(state.read::<u32>("key").is_err());
    }

    #[test]
    fn test_record_metrics_flag_defaults_off() {
        let state = CycleState::new();
        assert!(!state.should_record_plugin_metrics());
        state.set_record_plugin_metrics(true);
        assert!(state.should_record_plugin_metrics());
    }
}
