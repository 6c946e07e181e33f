//! Perch Framework - Pluggable scheduling pipeline
//!
//! This crate provides:
//! - The extension-point pipeline (PreFilter through PostBind/Unreserve)
//! - Plugin capability contracts and the factory registry
//! - The cooperative waiting-pod registry behind Permit
//! - The per-attempt cycle state and the asynchronous metrics recorder
//!
//! A [`Framework`] is composed once from a [`Registry`] and a profile's
//! [`Plugins`] configuration, then drives one scheduling attempt at a time
//! through its `run_*` entry points.

pub mod args;
pub mod config;
pub mod cycle_state;
pub mod error;
pub mod framework;
pub mod metrics;
pub mod plugins;
pub mod registry;
pub mod status;
pub mod waiting;

// Re-export commonly used types
pub use config::{PluginConfig, PluginRef, PluginSet, Plugins};
pub use cycle_state::CycleState;
pub use error::{FrameworkError, Result};
pub use framework::{
    extension_points, EmptyLister, Framework, FrameworkHandle, FrameworkOptions, NodeLister,
    PodLister,
};
pub use metrics::{Histogram, MetricsRecorder};
pub use plugins::{
    BindPlugin, FilterPlugin, NodeInfo, NodeScore, NodeToStatus, PermitPlugin, Plugin,
    PluginToNodeScores, PostBindPlugin, PostFilterPlugin, PostFilterResult, PreBindPlugin,
    PreFilterExtensions, PreFilterPlugin, PreScorePlugin, QueueSortPlugin, QueuedPodInfo,
    ReservePlugin, ScoreExtensions, ScorePlugin, MAX_NODE_SCORE, MIN_NODE_SCORE,
};
pub use registry::{PluginFactory, Registry};
pub use status::{Code, PluginToStatus, Status};
pub use waiting::{WaitingPod, WaitingPods};
