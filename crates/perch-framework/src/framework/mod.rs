use crate::args::default_plugin_args;
use crate::config::{PluginConfig, PluginRef, PluginSet, Plugins};
use crate::cycle_state::CycleState;
use crate::error::{FrameworkError, Result};
use crate::metrics::MetricsRecorder;
use crate::plugins::{
    NodeInfo, NodeScore, NodeToStatus, Plugin, PluginToNodeScores, PostFilterResult,
    QueuedPodInfo, MAX_NODE_SCORE, MIN_NODE_SCORE,
};
use crate::registry::Registry;
use crate::status::{Code, PluginToStatus, Status};
use crate::waiting::{WaitingPod, WaitingPods};
use perch_core::{node_name, pod_name, pod_uid, Node, Pod};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;


/// Extension-point label values used in metrics and error messages.
pub mod extension_points {
    pub const QUEUE_SORT: &str = "QueueSort";
    pub const PRE_FILTER: &str = "PreFilter";
    pub const FILTER: &str = "Filter";
    pub const POST_FILTER: &str = "PostFilter";
    pub const PRE_SCORE: &str = "PreScore";
    pub const SCORE: &str = "Score";
    pub const RESERVE: &str = "Reserve";
    pub const UNRESERVE: &str = "Unreserve";
    pub const PERMIT: &str = "Permit";
    pub const PRE_BIND: &str = "PreBind";
    pub const BIND: &str = "Bind";
    pub const POST_BIND: &str = "PostBind";
}

use extension_points::*;

/// Read access to the shared cluster view, as consumed by plugins.
pub trait NodeLister: Send + Sync {
    fn list(&self) -> Vec<Node>;
    fn get(&self, name: &str) -> Option<Node>;
}

/// Read access to the pods known to the scheduler.
pub trait PodLister: Send + Sync {
    fn list(&self) -> Vec<Pod>;
}

/// Lister that sees an empty cluster; the default when no listers are
/// wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyLister;

impl NodeLister for EmptyLister {
    fn list(&self) -> Vec<Node> {
        Vec::new()
    }

    fn get(&self, _name: &str) -> Option<Node> {
        None
    }
}

impl PodLister for EmptyLister {
    fn list(&self) -> Vec<Pod> {
        Vec::new()
    }
}

/// Capabilities handed to plugin factories: the shared listers and the
/// waiting-pod registry.
pub struct FrameworkHandle {
    node_lister: Arc<dyn NodeLister>,
    pod_lister: Arc<dyn PodLister>,
    waiting_pods: Arc<WaitingPods>,
}

impl FrameworkHandle {
    pub fn node_lister(&self) -> Arc<dyn NodeLister> {
        self.node_lister.clone()
    }

    pub fn pod_lister(&self) -> Arc<dyn PodLister> {
        self.pod_lister.clone()
    }

    pub fn get_waiting_pod(&self, uid: &str) -> Option<Arc<WaitingPod>> {
        self.waiting_pods.get(uid)
    }
}

/// Framework construction options.
pub struct FrameworkOptions {
    run_all_filters: bool,
    profile_name: String,
    metrics_recorder: Option<Arc<MetricsRecorder>>,
    node_lister: Arc<dyn NodeLister>,
    pod_lister: Arc<dyn PodLister>,
    default_queue_sort: Option<String>,
    default_binder: Option<String>,
}

impl Default for FrameworkOptions {
    fn default() -> Self {
        Self {
            run_all_filters: false,
            profile_name: "default".to_string(),
            metrics_recorder: None,
            node_lister: Arc::new(EmptyLister),
            pod_lister: Arc::new(EmptyLister),
            default_queue_sort: None,
            default_binder: None,
        }
    }
}

impl FrameworkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every Filter plugin per node instead of short-circuiting on the
    /// first failure.
    pub fn with_run_all_filters(mut self, run_all: bool) -> Self {
        self.run_all_filters = run_all;
        self
    }

    /// Profile label attached to extension-point metrics.
    pub fn with_profile_name(mut self, name: impl Into<String>) -> Self {
        self.profile_name = name.into();
        self
    }

    /// Attach an asynchronous metrics recorder with the given buffer size
    /// and flush cadence. Must be called within a tokio runtime.
    pub fn with_metrics_recorder(mut self, buffer_size: usize, interval: Duration) -> Self {
        self.metrics_recorder = Some(MetricsRecorder::new(buffer_size, interval));
        self
    }

    /// Attach an existing recorder (shared with the caller, e.g. tests).
    pub fn with_shared_metrics_recorder(mut self, recorder: Arc<MetricsRecorder>) -> Self {
        self.metrics_recorder = Some(recorder);
        self
    }

    pub fn with_node_lister(mut self, lister: Arc<dyn NodeLister>) -> Self {
        self.node_lister = lister;
        self
    }

    pub fn with_pod_lister(mut self, lister: Arc<dyn PodLister>) -> Self {
        self.pod_lister = lister;
        self
    }

    /// Plugin installed into an empty QueueSort slot.
    pub fn with_default_queue_sort(mut self, name: impl Into<String>) -> Self {
        self.default_queue_sort = Some(name.into());
        self
    }

    /// Plugin installed into an empty Bind slot.
    pub fn with_default_binder(mut self, name: impl Into<String>) -> Self {
        self.default_binder = Some(name.into());
        self
    }
}

/// The runnable pipeline: plugin instances slotted per extension point,
/// the waiting-pod registry behind Permit, and the metrics recorder.
pub struct Framework {
    profile_name: String,
    run_all_filters: bool,
    queue_sort_plugins: Vec<Arc<dyn Plugin>>,
    pre_filter_plugins: Vec<Arc<dyn Plugin>>,
    filter_plugins: Vec<Arc<dyn Plugin>>,
    post_filter_plugins: Vec<Arc<dyn Plugin>>,
    pre_score_plugins: Vec<Arc<dyn Plugin>>,
    score_plugins: Vec<(Arc<dyn Plugin>, i64)>,
    reserve_plugins: Vec<Arc<dyn Plugin>>,
    permit_plugins: Vec<Arc<dyn Plugin>>,
    pre_bind_plugins: Vec<Arc<dyn Plugin>>,
    bind_plugins: Vec<Arc<dyn Plugin>>,
    post_bind_plugins: Vec<Arc<dyn Plugin>>,
    handle: Arc<FrameworkHandle>,
    metrics: Option<Arc<MetricsRecorder>>,
    enabled: Vec<(&'static str, Vec<PluginRef>)>,
}

impl std::fmt::Debug for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framework")
            .field("profile_name", &self.profile_name)
            .field("run_all_filters", &self.run_all_filters)
            .finish_non_exhaustive()
    }
}

fn cancelled_status(extension_point: &str) -> Status {
    Status::new(
        Code::Error,
        format!("running {extension_point} plugins: scheduling attempt cancelled"),
    )
}

fn wrap_plugin_error(extension_point: &str, plugin: &str, status: &Status) -> Status {
    Status::new(
        Code::Error,
        format!(
            "running {extension_point} plugin \"{plugin}\": {}",
            status.message()
        ),
    )
}

impl Framework {
    /// Compose a runnable pipeline out of the registry and the profile's
    /// plugin configuration. All validation happens here; the running
    /// pipeline never re-checks configuration.
    pub fn new(
        registry: &Registry,
        plugins: &Plugins,
        plugin_configs: &[PluginConfig],
        options: FrameworkOptions,
    ) -> Result<Self> {
        let mut plugins = plugins.clone();
        if plugins.queue_sort.is_empty() {
            if let Some(name) = &options.default_queue_sort {
                plugins.queue_sort.enabled.push(PluginRef::new(name.clone()));
            }
        }
        if plugins.bind.is_empty() {
            if let Some(name) = &options.default_binder {
                plugins.bind.enabled.push(PluginRef::new(name.clone()));
            }
        }

        // At most one config blob per plugin.
        let mut configs: HashMap<&str, &serde_json::Value> = HashMap::new();
        for config in plugin_configs {
            if configs.insert(config.name.as_str(), &config.args).is_some() {
                return Err(FrameworkError::repeated_config(config.name.clone()));
            }
        }

        // Unique enabled names in first-seen order; duplicates within one
        // extension point are rejected.
        let mut needed: Vec<&str> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for (_, set) in plugins.slots() {
            let mut in_point: HashSet<&str> = HashSet::new();
            for plugin_ref in &set.enabled {
                let name = plugin_ref.name.as_str();
                if !in_point.insert(name) {
                    return Err(FrameworkError::already_registered(name));
                }
                if seen.insert(name) {
                    needed.push(name);
                }
            }
        }

        let handle = Arc::new(FrameworkHandle {
            node_lister: options.node_lister,
            pod_lister: options.pod_lister,
            waiting_pods: Arc::new(WaitingPods::new()),
        });

        // Each unique enabled plugin is built exactly once, with its
        // config override or materialized defaults.
        let mut instances: HashMap<String, Arc<dyn Plugin>> = HashMap::new();
        for name in needed {
            let factory = registry
                .get(name)
                .ok_or_else(|| FrameworkError::not_registered(name))?;
            let defaults = default_plugin_args(name);
            let args = configs.get(name).copied().or(defaults.as_ref());
            let plugin = factory.as_ref()(args, &handle)?;
            instances.insert(name.to_string(), plugin);
        }

        let collect = |set: &PluginSet,
                       point: &'static str,
                       has: &dyn Fn(&dyn Plugin) -> bool|
         -> Result<Vec<Arc<dyn Plugin>>> {
            let mut slot = Vec::with_capacity(set.enabled.len());
            for plugin_ref in &set.enabled {
                let plugin = instances
                    .get(&plugin_ref.name)
                    .ok_or_else(|| FrameworkError::not_registered(plugin_ref.name.clone()))?;
                if !has(plugin.as_ref()) {
                    return Err(FrameworkError::missing_capability(
                        plugin_ref.name.clone(),
                        point,
                    ));
                }
                slot.push(plugin.clone());
            }
            Ok(slot)
        };

        let mut score_plugins = Vec::with_capacity(plugins.score.enabled.len());
        for plugin_ref in &plugins.score.enabled {
            let plugin = instances
                .get(&plugin_ref.name)
                .ok_or_else(|| FrameworkError::not_registered(plugin_ref.name.clone()))?;
            if plugin.score_plugin().is_none() {
                return Err(FrameworkError::missing_capability(
                    plugin_ref.name.clone(),
                    SCORE,
                ));
            }
            let weight = if plugin_ref.weight == 0 {
                1
            } else {
                plugin_ref.weight
            };
            score_plugins.push((plugin.clone(), weight));
        }

        let enabled = plugins
            .slots()
            .iter()
            .filter(|(_, set)| !set.is_empty())
            .map(|(point, set)| {
                let refs = if *point == SCORE {
                    // Report resolved weights.
                    set.enabled
                        .iter()
                        .map(|r| {
                            PluginRef::weighted(
                                r.name.clone(),
                                if r.weight == 0 { 1 } else { r.weight },
                            )
                        })
                        .collect()
                } else {
                    set.enabled.clone()
                };
                (*point, refs)
            })
            .collect();

        Ok(Self {
            profile_name: options.profile_name,
            run_all_filters: options.run_all_filters,
            queue_sort_plugins: collect(&plugins.queue_sort, QUEUE_SORT, &|p| {
                p.queue_sort_plugin().is_some()
            })?,
            pre_filter_plugins: collect(&plugins.pre_filter, PRE_FILTER, &|p| {
                p.pre_filter_plugin().is_some()
            })?,
            filter_plugins: collect(&plugins.filter, FILTER, &|p| p.filter_plugin().is_some())?,
            post_filter_plugins: collect(&plugins.post_filter, POST_FILTER, &|p| {
                p.post_filter_plugin().is_some()
            })?,
            pre_score_plugins: collect(&plugins.pre_score, PRE_SCORE, &|p| {
                p.pre_score_plugin().is_some()
            })?,
            score_plugins,
            reserve_plugins: collect(&plugins.reserve, RESERVE, &|p| p.reserve_plugin().is_some())?,
            permit_plugins: collect(&plugins.permit, PERMIT, &|p| p.permit_plugin().is_some())?,
            pre_bind_plugins: collect(&plugins.pre_bind, PRE_BIND, &|p| p.pre_bind_plugin().is_some())?,
            bind_plugins: collect(&plugins.bind, BIND, &|p| p.bind_plugin().is_some())?,
            post_bind_plugins: collect(&plugins.post_bind, POST_BIND, &|p| {
                p.post_bind_plugin().is_some()
            })?,
            handle,
            metrics: options.metrics_recorder,
            enabled,
        })
    }

    /// The handle plugin factories received; also gives external callers
    /// `get_waiting_pod`.
    pub fn handle(&self) -> &Arc<FrameworkHandle> {
        &self.handle
    }

    pub fn profile_name(&self) -> &str {
        &self.profile_name
    }

    pub fn metrics_recorder(&self) -> Option<&Arc<MetricsRecorder>> {
        self.metrics.as_ref()
    }

    /// Non-empty extension points with their enabled plugins (resolved
    /// score weights included).
    pub fn list_plugins(&self) -> &[(&'static str, Vec<PluginRef>)] {
        &self.enabled
    }

    pub fn has_filter_plugins(&self) -> bool {
        !self.filter_plugins.is_empty()
    }

    pub fn has_score_plugins(&self) -> bool {
        !self.score_plugins.is_empty()
    }

    pub fn has_post_filter_plugins(&self) -> bool {
        !self.post_filter_plugins.is_empty()
    }

    /// A pod currently held at Permit, if any.
    pub fn get_waiting_pod(&self, uid: &str) -> Option<Arc<WaitingPod>> {
        self.handle.get_waiting_pod(uid)
    }

    /// Queue ordering according to the configured QueueSort plugin; FIFO
    /// when none is configured.
    pub fn queue_sort_less(&self, a: &QueuedPodInfo, b: &QueuedPodInfo) -> bool {
        for plugin in &self.queue_sort_plugins {
            if let Some(qs) = plugin.queue_sort_plugin() {
                return qs.less(a, b);
            }
        }
        a.timestamp < b.timestamp
    }

    fn record_extension_point(
        &self,
        state: &CycleState,
        extension_point: &'static str,
        code: Code,
        start: Instant,
    ) {
        if !state.should_record_plugin_metrics() {
            return;
        }
        if let Some(metrics) = &self.metrics {
            metrics.observe_extension_point_duration(
                extension_point,
                code,
                &self.profile_name,
                start.elapsed(),
            );
        }
    }

    fn record_plugin(
        &self,
        state: &CycleState,
        extension_point: &'static str,
        plugin: &str,
        code: Code,
        start: Instant,
    ) {
        if !state.should_record_plugin_metrics() {
            return;
        }
        if let Some(metrics) = &self.metrics {
            metrics.observe_plugin_duration(extension_point, plugin, code, start.elapsed());
        }
    }

    /// Run the PreFilter plugins in order; the first non-Success
    /// short-circuits the stage.
    pub async fn run_pre_filter_plugins(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
    ) -> Status {
        let start = Instant::now();
        let mut status = Status::success();

        if token.is_cancelled() {
            status = cancelled_status(PRE_FILTER);
        } else {
            for plugin in &self.pre_filter_plugins {
                let Some(pf) = plugin.pre_filter_plugin() else { continue };
                let plugin_start = Instant::now();
                let result = pf.pre_filter(token, state, pod).await;
                self.record_plugin(state, PRE_FILTER, plugin.name(), result.code(), plugin_start);
                if !result.is_success() {
                    status = if result.is_unschedulable() {
                        result
                    } else {
                        wrap_plugin_error(PRE_FILTER, plugin.name(), &result)
                    };
                    break;
                }
            }
        }

        self.record_extension_point(state, PRE_FILTER, status.code(), start);
        status
    }

    /// Invoke the AddPod callback on every PreFilter plugin exposing
    /// extensions.
    pub async fn run_pre_filter_extension_add_pod(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod_to_schedule: &Pod,
        pod_to_add: &Pod,
        node_info: &NodeInfo,
    ) -> Status {
        for plugin in &self.pre_filter_plugins {
            let Some(ext) = plugin.pre_filter_plugin().and_then(|pf| pf.extensions()) else {
                continue;
            };
            let status = ext
                .add_pod(token, state, pod_to_schedule, pod_to_add, node_info)
                .await;
            if !status.is_success() {
                return Status::new(
                    Code::Error,
                    format!(
                        "running AddPod on PreFilter plugin \"{}\": {}",
                        plugin.name(),
                        status.message()
                    ),
                );
            }
        }
        Status::success()
    }

    /// Invoke the RemovePod callback on every PreFilter plugin exposing
    /// extensions.
    pub async fn run_pre_filter_extension_remove_pod(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod_to_schedule: &Pod,
        pod_to_remove: &Pod,
        node_info: &NodeInfo,
    ) -> Status {
        for plugin in &self.pre_filter_plugins {
            let Some(ext) = plugin.pre_filter_plugin().and_then(|pf| pf.extensions()) else {
                continue;
            };
            let status = ext
                .remove_pod(token, state, pod_to_schedule, pod_to_remove, node_info)
                .await;
            if !status.is_success() {
                return Status::new(
                    Code::Error,
                    format!(
                        "running RemovePod on PreFilter plugin \"{}\": {}",
                        plugin.name(),
                        status.message()
                    ),
                );
            }
        }
        Status::success()
    }

    /// Run the Filter plugins against one candidate node. By default the
    /// first non-Success short-circuits; with run-all-filters every plugin
    /// runs. Per-plugin outcomes are returned keyed by plugin name; callers
    /// collapse them with [`PluginToStatus::merge`].
    pub async fn run_filter_plugins(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
        node_info: &NodeInfo,
    ) -> PluginToStatus {
        let start = Instant::now();
        let mut statuses = PluginToStatus::new();

        for plugin in &self.filter_plugins {
            let Some(fp) = plugin.filter_plugin() else { continue };
            let plugin_start = Instant::now();
            let result = if token.is_cancelled() {
                cancelled_status(FILTER)
            } else {
                fp.filter(token, state, pod, node_info).await
            };
            self.record_plugin(state, FILTER, plugin.name(), result.code(), plugin_start);
            if !result.is_success() {
                let entry = if result.is_unschedulable() {
                    result
                } else {
                    wrap_plugin_error(FILTER, plugin.name(), &result)
                };
                statuses.insert(plugin.name(), entry);
                if !self.run_all_filters {
                    break;
                }
            }
        }

        self.record_extension_point(state, FILTER, statuses.merge().code(), start);
        statuses
    }

    /// Run the PostFilter plugins; the first Success wins, an Error
    /// aborts, and the collected failures merge otherwise.
    pub async fn run_post_filter_plugins(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
        filtered: &NodeToStatus,
    ) -> (Option<PostFilterResult>, Status) {
        let start = Instant::now();
        let mut statuses = PluginToStatus::new();

        for plugin in &self.post_filter_plugins {
            let Some(pf) = plugin.post_filter_plugin() else { continue };
            if token.is_cancelled() {
                let status = cancelled_status(POST_FILTER);
                self.record_extension_point(state, POST_FILTER, status.code(), start);
                return (None, status);
            }
            let plugin_start = Instant::now();
            let (result, status) = pf.post_filter(token, state, pod, filtered).await;
            self.record_plugin(state, POST_FILTER, plugin.name(), status.code(), plugin_start);
            if status.is_success() {
                self.record_extension_point(state, POST_FILTER, status.code(), start);
                return (result, status);
            }
            if !status.is_unschedulable() {
                let wrapped = wrap_plugin_error(POST_FILTER, plugin.name(), &status);
                self.record_extension_point(state, POST_FILTER, wrapped.code(), start);
                return (None, wrapped);
            }
            statuses.insert(plugin.name(), status);
        }

        let merged = statuses.merge();
        self.record_extension_point(state, POST_FILTER, merged.code(), start);
        (None, merged)
    }

    /// Run the PreScore plugins; the first non-Success short-circuits.
    pub async fn run_pre_score_plugins(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
        nodes: &[Node],
    ) -> Status {
        let start = Instant::now();
        let mut status = Status::success();

        if token.is_cancelled() {
            status = cancelled_status(PRE_SCORE);
        } else {
            for plugin in &self.pre_score_plugins {
                let Some(ps) = plugin.pre_score_plugin() else { continue };
                let plugin_start = Instant::now();
                let result = ps.pre_score(token, state, pod, nodes).await;
                self.record_plugin(state, PRE_SCORE, plugin.name(), result.code(), plugin_start);
                if !result.is_success() {
                    status = if result.is_unschedulable() {
                        result
                    } else {
                        wrap_plugin_error(PRE_SCORE, plugin.name(), &result)
                    };
                    break;
                }
            }
        }

        self.record_extension_point(state, PRE_SCORE, status.code(), start);
        status
    }

    /// Run the Score plugins over all candidate nodes, normalize where
    /// the plugin asks for it, enforce the score range at both points, and
    /// apply plugin weights. Any plugin failure fails the whole stage.
    pub async fn run_score_plugins(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
        nodes: &[Node],
    ) -> (PluginToNodeScores, Status) {
        let start = Instant::now();
        let mut all_scores = PluginToNodeScores::new();

        for (plugin, weight) in &self.score_plugins {
            let Some(sp) = plugin.score_plugin() else { continue };

            let mut node_scores = Vec::with_capacity(nodes.len());
            for node in nodes {
                if token.is_cancelled() {
                    let status = cancelled_status(SCORE);
                    self.record_extension_point(state, SCORE, status.code(), start);
                    return (PluginToNodeScores::new(), status);
                }
                let plugin_start = Instant::now();
                let (score, result) = sp.score(token, state, pod, node_name(node)).await;
                self.record_plugin(state, SCORE, plugin.name(), result.code(), plugin_start);
                if !result.is_success() {
                    let wrapped = wrap_plugin_error(SCORE, plugin.name(), &result);
                    self.record_extension_point(state, SCORE, wrapped.code(), start);
                    return (PluginToNodeScores::new(), wrapped);
                }
                if let Some(status) = self.check_score_range(plugin.name(), node_name(node), score)
                {
                    self.record_extension_point(state, SCORE, status.code(), start);
                    return (PluginToNodeScores::new(), status);
                }
                node_scores.push(NodeScore {
                    name: node_name(node).to_string(),
                    score,
                });
            }

            if let Some(ext) = sp.score_extensions() {
                let result = ext.normalize_score(token, state, pod, &mut node_scores).await;
                if !result.is_success() {
                    let wrapped = Status::new(
                        Code::Error,
                        format!(
                            "running NormalizeScore on Score plugin \"{}\": {}",
                            plugin.name(),
                            result.message()
                        ),
                    );
                    self.record_extension_point(state, SCORE, wrapped.code(), start);
                    return (PluginToNodeScores::new(), wrapped);
                }
                for node_score in &node_scores {
                    if let Some(status) =
                        self.check_score_range(plugin.name(), &node_score.name, node_score.score)
                    {
                        self.record_extension_point(state, SCORE, status.code(), start);
                        return (PluginToNodeScores::new(), status);
                    }
                }
            }

            for node_score in &mut node_scores {
                node_score.score *= weight;
            }
            all_scores.insert(plugin.name().to_string(), node_scores);
        }

        self.record_extension_point(state, SCORE, Code::Success, start);
        (all_scores, Status::success())
    }

    fn check_score_range(&self, plugin: &str, node: &str, score: i64) -> Option<Status> {
        if (MIN_NODE_SCORE..=MAX_NODE_SCORE).contains(&score) {
            return None;
        }
        Some(Status::new(
            Code::Error,
            format!(
                "score plugin \"{plugin}\" returns an invalid score {score} for node \"{node}\", \
                 it should be in the range of [{MIN_NODE_SCORE}, {MAX_NODE_SCORE}]"
            ),
        ))
    }

    /// Run the Reserve plugins sequentially. Any failure rolls back the
    /// already-reserved plugins in reverse order before the stage returns
    /// Error.
    pub async fn run_reserve_plugins_reserve(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
        target_node: &str,
    ) -> Status {
        let start = Instant::now();
        let mut status = Status::success();

        for (index, plugin) in self.reserve_plugins.iter().enumerate() {
            let Some(rp) = plugin.reserve_plugin() else { continue };
            let plugin_start = Instant::now();
            let result = if token.is_cancelled() {
                cancelled_status(RESERVE)
            } else {
                rp.reserve(token, state, pod, target_node).await
            };
            self.record_plugin(state, RESERVE, plugin.name(), result.code(), plugin_start);
            if !result.is_success() {
                for reserved in self.reserve_plugins[..index].iter().rev() {
                    if let Some(rp) = reserved.reserve_plugin() {
                        let unreserve_start = Instant::now();
                        rp.unreserve(token, state, pod, target_node).await;
                        self.record_plugin(
                            state,
                            UNRESERVE,
                            reserved.name(),
                            Code::Success,
                            unreserve_start,
                        );
                    }
                }
                status = wrap_plugin_error(RESERVE, plugin.name(), &result);
                break;
            }
        }

        self.record_extension_point(state, RESERVE, status.code(), start);
        status
    }

    /// Roll back every Reserve plugin in reverse order. Runs to completion
    /// even under cancellation.
    pub async fn run_reserve_plugins_unreserve(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
        target_node: &str,
    ) {
        let start = Instant::now();
        for plugin in self.reserve_plugins.iter().rev() {
            let Some(rp) = plugin.reserve_plugin() else { continue };
            let plugin_start = Instant::now();
            rp.unreserve(token, state, pod, target_node).await;
            self.record_plugin(state, UNRESERVE, plugin.name(), Code::Success, plugin_start);
        }
        self.record_extension_point(state, UNRESERVE, Code::Success, start);
    }

    /// Run the Permit plugins. A Wait outcome registers the pod in the
    /// waiting registry with the maximum requested timeout; the caller
    /// resolves it through [`Framework::wait_on_permit`].
    pub async fn run_permit_plugins(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
        target_node: &str,
    ) -> Status {
        let start = Instant::now();
        let mut waiting: Vec<(String, Duration)> = Vec::new();

        for plugin in &self.permit_plugins {
            let Some(pp) = plugin.permit_plugin() else { continue };
            if token.is_cancelled() {
                let status = cancelled_status(PERMIT);
                self.record_extension_point(state, PERMIT, status.code(), start);
                return status;
            }
            let plugin_start = Instant::now();
            let (result, timeout) = pp.permit(token, state, pod, target_node).await;
            self.record_plugin(state, PERMIT, plugin.name(), result.code(), plugin_start);
            if result.is_success() {
                continue;
            }
            if result.is_unschedulable() {
                debug!(
                    pod = pod_name(pod),
                    plugin = plugin.name(),
                    "pod rejected by permit plugin"
                );
                let status = Status::new(
                    result.code(),
                    format!(
                        "rejected pod \"{}\" by permit plugin \"{}\": {}",
                        pod_uid(pod),
                        plugin.name(),
                        result.message()
                    ),
                );
                self.record_extension_point(state, PERMIT, status.code(), start);
                return status;
            }
            if result.is_wait() {
                waiting.push((plugin.name().to_string(), timeout));
                continue;
            }
            let status = wrap_plugin_error(PERMIT, plugin.name(), &result);
            self.record_extension_point(state, PERMIT, status.code(), start);
            return status;
        }

        if !waiting.is_empty() {
            let max_timeout = waiting
                .iter()
                .map(|(_, timeout)| *timeout)
                .max()
                .unwrap_or_default();
            let plugins = waiting.into_iter().map(|(name, _)| name);
            self.handle
                .waiting_pods
                .add(WaitingPod::new(pod.clone(), plugins, max_timeout));
            let status = Status::new(
                Code::Wait,
                format!(
                    "one or more plugins asked to wait and no plugin rejected pod \"{}\"",
                    pod_name(pod)
                ),
            );
            self.record_extension_point(state, PERMIT, status.code(), start);
            return status;
        }

        self.record_extension_point(state, PERMIT, Code::Success, start);
        Status::success()
    }

    /// Block until the waiting pod registered by Permit is allowed,
    /// rejected, times out, or the attempt is cancelled. Success when the
    /// pod was never waiting.
    pub async fn wait_on_permit(&self, token: &CancellationToken, pod: &Pod) -> Status {
        let uid = pod_uid(pod);
        let Some(waiting_pod) = self.handle.waiting_pods.get(uid) else {
            return Status::success();
        };
        debug!(pod = pod_name(pod), "pod waiting on permit");

        let start = Instant::now();
        let status = match waiting_pod.take_signal() {
            None => Status::success(),
            Some(signal) => {
                tokio::select! {
                    _ = token.cancelled() => {
                        Status::new(Code::Unschedulable, "scheduling attempt cancelled")
                    }
                    resolved = tokio::time::timeout(waiting_pod.remaining(), signal) => {
                        match resolved {
                            Ok(Ok(status)) => status,
                            Ok(Err(_)) => Status::new(Code::Error, "waiting pod signal dropped"),
                            Err(_) => Status::new(Code::Unschedulable, "timeout"),
                        }
                    }
                }
            }
        };
        self.handle.waiting_pods.remove(uid);

        if !status.is_success() {
            if let Some(metrics) = &self.metrics {
                metrics.observe_permit_wait_duration(status.code(), start.elapsed());
            }
        }
        status
    }

    /// Run the PreBind plugins; the first non-Success short-circuits as an
    /// Error, after rolling back the reserved plugins.
    pub async fn run_pre_bind_plugins(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
        target_node: &str,
    ) -> Status {
        let start = Instant::now();
        let mut status = Status::success();

        if token.is_cancelled() {
            status = cancelled_status(PRE_BIND);
        } else {
            for plugin in &self.pre_bind_plugins {
                let Some(pb) = plugin.pre_bind_plugin() else { continue };
                let plugin_start = Instant::now();
                let result = pb.pre_bind(token, state, pod, target_node).await;
                self.record_plugin(state, PRE_BIND, plugin.name(), result.code(), plugin_start);
                if !result.is_success() {
                    status = wrap_plugin_error(PRE_BIND, plugin.name(), &result);
                    break;
                }
            }
        }

        self.record_extension_point(state, PRE_BIND, status.code(), start);
        if !status.is_success() {
            self.run_reserve_plugins_unreserve(token, state, pod, target_node)
                .await;
        }
        status
    }

    /// Run the Bind plugins. Success or Error terminate the stage; Skip
    /// passes the pod to the next plugin; any other code is an Error. An
    /// empty slot or all-Skip outcome reports Skip.
    pub async fn run_bind_plugins(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
        target_node: &str,
    ) -> Status {
        let start = Instant::now();
        let mut status = Status::new(Code::Skip, "");

        for plugin in &self.bind_plugins {
            let Some(bp) = plugin.bind_plugin() else { continue };
            if token.is_cancelled() {
                status = cancelled_status(BIND);
                break;
            }
            let plugin_start = Instant::now();
            let result = bp.bind(token, state, pod, target_node).await;
            self.record_plugin(state, BIND, plugin.name(), result.code(), plugin_start);
            if result.is_skip() {
                continue;
            }
            if !result.is_success() {
                status = wrap_plugin_error(BIND, plugin.name(), &result);
                break;
            }
            status = result;
            break;
        }

        self.record_extension_point(state, BIND, status.code(), start);
        status
    }

    /// Run every PostBind plugin. Best-effort: there is no meaningful
    /// return and all plugins run.
    pub async fn run_post_bind_plugins(
        &self,
        token: &CancellationToken,
        state: &CycleState,
        pod: &Pod,
        target_node: &str,
    ) {
        let start = Instant::now();
        for plugin in &self.post_bind_plugins {
            let Some(pb) = plugin.post_bind_plugin() else { continue };
            let plugin_start = Instant::now();
            pb.post_bind(token, state, pod, target_node).await;
            self.record_plugin(state, POST_BIND, plugin.name(), Code::Success, plugin_start);
        }
        self.record_extension_point(state, POST_BIND, Code::Success, start);
    }
}
