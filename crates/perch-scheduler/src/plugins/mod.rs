//! In-tree plugins: the default plugin set wired into every profile unless
//! the profile overrides it.

pub mod binder;
pub mod filter;
pub mod queue_sort;
pub mod score;

pub use binder::{DefaultBinder, DEFAULT_BINDER};
pub use filter::{
    NodeResourcesFit, NodeSelector, TaintToleration, NODE_RESOURCES_FIT, NODE_SELECTOR,
    TAINT_TOLERATION,
};
pub use queue_sort::{PrioritySort, PRIORITY_SORT};
pub use score::{
    NodeResourcesBalancedAllocation, NodeResourcesLeastAllocated,
    NODE_RESOURCES_BALANCED_ALLOCATION, NODE_RESOURCES_LEAST_ALLOCATED,
};

use perch_framework::{PluginRef, PluginSet, Plugins, Registry, Result};

/// Registry holding every in-tree plugin.
pub fn default_registry() -> Result<Registry> {
    let mut registry = Registry::new();
    registry.register(PRIORITY_SORT, PrioritySort::factory)?;
    registry.register(NODE_RESOURCES_FIT, NodeResourcesFit::factory)?;
    registry.register(NODE_SELECTOR, NodeSelector::factory)?;
    registry.register(TAINT_TOLERATION, TaintToleration::factory)?;
    registry.register(
        NODE_RESOURCES_LEAST_ALLOCATED,
        NodeResourcesLeastAllocated::factory,
    )?;
    registry.register(
        NODE_RESOURCES_BALANCED_ALLOCATION,
        NodeResourcesBalancedAllocation::factory,
    )?;
    registry.register(DEFAULT_BINDER, DefaultBinder::factory)?;
    Ok(registry)
}

/// The default profile: which in-tree plugins run at which extension
/// point.
pub fn default_plugins() -> Plugins {
    let mut plugins = Plugins::default();
    plugins.queue_sort = PluginSet::new([PRIORITY_SORT]);
    plugins.pre_filter = PluginSet::new([NODE_RESOURCES_FIT]);
    plugins.filter = PluginSet::new([NODE_RESOURCES_FIT, NODE_SELECTOR, TAINT_TOLERATION]);
    plugins.score = PluginSet {
        enabled: vec![
            PluginRef::weighted(NODE_RESOURCES_LEAST_ALLOCATED, 1),
            PluginRef::weighted(NODE_RESOURCES_BALANCED_ALLOCATION, 1),
        ],
    };
    plugins.bind = PluginSet::new([DEFAULT_BINDER]);
    plugins
}
