use serde::{Deserialize, Serialize};

/// One enabled plugin within an extension point's ordered list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PluginRef {
    pub name: String,
    /// Score weight. Zero means "unset" and defaults to 1 at construction.
    pub weight: i64,
}

impl PluginRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            weight: 0,
        }
    }

    pub fn weighted(name: impl Into<String>, weight: i64) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

/// Ordered list of plugins enabled at one extension point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PluginSet {
    pub enabled: Vec<PluginRef>,
}

impl PluginSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: names.into_iter().map(PluginRef::new).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }
}

/// Plugins enabled per extension point. Immutable after framework
/// construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Plugins {
    pub queue_sort: PluginSet,
    pub pre_filter: PluginSet,
    pub filter: PluginSet,
    pub post_filter: PluginSet,
    pub pre_score: PluginSet,
    pub score: PluginSet,
    pub reserve: PluginSet,
    pub permit: PluginSet,
    pub pre_bind: PluginSet,
    pub bind: PluginSet,
    pub post_bind: PluginSet,
}

impl Plugins {
    /// All extension-point slots with their metric label names, in
    /// pipeline order.
    pub fn slots(&self) -> [(&'static str, &PluginSet); 11] {
        [
            ("QueueSort", &self.queue_sort),
            ("PreFilter", &self.pre_filter),
            ("Filter", &self.filter),
            ("PostFilter", &self.post_filter),
            ("PreScore", &self.pre_score),
            ("Score", &self.score),
            ("Reserve", &self.reserve),
            ("Permit", &self.permit),
            ("PreBind", &self.pre_bind),
            ("Bind", &self.bind),
            ("PostBind", &self.post_bind),
        ]
    }
}

/// Opaque config blob for one plugin, decoded by its factory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PluginConfig {
    pub name: String,
    pub args: serde_json::Value,
}

impl PluginConfig {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_set_from_names() {
        let set = PluginSet::new(["a", "b"]);
        assert_eq!(set.enabled.len(), 2);
        assert_eq!(set.enabled[0].name, "a");
        assert_eq!(set.enabled[0].weight, 0);
    }

    #[test]
    fn test_plugins_yaml_partial() {
        let yaml = r#"
score:
  enabled:
    - name: NodeResourcesLeastAllocated
      weight: 2
bind:
  enabled:
    - name: DefaultBinder
"#;
        let plugins: Plugins = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(plugins.score.enabled[0].weight, 2);
        assert_eq!(plugins.bind.enabled[0].name, "DefaultBinder");
        assert!(plugins.filter.is_empty());
    }

    #[test]
    fn test_slots_order() {
        let plugins = Plugins::default();
        let names: Vec<_> = plugins.slots().iter().map(|(n, _)| *n).collect();
        assert_eq!(names[0], "QueueSort");
        assert_eq!(names[10], "PostBind");
    }
}
