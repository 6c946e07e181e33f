use serde::{Deserialize, Serialize};

/// Feature gates protecting forward-compatible API fields.
///
/// A disabled gate means the fields it protects are dropped from incoming
/// objects at the admission boundary unless a prior revision of the object
/// already carried them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeatureGates {
    /// Protects the `serving` and `terminating` endpoint conditions on
    /// EndpointSlice.
    pub endpoint_slice_terminating_condition: bool,
    /// Protects the `node_name` field on EndpointSlice endpoints.
    pub endpoint_slice_node_name: bool,
}

impl FeatureGates {
    /// All gates enabled; incoming fields are preserved verbatim.
    pub fn all_enabled() -> Self {
        Self {
            endpoint_slice_terminating_condition: true,
            endpoint_slice_node_name: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_disabled() {
        let gates = FeatureGates::default();
        assert!(!gates.endpoint_slice_terminating_condition);
        assert!(!gates.endpoint_slice_node_name);
    }

    #[test]
    fn test_yaml_roundtrip_with_partial_fields() {
        let gates: FeatureGates =
            serde_json::from_str(r#"{"endpointSliceNodeName": true}"#).unwrap();
        assert!(gates.endpoint_slice_node_name);
        assert!(!gates.endpoint_slice_terminating_condition);
    }
}
