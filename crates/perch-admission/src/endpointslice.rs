use perch_core::{EndpointSlice, FeatureGates};

/// Create/update mutation strategy for EndpointSlice objects.
///
/// Two gates apply here: the terminating-condition gate protects the
/// `serving` and `terminating` endpoint conditions, and the node-name gate
/// protects `node_name`. A disabled gate clears the protected fields on
/// create; on update a field survives only where the prior revision of the
/// same endpoint index already carried it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndpointSliceStrategy {
    gates: FeatureGates,
}

impl EndpointSliceStrategy {
    pub fn new(gates: FeatureGates) -> Self {
        Self { gates }
    }

    /// Clear every field protected by a disabled gate across the whole
    /// object.
    pub fn drop_disabled_fields_on_create(&self, slice: &mut EndpointSlice) {
        if !self.gates.endpoint_slice_terminating_condition {
            for endpoint in &mut slice.endpoints {
                if let Some(conditions) = &mut endpoint.conditions {
                    conditions.serving = None;
                    conditions.terminating = None;
                }
            }
        }

        if !self.gates.endpoint_slice_node_name {
            for endpoint in &mut slice.endpoints {
                endpoint.node_name = None;
            }
        }
    }

    /// Clear protected fields from `new` unless the corresponding field
    /// was already set on the same endpoint index of `old`. Endpoints
    /// beyond `old`'s length count as not set.
    pub fn drop_disabled_fields_on_update(&self, old: &EndpointSlice, new: &mut EndpointSlice) {
        if !self.gates.endpoint_slice_terminating_condition {
            for (index, endpoint) in new.endpoints.iter_mut().enumerate() {
                let old_conditions = old
                    .endpoints
                    .get(index)
                    .and_then(|e| e.conditions.as_ref());
                let serving_was_set =
                    old_conditions.is_some_and(|c| c.serving.is_some());
                let terminating_was_set =
                    old_conditions.is_some_and(|c| c.terminating.is_some());

                if let Some(conditions) = &mut endpoint.conditions {
                    if !serving_was_set {
                        conditions.serving = None;
                    }
                    if !terminating_was_set {
                        conditions.terminating = None;
                    }
                }
            }
        }

        if !self.gates.endpoint_slice_node_name {
            for (index, endpoint) in new.endpoints.iter_mut().enumerate() {
                let node_name_was_set = old
                    .endpoints
                    .get(index)
                    .is_some_and(|e| e.node_name.is_some());
                if !node_name_was_set {
                    endpoint.node_name = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perch_core::{Endpoint, EndpointConditions};

    fn gates(terminating: bool, node_name: bool) -> FeatureGates {
        FeatureGates {
            endpoint_slice_terminating_condition: terminating,
            endpoint_slice_node_name: node_name,
        }
    }

    fn conditioned(serving: Option<bool>, terminating: Option<bool>) -> Endpoint {
        Endpoint {
            conditions: Some(EndpointConditions {
                ready: None,
                serving,
                terminating,
            }),
            ..Default::default()
        }
    }

    fn named(node_name: Option<&str>) -> Endpoint {
        Endpoint {
            node_name: node_name.map(str::to_string),
            ..Default::default()
        }
    }

    fn slice_of(endpoints: Vec<Endpoint>) -> EndpointSlice {
        EndpointSlice {
            endpoints,
            ..Default::default()
        }
    }

    #[test]
    fn create_terminating_gate_enabled_preserves_fields() {
        let strategy = EndpointSliceStrategy::new(gates(true, false));
        let mut slice = slice_of(vec![
            conditioned(Some(true), Some(false)),
            conditioned(Some(true), Some(true)),
            conditioned(None, None),
        ]);
        let expected = slice.clone();

        strategy.drop_disabled_fields_on_create(&mut slice);
        assert_eq!(slice, expected);
    }

    #[test]
    fn create_terminating_gate_disabled_clears_conditions() {
        let strategy = EndpointSliceStrategy::new(gates(false, false));
        let mut slice = slice_of(vec![
            conditioned(Some(true), Some(false)),
            conditioned(Some(true), Some(true)),
            conditioned(None, None),
        ]);

        strategy.drop_disabled_fields_on_create(&mut slice);
        assert_eq!(
            slice,
            slice_of(vec![
                conditioned(None, None),
                conditioned(None, None),
                conditioned(None, None),
            ])
        );
    }

    #[test]
    fn create_node_name_gate_enabled_preserves_fields() {
        let strategy = EndpointSliceStrategy::new(gates(false, true));
        let mut slice = slice_of(vec![named(Some("node-1")), named(Some("node-2"))]);
        let expected = slice.clone();

        strategy.drop_disabled_fields_on_create(&mut slice);
        assert_eq!(slice, expected);
    }

    #[test]
    fn create_node_name_gate_disabled_clears_names() {
        let strategy = EndpointSliceStrategy::new(gates(false, false));
        let mut slice = slice_of(vec![named(Some("node-1")), named(Some("node-2"))]);

        strategy.drop_disabled_fields_on_create(&mut slice);
        assert_eq!(slice, slice_of(vec![named(None), named(None)]));
    }

    #[test]
    fn update_terminating_gate_enabled_preserves_fields() {
        let strategy = EndpointSliceStrategy::new(gates(true, false));
        let old = slice_of(vec![conditioned(Some(true), Some(false))]);
        let mut new = slice_of(vec![conditioned(Some(true), Some(true))]);
        let expected = new.clone();

        strategy.drop_disabled_fields_on_update(&old, &mut new);
        assert_eq!(new, expected);
    }

    #[test]
    fn update_gate_disabled_not_set_on_old_clears_new() {
        let strategy = EndpointSliceStrategy::new(gates(false, false));
        let old = slice_of(vec![
            conditioned(None, None),
            conditioned(None, None),
            conditioned(None, None),
        ]);
        let mut new = slice_of(vec![
            conditioned(Some(true), Some(false)),
            conditioned(Some(true), Some(true)),
            conditioned(None, None),
        ]);

        strategy.drop_disabled_fields_on_update(&old, &mut new);
        assert_eq!(
            new,
            slice_of(vec![
                conditioned(None, None),
                conditioned(None, None),
                conditioned(None, None),
            ])
        );
    }

    #[test]
    fn update_gate_disabled_set_on_old_preserves_new_values() {
        let strategy = EndpointSliceStrategy::new(gates(false, false));
        let old = slice_of(vec![
            conditioned(Some(false), Some(false)),
            conditioned(Some(true), Some(true)),
        ]);
        // The new revision flips the values; they survive because the old
        // revision carried the fields.
        let mut new = slice_of(vec![
            conditioned(Some(true), Some(true)),
            conditioned(Some(false), Some(false)),
        ]);
        let expected = new.clone();

        strategy.drop_disabled_fields_on_update(&old, &mut new);
        assert_eq!(new, expected);
    }

    #[test]
    fn update_is_per_field_per_index() {
        let strategy = EndpointSliceStrategy::new(gates(false, false));
        // Index 0: only serving was set before; index 1: neither.
        let old = slice_of(vec![
            conditioned(Some(true), None),
            conditioned(None, None),
        ]);
        let mut new = slice_of(vec![
            conditioned(Some(false), Some(true)),
            conditioned(Some(true), Some(true)),
        ]);

        strategy.drop_disabled_fields_on_update(&old, &mut new);
        assert_eq!(
            new,
            slice_of(vec![
                conditioned(Some(false), None),
                conditioned(None, None),
            ])
        );
    }

    #[test]
    fn update_new_endpoints_beyond_old_length_are_cleared() {
        let strategy = EndpointSliceStrategy::new(gates(false, false));
        let old = slice_of(vec![conditioned(Some(true), Some(true))]);
        let mut new = slice_of(vec![
            conditioned(Some(true), Some(true)),
            conditioned(Some(true), Some(true)),
        ]);

        strategy.drop_disabled_fields_on_update(&old, &mut new);
        assert_eq!(
            new,
            slice_of(vec![
                conditioned(Some(true), Some(true)),
                conditioned(None, None),
            ])
        );
    }

    #[test]
    fn update_node_name_gate_enabled_allows_new_names() {
        let strategy = EndpointSliceStrategy::new(gates(false, true));
        let old = slice_of(vec![named(None), named(None)]);
        let mut new = slice_of(vec![named(Some("node-1")), named(Some("node-2"))]);
        let expected = new.clone();

        strategy.drop_disabled_fields_on_update(&old, &mut new);
        assert_eq!(new, expected);
    }

    #[test]
    fn update_node_name_gate_disabled_clears_newly_set_names() {
        let strategy = EndpointSliceStrategy::new(gates(false, false));
        let old = slice_of(vec![named(None), named(None)]);
        let mut new = slice_of(vec![named(Some("node-1")), named(Some("node-2"))]);

        strategy.drop_disabled_fields_on_update(&old, &mut new);
        assert_eq!(new, slice_of(vec![named(None), named(None)]));
    }

    #[test]
    fn update_node_name_gate_disabled_allows_changing_existing_names() {
        let strategy = EndpointSliceStrategy::new(gates(false, false));
        let old = slice_of(vec![named(Some("node-1-old")), named(Some("node-2-old"))]);
        let mut new = slice_of(vec![named(Some("node-1")), named(Some("node-2"))]);
        let expected = new.clone();

        strategy.drop_disabled_fields_on_update(&old, &mut new);
        assert_eq!(new, expected);
    }

    #[test]
    fn update_serving_flip_survives_when_old_had_it() {
        let strategy = EndpointSliceStrategy::new(gates(false, true));
        let old = slice_of(vec![conditioned(Some(true), None)]);
        let mut new = slice_of(vec![conditioned(Some(false), None)]);

        strategy.drop_disabled_fields_on_update(&old, &mut new);
        assert_eq!(new.endpoints[0].conditions.as_ref().unwrap().serving, Some(false));
    }
}
