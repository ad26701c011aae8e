//! The "dynamic result value" redesign: results are plain `serde_json::Value`,
//! which is already a sum type over null/bool/number/string/array/object, so
//! no bespoke enum is introduced. Equality and the method-specific `miner`
//! exclusion live here as free functions over `&Value`, never as a mutation
//! of either input.

use serde_json::Value;

/// The result-equality relation (spec §4.4): deep structural equality, except
/// that `eth_getBlockByNumber` excludes the `miner` field, which has been
/// observed to diverge between honest providers during node-software
/// transitions.
///
/// Reflexive and symmetric by construction (it is built from `==` and a
/// field-filtered comparison, neither of which favor an argument side).
pub fn results_equal(method: &str, a: &Value, b: &Value) -> bool {
    if method == "eth_getBlockByNumber" {
        eq_ignoring_field(a, b, "miner")
    } else {
        a == b
    }
}

/// Compare two JSON values for equality, ignoring `field` if both sides are
/// top-level objects. Nested occurrences of `field` (if any) are still
/// compared, since the divergence this exists to paper over is the
/// top-level `miner` address on a block object, not any coincidentally named
/// nested key.
fn eq_ignoring_field(a: &Value, b: &Value, field: &str) -> bool {
    match (a, b) {
        (Value::Object(a_map), Value::Object(b_map)) => {
            let a_keys: std::collections::BTreeSet<&String> =
                a_map.keys().filter(|k| k.as_str() != field).collect();
            let b_keys: std::collections::BTreeSet<&String> =
                b_map.keys().filter(|k| k.as_str() != field).collect();

            if a_keys != b_keys {
                return false;
            }

            a_keys
                .into_iter()
                .all(|k| a_map.get(k) == b_map.get(k))
        }
        _ => a == b,
    }
}

/// Groups `results` into equivalence classes under [`results_equal`] and
/// returns them sorted by class size, largest first. Ties in size keep the
/// relative order of first appearance.
pub fn group_by_equality<T: Clone>(
    method: &str,
    results: &[(T, Value)],
) -> Vec<(Value, Vec<T>)> {
    let mut classes: Vec<(Value, Vec<T>)> = Vec::new();

    for (id, value) in results {
        if let Some((_, members)) = classes
            .iter_mut()
            .find(|(existing, _)| results_equal(method, existing, value))
        {
            members.push(id.clone());
        } else {
            classes.push((value.clone(), vec![id.clone()]));
        }
    }

    classes.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    classes
}

/// The quorum policy (spec §4.4): how many equal responses are required
/// before a logical call's result is accepted.
pub fn required_quorum(method: &str, params: &Value, configured_threshold: usize) -> usize {
    match method {
        "eth_getLogs" => configured_threshold,
        "eth_getBlockByNumber" => {
            if is_latest_tag(params.get(0)) {
                1
            } else {
                configured_threshold
            }
        }
        "eth_call" => {
            if is_latest_tag(params.get(1)) {
                1
            } else {
                configured_threshold
            }
        }
        _ => 1,
    }
}

fn is_latest_tag(tag: Option<&Value>) -> bool {
    matches!(tag, Some(Value::String(s)) if s == "latest")
}

/// Parses a JSON-RPC block tag (`"0x..."`, `"latest"`, `"pending"`, ...) as a
/// concrete block number, returning `None` for anything that isn't a
/// hexadecimal integer literal.
pub fn parse_hex_block_tag(tag: &Value) -> Option<u64> {
    let s = tag.as_str()?;
    let s = s.strip_prefix("0x")?;

    u64::from_str_radix(s, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_log::test]
    fn equality_is_reflexive_and_symmetric() {
        let a = json!({"hash": "0x1", "miner": "0xaa"});
        let b = json!({"hash": "0x1", "miner": "0xbb"});

        assert!(results_equal("eth_getBlockByNumber", &a, &a));
        assert!(results_equal("eth_getBlockByNumber", &a, &b));
        assert!(results_equal("eth_getBlockByNumber", &b, &a));
    }

    #[test_log::test]
    fn miner_exclusion_is_scoped_to_eth_get_block_by_number() {
        let a = json!({"hash": "0x1", "miner": "0xaa"});
        let b = json!({"hash": "0x1", "miner": "0xbb"});

        assert!(!results_equal("some_other_method", &a, &b));
    }

    #[test_log::test]
    fn differing_non_miner_fields_still_disagree() {
        let a = json!({"hash": "0x1", "miner": "0xaa"});
        let b = json!({"hash": "0x2", "miner": "0xaa"});

        assert!(!results_equal("eth_getBlockByNumber", &a, &b));
    }

    #[test_log::test]
    fn quorum_for_get_logs_is_always_threshold() {
        assert_eq!(required_quorum("eth_getLogs", &json!([]), 3), 3);
    }

    #[test_log::test]
    fn quorum_for_latest_block_is_one() {
        let params = json!(["latest"]);
        assert_eq!(required_quorum("eth_getBlockByNumber", &params, 3), 1);
    }

    #[test_log::test]
    fn quorum_for_numeric_block_is_threshold() {
        let params = json!(["0x10"]);
        assert_eq!(required_quorum("eth_getBlockByNumber", &params, 3), 3);
    }

    #[test_log::test]
    fn quorum_for_eth_call_looks_at_second_param() {
        let latest = json!([{"to": "0x1"}, "latest"]);
        let numeric = json!([{"to": "0x1"}, "0x5"]);

        assert_eq!(required_quorum("eth_call", &latest, 3), 1);
        assert_eq!(required_quorum("eth_call", &numeric, 3), 3);
    }

    #[test_log::test]
    fn quorum_for_unrelated_methods_is_one() {
        assert_eq!(required_quorum("eth_gasPrice", &json!([]), 3), 1);
    }

    #[test_log::test]
    fn group_by_equality_picks_largest_class_first() {
        let results = vec![
            ("a", json!("0x10")),
            ("b", json!("0x11")),
            ("c", json!("0x10")),
        ];

        let groups = group_by_equality("eth_blockNumber", &results);

        assert_eq!(groups[0].0, json!("0x10"));
        assert_eq!(groups[0].1, vec!["a", "c"]);
        assert_eq!(groups[1].0, json!("0x11"));
        assert_eq!(groups[1].1, vec!["b"]);
    }

    #[test_log::test]
    fn parses_hex_block_tags_and_rejects_symbolic_ones() {
        assert_eq!(parse_hex_block_tag(&json!("0x10")), Some(0x10));
        assert_eq!(parse_hex_block_tag(&json!("latest")), None);
        assert_eq!(parse_hex_block_tag(&json!("pending")), None);
    }
}
